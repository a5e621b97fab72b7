//! LastAgent - routes tasks to command-line coding agents
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use clap::Parser;
use lastagent_cli::cli::{self, Cli};
use owo_colors::OwoColorize;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
