//! Command-line interface
//!
//! - `chat [PROMPT]`: one routed turn, or the REPL when no prompt is given
//! - `agents`: list registered agents and their availability
//! - `server`: OpenAI-compatible REST API
//! - `mcp`: JSON-RPC tool server over stdio
//! - `workflow GOAL`: plan → implement → integrate → merge → deploy → present

use crate::commands::{self, ChatOptions};
use crate::logging::{self, LogFormat};
use crate::mcp::McpBridge;
use crate::repl::{self, ReplOptions};
use crate::server::{self, ServerState};
use crate::AppContext;
use clap::{Args, Parser, Subcommand};
use lastagent_core::Settings;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

/// LastAgent - one front door for your coding agents
#[derive(Parser, Debug)]
#[command(name = "lastagent")]
#[command(about = "Route tasks to the right command-line coding agent")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ~/.config/lastagent/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Agent used when a task names no capability
    #[arg(long, global = true, value_name = "NAME")]
    pub default_agent: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one task, or start an interactive session without a prompt
    Chat(ChatArgs),
    /// List agents
    Agents {
        /// Only agents with this capability
        #[arg(long, short)]
        capability: Option<String>,
        /// Probe PATH again instead of using cached availability
        #[arg(long)]
        refresh: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Start the OpenAI-compatible REST server
    Server {
        #[arg(long)]
        host: Option<String>,
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Serve the MCP tool protocol over stdio
    Mcp,
    /// Drive a goal through every workflow phase
    Workflow {
        goal: String,
        /// Workflow root directory (default: current directory)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Per-phase timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    /// Task for the agent; omit to start the REPL
    pub prompt: Option<String>,
    /// Use this agent instead of routing
    #[arg(long, short)]
    pub agent: Option<String>,
    /// Prefer agents with this capability (repeatable)
    #[arg(long = "capability", short = 'c', value_name = "CAP")]
    pub capabilities: Vec<String>,
    /// System prompt prepended to the task
    #[arg(long)]
    pub system: Option<String>,
    /// Working directory for the agent
    #[arg(long)]
    pub cwd: Option<PathBuf>,
    /// Timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Print the answer once the agent finishes
    #[arg(long)]
    pub no_stream: bool,
    /// Style markdown in the answer
    #[arg(long)]
    pub markdown: bool,
}

impl Commands {
    /// Quiet by default where stdout/stderr belong to the conversation
    fn default_log_level(&self) -> &'static str {
        match self {
            Commands::Server { .. } => "info,tower_http=info",
            _ => "warn",
        }
    }
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(ExitCode::SUCCESS);
    };

    let mut settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = logging::init(
        LogFormat::resolve(cli.log_format),
        command.default_log_level(),
        &settings.logging,
    );
    settings.apply_overrides(cli.default_agent);
    let ctx = AppContext::new(settings)?;
    debug!(agents = ctx.dispatcher.registry().list().len(), "Dispatcher ready");

    match command {
        Commands::Chat(args) => chat(&ctx, args).await,
        Commands::Agents {
            capability,
            refresh,
            json,
        } => {
            commands::agents(&ctx, capability.as_deref(), refresh, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Server { host, port } => {
            let host = host.unwrap_or_else(|| ctx.settings.server.host.clone());
            let port = port.unwrap_or(ctx.settings.server.port);
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            server::serve(Arc::new(ServerState::new(ctx)), addr).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Mcp => {
            McpBridge::new(ctx).run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Workflow {
            goal,
            root,
            timeout,
        } => commands::workflow(&ctx, &goal, root, timeout).await,
    }
}

async fn chat(ctx: &AppContext, args: ChatArgs) -> anyhow::Result<ExitCode> {
    match args.prompt {
        Some(prompt) => {
            let options = ChatOptions {
                prompt,
                agent: args.agent,
                capabilities: args.capabilities,
                system: args.system,
                cwd: args.cwd,
                timeout_secs: args.timeout,
                no_stream: args.no_stream,
                markdown: args.markdown,
            };
            Ok(commands::chat(ctx, options).await?.exit_code())
        }
        None => {
            let (id, session) = ctx.sessions.create();
            info!(session_id = %id, "Starting interactive session");
            if let Some(cwd) = &args.cwd {
                session.lock().await.change_directory(cwd)?;
            }
            if args.agent.is_some() {
                ctx.dispatcher.switch_agent(&session, args.agent.as_deref()).await?;
            }
            let options = ReplOptions {
                capabilities: args.capabilities,
                system: args.system,
                timeout_secs: args.timeout,
                markdown: args.markdown,
            };
            repl::run(ctx, session, options).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
