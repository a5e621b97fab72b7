//! Interactive session
//!
//! Every line that is not a `/command` is one routed turn on the same
//! session, so `/agent` and `/cd` carry over between prompts. Ctrl-C cancels
//! the running agent; at the prompt it leaves the REPL.

use crate::commands::run_turn;
use crate::render::{format_agents, Renderer};
use crate::AppContext;
use lastagent_core::{SessionHandle, TaskRequest};
use owo_colors::OwoColorize;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

const HELP: &str = "\
Commands:
  /agent NAME     use NAME for the following prompts
  /agent          go back to automatic routing
  /agents [CAP]   list agents, optionally by capability
  /cd DIR         change the working directory
  /history        show this session's turns
  /help           show this help
  /exit           leave
Anything else is sent to the routed agent. Ctrl-C cancels a running turn.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Prompt(String),
    Agent(Option<String>),
    Agents(Option<String>),
    Cd(String),
    History,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Prompt(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim().to_string()).filter(|a| !a.is_empty())),
            None => (command, None),
        };

        match name {
            "agent" => Self::Agent(arg.filter(|a| a != "auto")),
            "agents" => Self::Agents(arg),
            "cd" => Self::Cd(arg.unwrap_or_else(|| "~".to_string())),
            "history" => Self::History,
            "help" | "?" => Self::Help,
            "exit" | "quit" | "q" => Self::Exit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplOptions {
    pub capabilities: Vec<String>,
    pub system: Option<String>,
    pub timeout_secs: Option<u64>,
    pub markdown: bool,
}

pub async fn run(
    ctx: &AppContext,
    session: SessionHandle,
    options: ReplOptions,
) -> anyhow::Result<()> {
    let mut renderer = Renderer::new(options.markdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!(
        "{} {}",
        "LastAgent".bold(),
        "- type /help for commands, /exit to leave".dimmed()
    );

    loop {
        print_prompt(&session).await;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Exit => break,
            ReplCommand::Help => eprintln!("{}", HELP),
            ReplCommand::Unknown(name) => {
                eprintln!("{} unknown command /{} (try /help)", "?".yellow(), name)
            }
            ReplCommand::Agent(agent) => {
                match ctx.dispatcher.switch_agent(&session, agent.as_deref()).await {
                    Ok(()) => match agent {
                        Some(name) => eprintln!("{} using {}", "✓".green(), name.bold()),
                        None => eprintln!("{} automatic routing", "✓".green()),
                    },
                    Err(e) => eprintln!("{} {}", "✗".red(), e),
                }
            }
            ReplCommand::Agents(capability) => {
                eprint!("{}", format_agents(&ctx.dispatcher.list_agents(capability.as_deref())));
            }
            ReplCommand::Cd(dir) => {
                let dir = expand_home(&dir);
                let mut state = session.lock().await;
                match state.change_directory(&dir) {
                    Ok(path) => eprintln!("{} {}", "✓".green(), path.display()),
                    Err(e) => eprintln!("{} {}", "✗".red(), e),
                }
            }
            ReplCommand::History => {
                let state = session.lock().await;
                if state.history().is_empty() {
                    eprintln!("{}", "No turns yet.".dimmed());
                }
                for (i, entry) in state.history().iter().enumerate() {
                    eprintln!(
                        "{:>3}. {:<8} {:<18} {}",
                        i + 1,
                        entry.agent.as_deref().unwrap_or("-"),
                        entry.outcome.label(),
                        entry.prompt_preview.dimmed()
                    );
                }
            }
            ReplCommand::Prompt(prompt) => {
                let request = build_request(prompt, &options);
                let turn = run_turn(&ctx.dispatcher, request, session.clone(), &mut renderer);
                if let Err(e) = turn.await {
                    eprintln!("{} {}", "✗".red(), e);
                }
            }
        }
    }

    debug!("REPL finished");
    Ok(())
}

fn build_request(prompt: String, options: &ReplOptions) -> TaskRequest {
    let mut request = TaskRequest::new(prompt)
        .with_capabilities(options.capabilities.iter().cloned())
        .with_markdown(options.markdown);
    if let Some(system) = &options.system {
        request = request.with_system_prompt(system.clone());
    }
    if let Some(secs) = options.timeout_secs {
        request = request.with_timeout(Duration::from_secs(secs));
    }
    request
}

async fn print_prompt(session: &SessionHandle) {
    let label = {
        let state = session.lock().await;
        state.active_agent().unwrap_or("auto").to_string()
    };
    print!("{} ", format!("{}>", label).cyan().bold());
    let _ = std::io::stdout().flush();
}

fn expand_home(dir: &str) -> std::path::PathBuf {
    if let Some(rest) = dir.strip_prefix('~') {
        if let Some(home) = std::env::var_os("HOME") {
            return std::path::PathBuf::from(home).join(rest.trim_start_matches('/'));
        }
    }
    std::path::PathBuf::from(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse("  "), ReplCommand::Empty);
        assert_eq!(
            ReplCommand::parse("fix the bug"),
            ReplCommand::Prompt("fix the bug".to_string())
        );
        assert_eq!(
            ReplCommand::parse("/agent aider"),
            ReplCommand::Agent(Some("aider".to_string()))
        );
        assert_eq!(ReplCommand::parse("/agent"), ReplCommand::Agent(None));
        assert_eq!(ReplCommand::parse("/agent auto"), ReplCommand::Agent(None));
        assert_eq!(ReplCommand::parse("/agents git"), ReplCommand::Agents(Some("git".to_string())));
        assert_eq!(ReplCommand::parse("/cd ../src"), ReplCommand::Cd("../src".to_string()));
        assert_eq!(ReplCommand::parse("/history"), ReplCommand::History);
        assert_eq!(ReplCommand::parse("/quit"), ReplCommand::Exit);
        assert_eq!(ReplCommand::parse("/bogus x"), ReplCommand::Unknown("bogus".to_string()));
    }

    #[test]
    fn test_build_request_carries_options() {
        let options = ReplOptions {
            capabilities: vec!["git".to_string()],
            system: Some("terse".to_string()),
            timeout_secs: Some(5),
            markdown: false,
        };
        let request = build_request("go".to_string(), &options);
        assert_eq!(request.capabilities, vec!["git".to_string()]);
        assert_eq!(request.full_prompt(), "terse\n\ngo");
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
        assert!(request.forced_agent.is_none());
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_home("~/code"), std::path::PathBuf::from("/home/tester/code"));
        assert_eq!(expand_home("/abs"), std::path::PathBuf::from("/abs"));
    }
}
