//! One-shot commands: `chat`, `agents`, `workflow`

use crate::render::{format_agents, Renderer};
use crate::AppContext;
use lastagent_core::{
    Dispatcher, NormalizedEvent, SessionHandle, SessionState, TaskRequest, TurnOutcome,
    TurnSummary, TurnTranscript, WorkflowDriver, WorkflowEvent,
};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

/// Exit status when no agent could take the task
pub const EXIT_NO_AGENT: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub prompt: String,
    pub agent: Option<String>,
    pub capabilities: Vec<String>,
    pub system: Option<String>,
    pub cwd: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub no_stream: bool,
    pub markdown: bool,
}

impl ChatOptions {
    pub fn to_request(&self) -> TaskRequest {
        let mut request = TaskRequest::new(self.prompt.clone())
            .with_capabilities(self.capabilities.iter().cloned())
            .with_stream(!self.no_stream)
            .with_markdown(self.markdown);
        if let Some(agent) = &self.agent {
            request = request.with_agent(agent.clone());
        }
        if let Some(system) = &self.system {
            request = request.with_system_prompt(system.clone());
        }
        if let Some(cwd) = &self.cwd {
            request = request.with_working_directory(cwd.clone());
        }
        if let Some(secs) = self.timeout_secs {
            request = request.with_timeout(Duration::from_secs(secs));
        }
        request
    }
}

/// Run one turn, rendering events as they arrive (or at the end when not
/// streaming). Ctrl-C cancels the running agent.
pub async fn run_turn(
    dispatcher: &Dispatcher,
    request: TaskRequest,
    session: SessionHandle,
    renderer: &mut Renderer,
) -> lastagent_core::Result<TurnTranscript> {
    let stream = request.stream;
    let mut turn = dispatcher.route_and_run(request, session).await?;

    let cancel = turn.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut transcript = TurnTranscript::default();
    let mut buffered = Vec::new();
    while let Some(event) = turn.next_event().await {
        if stream || matches!(event, NormalizedEvent::Error { .. }) {
            renderer.render(&event);
        } else {
            buffered.push(event.clone());
        }
        transcript.push(event);
    }
    interrupt.abort();

    for event in &buffered {
        renderer.render(event);
    }

    Ok(transcript)
}

/// How a one-shot chat ended
#[derive(Debug, Clone, Default)]
pub struct ChatReport {
    /// Summary of every turn that ran, in order
    pub attempts: Vec<TurnSummary>,
    /// Routing found no agent for the (last) attempt
    pub no_agent: bool,
}

impl ChatReport {
    pub fn succeeded(&self) -> bool {
        self.attempts.last().is_some_and(|s| s.outcome.is_success())
    }

    pub fn agents(&self) -> Vec<&str> {
        self.attempts.iter().map(|s| s.agent.as_str()).collect()
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.succeeded() {
            ExitCode::SUCCESS
        } else if self.no_agent && self.attempts.is_empty() {
            ExitCode::from(EXIT_NO_AGENT)
        } else {
            ExitCode::FAILURE
        }
    }
}

/// Whether a failed turn may be retried on another agent.
///
/// Forced agents are never substituted, and a turn that already printed text
/// or was cancelled by the user ends the chat.
pub fn should_fall_back(enabled: bool, request: &TaskRequest, transcript: &TurnTranscript) -> bool {
    let Some(summary) = transcript.summary.as_ref() else {
        return false;
    };
    enabled
        && !summary.outcome.is_success()
        && request.forced_agent.is_none()
        && transcript.text().is_empty()
        && summary.outcome != TurnOutcome::Cancelled
}

/// `lastagent chat PROMPT`
///
/// With `fallback_on_failure` set, a turn that fails without producing any
/// text is retried on the next agent, excluding those that already failed.
pub async fn chat(ctx: &AppContext, options: ChatOptions) -> anyhow::Result<ChatReport> {
    let mut request = options.to_request();
    let cwd = match &options.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir()?,
    };
    let session = SessionState::new(uuid::Uuid::new_v4().to_string(), cwd).into_handle();
    let mut renderer = Renderer::new(options.markdown);
    let mut report = ChatReport::default();

    loop {
        let turn = run_turn(&ctx.dispatcher, request.clone(), session.clone(), &mut renderer);
        let transcript = match turn.await {
            Ok(transcript) => transcript,
            Err(e) if e.is_no_agent_available() => {
                eprintln!("{} {}", "✗".red(), e);
                report.no_agent = true;
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        let retry = should_fall_back(ctx.settings.fallback_on_failure, &request, &transcript);
        let Some(summary) = transcript.summary else {
            return Ok(report);
        };
        report.attempts.push(summary.clone());
        if !retry {
            return Ok(report);
        }

        warn!(
            agent = %summary.agent,
            outcome = summary.outcome.label(),
            "Falling back to another agent"
        );
        eprintln!("{} {} failed, trying another agent", "↻".yellow(), summary.agent);
        request = request.excluding(summary.agent);
    }
}

/// `lastagent agents`
pub fn agents(
    ctx: &AppContext,
    capability: Option<&str>,
    refresh: bool,
    json: bool,
) -> anyhow::Result<()> {
    if refresh {
        ctx.dispatcher.refresh_availability();
    }
    let agents = ctx.dispatcher.list_agents(capability);
    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
    } else {
        print!("{}", format_agents(&agents));
    }
    Ok(())
}

/// `lastagent workflow GOAL`
pub async fn workflow(
    ctx: &AppContext,
    goal: &str,
    root: Option<PathBuf>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let root = lastagent_core::workflow::resolve_root(root.as_deref())?;
    let mut driver = WorkflowDriver::new(&ctx.dispatcher, &root)
        .with_phase_dirs(ctx.settings.workflow.phase_dirs.clone());
    if let Some(secs) = timeout_secs {
        driver = driver.with_timeout(Duration::from_secs(secs));
    }

    info!(root = %root.display(), "Starting workflow");
    let mut renderer = Renderer::new(true);
    let report = driver
        .run(goal, |event| match event {
            WorkflowEvent::PhaseStarted { phase, agent, directory } => {
                eprintln!(
                    "\n{} {} {} {}",
                    "▶".cyan(),
                    phase.name().bold(),
                    format!("via {}", agent).dimmed(),
                    format!("in {}", directory.display()).dimmed()
                );
            }
            WorkflowEvent::Output { event, .. } => renderer.render(&event),
            WorkflowEvent::PhaseFinished(phase) => {
                if let TurnOutcome::NotStarted { reason } = &phase.outcome {
                    eprintln!("{} {} {}", "✗".red(), phase.phase.name().bold(), reason);
                }
            }
        })
        .await?;

    eprintln!();
    for phase in &report.phases {
        let mark = if phase.outcome.is_success() {
            format!("{}", "✓".green())
        } else {
            format!("{}", "✗".red())
        };
        eprintln!(
            "{} {:<10} {:<8} {}",
            mark,
            phase.phase.name(),
            phase.agent.as_deref().unwrap_or("-"),
            phase.outcome
        );
    }

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_options_to_request() {
        let options = ChatOptions {
            prompt: "fix it".to_string(),
            agent: Some("aider".to_string()),
            capabilities: vec!["git".to_string()],
            system: Some("be brief".to_string()),
            cwd: Some(PathBuf::from("/tmp")),
            timeout_secs: Some(30),
            no_stream: true,
            markdown: true,
        };

        let request = options.to_request();
        assert_eq!(request.forced_agent.as_deref(), Some("aider"));
        assert_eq!(request.capabilities, vec!["git".to_string()]);
        assert_eq!(request.full_prompt(), "be brief\n\nfix it");
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
        assert!(!request.stream);
        assert!(request.render_markdown);
    }
}
