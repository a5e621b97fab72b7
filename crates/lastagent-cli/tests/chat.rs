//! One-shot chat against real `sh` agents

#![cfg(unix)]

use lastagent_cli::commands::{self, should_fall_back, ChatOptions};
use lastagent_cli::AppContext;
use lastagent_core::{
    AgentDescriptor, AgentRegistry, AvailabilityMode, Dispatcher, InvocationSpec, NormalizedEvent,
    PathProbe, Router, RouterConfig, Settings, Supervisor, SupervisorConfig, TaskRequest,
    TurnOutcome, TurnSummary, TurnTranscript,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn sh_agent(name: &str, script: &str) -> AgentDescriptor {
    AgentDescriptor::new(name, InvocationSpec::new("sh").with_args(["-c", script]))
}

fn context(agents: Vec<AgentDescriptor>, fallback: bool) -> AppContext {
    let registry =
        AgentRegistry::new(agents, Arc::new(PathProbe::from_env()), AvailabilityMode::Live)
            .unwrap();
    let dispatcher = Dispatcher::new(
        Router::new(Arc::new(registry), RouterConfig::default()),
        Supervisor::new(SupervisorConfig::default()),
    );
    let settings = Settings {
        fallback_on_failure: fallback,
        ..Default::default()
    };
    AppContext::with_dispatcher(settings, dispatcher, std::env::temp_dir())
}

fn options(dir: &tempfile::TempDir) -> ChatOptions {
    ChatOptions {
        prompt: "do the thing".to_string(),
        cwd: Some(dir.path().to_path_buf()),
        no_stream: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_silent_failure_falls_back_to_next_agent() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        vec![sh_agent("A", "echo nope >&2; exit 1"), sh_agent("B", "echo rescued")],
        true,
    );

    let report = commands::chat(&ctx, options(&dir)).await.unwrap();
    assert_eq!(report.agents(), vec!["A", "B"]);
    assert_eq!(report.attempts[0].outcome, TurnOutcome::ExecutionFailed { code: Some(1) });
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_failure_after_text_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        vec![sh_agent("A", "echo partial; exit 1"), sh_agent("B", "echo rescued")],
        true,
    );

    let report = commands::chat(&ctx, options(&dir)).await.unwrap();
    assert_eq!(report.agents(), vec!["A"]);
    assert!(!report.succeeded());
}

#[tokio::test]
async fn test_fallback_disabled_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(vec![sh_agent("A", "exit 1"), sh_agent("B", "echo rescued")], false);

    let report = commands::chat(&ctx, options(&dir)).await.unwrap();
    assert_eq!(report.agents(), vec!["A"]);
    assert!(!report.no_agent);
}

#[tokio::test]
async fn test_forced_agent_is_never_substituted() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(vec![sh_agent("A", "echo rescued"), sh_agent("B", "exit 1")], true);

    let report = commands::chat(
        &ctx,
        ChatOptions {
            agent: Some("B".to_string()),
            ..options(&dir)
        },
    )
    .await
    .unwrap();
    assert_eq!(report.agents(), vec!["B"]);
    assert!(!report.succeeded());
}

#[tokio::test]
async fn test_every_agent_failing_ends_with_no_agent() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(vec![sh_agent("A", "exit 1"), sh_agent("B", "exit 2")], true);

    let report = commands::chat(&ctx, options(&dir)).await.unwrap();
    assert_eq!(report.agents(), vec!["A", "B"]);
    assert!(report.no_agent);
    assert!(!report.succeeded());
}

#[test]
fn test_cancelled_turn_never_falls_back() {
    let mut transcript = TurnTranscript::default();
    transcript.push(NormalizedEvent::Done(TurnSummary {
        agent: "A".to_string(),
        outcome: TurnOutcome::Cancelled,
        exit_code: None,
        chars: 0,
        duration_ms: 10,
        pid: None,
        stderr_tail: None,
    }));

    let request = TaskRequest::new("x");
    assert!(!should_fall_back(true, &request, &transcript));

    let mut timed_out = TurnTranscript::default();
    timed_out.push(NormalizedEvent::Done(TurnSummary {
        outcome: TurnOutcome::TimedOut,
        ..transcript.summary.clone().unwrap()
    }));
    assert!(should_fall_back(true, &request, &timed_out));
    assert!(!should_fall_back(false, &request, &timed_out));
}
