//! Workflow runs against real `sh` agents

#![cfg(unix)]

use lastagent_core::{
    AgentDescriptor, AgentRegistry, AvailabilityMode, Dispatcher, InvocationSpec, PathProbe,
    Router, RouterConfig, Supervisor, SupervisorConfig, TurnOutcome, WorkflowDriver, WorkflowEvent,
    WorkflowPhase,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// `sh -c SCRIPT PROMPT`, so the script sees its prompt as `$0`
fn sh_agent(name: &str, script: &str, caps: &[&str]) -> AgentDescriptor {
    AgentDescriptor::new(name, InvocationSpec::new("sh").with_args(["-c", script]))
        .with_capabilities(caps.iter().copied())
}

fn dispatcher(agents: Vec<AgentDescriptor>) -> Dispatcher {
    let registry =
        AgentRegistry::new(agents, Arc::new(PathProbe::from_env()), AvailabilityMode::Live)
            .unwrap();
    Dispatcher::new(
        Router::new(Arc::new(registry), RouterConfig::default()),
        Supervisor::new(SupervisorConfig::default()),
    )
}

const ALL_CAPS: [&str; 5] = ["planning", "coding", "git", "sandboxed", "long-context"];

#[tokio::test]
async fn test_all_phases_run_in_their_directories() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(vec![sh_agent(
        "worker",
        r#"echo "$0" > prompt.txt; echo "ran in $(basename "$(pwd -P)")""#,
        &ALL_CAPS,
    )]);

    let mut phase_dirs = BTreeMap::new();
    phase_dirs.insert("implement".to_string(), PathBuf::from("impl"));
    phase_dirs.insert("deploy".to_string(), PathBuf::from("out/deploy"));

    let mut started = Vec::new();
    let report = WorkflowDriver::new(&dispatcher, root.path())
        .with_phase_dirs(phase_dirs)
        .run("ship it", |event| {
            if let WorkflowEvent::PhaseStarted { phase, agent, .. } = event {
                started.push((phase, agent));
            }
        })
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(
        started.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
        WorkflowPhase::ALL.to_vec()
    );
    assert!(started.iter().all(|(_, agent)| agent == "worker"));

    let implement = std::fs::read_to_string(root.path().join("impl/prompt.txt")).unwrap();
    let root_name = root.path().canonicalize().unwrap();
    let root_name = root_name.file_name().unwrap().to_string_lossy();
    assert!(implement.contains("Phase: implement"));
    assert!(implement.contains(&format!("Output of the plan phase:\nran in {}", root_name)));

    assert_eq!(report.phases[4].output, "ran in deploy");
    let present = std::fs::read_to_string(root.path().join("prompt.txt")).unwrap();
    assert!(present.contains("Phase: present"));
    assert!(present.contains("Output of the deploy phase:\nran in deploy"));
}

#[tokio::test]
async fn test_first_failing_phase_stops_the_run() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(vec![
        sh_agent("planner", "echo the plan", &["planning"]),
        sh_agent("coder", "echo broke >&2; exit 4", &["coding"]),
        sh_agent("committer", "touch committed", &["git"]),
    ]);

    let mut finished = 0;
    let report = WorkflowDriver::new(&dispatcher, root.path())
        .run("ship it", |event| {
            if matches!(event, WorkflowEvent::PhaseFinished(_)) {
                finished += 1;
            }
        })
        .await
        .unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.phases.len(), 2);
    assert_eq!(finished, 2);
    assert_eq!(report.phases[0].agent.as_deref(), Some("planner"));
    assert_eq!(report.phases[0].output, "the plan");

    let failed = report.failed_phase().unwrap();
    assert_eq!(failed.phase, WorkflowPhase::Implement);
    assert_eq!(failed.agent.as_deref(), Some("coder"));
    assert_eq!(failed.outcome, TurnOutcome::ExecutionFailed { code: Some(4) });
    assert!(!root.path().join("committed").exists());
}

#[tokio::test]
async fn test_phase_capability_is_only_a_preference() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(vec![sh_agent("generalist", "echo fine", &[])]);

    let report = WorkflowDriver::new(&dispatcher, root.path())
        .run("ship it", |_| {})
        .await
        .unwrap();

    assert!(report.succeeded());
    assert!(report
        .phases
        .iter()
        .all(|p| p.agent.as_deref() == Some("generalist") && p.output == "fine"));
}

#[tokio::test]
async fn test_no_agent_at_all_reports_not_started() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(vec![AgentDescriptor::new(
        "ghost",
        InvocationSpec::new("lastagent-test-missing-agent"),
    )]);

    let report = WorkflowDriver::new(&dispatcher, root.path())
        .run("ship it", |_| {})
        .await
        .unwrap();

    assert_eq!(report.phases.len(), 1);
    assert_eq!(report.phases[0].agent, None);
    assert!(matches!(report.phases[0].outcome, TurnOutcome::NotStarted { .. }));
}

#[tokio::test]
async fn test_missing_root_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(vec![sh_agent("generalist", "echo fine", &[])]);

    let result = WorkflowDriver::new(&dispatcher, root.path().join("missing"))
        .run("ship it", |_| {})
        .await;
    assert!(result.is_err());
}
