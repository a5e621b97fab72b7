//! Fixed-phase delivery workflow
//!
//! Runs plan → implement → integrate → merge → deploy → present, one routed
//! turn per phase, each on its own session scoped to the phase directory.
//! The first phase that does not succeed stops the run.

use crate::dispatch::{Dispatcher, TurnTranscript};
use crate::error::{Error, NoAgentReason, Result, RoutingError, SessionError};
use crate::session::SessionState;
use crate::types::{NormalizedEvent, TaskRequest, TurnOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

/// Characters of the previous phase's output carried into the next prompt
const DIGEST_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    Plan,
    Implement,
    Integrate,
    Merge,
    Deploy,
    Present,
}

impl WorkflowPhase {
    pub const ALL: [WorkflowPhase; 6] = [
        Self::Plan,
        Self::Implement,
        Self::Integrate,
        Self::Merge,
        Self::Deploy,
        Self::Present,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Integrate => "integrate",
            Self::Merge => "merge",
            Self::Deploy => "deploy",
            Self::Present => "present",
        }
    }

    /// Preferred capability; routing falls back to the default order without it
    pub fn capability(&self) -> &'static str {
        match self {
            Self::Plan => "planning",
            Self::Implement => "coding",
            Self::Integrate | Self::Merge => "git",
            Self::Deploy => "sandboxed",
            Self::Present => "long-context",
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            Self::Plan => {
                "Write a concise, numbered implementation plan. List the files to \
                 create or change and how the result will be verified."
            }
            Self::Implement => {
                "Implement the plan in the working directory. Keep changes focused \
                 and add tests where it makes sense."
            }
            Self::Integrate => {
                "Integrate the implementation: make sure it builds, the tests pass \
                 and the changes are committed on a feature branch."
            }
            Self::Merge => {
                "Merge the feature branch into the main branch, resolving any \
                 conflicts, and summarise what was merged."
            }
            Self::Deploy => {
                "Run the project's build and deployment steps in a sandbox and \
                 report the commands run and their results."
            }
            Self::Present => {
                "Summarise the whole delivery for a reviewer: what was built, how \
                 it was verified and any open issues."
            }
        }
    }

    /// Prompt for this phase given the goal and the previous phase's output
    pub fn prompt(&self, goal: &str, previous: Option<(WorkflowPhase, &str)>) -> String {
        let mut prompt = format!(
            "Goal: {}\n\nPhase: {}\n{}",
            goal.trim(),
            self.name(),
            self.instructions()
        );
        if let Some((phase, output)) = previous {
            let output = digest(output);
            if !output.is_empty() {
                prompt.push_str(&format!(
                    "\n\nOutput of the {} phase:\n{}",
                    phase.name(),
                    output
                ));
            }
        }
        prompt
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for WorkflowPhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown workflow phase: {}", s))
    }
}

/// Last `DIGEST_CHARS` characters of `output`
fn digest(output: &str) -> &str {
    let output = output.trim();
    let count = output.chars().count();
    if count <= DIGEST_CHARS {
        return output;
    }
    let skip = count - DIGEST_CHARS;
    match output.char_indices().nth(skip) {
        Some((i, _)) => &output[i..],
        None => output,
    }
}

/// Progress notifications for front-ends
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    PhaseStarted {
        phase: WorkflowPhase,
        agent: String,
        directory: PathBuf,
    },
    Output {
        phase: WorkflowPhase,
        event: NormalizedEvent,
    },
    PhaseFinished(PhaseReport),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: WorkflowPhase,
    pub agent: Option<String>,
    pub outcome: TurnOutcome,
    pub output: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    pub goal: String,
    pub root: PathBuf,
    pub phases: Vec<PhaseReport>,
}

impl WorkflowReport {
    /// Every phase ran and succeeded
    pub fn succeeded(&self) -> bool {
        self.phases.len() == WorkflowPhase::ALL.len()
            && self.phases.iter().all(|p| p.outcome.is_success())
    }

    pub fn failed_phase(&self) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| !p.outcome.is_success())
    }
}

pub struct WorkflowDriver<'a> {
    dispatcher: &'a Dispatcher,
    root: PathBuf,
    phase_dirs: BTreeMap<String, PathBuf>,
    timeout: Option<Duration>,
}

impl<'a> WorkflowDriver<'a> {
    pub fn new(dispatcher: &'a Dispatcher, root: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher,
            root: root.into(),
            phase_dirs: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Phase name to directory relative to the root
    pub fn with_phase_dirs(mut self, phase_dirs: BTreeMap<String, PathBuf>) -> Self {
        self.phase_dirs = phase_dirs;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Working directory of `phase`, created if missing
    pub fn phase_directory(&self, phase: WorkflowPhase) -> Result<PathBuf> {
        let dir = match self.phase_dirs.get(phase.name()) {
            Some(relative) => self.root.join(relative),
            None => self.root.clone(),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Run all phases in order, stopping at the first failure
    pub async fn run<F>(&self, goal: &str, mut observer: F) -> Result<WorkflowReport>
    where
        F: FnMut(WorkflowEvent),
    {
        if !self.root.is_dir() {
            return Err(SessionError::DirectoryNotFound(self.root.clone()).into());
        }

        let mut report = WorkflowReport {
            goal: goal.to_string(),
            root: self.root.clone(),
            phases: Vec::with_capacity(WorkflowPhase::ALL.len()),
        };
        let mut previous: Option<(WorkflowPhase, String)> = None;

        for phase in WorkflowPhase::ALL {
            let span = info_span!("workflow_phase", phase = phase.name());
            let phase_report = self
                .run_phase(phase, goal, previous.as_ref(), &mut observer)
                .instrument(span)
                .await?;

            let success = phase_report.outcome.is_success();
            previous = Some((phase, phase_report.output.clone()));
            observer(WorkflowEvent::PhaseFinished(phase_report.clone()));
            report.phases.push(phase_report);

            if !success {
                warn!(phase = phase.name(), "Workflow stopped");
                break;
            }
        }

        info!(phases = report.phases.len(), succeeded = report.succeeded(), "Workflow finished");
        Ok(report)
    }

    async fn run_phase<F>(
        &self,
        phase: WorkflowPhase,
        goal: &str,
        previous: Option<&(WorkflowPhase, String)>,
        observer: &mut F,
    ) -> Result<PhaseReport>
    where
        F: FnMut(WorkflowEvent),
    {
        let started = Instant::now();
        let directory = self.phase_directory(phase)?;
        let session = SessionState::new(
            format!("workflow-{}-{}", phase.name(), uuid::Uuid::new_v4()),
            &directory,
        )
        .into_handle();

        let prompt = phase.prompt(goal, previous.map(|(p, out)| (*p, out.as_str())));
        let mut request = TaskRequest::new(prompt)
            .with_working_directory(&directory)
            .with_capabilities([phase.capability()]);
        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }

        let turn = match self.dispatcher.route_and_run(request.clone(), session.clone()).await {
            Ok(turn) => Ok(turn),
            Err(Error::Routing(RoutingError::NoAgentAvailable(NoAgentReason::NoCapabilityMatch {
                ..
            }))) => {
                info!(
                    capability = phase.capability(),
                    "No agent for phase capability, using default order"
                );
                request.capabilities.clear();
                self.dispatcher.route_and_run(request, session).await
            }
            Err(e) => Err(e),
        };

        let mut turn = match turn {
            Ok(turn) => turn,
            Err(e) if e.is_no_agent_available() => {
                return Ok(PhaseReport {
                    phase,
                    agent: None,
                    outcome: TurnOutcome::NotStarted {
                        reason: e.to_string(),
                    },
                    output: String::new(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(e) => return Err(e),
        };

        observer(WorkflowEvent::PhaseStarted {
            phase,
            agent: turn.agent().to_string(),
            directory,
        });

        let agent = turn.agent().to_string();
        let mut transcript = TurnTranscript::default();
        while let Some(event) = turn.next_event().await {
            observer(WorkflowEvent::Output {
                phase,
                event: event.clone(),
            });
            transcript.push(event);
        }

        let outcome = transcript
            .summary
            .as_ref()
            .map(|s| s.outcome.clone())
            .unwrap_or(TurnOutcome::ExecutionFailed { code: None });

        Ok(PhaseReport {
            phase,
            agent: Some(agent),
            outcome,
            output: transcript.text(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Resolve the workflow root, defaulting to the current directory
pub fn resolve_root(root: Option<&Path>) -> Result<PathBuf> {
    let root = match root {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir()?,
    };
    Ok(root.canonicalize().unwrap_or(root))
}
