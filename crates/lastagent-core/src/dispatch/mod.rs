//! Dispatcher: the single entry point front-ends call
//!
//! `route_and_run` locks the session, asks the router for an agent, starts it
//! under the supervisor and hands back a [`Turn`] whose events are produced by
//! a background task. That task appends the turn to the session history before
//! the terminal `Done` is delivered, and releases the session afterwards.

mod decisions;
mod turn;

pub use decisions::{DecisionLog, DEFAULT_DECISION_CAPACITY};
pub use turn::{EventStream, Turn, TurnTranscript};

use crate::agent::{AgentRegistry, Router};
use crate::error::{Result, SessionError};
use crate::normalize::Normalizer;
use crate::process::{ProcessExit, RawChunk, RawStream, Supervisor};
use crate::session::{SessionHandle, SessionState};
use crate::types::{
    AgentSummary, DecisionRecord, HistoryEntry, NormalizedEvent, Rationale, TaskRequest,
    TurnOutcome, TurnSummary,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, info_span, warn, Instrument};

pub struct Dispatcher {
    router: Router,
    supervisor: Supervisor,
    decisions: Arc<DecisionLog>,
}

impl Dispatcher {
    pub fn new(router: Router, supervisor: Supervisor) -> Self {
        Self {
            router,
            supervisor,
            decisions: Arc::new(DecisionLog::default()),
        }
    }

    pub fn with_decision_log(mut self, decisions: DecisionLog) -> Self {
        self.decisions = Arc::new(decisions);
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        self.router.registry()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn list_agents(&self, capability: Option<&str>) -> Vec<AgentSummary> {
        self.registry().summaries(capability)
    }

    /// Forget cached availability so the next listing or routing probes again
    pub fn refresh_availability(&self) {
        self.registry().invalidate();
    }

    /// Most recent routing decisions across all sessions, newest first
    pub fn recent_decisions(&self, limit: usize) -> Vec<DecisionRecord> {
        self.decisions.recent(limit)
    }

    /// Set or clear the session's persistent agent override
    pub async fn switch_agent(&self, session: &SessionHandle, agent: Option<&str>) -> Result<()> {
        if let Some(name) = agent {
            if !self.registry().contains(name) {
                return Err(SessionError::UnknownAgent(name.to_string()).into());
            }
        }
        session.lock().await.set_active_agent(agent.map(str::to_string));
        Ok(())
    }

    /// Route `request` within `session` and start the chosen agent.
    ///
    /// Routing failures and a missing working directory return `Err` before
    /// anything is spawned; they are still recorded in the session history.
    /// Everything that happens after spawn is reported through the turn's
    /// events, which always end with exactly one `Done`.
    pub async fn route_and_run(
        &self,
        request: TaskRequest,
        session: SessionHandle,
    ) -> Result<Turn> {
        let mut guard = session.lock_owned().await;
        let turn_id = uuid::Uuid::new_v4();
        let started_at = chrono::Utc::now();

        let span = info_span!(
            "turn",
            session_id = %guard.id,
            turn_id = %turn_id,
            agent = field::Empty,
            rationale = field::Empty,
        );

        let decision = match self.router.select(&request, guard.active_agent()) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(parent: &span, "Routing failed: {}", e);
                guard.apply_turn(not_started(
                    turn_id,
                    &request,
                    None,
                    None,
                    e.to_string(),
                    started_at,
                ));
                return Err(e.into());
            }
        };

        span.record("agent", field::display(decision.agent_name()));
        span.record("rationale", field::display(decision.rationale));

        self.decisions.record(DecisionRecord {
            turn_id,
            session_id: guard.id.clone(),
            agent: decision.agent.name.clone(),
            rationale: decision.rationale,
            alternatives: decision.alternatives.clone(),
            outcome: None,
            decided_at: decision.decided_at,
        });

        let cwd: PathBuf = request
            .working_directory
            .clone()
            .unwrap_or_else(|| guard.working_directory().to_path_buf());

        if !cwd.is_dir() {
            let err = SessionError::DirectoryNotFound(cwd);
            warn!(parent: &span, "Turn rejected: {}", err);
            let entry = not_started(
                turn_id,
                &request,
                Some(decision.agent.name.clone()),
                Some(decision.rationale),
                err.to_string(),
                started_at,
            );
            self.decisions.complete(turn_id, entry.outcome.clone());
            guard.apply_turn(entry);
            return Err(err.into());
        }

        info!(
            parent: &span,
            alternatives = ?decision.alternatives,
            cwd = %cwd.display(),
            "Turn routed"
        );

        let cancel = CancellationToken::new();
        let raw = span.in_scope(|| self.supervisor.run(&decision, &request, &cwd, cancel.clone()));

        let config = self.supervisor.config();
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));

        let driver = TurnDriver {
            turn_id,
            prompt_preview: request.preview(),
            rationale: decision.rationale,
            started_at,
            normalizer: Normalizer::new(decision.agent.name.clone(), config.max_line_bytes),
            session: guard,
            decisions: Arc::clone(&self.decisions),
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run(raw, tx).instrument(span));

        Ok(Turn::new(turn_id, decision, EventStream::new(rx), cancel))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", self.registry())
            .field("supervisor", &self.supervisor)
            .field("decisions", &self.decisions.len())
            .finish()
    }
}

/// Background half of a turn: normalizes raw output, forwards events and
/// finalizes the session record
struct TurnDriver {
    turn_id: uuid::Uuid,
    prompt_preview: String,
    rationale: Rationale,
    started_at: chrono::DateTime<chrono::Utc>,
    normalizer: Normalizer,
    session: OwnedMutexGuard<SessionState>,
    decisions: Arc<DecisionLog>,
    cancel: CancellationToken,
}

impl TurnDriver {
    async fn run(mut self, mut raw: RawStream, tx: mpsc::Sender<NormalizedEvent>) {
        let mut consumer_gone = false;

        loop {
            let chunk = tokio::select! {
                chunk = raw.recv() => chunk,
                _ = tx.closed(), if !consumer_gone => {
                    debug!("Event consumer dropped, cancelling turn");
                    consumer_gone = true;
                    self.cancel.cancel();
                    continue;
                }
            };

            let chunk = match chunk {
                Some(chunk) => chunk,
                None if self.normalizer.is_finished() => break,
                None => {
                    warn!("Supervisor ended without exit status");
                    RawChunk::Exit(ProcessExit {
                        outcome: TurnOutcome::ExecutionFailed { code: None },
                        exit_code: None,
                        pid: None,
                        stderr_tail: None,
                        spawn_error: None,
                    })
                }
            };

            for event in self.normalizer.push(chunk) {
                if let NormalizedEvent::Done(summary) = &event {
                    self.finalize(summary);
                }
                if !consumer_gone && tx.send(event).await.is_err() {
                    debug!("Event consumer dropped, cancelling turn");
                    consumer_gone = true;
                    self.cancel.cancel();
                }
            }

            if self.normalizer.is_finished() {
                break;
            }
        }
    }

    fn finalize(&mut self, summary: &TurnSummary) {
        self.session.apply_turn(HistoryEntry {
            turn_id: self.turn_id,
            prompt_preview: self.prompt_preview.clone(),
            agent: Some(summary.agent.clone()),
            rationale: Some(self.rationale),
            outcome: summary.outcome.clone(),
            chars: summary.chars,
            duration_ms: summary.duration_ms,
            started_at: self.started_at,
        });
        self.decisions.complete(self.turn_id, summary.outcome.clone());

        info!(
            outcome = summary.outcome.label(),
            chars = summary.chars,
            duration_ms = summary.duration_ms,
            pid = ?summary.pid,
            "Turn finished"
        );
    }
}

fn not_started(
    turn_id: uuid::Uuid,
    request: &TaskRequest,
    agent: Option<String>,
    rationale: Option<Rationale>,
    reason: String,
    started_at: chrono::DateTime<chrono::Utc>,
) -> HistoryEntry {
    HistoryEntry {
        turn_id,
        prompt_preview: request.preview(),
        agent,
        rationale,
        outcome: TurnOutcome::NotStarted { reason },
        chars: 0,
        duration_ms: 0,
        started_at,
    }
}
