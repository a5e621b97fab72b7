//! Process supervision
//!
//! Each turn spawns exactly one agent subprocess. The supervisor forwards its
//! raw output while it runs and reports a single terminal [`ProcessExit`]
//! once the process has been reaped.

mod handle;

pub use handle::{OutputTail, ProcessHandle};

use crate::types::{RoutingDecision, TaskRequest, TurnOutcome};
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument};

/// Supervisor limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Hard ceiling on any turn, request timeouts are clamped to it
    pub max_turn_duration: Duration,
    /// Applied when a request carries no timeout
    pub default_timeout: Option<Duration>,
    /// Bound on raw chunks in flight between the pipes and the normalizer
    pub channel_capacity: usize,
    pub read_chunk_bytes: usize,
    pub stderr_tail_bytes: usize,
    /// Longest stdout/stderr line kept before it is flushed unterminated
    pub max_line_bytes: usize,
    /// How long a pipe may stay silent after exit before it is closed
    pub drain_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_turn_duration: Duration::from_secs(60 * 60),
            default_timeout: None,
            channel_capacity: 64,
            read_chunk_bytes: 8 * 1024,
            stderr_tail_bytes: 4 * 1024,
            max_line_bytes: 64 * 1024,
            drain_grace: Duration::from_millis(500),
        }
    }
}

/// Raw output of a supervised process, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum RawChunk {
    Stdout(Vec<u8>),
    /// One stderr line without its terminator
    Stderr(String),
    /// Always the last chunk
    Exit(ProcessExit),
}

/// How the process ended
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessExit {
    pub outcome: TurnOutcome,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub stderr_tail: Option<String>,
    /// Set when the executable could not be launched at all
    pub spawn_error: Option<String>,
}

impl ProcessExit {
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self {
            outcome: TurnOutcome::AgentUnavailable,
            exit_code: None,
            pid: None,
            stderr_tail: None,
            spawn_error: Some(message.into()),
        }
    }
}

/// Receiving side of a supervised process
#[derive(Debug)]
pub struct RawStream {
    rx: mpsc::Receiver<RawChunk>,
}

impl RawStream {
    pub async fn recv(&mut self) -> Option<RawChunk> {
        self.rx.recv().await
    }
}

impl Stream for RawStream {
    type Item = RawChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Spawns and supervises agent processes
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Request timeout clamped to the ceiling, else the default, else the ceiling
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .or(self.config.default_timeout)
            .map(|t| t.min(self.config.max_turn_duration))
            .unwrap_or(self.config.max_turn_duration)
    }

    /// Spawn the decided agent for `request` in `cwd`.
    ///
    /// Never fails: a spawn error arrives as an `Exit` with
    /// [`TurnOutcome::AgentUnavailable`]. Cancelling `cancel` terminates the
    /// process; the stream still ends with its `Exit`.
    pub fn run(
        &self,
        decision: &RoutingDecision,
        request: &TaskRequest,
        cwd: &Path,
        cancel: CancellationToken,
    ) -> RawStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let agent = decision.agent.clone();
        let prompt = request.full_prompt();
        let cwd: PathBuf = cwd.to_path_buf();
        let timeout = self.effective_timeout(request.timeout);
        let config = self.config.clone();

        tokio::spawn(
            async move {
                let spawned =
                    ProcessHandle::spawn(&agent, &prompt, &cwd, cancel, &config, tx.clone());
                let exit = match spawned {
                    Ok(mut handle) => handle.wait(timeout).await,
                    Err(e) => {
                        warn!(
                            agent = %agent.name,
                            program = %agent.invocation.program,
                            "Failed to spawn agent: {}", e
                        );
                        ProcessExit::spawn_failed(e.to_string())
                    }
                };
                if tx.send(RawChunk::Exit(exit)).await.is_err() {
                    warn!(agent = %agent.name, "Exit dropped, stream receiver closed");
                }
            }
            .in_current_span(),
        );

        RawStream { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timeout() {
        let supervisor = Supervisor::new(SupervisorConfig {
            max_turn_duration: Duration::from_secs(100),
            default_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        });

        assert_eq!(supervisor.effective_timeout(None), Duration::from_secs(30));
        assert_eq!(
            supervisor.effective_timeout(Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            supervisor.effective_timeout(Some(Duration::from_secs(500))),
            Duration::from_secs(100)
        );

        let unbounded = Supervisor::default();
        assert_eq!(unbounded.effective_timeout(None), Duration::from_secs(3600));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::types::{AgentDescriptor, InvocationSpec, PromptDelivery, Rationale};

        fn decision(script: &str) -> RoutingDecision {
            let agent = AgentDescriptor::new(
                "sh",
                InvocationSpec::new("sh").with_args(["-c", script]),
            );
            RoutingDecision::new(agent, Rationale::Forced, vec![])
        }

        async fn collect(mut stream: RawStream) -> Vec<RawChunk> {
            let mut chunks = Vec::new();
            while let Some(chunk) = stream.recv().await {
                chunks.push(chunk);
            }
            chunks
        }

        fn exit_of(chunks: &[RawChunk]) -> &ProcessExit {
            match chunks.last() {
                Some(RawChunk::Exit(exit)) => exit,
                other => panic!("expected exit last, got {:?}", other),
            }
        }

        fn stdout_of(chunks: &[RawChunk]) -> String {
            chunks
                .iter()
                .filter_map(|c| match c {
                    RawChunk::Stdout(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                    _ => None,
                })
                .collect()
        }

        /// Alive and not yet a zombie
        #[cfg(target_os = "linux")]
        fn is_running(pid: u32) -> bool {
            std::fs::read_to_string(format!("/proc/{}/stat", pid))
                .ok()
                .and_then(|stat| stat.rsplit(')').next().map(str::trim_start).map(String::from))
                .is_some_and(|state| !state.starts_with('Z'))
        }

        #[cfg(target_os = "linux")]
        async fn wait_gone(pid: u32) -> bool {
            for _ in 0..100 {
                if !is_running(pid) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            false
        }

        #[tokio::test]
        async fn test_successful_run() {
            let dir = tempfile::tempdir().unwrap();
            let supervisor = Supervisor::default();
            let request = TaskRequest::new("ignored");
            let stream = supervisor.run(
                &decision("printf 'hello\\nworld\\n'"),
                &request,
                dir.path(),
                CancellationToken::new(),
            );

            let chunks = collect(stream).await;
            assert_eq!(stdout_of(&chunks), "hello\nworld\n");
            let exit = exit_of(&chunks);
            assert_eq!(exit.outcome, TurnOutcome::Success);
            assert_eq!(exit.exit_code, Some(0));
            assert!(exit.pid.is_some());
            assert!(exit.stderr_tail.is_none());
        }

        #[tokio::test]
        async fn test_nonzero_exit_keeps_stderr_tail() {
            let dir = tempfile::tempdir().unwrap();
            let supervisor = Supervisor::default();
            let stream = supervisor.run(
                &decision("echo 'bad things' >&2; exit 3"),
                &TaskRequest::new("x"),
                dir.path(),
                CancellationToken::new(),
            );

            let chunks = collect(stream).await;
            assert!(chunks.contains(&RawChunk::Stderr("bad things".to_string())));
            let exit = exit_of(&chunks);
            assert_eq!(exit.outcome, TurnOutcome::ExecutionFailed { code: Some(3) });
            assert_eq!(exit.stderr_tail.as_deref(), Some("bad things\n"));
        }

        #[tokio::test]
        async fn test_overlong_stderr_keeps_characters_whole() {
            let dir = tempfile::tempdir().unwrap();
            let supervisor = Supervisor::new(SupervisorConfig {
                max_line_bytes: 7,
                ..SupervisorConfig::default()
            });
            let stream = supervisor.run(
                &decision("printf 'éééééé' >&2"),
                &TaskRequest::new("x"),
                dir.path(),
                CancellationToken::new(),
            );

            let chunks = collect(stream).await;
            let lines: Vec<&str> = chunks
                .iter()
                .filter_map(|c| match c {
                    RawChunk::Stderr(line) => Some(line.as_str()),
                    _ => None,
                })
                .collect();
            assert!(lines.len() >= 2);
            assert!(lines.iter().all(|l| !l.contains('\u{FFFD}') && l.len() <= 7));
            assert_eq!(lines.concat(), "éééééé");
        }

        #[tokio::test]
        async fn test_prompt_on_stdin() {
            let dir = tempfile::tempdir().unwrap();
            let agent = AgentDescriptor::new(
                "cat",
                InvocationSpec::new("cat").with_delivery(PromptDelivery::Stdin),
            );
            let decision = RoutingDecision::new(agent, Rationale::Forced, vec![]);
            let request = TaskRequest::new("from stdin").with_system_prompt("be brief");

            let stream = Supervisor::default().run(
                &decision,
                &request,
                dir.path(),
                CancellationToken::new(),
            );
            let chunks = collect(stream).await;
            assert_eq!(stdout_of(&chunks), "be brief\n\nfrom stdin");
        }

        #[tokio::test]
        async fn test_missing_executable() {
            let dir = tempfile::tempdir().unwrap();
            let agent =
                AgentDescriptor::new("ghost", InvocationSpec::new("/nonexistent/ghost-agent"));
            let decision = RoutingDecision::new(agent, Rationale::Forced, vec![]);

            let stream = Supervisor::default().run(
                &decision,
                &TaskRequest::new("x"),
                dir.path(),
                CancellationToken::new(),
            );
            let chunks = collect(stream).await;
            assert_eq!(chunks.len(), 1);
            let exit = exit_of(&chunks);
            assert_eq!(exit.outcome, TurnOutcome::AgentUnavailable);
            assert!(exit.spawn_error.is_some());
        }

        #[tokio::test]
        async fn test_timeout_terminates() {
            let dir = tempfile::tempdir().unwrap();
            let request = TaskRequest::new("x").with_timeout(Duration::from_millis(300));
            let started = std::time::Instant::now();

            let stream = Supervisor::default().run(
                &decision("while true; do echo tick; sleep 0.05; done"),
                &request,
                dir.path(),
                CancellationToken::new(),
            );
            let chunks = collect(stream).await;
            assert_eq!(exit_of(&chunks).outcome, TurnOutcome::TimedOut);
            assert!(stdout_of(&chunks).contains("tick"));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_timeout_kills_forked_helpers() {
            let dir = tempfile::tempdir().unwrap();
            let request = TaskRequest::new("x").with_timeout(Duration::from_millis(500));
            let mut stream = Supervisor::default().run(
                &decision("sleep 300 & echo $!; wait"),
                &request,
                dir.path(),
                CancellationToken::new(),
            );

            let helper: u32 = match stream.recv().await {
                Some(RawChunk::Stdout(bytes)) => {
                    String::from_utf8(bytes).unwrap().trim().parse().unwrap()
                }
                other => panic!("unexpected chunk {:?}", other),
            };
            assert!(is_running(helper));

            let rest = collect(stream).await;
            assert_eq!(exit_of(&rest).outcome, TurnOutcome::TimedOut);
            assert!(wait_gone(helper).await, "helper {} survived the timeout", helper);
        }

        #[tokio::test]
        async fn test_lagging_consumer_receives_all_output() {
            let dir = tempfile::tempdir().unwrap();
            let stream = Supervisor::default().run(
                &decision("yes abcdefghi | head -n 56000"),
                &TaskRequest::new("x"),
                dir.path(),
                CancellationToken::new(),
            );

            // The agent exits while the channel is full
            tokio::time::sleep(Duration::from_secs(2)).await;

            let chunks = collect(stream).await;
            let stdout = stdout_of(&chunks);
            assert_eq!(stdout.lines().count(), 56000);
            assert!(stdout.lines().all(|line| line == "abcdefghi"));
            assert_eq!(exit_of(&chunks).outcome, TurnOutcome::Success);
        }

        #[tokio::test]
        async fn test_cancel_terminates() {
            let dir = tempfile::tempdir().unwrap();
            let cancel = CancellationToken::new();
            let mut stream = Supervisor::default().run(
                &decision("echo started; exec sleep 30"),
                &TaskRequest::new("x"),
                dir.path(),
                cancel.clone(),
            );

            match stream.recv().await {
                Some(RawChunk::Stdout(bytes)) => assert_eq!(bytes, b"started\n"),
                other => panic!("unexpected chunk {:?}", other),
            }
            cancel.cancel();

            let rest = tokio::time::timeout(Duration::from_secs(10), collect(stream))
                .await
                .expect("cancelled process must exit");
            assert_eq!(exit_of(&rest).outcome, TurnOutcome::Cancelled);
        }
    }
}
