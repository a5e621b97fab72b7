//! Live agent process ownership

use super::{ProcessExit, RawChunk, SupervisorConfig};
use crate::normalize::split_lines;
use crate::types::{AgentDescriptor, PromptDelivery, TurnOutcome};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Bounded ring of the most recent bytes written to stderr
#[derive(Debug)]
pub struct OutputTail {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        let (a, b) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(a.len() + b.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Why the wait loop stopped
enum Stop {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Exclusive owner of one agent subprocess for the duration of a turn.
///
/// On unix the agent leads its own process group, and termination signals the
/// whole group so helpers the agent forked go with it. Dropping the handle
/// kills the group if the agent is still alive and aborts the pipe tasks.
pub struct ProcessHandle {
    pub id: uuid::Uuid,
    agent: String,
    pid: Option<u32>,
    started_at: Instant,
    child: Child,
    cancel: CancellationToken,
    tail: Arc<Mutex<OutputTail>>,
    stdin_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    /// Fired once the agent has exited; pipe reads become bounded by the grace
    closing: CancellationToken,
    exited: bool,
}

impl ProcessHandle {
    /// Spawn the agent with `prompt` delivered as its `InvocationSpec` says.
    ///
    /// Output is forwarded to `tx` as it is read.
    pub fn spawn(
        agent: &AgentDescriptor,
        prompt: &str,
        cwd: &Path,
        cancel: CancellationToken,
        config: &SupervisorConfig,
        tx: mpsc::Sender<RawChunk>,
    ) -> std::io::Result<Self> {
        let invocation = &agent.invocation;
        let args = invocation.build_args(prompt);

        debug!(
            agent = %agent.name,
            program = %invocation.program,
            args = args.len(),
            cwd = %cwd.display(),
            "Spawning agent"
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&args)
            .envs(expand_env(&invocation.env))
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        match invocation.prompt_delivery {
            PromptDelivery::Stdin => cmd.stdin(Stdio::piped()),
            PromptDelivery::Argument => cmd.stdin(Stdio::null()),
        };

        let mut child = cmd.spawn()?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Failed to capture stdout")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Failed to capture stderr")
        })?;

        let tail = Arc::new(Mutex::new(OutputTail::new(config.stderr_tail_bytes)));
        let closing = CancellationToken::new();
        let pipe = PipeConfig {
            chunk: config.read_chunk_bytes.max(1),
            max_line: config.max_line_bytes.max(1),
            grace: config.drain_grace,
            closing: closing.clone(),
        };

        let stdin_task = child
            .stdin
            .take()
            .map(|stdin| tokio::spawn(Self::write_stdin_task(stdin, prompt.to_string())));
        let tasks = vec![
            tokio::spawn(Self::read_stdout_task(stdout, tx.clone(), pipe.clone())),
            tokio::spawn(Self::read_stderr_task(stderr, tx, Arc::clone(&tail), pipe)),
        ];

        info!(agent = %agent.name, pid = ?pid, "Agent process started");

        Ok(Self {
            id: uuid::Uuid::new_v4(),
            agent: agent.name.clone(),
            pid,
            started_at: Instant::now(),
            child,
            cancel,
            tail,
            stdin_task,
            tasks,
            closing,
            exited: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Wait for exit, cancellation or `timeout`, whichever comes first.
    ///
    /// Cancellation and timeout terminate the process and only return once it
    /// has been reaped.
    pub async fn wait(&mut self, timeout: Duration) -> ProcessExit {
        let stop = tokio::select! {
            status = self.child.wait() => Stop::Exited(status),
            _ = self.cancel.cancelled() => Stop::Cancelled,
            _ = tokio::time::sleep(timeout) => Stop::TimedOut,
        };

        let (outcome, exit_code) = match stop {
            Stop::Exited(Ok(status)) => classify(status),
            Stop::Exited(Err(e)) => {
                error!(agent = %self.agent, "Failed to wait for agent: {}", e);
                (TurnOutcome::ExecutionFailed { code: None }, None)
            }
            Stop::Cancelled => {
                info!(agent = %self.agent, pid = ?self.pid, "Cancelling agent");
                self.terminate().await;
                (TurnOutcome::Cancelled, None)
            }
            Stop::TimedOut => {
                warn!(agent = %self.agent, pid = ?self.pid, ?timeout, "Agent timed out");
                self.terminate().await;
                (TurnOutcome::TimedOut, None)
            }
        };
        self.exited = true;

        // Helpers the agent left running lose their claim on the pipes
        kill_process_group(&self.agent, self.pid);
        self.drain().await;

        let stderr_tail = if outcome.is_success() {
            None
        } else {
            let tail = self.tail.lock();
            (!tail.is_empty()).then(|| tail.to_string_lossy())
        };

        info!(
            agent = %self.agent,
            pid = ?self.pid,
            outcome = outcome.label(),
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Agent process finished"
        );

        ProcessExit {
            outcome,
            exit_code,
            pid: self.pid,
            stderr_tail,
            spawn_error: None,
        }
    }

    /// Kill the process group and reap the agent
    async fn terminate(&mut self) {
        kill_process_group(&self.agent, self.pid);
        if let Err(e) = self.child.start_kill() {
            debug!(agent = %self.agent, "Kill skipped: {}", e);
        }
        if let Err(e) = self.child.wait().await {
            error!(agent = %self.agent, "Failed to reap agent: {}", e);
        }
    }

    /// Forward everything the agent wrote before it exited.
    ///
    /// Only reads are bounded by the drain grace; forwarding waits for the
    /// consumer however long it takes.
    async fn drain(&mut self) {
        if let Some(stdin) = self.stdin_task.take() {
            stdin.abort();
        }
        self.closing.cancel();
        for result in futures::future::join_all(self.tasks.iter_mut()).await {
            if let Err(e) = result {
                error!(agent = %self.agent, "Pipe task failed: {}", e);
            }
        }
        self.tasks.clear();
    }

    async fn write_stdin_task(mut stdin: ChildStdin, prompt: String) {
        if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
            debug!("Failed to write prompt to stdin: {}", e);
            return;
        }
        if let Err(e) = stdin.shutdown().await {
            debug!("Failed to close stdin: {}", e);
        }
        trace!("Prompt delivered on stdin");
    }

    async fn read_stdout_task(
        mut stdout: ChildStdout,
        tx: mpsc::Sender<RawChunk>,
        pipe: PipeConfig,
    ) {
        let mut buf = vec![0u8; pipe.chunk];
        loop {
            match pipe.read(&mut stdout, &mut buf).await {
                Ok(0) => {
                    debug!("Agent stdout closed");
                    break;
                }
                Ok(n) => {
                    trace!(bytes = n, "Agent stdout chunk");
                    if tx.send(RawChunk::Stdout(buf[..n].to_vec())).await.is_err() {
                        warn!("Failed to forward stdout, channel closed");
                        break;
                    }
                }
                Err(e) => {
                    error!("Error reading agent stdout: {}", e);
                    break;
                }
            }
        }
    }

    async fn read_stderr_task(
        mut stderr: ChildStderr,
        tx: mpsc::Sender<RawChunk>,
        tail: Arc<Mutex<OutputTail>>,
        pipe: PipeConfig,
    ) {
        let mut buf = vec![0u8; pipe.chunk];
        let mut pending = Vec::new();

        loop {
            let n = match pipe.read(&mut stderr, &mut buf).await {
                Ok(0) => {
                    debug!("Agent stderr closed");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("Error reading agent stderr: {}", e);
                    break;
                }
            };
            tail.lock().push(&buf[..n]);
            pending.extend_from_slice(&buf[..n]);
            for line in split_lines(&mut pending, pipe.max_line) {
                if !forward_stderr(&tx, &line).await {
                    return;
                }
            }
        }

        if !pending.is_empty() {
            forward_stderr(&tx, &pending).await;
        }
    }
}

/// Per-pipe read settings shared by the reader tasks
#[derive(Debug, Clone)]
struct PipeConfig {
    chunk: usize,
    max_line: usize,
    grace: Duration,
    closing: CancellationToken,
}

impl PipeConfig {
    /// Read the next chunk of a pipe.
    ///
    /// Once the agent has exited, a pipe that yields nothing within the grace
    /// is treated as closed.
    async fn read<R>(&self, pipe: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        if !self.closing.is_cancelled() {
            tokio::select! {
                read = pipe.read(buf) => return read,
                _ = self.closing.cancelled() => {}
            }
        }
        match tokio::time::timeout(self.grace, pipe.read(buf)).await {
            Ok(read) => read,
            Err(_) => {
                debug!("Pipe still open after exit, closing it");
                Ok(0)
            }
        }
    }
}

/// Send one stderr line unless it is blank; false once the receiver is gone
async fn forward_stderr(tx: &mpsc::Sender<RawChunk>, line: &[u8]) -> bool {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\n', '\r']);
    if text.trim().is_empty() {
        return true;
    }
    if tx.send(RawChunk::Stderr(text.to_string())).await.is_err() {
        warn!("Failed to forward stderr, channel closed");
        return false;
    }
    true
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(stdin) = &self.stdin_task {
            stdin.abort();
        }
        for task in &self.tasks {
            task.abort();
        }
        if !self.exited {
            kill_process_group(&self.agent, self.pid);
            if let Err(e) = self.child.start_kill() {
                debug!(agent = %self.agent, "Kill on drop skipped: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("agent", &self.agent)
            .field("pid", &self.pid)
            .field("tail_bytes", &self.tail.lock().len())
            .finish()
    }
}

fn classify(status: ExitStatus) -> (TurnOutcome, Option<i32>) {
    if status.success() {
        (TurnOutcome::Success, status.code())
    } else {
        (
            TurnOutcome::ExecutionFailed {
                code: status.code(),
            },
            status.code(),
        )
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(agent: &str, pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => trace!(agent, pid, "Process group killed"),
        Err(Errno::ESRCH) => {}
        Err(e) => debug!(agent, pid, "Failed to kill process group: {}", e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_agent: &str, _pid: Option<u32>) {}

/// Expand `${VAR}` values from the dispatcher's environment
fn expand_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(key, value)| {
            let expanded = match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
                Some(var) => std::env::var(var).unwrap_or_default(),
                None => value.clone(),
            };
            (key.clone(), expanded)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_tail_keeps_latest_bytes() {
        let mut tail = OutputTail::new(8);
        tail.push(b"hello ");
        tail.push(b"world");
        assert_eq!(tail.len(), 8);
        assert_eq!(tail.to_string_lossy(), "lo world");
    }

    #[test]
    fn test_output_tail_oversized_push() {
        let mut tail = OutputTail::new(4);
        tail.push(b"abcdefgh");
        assert_eq!(tail.to_string_lossy(), "efgh");
    }

    #[test]
    fn test_output_tail_zero_capacity() {
        let mut tail = OutputTail::new(0);
        tail.push(b"abc");
        assert!(tail.is_empty());
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("LASTAGENT_TEST_TOKEN", "secret");
        let mut env = HashMap::new();
        env.insert("TOKEN".to_string(), "${LASTAGENT_TEST_TOKEN}".to_string());
        env.insert("PLAIN".to_string(), "value".to_string());

        let expanded = expand_env(&env);
        assert_eq!(expanded["TOKEN"], "secret");
        assert_eq!(expanded["PLAIN"], "value");
    }
}
