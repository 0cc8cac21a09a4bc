use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::spec::CommandSpec;

const READ_BUF_SIZE: usize = 4096;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Grace between SIGTERM and SIGKILL on the child's process group.
const KILL_GRACE: Duration = Duration::from_secs(5);
/// Grace to drain buffered output after the child exits.
const DRAIN_GRACE: Duration = Duration::from_secs(5);
/// Silence threshold that produces a warning log line (never a kill).
const SILENCE_WARN_AFTER: Duration = Duration::from_secs(30);
/// Cap per captured stream. The head is dropped and the tail kept, because
/// the structured result is emitted last.
const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;
const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// The two deadlines enforced on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub max: Duration,
    pub inactivity: Duration,
}

impl Deadlines {
    pub fn new(max_secs: u64, inactivity_secs: u64) -> Self {
        Self {
            max: Duration::from_secs(max_secs),
            inactivity: Duration::from_secs(inactivity_secs),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Exited { code: i32 },
    MaxTimeout,
    InactivityTimeout,
    Cancelled,
    SpawnFailed { error: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exited { .. } => "Exited",
            Self::MaxTimeout => "MaxTimeout",
            Self::InactivityTimeout => "InactivityTimeout",
            Self::Cancelled => "Cancelled",
            Self::SpawnFailed { .. } => "SpawnFailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code when the child exited on its own; `None` when it was
    /// signal-killed or never spawned.
    pub exit_code: Option<i32>,
    pub outcome: RunOutcome,
    pub duration_ms: u64,
}

impl RunResult {
    fn spawn_failed(error: String, started: Instant) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            outcome: RunOutcome::SpawnFailed { error },
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Run one child to completion under both deadlines and the cancel token.
///
/// The child and all of its descendants are guaranteed dead (and reaped)
/// before this returns, whatever the outcome.
pub async fn run(spec: CommandSpec, deadlines: Deadlines, cancel: CancellationToken) -> RunResult {
    let started = Instant::now();

    let Some(program) = spec.program() else {
        return RunResult::spawn_failed("empty argv".to_string(), started);
    };

    let mut cmd = Command::new(program);
    cmd.args(&spec.argv[1..]);
    cmd.current_dir(&spec.cwd);
    for key in &spec.env_remove {
        cmd.env_remove(key);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    if spec.stdin_bytes.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.kill_on_drop(true);

    // New session: the child leads its own process group so the whole
    // subtree can be signalled with one kill(-pgid).
    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return RunResult::spawn_failed(format!("{program}: {e}"), started);
        }
    };

    if let Some(data) = spec.stdin_bytes.clone()
        && let Some(mut stdin) = child.stdin.take()
    {
        tokio::spawn(async move {
            match tokio::time::timeout(STDIN_WRITE_TIMEOUT, async {
                stdin.write_all(&data).await?;
                stdin.shutdown().await?;
                Ok::<_, std::io::Error>(())
            })
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("stdin write error: {e}"),
                Err(_) => warn!(
                    timeout_secs = STDIN_WRITE_TIMEOUT.as_secs(),
                    "stdin write timed out"
                ),
            }
        });
    }

    Run::new(child, started).drive(deadlines, cancel).await
}

/// One in-flight run: owns the child handle, both stream buffers, and the
/// deadline state. Killing the process group is a method here, not a
/// separately owned channel.
struct Run {
    child: Child,
    pgid: Option<i32>,
    stdout: String,
    stderr: String,
    stdout_dropped: usize,
    stderr_dropped: usize,
    started: Instant,
    last_activity: Instant,
    silence_warned: bool,
    exit_status: Option<std::process::ExitStatus>,
    drain_deadline: Option<Instant>,
}

impl Run {
    fn new(child: Child, started: Instant) -> Self {
        let pgid = child.id().map(|pid| pid as i32);
        Self {
            child,
            pgid,
            stdout: String::new(),
            stderr: String::new(),
            stdout_dropped: 0,
            stderr_dropped: 0,
            started,
            last_activity: started,
            silence_warned: false,
            exit_status: None,
            drain_deadline: None,
        }
    }

    async fn drive(mut self, deadlines: Deadlines, cancel: CancellationToken) -> RunResult {
        // The pipe readers live outside `self` so the select! futures only
        // borrow locals; bodies are then free to signal or reap the child.
        let mut stdout_reader = self.child.stdout.take().map(BufReader::new);
        let mut stderr_reader = self.child.stderr.take().map(BufReader::new);

        let mut stdout_buf = [0u8; READ_BUF_SIZE];
        let mut stderr_buf = [0u8; READ_BUF_SIZE];
        let mut stdout_done = stdout_reader.is_none();
        let mut stderr_done = stderr_reader.is_none();
        let mut killed: Option<RunOutcome> = None;

        while !(stdout_done && stderr_done) {
            tokio::select! {
                result = read_chunk(&mut stdout_reader, &mut stdout_buf), if !stdout_done => {
                    match result {
                        Some(n) => {
                            self.note_activity();
                            append_bounded(
                                &mut self.stdout,
                                &stdout_buf[..n],
                                &mut self.stdout_dropped,
                            );
                        }
                        None => stdout_done = true,
                    }
                }
                result = read_chunk(&mut stderr_reader, &mut stderr_buf), if !stderr_done => {
                    match result {
                        Some(n) => {
                            self.note_activity();
                            append_bounded(
                                &mut self.stderr,
                                &stderr_buf[..n],
                                &mut self.stderr_dropped,
                            );
                        }
                        None => stderr_done = true,
                    }
                }
                _ = cancel.cancelled(), if killed.is_none() && self.exit_status.is_none() => {
                    debug!("cancel requested; terminating child group");
                    killed = Some(RunOutcome::Cancelled);
                    self.terminate_group().await;
                    break;
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    if let Some(outcome) = self.on_tick(deadlines).await {
                        match outcome {
                            TickVerdict::Killed(reason) => {
                                killed = Some(reason);
                                break;
                            }
                            TickVerdict::DrainElapsed => break,
                        }
                    }
                }
            }
        }

        // Reap whatever is left. After a kill this collects the corpse;
        // after a natural stream EOF the child may still be alive with its
        // pipes closed, so the residual wait is bounded by the max deadline.
        let exit_status = match (self.exit_status, killed.is_some()) {
            (Some(status), _) => Some(status),
            (None, true) => self.child.wait().await.ok(),
            (None, false) => {
                let remaining = deadlines.max.saturating_sub(self.started.elapsed());
                match tokio::time::timeout(remaining, self.child.wait()).await {
                    Ok(status) => status.ok(),
                    Err(_) => {
                        warn!("child closed its pipes but outlived the wall-clock limit");
                        killed = Some(RunOutcome::MaxTimeout);
                        self.terminate_group().await;
                        None
                    }
                }
            }
        };

        let (exit_code, outcome) = match killed {
            Some(outcome) => (None, outcome),
            None => {
                let code = exit_status.and_then(|s| s.code());
                match code {
                    Some(code) => (Some(code), RunOutcome::Exited { code }),
                    None => {
                        warn!("child terminated by signal");
                        (None, RunOutcome::Exited { code: -1 })
                    }
                }
            }
        };

        if self.stdout_dropped > 0 || self.stderr_dropped > 0 {
            warn!(
                stdout_dropped = self.stdout_dropped,
                stderr_dropped = self.stderr_dropped,
                "capture buffers overflowed; oldest output dropped"
            );
        }

        RunResult {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code,
            outcome,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    /// Deadline bookkeeping on every poll tick.
    async fn on_tick(&mut self, deadlines: Deadlines) -> Option<TickVerdict> {
        if self.exit_status.is_none()
            && let Ok(Some(status)) = self.child.try_wait()
        {
            debug!(?status, "child exited; draining streams");
            self.exit_status = Some(status);
            self.drain_deadline = Some(Instant::now() + DRAIN_GRACE);
        }

        if let Some(deadline) = self.drain_deadline {
            if Instant::now() >= deadline {
                debug!("drain grace elapsed; abandoning remaining stream output");
                return Some(TickVerdict::DrainElapsed);
            }
            return None;
        }

        if self.started.elapsed() >= deadlines.max {
            warn!(
                limit_secs = deadlines.max.as_secs(),
                "wall-clock limit reached; terminating child group"
            );
            self.terminate_group().await;
            return Some(TickVerdict::Killed(RunOutcome::MaxTimeout));
        }

        let silence = self.last_activity.elapsed();
        if silence >= deadlines.inactivity {
            warn!(
                limit_secs = deadlines.inactivity.as_secs(),
                "no output within inactivity window; terminating child group"
            );
            self.terminate_group().await;
            return Some(TickVerdict::Killed(RunOutcome::InactivityTimeout));
        }

        if silence >= SILENCE_WARN_AFTER && !self.silence_warned {
            warn!(
                silent_secs = silence.as_secs(),
                "child has been silent for a while; still waiting"
            );
            self.silence_warned = true;
        }

        None
    }

    fn note_activity(&mut self) {
        self.last_activity = Instant::now();
        self.silence_warned = false;
    }

    /// SIGTERM the child's process group, escalate to SIGKILL after the
    /// grace period, and reap the direct child.
    async fn terminate_group(&mut self) {
        self.signal_group(libc::SIGTERM);

        let reaped = tokio::time::timeout(KILL_GRACE, self.child.wait()).await;
        if reaped.is_err() {
            warn!("child ignored SIGTERM; escalating to SIGKILL");
            self.signal_group(libc::SIGKILL);
            let _ = self.child.wait().await;
        }

        // Descendants that survived their leader get the same sweep.
        self.signal_group(libc::SIGKILL);
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: i32) {
        if let Some(pgid) = self.pgid {
            // SAFETY: kill() is async-signal-safe; the negative PID targets
            // the whole process group created by setsid in pre_exec.
            unsafe {
                libc::kill(-pgid, signal);
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _signal: i32) {}
}

enum TickVerdict {
    Killed(RunOutcome),
    DrainElapsed,
}

async fn read_chunk<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut Option<BufReader<R>>,
    buf: &mut [u8],
) -> Option<usize> {
    match reader {
        Some(r) => match r.read(buf).await {
            Ok(0) => None,
            Ok(n) => Some(n),
            Err(_) => None,
        },
        None => None,
    }
}

/// Append a chunk, keeping only the newest `MAX_CAPTURE_BYTES` bytes.
fn append_bounded(buffer: &mut String, chunk: &[u8], dropped: &mut usize) {
    buffer.push_str(&String::from_utf8_lossy(chunk));
    if buffer.len() > MAX_CAPTURE_BYTES {
        let excess = buffer.len() - MAX_CAPTURE_BYTES;
        // Drain on a char boundary at or past the excess point.
        let cut = (excess..buffer.len())
            .find(|i| buffer.is_char_boundary(*i))
            .unwrap_or(buffer.len());
        buffer.drain(..cut);
        *dropped += cut;
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
