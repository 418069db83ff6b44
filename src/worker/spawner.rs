//! Worker process launch and teardown.
//!
//! [`launch`] validates the executable, spawns it with piped stdio, starts
//! an exit waiter task and a stderr drain task, then blocks on the ready
//! handshake. The exit waiter owns the [`Child`]: it resolves exactly once
//! with an [`ExitReport`], either because the process exited on its own or
//! because [`WorkerHandle::terminate`] asked it to kill the process. Its
//! [`JoinHandle`] is the process-exit signal.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::worker::channel::LineChannel;
use crate::worker::handshake::{self, HandshakeFailure};
use crate::{AppError, Result};

/// Bytes of worker stderr kept for diagnostics.
const STDERR_TAIL_BYTES: usize = 4096;

/// How long a terminated worker's stderr drain may keep running.
const STDERR_FLUSH_GRACE: Duration = Duration::from_millis(200);

// ── Launch spec ──────────────────────────────────────────────────────────────

/// Everything needed to (re)launch a worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Worker executable as configured.
    pub exe_path: PathBuf,
    /// Worker arguments (`name=value` each).
    pub args: Vec<String>,
    /// Substring that signals readiness on stdout.
    pub ready_marker: String,
    /// Stdout bytes allowed before the marker must have appeared.
    pub handshake_limit: usize,
    /// Maximum time to wait for the marker.
    pub startup_timeout: Duration,
}

impl From<&SupervisorConfig> for LaunchSpec {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            exe_path: config.exe_path.clone(),
            args: config.ocr.to_args(),
            ready_marker: config.ready_marker.clone(),
            handshake_limit: config.handshake_buffer_bytes,
            startup_timeout: config.startup_timeout(),
        }
    }
}

// ── Exit report ──────────────────────────────────────────────────────────────

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Whether the supervisor killed the process.
    pub killed: bool,
    /// Human-readable summary.
    pub description: String,
}

impl ExitReport {
    fn from_wait(result: std::io::Result<ExitStatus>, killed: bool) -> Self {
        match result {
            Ok(status) => {
                let code = status.code();
                let description = code.map_or_else(
                    || "process terminated by signal".to_owned(),
                    |c| format!("process exited with code {c}"),
                );
                Self {
                    code,
                    killed,
                    description,
                }
            }
            Err(err) => Self {
                code: None,
                killed,
                description: format!("wait error: {err}"),
            },
        }
    }
}

impl Display for ExitReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.killed {
            write!(f, "{} (killed by supervisor)", self.description)
        } else {
            f.write_str(&self.description)
        }
    }
}

// ── Stderr capture ───────────────────────────────────────────────────────────

/// Bounded tail of everything the worker wrote to stderr.
#[derive(Debug, Clone, Default)]
pub struct StderrTail(Arc<Mutex<String>>);

impl StderrTail {
    async fn push(&self, line: &str) {
        let mut tail = self.0.lock().await;
        tail.push_str(line);
        tail.push('\n');
        if tail.len() > STDERR_TAIL_BYTES {
            let mut cut = tail.len() - STDERR_TAIL_BYTES;
            while !tail.is_char_boundary(cut) {
                cut += 1;
            }
            tail.drain(..cut);
        }
    }

    /// Current contents, trimmed.
    pub async fn snapshot(&self) -> String {
        self.0.lock().await.trim().to_owned()
    }
}

fn spawn_stderr_drain(stderr: ChildStderr, tail: StderrTail, pid: Option<u32>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    debug!(pid, line, "worker stderr");
                    tail.push(line).await;
                }
                Err(err) => {
                    debug!(pid, %err, "worker stderr: read failed, stopping drain");
                    break;
                }
            }
        }
    })
}

// ── Exit waiter ──────────────────────────────────────────────────────────────

/// Own `child` until it exits. Resolving `kill_rx` (sent or dropped) kills it,
/// unless the process has already exited, in which case the report says so.
fn spawn_exit_waiter(mut child: Child, kill_rx: oneshot::Receiver<()>) -> JoinHandle<ExitReport> {
    tokio::spawn(async move {
        tokio::select! {
            biased;

            _ = kill_rx => {
                if let Ok(Some(status)) = child.try_wait() {
                    return ExitReport::from_wait(Ok(status), false);
                }
                if let Err(err) = child.start_kill() {
                    warn!(%err, "failed to kill worker process");
                }
                ExitReport::from_wait(child.wait().await, true)
            }
            result = child.wait() => ExitReport::from_wait(result, false),
        }
    })
}

// ── Worker handle ────────────────────────────────────────────────────────────

/// A live worker: its line channel plus the means to stop it.
///
/// Dropping the handle without [`terminate`](Self::terminate) still kills
/// the process, because the exit waiter treats a dropped kill sender as a
/// kill request.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Request channel over the worker's stdin/stdout.
    pub channel: LineChannel<ChildStdin, ChildStdout>,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    waiter: JoinHandle<ExitReport>,
    stderr_task: JoinHandle<()>,
    stderr: StderrTail,
}

impl WorkerHandle {
    /// OS process id, if the process was still alive at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the exit waiter has already observed the process ending.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.waiter.is_finished()
    }

    /// Captured stderr tail.
    pub async fn stderr(&self) -> String {
        self.stderr.snapshot().await
    }

    /// Stop the worker and wait for its exit waiter to finish.
    ///
    /// Returns immediately with the recorded report if the process already
    /// exited. Otherwise closes stdin, kills the process, and awaits the
    /// report, so no background task outlives the handle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lifecycle` if the exit waiter panicked or was
    /// cancelled.
    pub async fn terminate(self) -> Result<ExitReport> {
        let Self {
            channel,
            pid,
            kill_tx,
            waiter,
            stderr_task,
            stderr: _,
        } = self;

        if waiter.is_finished() {
            drop(channel);
            finish_stderr_drain(stderr_task).await;
            debug!(pid, "terminate: worker had already exited");
            return join_waiter(waiter).await;
        }

        // Closing stdin first lets a well-behaved worker notice EOF.
        drop(channel);
        if let Some(tx) = kill_tx {
            tx.send(()).ok();
        }

        let report = join_waiter(waiter).await;
        finish_stderr_drain(stderr_task).await;
        if let Ok(ref report) = report {
            info!(pid, exit = %report, "worker terminated");
        }
        report
    }
}

/// Give the drain a moment to flush what a dead worker left in the pipe.
async fn finish_stderr_drain(mut task: JoinHandle<()>) {
    if tokio::time::timeout(STDERR_FLUSH_GRACE, &mut task).await.is_err() {
        task.abort();
    }
}

async fn join_waiter(waiter: JoinHandle<ExitReport>) -> Result<ExitReport> {
    waiter.await.map_err(|err| {
        if err.is_panic() {
            AppError::Lifecycle(format!("exit waiter panicked while stopping worker: {err}"))
        } else {
            AppError::Lifecycle(format!("exit waiter was cancelled: {err}"))
        }
    })
}

// ── Launch ───────────────────────────────────────────────────────────────────

/// Check that `exe_path` is an existing regular file and resolve it.
///
/// Returns the absolute program path and the directory it lives in. Symlinks
/// are not resolved: the directory is the one the configured path names.
///
/// # Errors
///
/// - `AppError::NotFound` — the path does not exist or is not a regular file.
/// - `AppError::Setup` — the path cannot be made absolute.
pub async fn resolve_executable(exe_path: &Path) -> Result<(PathBuf, PathBuf)> {
    let meta = tokio::fs::metadata(exe_path).await.map_err(|err| {
        AppError::NotFound(format!(
            "executable {} not found: {err}",
            exe_path.display()
        ))
    })?;

    if !meta.is_file() {
        return Err(AppError::NotFound(format!(
            "executable {} is not a regular file",
            exe_path.display()
        )));
    }

    let program = std::path::absolute(exe_path).map_err(|err| {
        AppError::Setup(format!(
            "cannot resolve executable {}: {err}",
            exe_path.display()
        ))
    })?;
    let dir = program
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| AppError::Setup(format!("{} has no parent directory", program.display())))?;

    Ok((program, dir))
}

/// Spawn a worker and wait for its ready marker.
///
/// The working directory is the executable's own directory, so worker-side
/// relative paths (e.g. `models/config_en.txt`) resolve against it.
///
/// # Errors
///
/// - `AppError::NotFound` / `AppError::Setup` — nothing was spawned, or the
///   spawned process was killed because its pipes could not be captured.
/// - `AppError::Handshake` — the marker did not arrive; the process has been
///   killed and the message carries its exit report, stdout, and stderr.
pub async fn launch(spec: &LaunchSpec) -> Result<WorkerHandle> {
    let (program, dir) = resolve_executable(&spec.exe_path).await?;

    let mut cmd = Command::new(&program);
    cmd.args(&spec.args)
        .current_dir(&dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Setup(format!("failed to spawn {}: {err}", program.display()))
    })?;
    let pid = child.id();

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Setup("failed to capture worker stdin".into()))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Setup("failed to capture worker stdout".into()))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Setup("failed to capture worker stderr".into()))?;

    let stderr = StderrTail::default();
    let stderr_task = spawn_stderr_drain(stderr_pipe, stderr.clone(), pid);
    let (kill_tx, kill_rx) = oneshot::channel();
    let waiter = spawn_exit_waiter(child, kill_rx);

    info!(pid, program = %program.display(), args = ?spec.args, "worker spawned");

    let ready = tokio::time::timeout(
        spec.startup_timeout,
        handshake::wait_for_ready(&mut stdout, &spec.ready_marker, spec.handshake_limit),
    )
    .await;

    let failure = match ready {
        Ok(Ok(leftover)) => {
            info!(pid, "worker ready");
            return Ok(WorkerHandle {
                channel: LineChannel::with_buffered(stdin, stdout, &leftover),
                pid,
                kill_tx: Some(kill_tx),
                waiter,
                stderr_task,
                stderr,
            });
        }
        Ok(Err(failure)) => describe_failure(&failure),
        Err(_elapsed) => format!(
            "startup timeout: ready marker not received within {:?}",
            spec.startup_timeout
        ),
    };

    // Kill before reporting so no worker is left behind.
    let handle = WorkerHandle {
        channel: LineChannel::new(stdin, stdout),
        pid,
        kill_tx: Some(kill_tx),
        waiter,
        stderr_task,
        stderr,
    };
    Err(handshake_error(handle, failure).await)
}

fn describe_failure(failure: &HandshakeFailure) -> String {
    let output = failure.output();
    if output.is_empty() {
        failure.reason()
    } else {
        format!("{}; output: {output}", failure.reason())
    }
}

/// Terminate a worker that failed its handshake and build the error.
async fn handshake_error(handle: WorkerHandle, failure: String) -> AppError {
    let pid = handle.pid;
    let stderr = handle.stderr.clone();
    let exit = match handle.terminate().await {
        Ok(report) => report.to_string(),
        Err(err) => err.to_string(),
    };
    let stderr = stderr.snapshot().await;

    warn!(pid, %failure, %exit, "worker failed to become ready");

    let mut message = format!("worker init failed: {failure}; exit: {exit}");
    if !stderr.is_empty() {
        message.push_str("; stderr: ");
        message.push_str(&stderr);
    }
    AppError::Handshake(message)
}
