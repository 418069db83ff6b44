//! Supervised OCR request façade.
//!
//! [`Supervisor`] owns one worker at a time behind a single async mutex.
//! Requests, scheduled restarts, and shutdown all take that lock, so bytes
//! from different operations never interleave on the worker's pipes and a
//! request never sees a half-terminated worker.
//!
//! ```text
//!  start ──► Ready ──restart ok──► Ready
//!              │                     │
//!              └──restart failed──► Faulted ──restart ok──► Ready
//!              │                     │
//!              └──────shutdown───────┴──────► Closed
//! ```
//!
//! No timeout is applied to a single exchange: a worker that never answers
//! keeps the caller (and everyone queued behind it) waiting. Wrap calls in
//! [`tokio::time::timeout`] if that matters; an abandoned exchange leaves the
//! channel refusing further requests until the next restart.

mod restart;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::protocol::{parse_response, OcrRequest, OcrResult};
use crate::worker::{launch, LaunchSpec, WorkerHandle};
use crate::{AppError, Result};

/// Externally visible supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStatus {
    /// A worker passed its handshake and accepts requests.
    Ready,
    /// The last restart failed; requests fail with the recorded error.
    Faulted,
    /// Shut down; terminal.
    Closed,
}

/// Mutable state; only touched while holding [`Shared::state`].
#[derive(Debug)]
struct SupervisorState {
    worker: Option<WorkerHandle>,
    /// Sticky error returned to every request until a launch succeeds.
    fatal: Option<AppError>,
    closed: bool,
    restart_task: Option<JoinHandle<()>>,
}

/// State shared with the restart task.
#[derive(Debug)]
struct Shared {
    launch: LaunchSpec,
    state: Mutex<SupervisorState>,
    shutdown: CancellationToken,
}

impl Shared {
    /// Replace the worker. Caller must hold the lock and pass its guard.
    async fn restart_locked(&self, state: &mut SupervisorState) -> Result<()> {
        if let Some(worker) = state.worker.take() {
            let pid = worker.pid();
            match worker.terminate().await {
                Ok(report) => debug!(pid, exit = %report, "restart: old worker stopped"),
                Err(err) => warn!(pid, %err, "restart: old worker did not stop cleanly"),
            }
        }

        match launch(&self.launch).await {
            Ok(worker) => {
                info!(pid = worker.pid(), "restart: worker relaunched");
                state.worker = Some(worker);
                state.fatal = None;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "restart: relaunch failed, requests will be rejected");
                state.fatal = Some(err.clone());
                Err(err)
            }
        }
    }
}

/// Supervisor for one long-running OCR worker.
///
/// Share it between tasks with an [`Arc`]. Dropping it stops the restart
/// scheduler and kills the worker; call [`shutdown`](Self::shutdown) to do
/// the same and wait for completion.
#[derive(Debug)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Launch the worker, wait for its handshake, and start the restart scheduler.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` — `config` fails validation.
    /// - `AppError::NotFound` / `AppError::Setup` — the worker could not be spawned.
    /// - `AppError::Handshake` — the worker never became ready (it has been killed).
    pub async fn start(config: &SupervisorConfig) -> Result<Self> {
        config.validate()?;
        let spec = LaunchSpec::from(config);
        let worker = launch(&spec).await?;

        let shared = Arc::new(Shared {
            launch: spec,
            state: Mutex::new(SupervisorState {
                worker: Some(worker),
                fatal: None,
                closed: false,
                restart_task: None,
            }),
            shutdown: CancellationToken::new(),
        });

        if let Some(period) = config.restart_interval() {
            let task = restart::spawn_restart_task(
                Arc::clone(&shared),
                period,
                shared.shutdown.clone(),
            );
            shared.state.lock().await.restart_task = Some(task);
        }

        Ok(Self { shared })
    }

    // ── Raw requests ─────────────────────────────────────────────────────────

    /// Recognize an image file; returns the worker's raw response line.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::exchange`].
    pub async fn ocr_file_raw(&self, image_path: impl AsRef<Path>) -> Result<Bytes> {
        self.exchange(&OcrRequest::path(image_path)?).await
    }

    /// Recognize in-memory image bytes; returns the worker's raw response line.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::exchange`].
    pub async fn ocr_bytes_raw(&self, image: &[u8]) -> Result<Bytes> {
        self.exchange(&OcrRequest::image(image)).await
    }

    /// Recognize the clipboard image; returns the worker's raw response line.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::exchange`].
    pub async fn ocr_clipboard_raw(&self) -> Result<Bytes> {
        self.exchange(&OcrRequest::clipboard()).await
    }

    // ── Parsed requests ──────────────────────────────────────────────────────

    /// Recognize an image file.
    ///
    /// A non-success worker code is returned as `Ok` with
    /// [`OcrResult::is_success`] false.
    ///
    /// # Errors
    ///
    /// Transport, lifecycle, and sticky errors from [`Supervisor::exchange`],
    /// or `AppError::Protocol` if the response is malformed.
    pub async fn ocr_file(&self, image_path: impl AsRef<Path>) -> Result<OcrResult> {
        parse_response(&self.ocr_file_raw(image_path).await?)
    }

    /// Recognize in-memory image bytes.
    ///
    /// # Errors
    ///
    /// As for [`Supervisor::ocr_file`].
    pub async fn ocr_bytes(&self, image: &[u8]) -> Result<OcrResult> {
        parse_response(&self.ocr_bytes_raw(image).await?)
    }

    /// Recognize the clipboard image.
    ///
    /// # Errors
    ///
    /// As for [`Supervisor::ocr_file`].
    pub async fn ocr_clipboard(&self) -> Result<OcrResult> {
        parse_response(&self.ocr_clipboard_raw().await?)
    }

    /// Run one request/response exchange under the lock.
    ///
    /// # Errors
    ///
    /// - The sticky fatal error, if one is recorded (no I/O is attempted).
    /// - `AppError::Transport` — the worker has exited, a write/read failed,
    ///   or an earlier exchange was abandoned.
    /// - `AppError::Protocol` — the request could not be serialised.
    pub async fn exchange(&self, request: &OcrRequest) -> Result<Bytes> {
        let line = request.to_line()?;

        let mut state = self.shared.state.lock().await;
        if let Some(err) = &state.fatal {
            return Err(err.clone());
        }

        let worker = state
            .worker
            .as_mut()
            .ok_or_else(|| AppError::Lifecycle("no worker is running".into()))?;

        if worker.has_exited() {
            return Err(AppError::Transport(format!(
                "worker process (pid {:?}) has exited",
                worker.pid()
            )));
        }

        let response = worker.channel.exchange(&line).await;
        if let Err(ref err) = response {
            warn!(pid = worker.pid(), %err, "worker exchange failed");
        }
        response
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Stop the current worker and launch a fresh one now.
    ///
    /// Queued requests run after the restart completes. On failure the error
    /// becomes the sticky fatal error and the supervisor is
    /// [`Faulted`](SupervisorStatus::Faulted).
    ///
    /// # Errors
    ///
    /// - `AppError::Lifecycle` — the supervisor has been shut down.
    /// - Any launch error (`NotFound`, `Setup`, `Handshake`).
    pub async fn restart(&self) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return Err(AppError::Lifecycle(
                "cannot restart: supervisor has been shut down".into(),
            ));
        }
        self.shared.restart_locked(&mut state).await
    }

    /// Stop the restart scheduler and the worker. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// - `AppError::Lifecycle` — already shut down (no I/O is attempted), or
    ///   the worker's exit waiter failed.
    pub async fn shutdown(&self) -> Result<()> {
        let (terminated, restart_task) = {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(AppError::Lifecycle(
                    "supervisor has already been shut down".into(),
                ));
            }

            state.closed = true;
            self.shared.shutdown.cancel();
            state.fatal = Some(AppError::Lifecycle(
                "supervisor has been shut down".into(),
            ));

            let terminated = match state.worker.take() {
                Some(worker) => Some(worker.terminate().await),
                None => None,
            };
            (terminated, state.restart_task.take())
        };

        // The restart task may be queued on the lock; it sees `closed` and exits.
        if let Some(task) = restart_task {
            if let Err(err) = task.await {
                warn!(%err, "restart task ended abnormally");
            }
        }

        match terminated {
            Some(Err(err)) => Err(err),
            Some(Ok(report)) => {
                info!(exit = %report, "supervisor shut down");
                Ok(())
            }
            None => {
                info!("supervisor shut down (no worker was running)");
                Ok(())
            }
        }
    }

    /// Current state.
    pub async fn status(&self) -> SupervisorStatus {
        let state = self.shared.state.lock().await;
        if state.closed {
            SupervisorStatus::Closed
        } else if state.fatal.is_some() {
            SupervisorStatus::Faulted
        } else {
            SupervisorStatus::Ready
        }
    }

    /// The sticky fatal error, if one is recorded.
    pub async fn last_error(&self) -> Option<AppError> {
        self.shared.state.lock().await.fatal.clone()
    }

    /// Pid of the current worker, if one is running.
    pub async fn worker_pid(&self) -> Option<u32> {
        let state = self.shared.state.lock().await;
        state.worker.as_ref().and_then(WorkerHandle::pid)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Start a supervisor, recognize one file, and shut it down.
///
/// # Errors
///
/// Any error from [`Supervisor::start`] or [`Supervisor::ocr_file`]. A
/// shutdown failure after a successful request is logged, not returned.
pub async fn ocr_file_once(
    config: &SupervisorConfig,
    image_path: impl AsRef<Path>,
) -> Result<OcrResult> {
    let supervisor = Supervisor::start(config).await?;
    let result = supervisor.ocr_file(image_path).await;
    if let Err(err) = supervisor.shutdown().await {
        warn!(%err, "one-shot supervisor did not shut down cleanly");
    }
    result
}
