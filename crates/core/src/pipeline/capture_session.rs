use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use thiserror::Error;

use crate::detection::domain::face_detector::FaceDetector;
use crate::pipeline::shared_state::SharedState;
use crate::recognition::domain::face_crop::normalize_face;
use crate::recognition::infrastructure::face_store::{FaceStore, StoreError};
use crate::recognition::recognizer_manager::RecognizerManager;
use crate::shared::cancellation::CancellationToken;
use crate::shared::face_box::FaceBox;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("a capture session for {0:?} is already running")]
    Conflict(String),
    #[error("target count must be at least 1")]
    EmptyTarget,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What an enrollment run should collect.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureParams {
    pub label: String,
    pub interval: Duration,
    pub target_count: usize,
    /// Store the face crop rather than the whole frame.
    pub face_only: bool,
    pub retrain_on_stop: bool,
    /// Give up once this much time has passed without reaching the target.
    pub max_duration: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    Completed,
    Cancelled,
    TimedOut,
}

/// Externally visible view of the session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CaptureStatus {
    pub running: bool,
    pub label: Option<String>,
    pub target_count: usize,
    pub saved: Vec<PathBuf>,
    /// How the last run ended; `None` while running or before the first run.
    pub outcome: Option<CaptureOutcome>,
}

#[derive(Default)]
struct SessionState {
    running: bool,
    params: Option<CaptureParams>,
    saved: Vec<PathBuf>,
    outcome: Option<CaptureOutcome>,
    /// Set by a forced stop so the worker skips its retrain.
    forced: bool,
}

impl SessionState {
    fn status(&self) -> CaptureStatus {
        CaptureStatus {
            running: self.running,
            label: self.params.as_ref().map(|p| p.label.clone()),
            target_count: self.params.as_ref().map_or(0, |p| p.target_count),
            saved: self.saved.clone(),
            outcome: self.outcome,
        }
    }
}

/// Collaborators the capture worker reads from and writes to.
pub struct CaptureDeps {
    pub shared: Arc<SharedState>,
    pub detector: Arc<dyn FaceDetector>,
    pub recognizers: Arc<RecognizerManager>,
    pub input_size: u32,
}

struct SessionCore {
    state: Mutex<SessionState>,
    deps: CaptureDeps,
}

struct ActiveWorker {
    cancel: CancellationToken,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Enrollment state machine: `Idle -> Running -> {Completed, Cancelled,
/// TimedOut} -> Idle`.
///
/// At most one worker exists at a time; `running` doubles as the gate that
/// enforces it. When a retrain was requested it finishes before `running`
/// reads false again.
pub struct CaptureSession {
    core: Arc<SessionCore>,
    worker: Mutex<Option<ActiveWorker>>,
    stop_wait: Duration,
}

impl CaptureSession {
    pub fn new(deps: CaptureDeps, stop_wait: Duration) -> Self {
        Self {
            core: Arc::new(SessionCore {
                state: Mutex::new(SessionState::default()),
                deps,
            }),
            worker: Mutex::new(None),
            stop_wait,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.core.lock_state().status()
    }

    pub fn start(&self, params: CaptureParams) -> Result<CaptureStatus, CaptureError> {
        FaceStore::validate_label(&params.label)?;
        if params.target_count == 0 {
            return Err(CaptureError::EmptyTarget);
        }

        let mut worker = self.lock_worker();
        {
            let mut state = self.core.lock_state();
            if state.running {
                let label = state.params.as_ref().map(|p| p.label.clone());
                return Err(CaptureError::Conflict(label.unwrap_or_default()));
            }
            *state = SessionState {
                running: true,
                params: Some(params.clone()),
                ..SessionState::default()
            };
        }

        // A previous worker already cleared `running`, so it is about to exit.
        if let Some(finished) = worker.take() {
            join(finished);
        }

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let core = Arc::clone(&self.core);
        let token = cancel.clone();
        let handle = std::thread::spawn(move || {
            core.run_worker(&params, &token);
            drop(done_tx);
        });
        *worker = Some(ActiveWorker {
            cancel,
            done: done_rx,
            handle,
        });

        log::info!("Capture session started");
        Ok(self.status())
    }

    /// Cancels the running session and waits, bounded by the stop wait, for
    /// the worker to finish. Idempotent: without a running session it just
    /// reports the last status.
    pub fn stop(&self) -> CaptureStatus {
        let mut worker = self.lock_worker();
        self.stop_locked(&mut worker, false, &|_| true)
    }

    /// Like [`CaptureSession::stop`] but the worker never retrains, and only
    /// for a session whose label satisfies `affects`. Then runs `f` while no
    /// new session can start. Fails with `Conflict` when the affected worker
    /// is still running after the stop wait.
    pub fn while_stopped<R>(
        &self,
        affects: impl Fn(&str) -> bool,
        f: impl FnOnce() -> R,
    ) -> Result<R, CaptureError> {
        let mut worker = self.lock_worker();
        let status = self.stop_locked(&mut worker, true, &affects);
        if status.running {
            if let Some(label) = status.label.filter(|l| affects(l.as_str())) {
                return Err(CaptureError::Conflict(label));
            }
        }
        Ok(f())
    }

    /// Blocks until the current worker exits or `timeout` passes. Returns
    /// `true` if no worker is running afterwards.
    pub fn wait(&self, timeout: Duration) -> bool {
        let done = self.lock_worker().as_ref().map(|w| w.done.clone());
        match done {
            Some(done) => !matches!(done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        }
    }

    /// Caller holds the worker lock, so no session can start meanwhile.
    fn stop_locked(
        &self,
        worker: &mut Option<ActiveWorker>,
        forced: bool,
        affects: &dyn Fn(&str) -> bool,
    ) -> CaptureStatus {
        {
            let mut state = self.core.lock_state();
            if !state.running {
                drop(state);
                if let Some(finished) = worker.take() {
                    join(finished);
                }
                return self.status();
            }
            let label = state.params.as_ref().map_or("", |p| p.label.as_str());
            if !affects(label) {
                return state.status();
            }
            state.forced |= forced;
        }

        let Some(active) = worker.take() else {
            return self.status();
        };
        active.cancel.cancel();
        match active.done.recv_timeout(self.stop_wait) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Capture worker did not stop within {:?}", self.stop_wait);
                *worker = Some(active);
            }
            _ => join(active),
        }
        self.status()
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<ActiveWorker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(active) = self.lock_worker().take() {
            active.cancel.cancel();
            let _ = active.done.recv_timeout(self.stop_wait);
        }
    }
}

impl SessionCore {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn saved_count(&self) -> usize {
        self.lock_state().saved.len()
    }

    fn run_worker(&self, params: &CaptureParams, cancel: &CancellationToken) {
        let deadline = params.max_duration.map(|d| Instant::now() + d);

        let outcome = loop {
            if cancel.is_cancelled() {
                break CaptureOutcome::Cancelled;
            }
            if self.saved_count() >= params.target_count {
                break CaptureOutcome::Completed;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break CaptureOutcome::TimedOut;
            }

            match self.capture_one(params) {
                Ok(Some(path)) => self.lock_state().saved.push(path),
                Ok(None) => {}
                Err(e) => log::warn!("Capture sample failed: {e}"),
            }
            if self.saved_count() >= params.target_count {
                break CaptureOutcome::Completed;
            }
            if cancel.sleep(params.interval) {
                break CaptureOutcome::Cancelled;
            }
        };

        let forced = self.lock_state().forced;
        if params.retrain_on_stop && !forced {
            if let Err(e) = self.deps.recognizers.reload() {
                log::warn!("Retrain after capture failed: {e}");
            }
        }

        let mut state = self.lock_state();
        state.running = false;
        state.outcome = Some(outcome);
        log::info!(
            "Capture session for {:?} finished: {:?}, {} saved",
            params.label,
            outcome,
            state.saved.len()
        );
    }

    /// One sample from the latest frame. `Ok(None)` when there is no frame
    /// yet or no face in it.
    fn capture_one(&self, params: &CaptureParams) -> Result<Option<PathBuf>, StoreError> {
        let Some(raw) = self.deps.shared.latest_raw() else {
            return Ok(None);
        };
        // Full resolution so small faces are not lost to enrollment.
        let gray = raw.to_gray();
        let boxes = match self.deps.detector.detect(&gray) {
            Ok(boxes) => boxes,
            Err(e) => {
                log::warn!("Capture detection failed: {e}");
                return Ok(None);
            }
        };
        let Some(face) = FaceBox::largest(&boxes) else {
            return Ok(None);
        };

        let crop = params.face_only.then_some(&face);
        let sample = normalize_face(&gray, crop, self.deps.input_size);
        self.deps
            .recognizers
            .store()
            .save_sample(&params.label, &sample)
            .map(Some)
    }
}

fn join(worker: ActiveWorker) {
    if worker.handle.join().is_err() {
        log::warn!("Capture worker panicked");
    }
}
