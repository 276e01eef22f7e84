use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;

use crate::detection::domain::face_detector::FaceDetector;
use crate::pipeline::capture_session::{CaptureError, CaptureParams, CaptureSession, CaptureStatus};
use crate::pipeline::shared_state::{DetectedPerson, PublishedFrame, SharedState};
use crate::recognition::domain::face_crop::normalize_face;
use crate::recognition::infrastructure::face_store::{FaceStore, StoreError};
use crate::recognition::recognizer_manager::{RecognizerManager, ReloadReport, TrainingError};
use crate::shared::config::AppConfig;
use crate::shared::face_box::FaceBox;

/// Lower bound for the default register-and-wait timeout.
const MIN_REGISTER_WAIT: Duration = Duration::from_secs(2);
/// Slack applied to `target * interval` for the default timeout.
const REGISTER_WAIT_SLACK: f64 = 1.8;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("missing label")]
    MissingLabel,
    #[error("invalid label {0:?}")]
    InvalidLabel(String),
    #[error("a capture session for {0:?} is already running")]
    SessionConflict(String),
    #[error("label not found: {0}")]
    NotFound(String),
    #[error("no frame available yet")]
    NoFrame,
    #[error("no face detected")]
    NoFace,
    #[error("target count must be at least 1")]
    EmptyTarget,
    #[error("could not decode image: {0}")]
    InvalidImage(#[source] image::ImageError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Training(#[from] TrainingError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidLabel(l) => ServiceError::InvalidLabel(l),
            StoreError::NotFound(l) => ServiceError::NotFound(l),
            other => ServiceError::Store(other),
        }
    }
}

impl From<CaptureError> for ServiceError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::Conflict(l) => ServiceError::SessionConflict(l),
            CaptureError::EmptyTarget => ServiceError::EmptyTarget,
            CaptureError::Store(s) => s.into(),
        }
    }
}

/// Result of a register call that may have waited for the session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegisterResult {
    pub status: CaptureStatus,
    pub waited: bool,
    /// The wait ran out while the session was still capturing.
    pub timed_out: bool,
    pub labels: Vec<String>,
}

/// Service readiness and the settings that shape recognition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Health {
    pub ready: bool,
    pub camera: String,
    pub recognition: bool,
    pub labels: Vec<String>,
    pub threshold: f64,
    pub detect_every_n: u32,
    pub recog_every_n: u32,
    pub recog_min_side: u32,
    pub vote_window: usize,
    pub vote_require: usize,
}

/// Operations offered to a front-end. Thin wrappers over the shared state,
/// the recognizer manager and the capture session.
pub struct RecognitionService {
    shared: Arc<SharedState>,
    recognizers: Arc<RecognizerManager>,
    session: CaptureSession,
    detector: Arc<dyn FaceDetector>,
    config: AppConfig,
}

impl RecognitionService {
    pub fn new(
        shared: Arc<SharedState>,
        recognizers: Arc<RecognizerManager>,
        session: CaptureSession,
        detector: Arc<dyn FaceDetector>,
        config: AppConfig,
    ) -> Self {
        Self {
            shared,
            recognizers,
            session,
            detector,
            config,
        }
    }

    pub fn latest_frame(&self) -> Option<PublishedFrame> {
        self.shared.latest_frame()
    }

    pub fn current_people(&self, now: SystemTime) -> Vec<DetectedPerson> {
        self.shared.current_people(now)
    }

    /// Capture parameters for `label` with the configured defaults.
    pub fn default_params(&self, label: impl Into<String>) -> CaptureParams {
        CaptureParams {
            label: label.into(),
            interval: self.config.capture_interval(),
            target_count: self.config.capture_target_count,
            face_only: true,
            retrain_on_stop: true,
            max_duration: None,
        }
    }

    pub fn start_capture(&self, params: CaptureParams) -> Result<CaptureStatus, ServiceError> {
        require_label(&params.label)?;
        Ok(self.session.start(params)?)
    }

    pub fn stop_capture(&self) -> CaptureStatus {
        self.session.stop()
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.session.status()
    }

    /// Starts a session and, when `wait` is set, blocks until it finishes or
    /// `timeout` passes (default `max(2s, target * interval * 1.8)`).
    pub fn register(
        &self,
        params: CaptureParams,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<RegisterResult, ServiceError> {
        let timeout = timeout.unwrap_or_else(|| default_register_wait(&params));
        let status = self.start_capture(params)?;
        if !wait {
            return Ok(RegisterResult {
                status,
                waited: false,
                timed_out: false,
                labels: self.labels(),
            });
        }

        let finished = self.session.wait(timeout);
        Ok(RegisterResult {
            status: self.session.status(),
            waited: true,
            timed_out: !finished,
            labels: self.labels(),
        })
    }

    /// Labels the live recognizer can report; empty while recognition is off.
    pub fn labels(&self) -> Vec<String> {
        if !self.config.enable_recognition {
            return Vec::new();
        }
        self.recognizers.labels()
    }

    pub fn reload(&self) -> Result<ReloadReport, ServiceError> {
        Ok(self.recognizers.reload()?)
    }

    /// Removes a label's samples and retrains. A capture session running for
    /// that label is force-stopped first; if it does not stop in time nothing
    /// is deleted.
    pub fn delete_label(&self, label: &str) -> Result<ReloadReport, ServiceError> {
        require_label(label)?;
        FaceStore::validate_label(label)?;
        self.session
            .while_stopped(|running| running == label, || self.store().delete_label(label))??;
        self.reload()
    }

    /// Removes every label and retrains to an empty model, stopping any
    /// running session first.
    pub fn clear_all(&self) -> Result<ReloadReport, ServiceError> {
        self.session.while_stopped(|_| true, || self.store().clear())??;
        self.reload()
    }

    /// Stores one uploaded image (any format `image` decodes) as a sample for
    /// `label` and retrains.
    pub fn enroll_one(&self, label: &str, image_bytes: &[u8]) -> Result<PathBuf, ServiceError> {
        require_label(label)?;
        FaceStore::validate_label(label)?;
        let gray = image::load_from_memory(image_bytes)
            .map_err(ServiceError::InvalidImage)?
            .to_luma8();
        let face = normalize_face(&gray, None, self.config.recog_input_size);
        let path = self.store().save_sample(label, &face)?;
        self.reload()?;
        Ok(path)
    }

    /// Stores `n` copies of the largest face in the latest frame.
    pub fn capture_now(
        &self,
        label: &str,
        n: usize,
        face_only: bool,
        retrain: bool,
    ) -> Result<Vec<PathBuf>, ServiceError> {
        require_label(label)?;
        FaceStore::validate_label(label)?;
        let raw = self.shared.latest_raw().ok_or(ServiceError::NoFrame)?;
        let gray = raw.to_gray();
        let boxes = self.detector.detect(&gray).unwrap_or_else(|e| {
            log::warn!("Snapshot detection failed: {e}");
            Vec::new()
        });
        let face = FaceBox::largest(&boxes).ok_or(ServiceError::NoFace)?;

        let sample = normalize_face(
            &gray,
            face_only.then_some(&face),
            self.config.recog_input_size,
        );
        let saved = (0..n.max(1))
            .map(|_| self.store().save_sample(label, &sample))
            .collect::<Result<Vec<_>, _>>()?;

        if retrain {
            self.reload()?;
        }
        Ok(saved)
    }

    pub fn label_counts(&self) -> Result<BTreeMap<String, usize>, ServiceError> {
        Ok(self.store().label_counts()?)
    }

    pub fn health(&self) -> Health {
        let c = &self.config;
        Health {
            ready: self.shared.is_ready(),
            camera: c.camera.clone(),
            recognition: c.enable_recognition,
            labels: self.labels(),
            threshold: c.recog_threshold,
            detect_every_n: c.detect_every_n,
            recog_every_n: c.recog_every_n,
            recog_min_side: c.recog_min_side,
            vote_window: c.vote_window,
            vote_require: c.vote_require,
        }
    }

    fn store(&self) -> &FaceStore {
        self.recognizers.store()
    }
}

fn require_label(label: &str) -> Result<(), ServiceError> {
    if label.trim().is_empty() {
        Err(ServiceError::MissingLabel)
    } else {
        Ok(())
    }
}

fn default_register_wait(params: &CaptureParams) -> Duration {
    let expected = params.interval.mul_f64(params.target_count as f64 * REGISTER_WAIT_SLACK);
    expected.max(MIN_REGISTER_WAIT)
}
