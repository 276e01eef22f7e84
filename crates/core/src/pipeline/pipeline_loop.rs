use std::sync::Arc;
use std::time::{Duration, Instant};

use image::GrayImage;

use crate::detection::domain::face_detector::{detect_downscaled, FaceDetector};
use crate::pipeline::frame_annotator::FrameAnnotator;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::pipeline::shared_state::{DetectedPerson, SharedState};
use crate::recognition::domain::face_crop::normalize_face;
use crate::recognition::domain::vote_stabilizer::{Vote, VoteStabilizer};
use crate::recognition::recognizer_manager::{RecognizerManager, RecognizerSnapshot};
use crate::shared::cancellation::CancellationToken;
use crate::shared::config::AppConfig;
use crate::shared::constants::UNKNOWN_LABEL;
use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;
use crate::video::domain::frame_encoder::FrameEncoder;
use crate::video::domain::frame_source::{FrameSource, SourceError};

const READ_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Whether a step decimated to every `every_n` cycles runs on `cycle`.
/// An interval of 0 is treated as 1.
pub fn is_due(cycle: u64, every_n: u32) -> bool {
    cycle % u64::from(every_n.max(1)) == 0
}

/// Per-cycle knobs of the loop, taken from [`AppConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct LoopSettings {
    pub detect_every_n: u32,
    pub recog_every_n: u32,
    pub recog_min_side: u32,
    pub recog_threshold: f64,
    pub recog_input_size: u32,
    pub detect_downscale: f64,
    pub enable_recognition: bool,
    pub read_retry: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            detect_every_n: config.detect_every_n,
            recog_every_n: config.recog_every_n,
            recog_min_side: config.recog_min_side,
            recog_threshold: config.recog_threshold,
            recog_input_size: config.recog_input_size,
            detect_downscale: config.detect_downscale,
            enable_recognition: config.enable_recognition,
            read_retry: READ_RETRY_DELAY,
        }
    }
}

/// What one cycle did; returned for observability and tests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub detected: bool,
    pub recognized: bool,
    pub people: Vec<DetectedPerson>,
    /// Label drawn on the boxes after vote smoothing.
    pub displayed: String,
    pub published: bool,
}

/// The long-running driver: reads frames, decimates detection and
/// recognition, smooths identities, and publishes results.
pub struct PipelineLoop {
    source: Box<dyn FrameSource>,
    detector: Arc<dyn FaceDetector>,
    recognizers: Arc<RecognizerManager>,
    encoder: Box<dyn FrameEncoder>,
    annotator: FrameAnnotator,
    state: Arc<SharedState>,
    logger: Box<dyn PipelineLogger>,
    votes: VoteStabilizer,
    settings: LoopSettings,
    boxes: Vec<FaceBox>,
    cycle: u64,
}

impl PipelineLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Arc<dyn FaceDetector>,
        recognizers: Arc<RecognizerManager>,
        encoder: Box<dyn FrameEncoder>,
        annotator: FrameAnnotator,
        state: Arc<SharedState>,
        logger: Box<dyn PipelineLogger>,
        votes: VoteStabilizer,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            detector,
            recognizers,
            encoder,
            annotator,
            state,
            logger,
            votes,
            settings,
            boxes: Vec::new(),
            cycle: 0,
        }
    }

    /// Runs until `cancel` fires. Only a failure to open the source ends the
    /// loop early; read failures are retried after a short sleep.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<(), SourceError> {
        self.source.open()?;

        if self.settings.enable_recognition {
            if let Err(e) = self.recognizers.reload() {
                log::warn!("Initial recognizer training failed: {e}");
            }
        }
        self.logger.info("Pipeline started");

        while !cancel.is_cancelled() {
            match self.source.read() {
                Ok(frame) => {
                    self.run_cycle(frame);
                }
                Err(e) => {
                    log::debug!("Frame read failed: {e}");
                    if cancel.sleep(self.settings.read_retry) {
                        break;
                    }
                }
            }
        }

        self.source.close();
        self.logger.info("Pipeline stopped");
        Ok(())
    }

    /// Processes one frame end to end and publishes the result.
    pub fn run_cycle(&mut self, frame: Frame) -> CycleReport {
        let cycle = self.cycle;
        self.cycle += 1;

        let gray = frame.to_gray();
        let detect_now = is_due(cycle, self.settings.detect_every_n);
        if detect_now {
            let start = Instant::now();
            self.boxes = self.detect(&gray);
            self.logger.timing("detect", elapsed_ms(start));
        }

        let recognize_now =
            self.settings.enable_recognition && is_due(cycle, self.settings.recog_every_n);
        let snapshot = self.recognizers.snapshot();
        let seen_at = frame.captured_at();

        let start = Instant::now();
        let people: Vec<DetectedPerson> = self
            .boxes
            .iter()
            .map(|b| {
                let (label, confidence) = if recognize_now {
                    self.classify(&snapshot, &gray, b)
                } else {
                    (None, None)
                };
                DetectedPerson {
                    label: label.unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
                    confidence,
                    bbox: *b,
                    timestamp: seen_at,
                }
            })
            .collect();
        if recognize_now {
            self.logger.timing("recognize", elapsed_ms(start));
            let vote = match people.first() {
                Some(primary) if primary.label != UNKNOWN_LABEL => {
                    Vote::new(Some(primary.label.clone()), primary.confidence)
                }
                _ => Vote::unknown(),
            };
            self.votes.push(vote);
        }

        let displayed = self.votes.smoothed().to_string();
        self.state.publish_people(people.clone());
        let published = self.publish_frame(frame, &displayed);

        self.logger.frame(people.len());
        self.logger.flush_if_due(Instant::now());

        CycleReport {
            cycle,
            detected: detect_now,
            recognized: recognize_now,
            people,
            displayed,
            published,
        }
    }

    fn detect(&self, gray: &GrayImage) -> Vec<FaceBox> {
        match detect_downscaled(self.detector.as_ref(), gray, self.settings.detect_downscale) {
            Ok(mut boxes) => {
                FaceBox::sort_by_area_desc(&mut boxes);
                boxes
            }
            Err(e) => {
                log::warn!("Face detection failed: {e}");
                Vec::new()
            }
        }
    }

    /// Label and distance for one box. Boxes below the minimum side are never
    /// sent to the recognizer; predictions above the threshold or with an id
    /// outside the snapshot's registry stay unlabeled.
    fn classify(
        &self,
        snapshot: &RecognizerSnapshot,
        gray: &GrayImage,
        bbox: &FaceBox,
    ) -> (Option<String>, Option<f64>) {
        let Some(model) = &snapshot.model else {
            return (None, None);
        };
        if bbox.min_side() < self.settings.recog_min_side {
            return (None, None);
        }

        let face = normalize_face(gray, Some(bbox), self.settings.recog_input_size);
        match model.predict(&face) {
            Ok(p) => {
                let label = snapshot
                    .registry
                    .label(p.label_id)
                    .filter(|_| p.distance <= self.settings.recog_threshold)
                    .map(str::to_string);
                (label, Some(p.distance))
            }
            Err(e) => {
                log::warn!("Face recognition failed: {e}");
                (None, None)
            }
        }
    }

    fn publish_frame(&mut self, frame: Frame, label: &str) -> bool {
        let start = Instant::now();
        let mut annotated = frame.to_rgb_image();
        self.annotator.annotate(&mut annotated, &self.boxes, label);
        let annotated = Frame::from_rgb_image(annotated, frame.index());

        match self.encoder.encode(&annotated) {
            Ok(encoded) => {
                self.state.publish_frame(encoded, frame);
                self.logger.timing("encode", elapsed_ms(start));
                true
            }
            Err(e) => {
                log::warn!("Frame encoding failed: {e}");
                false
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
