use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;

/// One face reported by the most recent pipeline cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedPerson {
    pub label: String,
    /// Recognizer distance, when a prediction was made for this box.
    pub confidence: Option<f64>,
    pub bbox: FaceBox,
    pub timestamp: SystemTime,
}

/// The last published frame, both encoded for display and raw for capture.
#[derive(Clone)]
pub struct PublishedFrame {
    pub encoded: Arc<Vec<u8>>,
    pub raw: Arc<Frame>,
}

/// Latest pipeline output, written by the pipeline loop and read by
/// everything else.
///
/// Frame and people are guarded separately; each lock is held only for the
/// assignment or clone.
pub struct SharedState {
    frame: Mutex<Option<PublishedFrame>>,
    people: Mutex<Vec<DetectedPerson>>,
    expire: Duration,
}

impl SharedState {
    pub fn new(expire: Duration) -> Self {
        Self {
            frame: Mutex::new(None),
            people: Mutex::new(Vec::new()),
            expire,
        }
    }

    /// Replaces the people list wholesale.
    pub fn publish_people(&self, people: Vec<DetectedPerson>) {
        *self.people.lock().unwrap_or_else(|e| e.into_inner()) = people;
    }

    pub fn publish_frame(&self, encoded: Vec<u8>, raw: Frame) {
        let published = PublishedFrame {
            encoded: Arc::new(encoded),
            raw: Arc::new(raw),
        };
        *self.frame.lock().unwrap_or_else(|e| e.into_inner()) = Some(published);
    }

    /// `None` until the first cycle has published.
    pub fn latest_frame(&self) -> Option<PublishedFrame> {
        self.frame.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn latest_raw(&self) -> Option<Arc<Frame>> {
        self.latest_frame().map(|f| f.raw)
    }

    pub fn is_ready(&self) -> bool {
        self.frame.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// People whose `timestamp` is no more than the expiry before `now`, in
    /// published order. Timestamps ahead of `now` count as fresh.
    pub fn current_people(&self, now: SystemTime) -> Vec<DetectedPerson> {
        let people = self.people.lock().unwrap_or_else(|e| e.into_inner()).clone();
        people
            .into_iter()
            .filter(|p| now.duration_since(p.timestamp).map_or(true, |age| age <= self.expire))
            .collect()
    }
}
