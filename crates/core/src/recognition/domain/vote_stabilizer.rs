use std::collections::VecDeque;
use std::fmt;

use crate::shared::constants::UNKNOWN_LABEL;

pub const DEFAULT_WINDOW: usize = 5;
pub const DEFAULT_REQUIRE: usize = 3;

/// One recognition cycle's best guess for the primary subject.
#[derive(Clone, Debug, PartialEq)]
pub struct Vote {
    /// `None` means the cycle could not identify anyone.
    pub label: Option<String>,
    /// Raw recognizer distance, when a prediction was made.
    pub confidence: Option<f64>,
}

impl Vote {
    pub fn unknown() -> Self {
        Self {
            label: None,
            confidence: None,
        }
    }

    pub fn new(label: Option<String>, confidence: Option<f64>) -> Self {
        Self { label, confidence }
    }
}

/// The identity shown to the operator after smoothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SmoothedLabel {
    pub label: Option<String>,
    /// Mean confidence of the winning label's votes, if any carried one.
    pub confidence: Option<f64>,
}

impl fmt::Display for SmoothedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.label, self.confidence) {
            (None, _) => write!(f, "{UNKNOWN_LABEL}"),
            (Some(label), Some(conf)) => write!(f, "{label} ({conf:.1})"),
            (Some(label), None) => write!(f, "{label}"),
        }
    }
}

/// Majority vote over a sliding window of per-cycle guesses.
///
/// A label is displayed only once it holds at least `require` of the known
/// votes in the window, so neither a single misclassification nor a single
/// correct hit flips the displayed identity. Ties go to the label encountered
/// first when scanning from the oldest vote.
pub struct VoteStabilizer {
    window: VecDeque<Vote>,
    capacity: usize,
    require: usize,
}

impl VoteStabilizer {
    pub fn new(window: usize, require: usize) -> Self {
        let capacity = window.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            require,
        }
    }

    /// Appends a vote, evicting the oldest once the window is full.
    pub fn push(&mut self, vote: Vote) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(vote);
    }

    pub fn smoothed(&self) -> SmoothedLabel {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for label in self.window.iter().filter_map(|v| v.label.as_deref()) {
            match counts.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label, 1)),
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for &(label, n) in &counts {
            if best.map_or(true, |(_, top)| n > top) {
                best = Some((label, n));
            }
        }

        match best {
            Some((label, votes)) if votes >= self.require => SmoothedLabel {
                label: Some(label.to_string()),
                confidence: self.mean_confidence(label),
            },
            _ => SmoothedLabel::default(),
        }
    }

    fn mean_confidence(&self, label: &str) -> Option<f64> {
        let confs: Vec<f64> = self
            .window
            .iter()
            .filter(|v| v.label.as_deref() == Some(label))
            .filter_map(|v| v.confidence)
            .collect();
        if confs.is_empty() {
            None
        } else {
            Some(confs.iter().sum::<f64>() / confs.len() as f64)
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl Default for VoteStabilizer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_REQUIRE)
    }
}
