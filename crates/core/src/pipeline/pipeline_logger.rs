use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cross-cutting logger for pipeline loop events.
///
/// Decouples the loop from specific output mechanisms so tests and the
/// console can observe throughput without changing the orchestration code.
pub trait PipelineLogger: Send {
    /// Count one processed frame and the faces it contained.
    fn frame(&mut self, faces: usize);

    /// Record how long a named pipeline stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit a summary if the reporting interval has elapsed at `now`.
    /// Default: no-op.
    fn flush_if_due(&mut self, _now: Instant) {}
}

/// Silent logger that discards all events.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn frame(&mut self, _faces: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Logs a throughput summary through `log::info!` once per wall-clock
/// interval, independent of how many frames were processed.
pub struct LogPipelineLogger {
    interval: Duration,
    window_start: Instant,
    frames: usize,
    faces: usize,
    timings: HashMap<String, Vec<f64>>,
    settings: String,
}

impl LogPipelineLogger {
    /// `settings` is appended verbatim to every summary (decimation, vote
    /// window and similar static facts).
    pub fn new(interval: Duration, settings: impl Into<String>) -> Self {
        Self::starting_at(interval, settings, Instant::now())
    }

    fn starting_at(interval: Duration, settings: impl Into<String>, start: Instant) -> Self {
        Self {
            interval,
            window_start: start,
            frames: 0,
            faces: 0,
            timings: HashMap::new(),
            settings: settings.into(),
        }
    }

    /// Formats the current window, or `None` if no frame was recorded.
    pub fn summary_string(&self, now: Instant) -> Option<String> {
        if self.frames == 0 {
            return None;
        }
        let elapsed = now.duration_since(self.window_start).as_secs_f64();
        let fps = if elapsed > 0.0 {
            self.frames as f64 / elapsed
        } else {
            0.0
        };

        let mut line = format!(
            "[stats] fps={fps:.1} frames={} faces={}",
            self.frames, self.faces
        );
        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let avg = durations.iter().sum::<f64>() / durations.len() as f64;
            line.push_str(&format!(" {stage}={avg:.1}ms"));
        }
        if !self.settings.is_empty() {
            line.push(' ');
            line.push_str(&self.settings);
        }
        Some(line)
    }

    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.frames = 0;
        self.faces = 0;
        self.timings.clear();
    }
}

impl PipelineLogger for LogPipelineLogger {
    fn frame(&mut self, faces: usize) {
        self.frames += 1;
        self.faces += faces;
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn flush_if_due(&mut self, now: Instant) {
        if now.duration_since(self.window_start) < self.interval {
            return;
        }
        if let Some(text) = self.summary_string(now) {
            log::info!("{text}");
        }
        self.reset(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullPipelineLogger;
        logger.frame(2);
        logger.timing("detect", 5.0);
        logger.info("hello");
        logger.flush_if_due(Instant::now());
    }

    #[test]
    fn test_empty_window_has_no_summary() {
        let logger = LogPipelineLogger::new(Duration::from_secs(5), "");
        assert!(logger.summary_string(Instant::now()).is_none());
    }

    #[test]
    fn test_summary_includes_fps_faces_and_stages() {
        let start = Instant::now();
        let mut logger = LogPipelineLogger::starting_at(Duration::from_secs(5), "vote=5/3", start);
        for _ in 0..10 {
            logger.frame(1);
        }
        logger.timing("detect", 20.0);
        logger.timing("detect", 30.0);
        logger.timing("encode", 4.0);

        let summary = logger.summary_string(start + Duration::from_secs(2)).unwrap();
        assert!(summary.contains("fps=5.0"));
        assert!(summary.contains("faces=10"));
        assert!(summary.contains("detect=25.0ms"));
        assert!(summary.contains("encode=4.0ms"));
        assert!(summary.ends_with("vote=5/3"));
    }

    #[test]
    fn test_flush_waits_for_interval() {
        let start = Instant::now();
        let mut logger = LogPipelineLogger::starting_at(Duration::from_secs(5), "", start);
        logger.frame(0);

        logger.flush_if_due(start + Duration::from_secs(1));
        assert_eq!(logger.frames, 1);

        logger.flush_if_due(start + Duration::from_secs(5));
        assert_eq!(logger.frames, 0);
        assert_eq!(logger.window_start, start + Duration::from_secs(5));
    }
}
