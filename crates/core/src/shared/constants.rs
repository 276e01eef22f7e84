pub const DETECTOR_MODEL_NAME: &str = "seeta_fd_frontal_v1.0.bin";
pub const DETECTOR_MODEL_URL: &str =
    "https://github.com/atomashpolskiy/rustface/raw/master/model/seeta_fd_frontal_v1.0.bin";

/// Label reported for faces that were not (or could not be) identified.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Extensions picked up when scanning the training-data root.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Extension used when persisting new samples.
pub const SAMPLE_EXTENSION: &str = "png";

/// Frames read while warming up a freshly opened camera.
pub const CAMERA_WARMUP_FRAMES: usize = 5;
