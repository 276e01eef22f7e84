use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::shared::face_box::FaceBox;

/// Domain interface for face detection.
///
/// Boxes are returned in the coordinate space of the image passed in. The
/// detector is shared between the pipeline and capture workers, hence `&self`
/// and `Sync`.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBox>, Box<dyn std::error::Error>>;
}

/// Runs `detector` on `gray` shrunk by `downscale` and maps the boxes back to
/// full resolution (`scale = 1 / downscale`). A factor of 1.0 or more
/// detects on the original image.
pub fn detect_downscaled(
    detector: &dyn FaceDetector,
    gray: &GrayImage,
    downscale: f64,
) -> Result<Vec<FaceBox>, Box<dyn std::error::Error>> {
    let (w, h) = gray.dimensions();
    if downscale >= 1.0 || downscale <= 0.0 {
        return detector.detect(gray);
    }

    let small_w = ((w as f64 * downscale).round() as u32).max(1);
    let small_h = ((h as f64 * downscale).round() as u32).max(1);
    let small = imageops::resize(gray, small_w, small_h, FilterType::Triangle);

    let scale = 1.0 / downscale;
    Ok(detector
        .detect(&small)?
        .iter()
        .filter_map(|b| b.rescaled(scale, w, h))
        .collect())
}
