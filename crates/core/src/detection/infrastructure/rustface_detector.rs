use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::GrayImage;

use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::face_box::FaceBox;

/// The SeetaFace cascade rejects smaller search windows.
const MIN_SUPPORTED_FACE_SIZE: u32 = 20;

/// Sensitivity knobs of the cascade detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorParams {
    /// Ratio between successive pyramid scales (> 1.0, e.g. 1.2).
    pub scale_factor: f64,
    /// Minimum cascade score for a window to be reported.
    pub score_threshold: f64,
    /// Smallest face side searched for, in pixels.
    pub min_size: u32,
}

/// Face detector backed by the `rustface` crate (SeetaFace engine).
///
/// The model is read once; a lightweight detector is built from it per call so
/// concurrent callers never share mutable detector state.
pub struct RustfaceDetector {
    model: rustface::Model,
    params: DetectorParams,
}

impl RustfaceDetector {
    pub fn from_file(path: &Path, params: DetectorParams) -> Result<Self, Box<dyn std::error::Error>> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open detector model {}: {e}", path.display()))?;
        let model = rustface::read_model(BufReader::new(file))
            .map_err(|e| format!("Failed to load detector model {}: {e}", path.display()))?;
        Ok(Self { model, params })
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceBox>, Box<dyn std::error::Error>> {
        let (width, height) = image.dimensions();
        if width < MIN_SUPPORTED_FACE_SIZE || height < MIN_SUPPORTED_FACE_SIZE {
            return Ok(Vec::new());
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.params.min_size.max(MIN_SUPPORTED_FACE_SIZE));
        detector.set_score_thresh(self.params.score_threshold);
        detector.set_pyramid_scale_factor(pyramid_scale(self.params.scale_factor));
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(image.as_raw(), width, height));

        Ok(faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                FaceBox::clipped(
                    bbox.x() as i64,
                    bbox.y() as i64,
                    bbox.width() as i64,
                    bbox.height() as i64,
                    width,
                    height,
                )
            })
            .collect())
    }
}

/// SeetaFace shrinks the image by this factor per level; the inverse of the
/// conventional "scale factor" > 1.
fn pyramid_scale(scale_factor: f64) -> f32 {
    (1.0 / scale_factor.max(1.01)) as f32
}
