use image::GrayImage;

/// Result of classifying one normalized face crop.
///
/// `distance` is a dissimilarity score: lower means a closer match.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub label_id: u32,
    pub distance: f64,
}

/// A trained classifier over normalized grayscale face crops.
pub trait FaceRecognizer: Send + Sync {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, Box<dyn std::error::Error>>;
}

/// Builds a [`FaceRecognizer`] from labeled samples.
///
/// `labels[i]` is the dense label id of `samples[i]`; both slices have the
/// same length and are never empty.
pub trait RecognizerTrainer: Send + Sync {
    fn train(
        &self,
        samples: &[GrayImage],
        labels: &[u32],
    ) -> Result<Box<dyn FaceRecognizer>, Box<dyn std::error::Error>>;
}
