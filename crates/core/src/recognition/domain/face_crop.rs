use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::shared::face_box::FaceBox;

/// Crops `bbox` out of `gray` (or keeps the whole image when `None`) and
/// resizes the result to a `size`x`size` square, the form every sample and
/// query takes before it reaches the recognizer.
pub fn normalize_face(gray: &GrayImage, bbox: Option<&FaceBox>, size: u32) -> GrayImage {
    let size = size.max(1);
    match bbox {
        Some(b) => {
            let crop = imageops::crop_imm(gray, b.x, b.y, b.width, b.height).to_image();
            imageops::resize(&crop, size, size, FilterType::Triangle)
        }
        None => imageops::resize(gray, size, size, FilterType::Triangle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_is_resized_to_square() {
        let gray = GrayImage::new(200, 100);
        let bbox = FaceBox::new(10, 20, 60, 40).unwrap();
        let face = normalize_face(&gray, Some(&bbox), 96);
        assert_eq!(face.dimensions(), (96, 96));
    }

    #[test]
    fn test_full_frame_when_no_box() {
        let gray = GrayImage::new(64, 48);
        assert_eq!(normalize_face(&gray, None, 32).dimensions(), (32, 32));
    }

    #[test]
    fn test_crop_takes_box_content() {
        let mut gray = GrayImage::new(20, 20);
        for y in 5..10 {
            for x in 5..10 {
                gray.put_pixel(x, y, image::Luma([200]));
            }
        }
        let bbox = FaceBox::new(5, 5, 5, 5).unwrap();
        let face = normalize_face(&gray, Some(&bbox), 10);
        assert!(face.pixels().all(|p| p.0[0] == 200));
    }
}
