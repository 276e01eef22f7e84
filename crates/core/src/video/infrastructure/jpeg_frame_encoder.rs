use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::shared::frame::Frame;
use crate::video::domain::frame_encoder::FrameEncoder;

/// Encodes frames as baseline JPEG using the `image` crate.
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        let color = match frame.channels() {
            1 => ExtendedColorType::L8,
            3 => ExtendedColorType::Rgb8,
            other => return Err(format!("Unsupported channel count: {other}").into()),
        };
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.quality).encode(
            frame.data(),
            frame.width(),
            frame.height(),
            color,
        )?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(width: u32, height: u32, channels: u8) -> Frame {
        let len = (width * height) as usize * channels as usize;
        Frame::new(vec![128; len], width, height, channels, 0)
    }

    #[test]
    fn test_encodes_rgb_frame_as_jpeg() {
        let bytes = JpegFrameEncoder::new(80).encode(&make_frame(32, 24, 3)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_encodes_grayscale_frame() {
        let bytes = JpegFrameEncoder::new(80).encode(&make_frame(8, 8, 1)).unwrap();
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    #[test]
    fn test_rejects_unsupported_channels() {
        let result = JpegFrameEncoder::new(80).encode(&make_frame(4, 4, 2));
        assert!(result.is_err());
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(JpegFrameEncoder::new(0).quality, 1);
        assert_eq!(JpegFrameEncoder::new(150).quality, 100);
    }
}
