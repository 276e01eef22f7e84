use std::time::SystemTime;

use image::{GrayImage, RgbImage};
use ndarray::ArrayView3;

/// A single camera frame: contiguous RGB bytes in row-major order plus the
/// wall-clock time it was captured.
///
/// Format conversion happens at I/O boundaries only; the pipeline works with
/// this type and derives grayscale views from it on demand.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: u64,
    captured_at: SystemTime,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            captured_at: SystemTime::now(),
        }
    }

    pub fn from_rgb_image(image: RgbImage, index: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, 3, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Luma conversion (BT.601 weights) used for detection and recognition.
    pub fn to_gray(&self) -> GrayImage {
        let pixels = self.as_ndarray();
        let mut gray = GrayImage::new(self.width, self.height);
        for (x, y, px) in gray.enumerate_pixels_mut() {
            let (row, col) = (y as usize, x as usize);
            px.0[0] = if self.channels >= 3 {
                let r = pixels[[row, col, 0]] as u32;
                let g = pixels[[row, col, 1]] as u32;
                let b = pixels[[row, col, 2]] as u32;
                ((299 * r + 587 * g + 114 * b + 500) / 1000) as u8
            } else {
                pixels[[row, col, 0]]
            };
        }
        gray
    }

    /// Copies the frame into an `RgbImage`, expanding single-channel data.
    pub fn to_rgb_image(&self) -> RgbImage {
        if self.channels == 3 {
            if let Some(img) = RgbImage::from_raw(self.width, self.height, self.data.clone()) {
                return img;
            }
        }
        let gray = self.to_gray();
        image::DynamicImage::ImageLuma8(gray).to_rgb8()
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12]; // 2x2x3
        let frame = Frame::new(data.clone(), 2, 2, 3, 5);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        Frame::new(vec![0u8; 10], 2, 2, 3, 0);
    }

    #[test]
    fn test_as_ndarray_pixel_access() {
        // 2x2 RGB: set pixel (row=1, col=0) to red
        let mut data = vec![0u8; 12];
        data[6] = 255;
        let frame = Frame::new(data, 2, 2, 3, 0);
        let arr = frame.as_ndarray();
        assert_eq!(arr.shape(), &[2, 2, 3]);
        assert_eq!(arr[[1, 0, 0]], 255);
        assert_eq!(arr[[1, 0, 1]], 0);
    }

    #[test]
    fn test_to_gray_uses_luma_weights() {
        // white, red, green, blue
        let data = vec![255, 255, 255, 255, 0, 0, 0, 255, 0, 0, 0, 255];
        let frame = Frame::new(data, 4, 1, 3, 0);
        let gray = frame.to_gray();
        assert_eq!(gray.get_pixel(0, 0).0[0], 255);
        assert_eq!(gray.get_pixel(1, 0).0[0], 76);
        assert_eq!(gray.get_pixel(2, 0).0[0], 150);
        assert_eq!(gray.get_pixel(3, 0).0[0], 29);
    }

    #[test]
    fn test_single_channel_frame_expands_to_rgb() {
        let frame = Frame::new(vec![10, 20], 2, 1, 1, 0);
        let rgb = frame.to_rgb_image();
        assert_eq!(rgb.get_pixel(1, 0).0, [20, 20, 20]);
    }

    #[test]
    fn test_from_rgb_image_roundtrip_dimensions() {
        let img = RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]));
        let frame = Frame::from_rgb_image(img, 7);
        assert_eq!((frame.width(), frame.height(), frame.index()), (3, 2, 7));
        assert_eq!(&frame.data()[..3], &[1, 2, 3]);
    }
}
