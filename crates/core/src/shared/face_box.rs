use serde::Serialize;

/// A detected face rectangle in full-resolution frame coordinates.
///
/// Construction goes through [`FaceBox::new`], which rejects empty boxes, so
/// every instance has a non-zero width and height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Builds a box from signed detector output, clipping it to the frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clipped(
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        frame_w: u32,
        frame_h: u32,
    ) -> Option<Self> {
        let x1 = x.max(0);
        let y1 = y.max(0);
        let x2 = (x + width).min(frame_w as i64);
        let y2 = (y + height).min(frame_h as i64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Self::new(x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32)
    }

    /// Maps a box found on a downscaled image back to full resolution.
    ///
    /// `scale` is the inverse of the downscale factor; coordinates are
    /// truncated the same way for every field and then clipped to the frame.
    pub fn rescaled(&self, scale: f64, frame_w: u32, frame_h: u32) -> Option<Self> {
        let s = |v: u32| (v as f64 * scale) as i64;
        Self::clipped(
            s(self.x),
            s(self.y),
            s(self.width),
            s(self.height),
            frame_w,
            frame_h,
        )
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Sorts boxes largest-first. The sort is stable so equal areas keep
    /// detector order.
    pub fn sort_by_area_desc(boxes: &mut [FaceBox]) {
        boxes.sort_by(|a, b| b.area().cmp(&a.area()));
    }

    /// Largest box by area; the first one wins on ties.
    pub fn largest(boxes: &[FaceBox]) -> Option<FaceBox> {
        boxes.iter().copied().fold(None, |best, b| match best {
            Some(cur) if cur.area() >= b.area() => Some(cur),
            _ => Some(b),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fb(x: u32, y: u32, w: u32, h: u32) -> FaceBox {
        FaceBox::new(x, y, w, h).unwrap()
    }

    #[rstest]
    #[case(0, 10)]
    #[case(10, 0)]
    #[case(0, 0)]
    fn test_new_rejects_empty(#[case] w: u32, #[case] h: u32) {
        assert!(FaceBox::new(1, 1, w, h).is_none());
    }

    #[test]
    fn test_area_and_min_side() {
        let b = fb(0, 0, 30, 50);
        assert_eq!(b.area(), 1500);
        assert_eq!(b.min_side(), 30);
    }

    #[test]
    fn test_clipped_to_frame_edges() {
        let b = FaceBox::clipped(-10, 90, 40, 40, 100, 100).unwrap();
        assert_eq!(b, fb(0, 90, 30, 10));
    }

    #[test]
    fn test_clipped_outside_frame_is_none() {
        assert!(FaceBox::clipped(120, 0, 10, 10, 100, 100).is_none());
        assert!(FaceBox::clipped(-20, 0, 10, 10, 100, 100).is_none());
    }

    #[test]
    fn test_rescaled_inverse_of_downscale() {
        // Detected on a 0.4x image; scale back by 1 / 0.4 = 2.5
        let b = fb(10, 20, 40, 40);
        let full = b.rescaled(2.5, 640, 480).unwrap();
        assert_eq!(full, fb(25, 50, 100, 100));
    }

    #[test]
    fn test_rescaled_clips_overflow() {
        let b = fb(240, 180, 40, 40);
        let full = b.rescaled(2.5, 640, 480).unwrap();
        assert_eq!(full, fb(600, 450, 40, 30));
    }

    #[test]
    fn test_sort_by_area_desc_is_stable() {
        let mut boxes = vec![fb(0, 0, 10, 10), fb(1, 1, 20, 20), fb(2, 2, 10, 10)];
        FaceBox::sort_by_area_desc(&mut boxes);
        assert_eq!(boxes[0], fb(1, 1, 20, 20));
        assert_eq!(boxes[1], fb(0, 0, 10, 10));
        assert_eq!(boxes[2], fb(2, 2, 10, 10));
    }

    #[test]
    fn test_largest_prefers_first_on_tie() {
        let boxes = vec![fb(0, 0, 10, 10), fb(5, 5, 10, 10)];
        assert_eq!(FaceBox::largest(&boxes), Some(fb(0, 0, 10, 10)));
        assert_eq!(FaceBox::largest(&[]), None);
    }
}
