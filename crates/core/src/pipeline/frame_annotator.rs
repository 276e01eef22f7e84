use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::shared::face_box::FaceBox;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_SCALE: f32 = 18.0;

/// Draws face rectangles and the displayed label onto outgoing frames.
///
/// Text needs a TrueType font; without one only the rectangles are drawn.
pub struct FrameAnnotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl FrameAnnotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self {
            font,
            scale: PxScale::from(TEXT_SCALE),
        }
    }

    pub fn without_text() -> Self {
        Self::new(None)
    }

    pub fn from_font_file(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let Some(path) = path else {
            return Ok(Self::without_text());
        };
        let bytes = std::fs::read(path)
            .map_err(|e| format!("Failed to read font {}: {e}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| format!("Invalid font {}: {e}", path.display()))?;
        Ok(Self::new(Some(font)))
    }

    /// Outlines every box and writes `label` just above it, or inside the
    /// top edge when the box touches the top of the frame.
    pub fn annotate(&self, image: &mut RgbImage, boxes: &[FaceBox], label: &str) {
        for b in boxes {
            let rect = Rect::at(b.x as i32, b.y as i32).of_size(b.width, b.height);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);

            if let Some(font) = &self.font {
                let text_y = if b.y as f32 >= TEXT_SCALE {
                    b.y as i32 - TEXT_SCALE as i32
                } else {
                    b.y as i32 + 2
                };
                draw_text_mut(image, TEXT_COLOR, b.x as i32, text_y, self.scale, font, label);
            }
        }
    }
}
