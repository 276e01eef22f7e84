/// Local Binary Pattern Histogram face recognizer.
///
/// Each sample is reduced to a grid of 256-bin LBP histograms (radius 1,
/// 8 neighbours). Prediction returns the training sample with the smallest
/// chi-square distance, so identical crops score 0 and unrelated ones score
/// high.
use image::GrayImage;
use ndarray::{Array2, ArrayView2};

use crate::recognition::domain::face_recognizer::{FaceRecognizer, Prediction, RecognizerTrainer};

/// Cells per side of the histogram grid.
const GRID: usize = 4;

const PATTERNS: usize = 256;

/// Neighbour offsets (dy, dx), clockwise from the top-left.
const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
];

pub struct LbphTrainer {
    grid_x: usize,
    grid_y: usize,
}

impl Default for LbphTrainer {
    fn default() -> Self {
        Self {
            grid_x: GRID,
            grid_y: GRID,
        }
    }
}

impl RecognizerTrainer for LbphTrainer {
    fn train(
        &self,
        samples: &[GrayImage],
        labels: &[u32],
    ) -> Result<Box<dyn FaceRecognizer>, Box<dyn std::error::Error>> {
        if samples.is_empty() {
            return Err("No training samples".into());
        }
        if samples.len() != labels.len() {
            return Err(format!(
                "Sample/label count mismatch: {} samples, {} labels",
                samples.len(),
                labels.len()
            )
            .into());
        }

        let histograms = samples
            .iter()
            .zip(labels)
            .map(|(img, &label)| Ok((label, spatial_histogram(img, self.grid_x, self.grid_y)?)))
            .collect::<Result<Vec<_>, Box<dyn std::error::Error>>>()?;

        Ok(Box::new(LbphRecognizer {
            histograms,
            grid_x: self.grid_x,
            grid_y: self.grid_y,
        }))
    }
}

pub struct LbphRecognizer {
    histograms: Vec<(u32, Vec<f64>)>,
    grid_x: usize,
    grid_y: usize,
}

impl FaceRecognizer for LbphRecognizer {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, Box<dyn std::error::Error>> {
        let query = spatial_histogram(face, self.grid_x, self.grid_y)?;

        self.histograms
            .iter()
            .map(|(label, hist)| Prediction {
                label_id: *label,
                distance: chi_square(hist, &query),
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .ok_or_else(|| "Recognizer has no samples".into())
    }
}

/// LBP code image; the one-pixel border has no full neighbourhood and is
/// dropped.
fn lbp_codes(src: ArrayView2<'_, u8>) -> Array2<u8> {
    let (rows, cols) = src.dim();
    let mut codes = Array2::<u8>::zeros((rows.saturating_sub(2), cols.saturating_sub(2)));
    for ((r, c), code) in codes.indexed_iter_mut() {
        let (y, x) = (r + 1, c + 1);
        let center = src[[y, x]];
        let mut value = 0u8;
        for (bit, (dy, dx)) in NEIGHBOURS.iter().enumerate() {
            let ny = (y as isize + dy) as usize;
            let nx = (x as isize + dx) as usize;
            if src[[ny, nx]] >= center {
                value |= 1 << (7 - bit);
            }
        }
        *code = value;
    }
    codes
}

/// Concatenated per-cell LBP histograms, each normalized to sum to 1.
fn spatial_histogram(
    img: &GrayImage,
    grid_x: usize,
    grid_y: usize,
) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let src = ArrayView2::from_shape((h, w), img.as_raw().as_slice())?;
    let codes = lbp_codes(src);
    let (rows, cols) = codes.dim();

    let cell_h = rows / grid_y;
    let cell_w = cols / grid_x;
    if cell_h == 0 || cell_w == 0 {
        return Err(format!("Face image {w}x{h} too small for a {grid_x}x{grid_y} grid").into());
    }

    let cell_total = (cell_h * cell_w) as f64;
    let mut hist = vec![0.0f64; grid_x * grid_y * PATTERNS];
    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let offset = (gy * grid_x + gx) * PATTERNS;
            for r in gy * cell_h..(gy + 1) * cell_h {
                for c in gx * cell_w..(gx + 1) * cell_w {
                    hist[offset + codes[[r, c]] as usize] += 1.0;
                }
            }
            for v in &mut hist[offset..offset + PATTERNS] {
                *v /= cell_total;
            }
        }
    }
    Ok(hist)
}

/// Symmetric chi-square distance: `2 * sum((a - b)^2 / (a + b))`.
fn chi_square(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .filter(|(x, y)| *x + *y > f64::EPSILON)
        .map(|(x, y)| 2.0 * (x - y) * (x - y) / (x + y))
        .sum()
}
