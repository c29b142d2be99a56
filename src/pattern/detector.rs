//! Chessboard corner detection pipeline.
//!
//! Composes the detection stages: adaptive threshold, erosion, dark-quad
//! extraction, corner pairing, lattice assembly, sub-pixel refinement.
//! Thresholding is retried over several window radii so boards of
//! different apparent sizes binarize cleanly; the first radius that yields
//! a consistent lattice wins.

use crate::pattern::lattice::assemble_lattice;
use crate::pattern::quads::{extract_quads, pair_quad_corners};
use crate::pattern::subpix::refine_corners;
use crate::pattern::target::PatternGeometry;
use crate::pattern::threshold::{adaptive_mean_threshold, erode_dark, fill_holes};
use image::GrayImage;
use log::debug;
use nalgebra::Vector2;

/// Outcome of chessboard detection on a single image.
///
/// `Found` carries all `cols * rows` corners ordered row-major to match the
/// object-point template. Images yielding `NotFound` take no further part
/// in the calibration.
#[derive(Debug, Clone)]
pub enum DetectionResult {
    Found(Vec<Vector2<f64>>),
    NotFound,
}

impl DetectionResult {
    pub fn is_found(&self) -> bool {
        matches!(self, DetectionResult::Found(_))
    }

    pub fn corners(&self) -> Option<&[Vector2<f64>]> {
        match self {
            DetectionResult::Found(corners) => Some(corners),
            DetectionResult::NotFound => None,
        }
    }
}

/// Tuning parameters of the detection stages.
#[derive(Debug, Clone)]
pub struct DetectorParams {
    /// Half-widths of the adaptive threshold window, tried in order.
    pub threshold_radii: Vec<usize>,
    /// Offset below the local mean for a pixel to count as dark.
    pub threshold_bias: f64,
    /// Erosion passes separating diagonally touching squares.
    pub erode_iterations: usize,
    /// Minimum pixel count of a dark region considered a square.
    pub min_quad_area: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        DetectorParams {
            threshold_radii: vec![8, 16, 32],
            threshold_bias: 8.0,
            erode_iterations: 2,
            min_quad_area: 25,
        }
    }
}

impl DetectorParams {
    /// Distance within which corners of two different squares are merged
    /// into one internal-corner candidate; scales with the erosion depth.
    fn pair_radius(&self) -> f64 {
        4.0 * self.erode_iterations as f64 + 4.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChessboardDetector {
    pub params: DetectorParams,
}

impl ChessboardDetector {
    pub fn new(params: DetectorParams) -> Self {
        ChessboardDetector { params }
    }

    /// Locates the internal corners of a `geometry.cols` x `geometry.rows`
    /// chessboard, refined to sub-pixel accuracy and ordered row-major.
    pub fn detect(&self, image: &GrayImage, geometry: &PatternGeometry) -> DetectionResult {
        let expected = geometry.corner_count();
        if expected == 0 {
            return DetectionResult::NotFound;
        }

        let max_area = (image.width() as usize * image.height() as usize) / 8;

        for &radius in &self.params.threshold_radii {
            let mask = adaptive_mean_threshold(image, radius, self.params.threshold_bias);
            let filled = fill_holes(&mask);
            let eroded = erode_dark(&filled, self.params.erode_iterations);
            let quads = extract_quads(&eroded, self.params.min_quad_area, max_area);

            let candidates = pair_quad_corners(&quads, self.params.pair_radius());
            debug!(
                "threshold radius {}: {} quads, {} corner candidates (need {})",
                radius,
                quads.len(),
                candidates.len(),
                expected
            );

            if candidates.len() < expected {
                continue;
            }

            if let Some(lattice) = assemble_lattice(&candidates, geometry.cols, geometry.rows) {
                let refined = refine_corners(image, &lattice);
                return DetectionResult::Found(refined);
            }
        }

        DetectionResult::NotFound
    }
}

/// Detection with default parameters.
pub fn detect_chessboard(image: &GrayImage, geometry: &PatternGeometry) -> DetectionResult {
    ChessboardDetector::default().detect(image, geometry)
}
