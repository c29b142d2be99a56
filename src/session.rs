//! Calibration session orchestration.
//!
//! Owns the image set and drives detection, correspondence assembly, the
//! linear initial estimate and the two-pass refinement. The configuration
//! is immutable for the lifetime of a session; the only bookkeeping the
//! session produces is the accepted/rejected partition carried in the
//! final report.

use crate::camera::{RadTanModel, Resolution};
use crate::optimization::{calibrate, estimate_intrinsics, CalibrationError};
use crate::pattern::{
    ChessboardDetector, Correspondences, DetectionResult, DetectorParams, PatternGeometry,
};
use image::GrayImage;
use log::{info, warn};
use nalgebra::Vector2;
use rayon::prelude::*;
use serde::Serialize;

/// External visualization collaborator.
///
/// Invoked once per accepted image with the detected lattice, purely as a
/// debugging aid; it never affects the numerical results.
pub trait CornerSink {
    fn show(&mut self, image_index: usize, image: &GrayImage, corners: &[Vector2<f64>]);
}

/// Terminal output of the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    /// The converged camera model.
    pub model: RadTanModel,
    /// Root-mean-square reprojection error over all accepted points, px.
    pub rms_error: f64,
    /// Indices of the input images that contributed correspondences.
    pub accepted: Vec<usize>,
    /// Indices of the input images dropped by detection.
    pub rejected: Vec<usize>,
}

impl CalibrationReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// One calibration run over a fixed image set and pattern geometry.
pub struct CalibrationSession {
    images: Vec<GrayImage>,
    geometry: PatternGeometry,
    detector: ChessboardDetector,
}

impl CalibrationSession {
    /// Minimum number of accepted views required before estimation starts.
    pub const MIN_ACCEPTED_VIEWS: usize = 2;

    pub fn new(images: Vec<GrayImage>, geometry: PatternGeometry) -> Self {
        CalibrationSession {
            images,
            geometry,
            detector: ChessboardDetector::default(),
        }
    }

    pub fn with_detector_params(mut self, params: DetectorParams) -> Self {
        self.detector = ChessboardDetector::new(params);
        self
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Runs the full pipeline: detection over all images (parallel, merged
    /// once every detection has finished), correspondence assembly, linear
    /// initial estimate and two-pass refinement.
    pub fn run(&self, mut sink: Option<&mut dyn CornerSink>) -> Result<CalibrationReport, CalibrationError> {
        if self.images.is_empty() {
            return Err(CalibrationError::InsufficientData {
                accepted: 0,
                required: Self::MIN_ACCEPTED_VIEWS,
            });
        }

        let (width, height) = self.images[0].dimensions();
        let resolution = Resolution { width, height };

        let detections: Vec<DetectionResult> = self
            .images
            .par_iter()
            .map(|image| {
                if image.dimensions() != (width, height) {
                    return DetectionResult::NotFound;
                }
                self.detector.detect(image, &self.geometry)
            })
            .collect();

        let template = self.geometry.object_template();
        let mut correspondences = Correspondences::new();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for (index, detection) in detections.iter().enumerate() {
            match detection {
                DetectionResult::Found(corners) => {
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.show(index, &self.images[index], corners);
                    }
                    correspondences.push(template.clone(), corners.clone());
                    accepted.push(index);
                }
                DetectionResult::NotFound => {
                    warn!("image {}: no {}x{} chessboard found, dropping",
                        index, self.geometry.cols, self.geometry.rows);
                    rejected.push(index);
                }
            }
        }

        info!(
            "detection: {} of {} images accepted",
            accepted.len(),
            self.images.len()
        );

        if accepted.len() < Self::MIN_ACCEPTED_VIEWS {
            return Err(CalibrationError::InsufficientData {
                accepted: accepted.len(),
                required: Self::MIN_ACCEPTED_VIEWS,
            });
        }

        let initial = RadTanModel::from_intrinsics(
            estimate_intrinsics(&correspondences, resolution)?,
            resolution,
        );
        info!(
            "initial estimate: fx {:.2} fy {:.2} cx {:.2} cy {:.2}",
            initial.intrinsics.fx, initial.intrinsics.fy, initial.intrinsics.cx, initial.intrinsics.cy
        );

        let (model, _poses, rms_error) = calibrate(&correspondences, &initial)?;
        info!("calibration finished: rms {:.4} px", rms_error);

        Ok(CalibrationReport {
            model,
            rms_error,
            accepted,
            rejected,
        })
    }
}
