//! Numerical core of the calibration pipeline.
//!
//! [`homography`] provides the normalized DLT used both by the detector's
//! lattice stage and by the estimators. [`linear`] computes the closed-form
//! initial camera matrix and per-view poses from homographies. [`refine`]
//! runs the Levenberg-Marquardt bundle over intrinsics, distortion and
//! poses. This module holds the shared error taxonomy, the pose type and
//! the reprojection-error statistics.

use crate::camera::{CameraModel, CameraModelError, RadTanModel};
use crate::pattern::Correspondences;
use nalgebra::{Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod homography;
pub mod linear;
pub mod refine;

pub use linear::estimate_intrinsics;
pub use refine::{calibrate, refine, RefineOptions};

/// Pipeline-level failure taxonomy.
///
/// Per-image detection failures never surface here; they only shrink the
/// accepted set. Everything below aborts the session.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("insufficient data: {accepted} accepted image(s), at least {required} required")]
    InsufficientData { accepted: usize, required: usize },
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),
    #[error("refinement failed to converge: {0}")]
    ConvergenceFailure(String),
    #[error("ill-conditioned problem: {0}")]
    IllConditioned(String),
    #[error("IO failure: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Camera(#[from] CameraModelError),
}

/// Rigid transform mapping pattern-frame points into the camera frame for
/// one view.
#[derive(Debug, Clone)]
pub struct Pose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    /// Transforms a pattern-frame point into the camera frame.
    #[inline]
    pub fn transform(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }
}

/// Summary statistics of per-point reprojection distances, in pixels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

/// Reprojects every correspondence through `model` and the per-view poses
/// and summarizes the pixel distances.
///
/// RMSE follows sqrt(sum of squared distances / point count). Points whose
/// projection fails (behind the camera) are skipped.
pub fn compute_projection_error(
    model: &RadTanModel,
    poses: &[Pose],
    correspondences: &Correspondences,
) -> Result<ProjectionError, CalibrationError> {
    if poses.len() != correspondences.len() {
        return Err(CalibrationError::IllConditioned(format!(
            "{} poses for {} views",
            poses.len(),
            correspondences.len()
        )));
    }

    let mut distances = Vec::with_capacity(correspondences.total_points());
    for (view, pose) in poses.iter().enumerate() {
        let object = &correspondences.object_points[view];
        let image = &correspondences.image_points[view];
        for (p3, p2) in object.iter().zip(image.iter()) {
            let p_cam = pose.transform(p3);
            let Ok(projected) = model.project(&p_cam) else {
                continue;
            };
            distances.push((projected - Vector2::new(p2.x, p2.y)).norm());
        }
    }

    if distances.is_empty() {
        return Err(CalibrationError::IllConditioned(
            "no valid reprojections".to_string(),
        ));
    }

    let n = distances.len() as f64;
    let mean = distances.iter().sum::<f64>() / n;
    let rmse = (distances.iter().map(|d| d * d).sum::<f64>() / n).sqrt();
    let stddev = (distances.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / n).sqrt();

    let mut sorted = distances.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = if sorted.len() % 2 == 0 {
        (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2.0
    } else {
        sorted[sorted.len() / 2]
    };

    Ok(ProjectionError {
        rmse,
        min: sorted[0],
        max: *sorted.last().unwrap(),
        mean,
        stddev,
        median,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Intrinsics, Resolution};
    use crate::pattern::PatternGeometry;

    #[test]
    fn exact_reprojection_has_zero_error() {
        let model = RadTanModel::from_intrinsics(
            Intrinsics {
                fx: 800.0,
                fy: 800.0,
                cx: 320.0,
                cy: 240.0,
            },
            Resolution {
                width: 640,
                height: 480,
            },
        );
        let pose = Pose {
            rotation: Rotation3::from_euler_angles(0.1, -0.05, 0.02),
            translation: Vector3::new(-60.0, -50.0, 400.0),
        };

        let geometry = PatternGeometry::new(4, 3, 22.5);
        let template = geometry.object_template();
        let image: Vec<Vector2<f64>> = template
            .iter()
            .map(|p| model.project(&pose.transform(p)).unwrap())
            .collect();

        let mut set = Correspondences::new();
        set.push(template, image);

        let stats = compute_projection_error(&model, &[pose], &set).unwrap();
        assert!(stats.rmse < 1e-9);
        assert!(stats.max < 1e-9);
    }

    #[test]
    fn pose_count_mismatch_is_rejected() {
        let model = RadTanModel::from_intrinsics(
            Intrinsics {
                fx: 800.0,
                fy: 800.0,
                cx: 320.0,
                cy: 240.0,
            },
            Resolution {
                width: 640,
                height: 480,
            },
        );
        let set = Correspondences::new();
        let pose = Pose {
            rotation: Rotation3::identity(),
            translation: Vector3::new(0.0, 0.0, 1.0),
        };
        assert!(compute_projection_error(&model, &[pose], &set).is_err());
    }
}
