//! Closed-form initial estimates from planar homographies.
//!
//! The intrinsic estimate fixes the principal point at the image center
//! and zero skew, leaving two unknowns `a = 1/fx^2`, `b = 1/fy^2`. Each
//! view's homography `H = K [r1 r2 t]` contributes two linear constraints
//! from the orthonormality of `r1` and `r2`, stacked over all views and
//! solved by least squares. This is exact under the pinhole model with no
//! distortion and never iterates; it exists to seed the nonlinear
//! refinement.

use crate::camera::{Intrinsics, Resolution};
use crate::optimization::homography::dlt_homography;
use crate::optimization::{CalibrationError, Pose};
use crate::pattern::Correspondences;
use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, Vector2};

/// Per-view board-to-image homographies for the correspondence set.
///
/// Views whose homography cannot be estimated are dropped; the returned
/// list is indexed like the surviving views. Errors only when every view
/// is degenerate.
pub fn view_homographies(
    correspondences: &Correspondences,
) -> Result<Vec<Matrix3<f64>>, CalibrationError> {
    if correspondences.is_empty() {
        return Err(CalibrationError::InsufficientData {
            accepted: 0,
            required: 1,
        });
    }

    let mut homographies = Vec::with_capacity(correspondences.len());
    for (object, image) in correspondences
        .object_points
        .iter()
        .zip(correspondences.image_points.iter())
    {
        let world: Vec<Vector2<f64>> = object.iter().map(|p| Vector2::new(p.x, p.y)).collect();
        match dlt_homography(&world, image) {
            Ok(h) => homographies.push(h),
            Err(e) => {
                log::warn!("dropping view with degenerate homography: {}", e);
            }
        }
    }

    if homographies.is_empty() {
        return Err(CalibrationError::DegenerateGeometry(
            "all view homographies are singular".to_string(),
        ));
    }

    Ok(homographies)
}

/// Closed-form camera matrix from all accepted views, assuming zero
/// distortion, zero skew and a centered principal point.
pub fn estimate_intrinsics(
    correspondences: &Correspondences,
    resolution: Resolution,
) -> Result<Intrinsics, CalibrationError> {
    let homographies = view_homographies(correspondences)?;
    intrinsics_from_homographies(&homographies, resolution)
}

/// The linear solve behind [`estimate_intrinsics`], on precomputed
/// homographies.
pub fn intrinsics_from_homographies(
    homographies: &[Matrix3<f64>],
    resolution: Resolution,
) -> Result<Intrinsics, CalibrationError> {
    if homographies.is_empty() {
        return Err(CalibrationError::InsufficientData {
            accepted: 0,
            required: 1,
        });
    }

    let cx = resolution.width as f64 / 2.0;
    let cy = resolution.height as f64 / 2.0;

    // Move the principal point to the origin so K reduces to
    // diag(fx, fy, 1).
    let t_center = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

    let mut a = DMatrix::<f64>::zeros(2 * homographies.len(), 2);
    let mut b = DVector::<f64>::zeros(2 * homographies.len());

    for (i, h) in homographies.iter().enumerate() {
        let hc = t_center * h;
        let h1 = hc.column(0);
        let h2 = hc.column(1);

        // r1 . r2 = 0
        a[(2 * i, 0)] = h1[0] * h2[0];
        a[(2 * i, 1)] = h1[1] * h2[1];
        b[2 * i] = -h1[2] * h2[2];

        // |r1|^2 = |r2|^2
        a[(2 * i + 1, 0)] = h1[0] * h1[0] - h2[0] * h2[0];
        a[(2 * i + 1, 1)] = h1[1] * h1[1] - h2[1] * h2[1];
        b[2 * i + 1] = -(h1[2] * h1[2] - h2[2] * h2[2]);
    }

    let svd = a.svd(true, true);

    // All views from one orientation leave one focal-length direction
    // unconstrained; the system is then rank deficient up to noise.
    let sv = &svd.singular_values;
    let max_sv = sv.max();
    let min_sv = sv.min();
    if max_sv <= 0.0 || min_sv < 1e-6 * max_sv {
        return Err(CalibrationError::DegenerateGeometry(
            "homographies leave the focal length unconstrained; use views with distinct orientations"
                .to_string(),
        ));
    }

    let solution = svd.solve(&b, 1e-12).map_err(|err| {
        CalibrationError::DegenerateGeometry(format!("intrinsic system solve failed: {}", err))
    })?;

    let inv_fx2 = solution[0];
    let inv_fy2 = solution[1];
    if !inv_fx2.is_finite() || !inv_fy2.is_finite() || inv_fx2 <= 0.0 || inv_fy2 <= 0.0 {
        return Err(CalibrationError::DegenerateGeometry(
            "homographies do not constrain a positive focal length".to_string(),
        ));
    }

    Ok(Intrinsics {
        fx: 1.0 / inv_fx2.sqrt(),
        fy: 1.0 / inv_fy2.sqrt(),
        cx,
        cy,
    })
}

/// Decomposes a board-to-image homography into the view's pose, given the
/// current intrinsic guess.
///
/// The rotation built from the scaled columns is re-orthogonalized through
/// SVD; the overall sign is chosen so the board lies in front of the
/// camera.
pub fn pose_from_homography(
    h: &Matrix3<f64>,
    intrinsics: &Intrinsics,
) -> Result<Pose, CalibrationError> {
    let k_inv = intrinsics.camera_matrix().try_inverse().ok_or_else(|| {
        CalibrationError::DegenerateGeometry("camera matrix is singular".to_string())
    })?;

    let r1_raw = k_inv * h.column(0).into_owned();
    let r2_raw = k_inv * h.column(1).into_owned();
    let t_raw = k_inv * h.column(2).into_owned();

    let norm = r1_raw.norm();
    if norm < 1e-12 {
        return Err(CalibrationError::DegenerateGeometry(
            "homography column collapses under K^-1".to_string(),
        ));
    }
    let mut scale = 1.0 / norm;
    // H and -H encode the same map; pick the sign that puts the board in
    // front of the camera.
    if t_raw[2] * scale < 0.0 {
        scale = -scale;
    }

    let r1 = r1_raw * scale;
    let r2 = r2_raw * scale;
    let r3 = r1.cross(&r2);
    let translation = t_raw * scale;

    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(CalibrationError::DegenerateGeometry(
            "rotation orthogonalization failed".to_string(),
        ));
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        r = -r;
    }

    Ok(Pose {
        rotation: Rotation3::from_matrix_unchecked(r),
        translation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraModel, RadTanModel};
    use crate::pattern::PatternGeometry;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn ground_truth_model() -> RadTanModel {
        RadTanModel::from_intrinsics(
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
        )
    }

    fn synthetic_poses() -> Vec<Pose> {
        [
            (0.0, 0.0, 0.0),
            (0.3, 0.1, 0.05),
            (-0.25, 0.2, -0.1),
            (0.1, -0.35, 0.15),
        ]
        .iter()
        .map(|&(rx, ry, rz)| Pose {
            rotation: Rotation3::from_euler_angles(rx, ry, rz),
            translation: Vector3::new(-60.0, -45.0, 420.0),
        })
        .collect()
    }

    fn synthetic_correspondences(
        model: &RadTanModel,
        poses: &[Pose],
        geometry: &PatternGeometry,
    ) -> Correspondences {
        let template = geometry.object_template();
        let mut set = Correspondences::new();
        for pose in poses {
            let image: Vec<Vector2<f64>> = template
                .iter()
                .map(|p| model.project(&pose.transform(p)).unwrap())
                .collect();
            set.push(template.clone(), image);
        }
        set
    }

    #[test]
    fn recovers_intrinsics_from_synthetic_views() {
        let model = ground_truth_model();
        let geometry = PatternGeometry::new(6, 8, 22.5);
        let set = synthetic_correspondences(&model, &synthetic_poses(), &geometry);

        let estimate = estimate_intrinsics(&set, model.resolution).unwrap();
        assert_relative_eq!(estimate.fx, 800.0, max_relative = 0.05);
        assert_relative_eq!(estimate.fy, 800.0, max_relative = 0.05);
        assert_eq!(estimate.cx, 320.0);
        assert_eq!(estimate.cy, 240.0);
    }

    #[test]
    fn fronto_parallel_views_are_degenerate() {
        // Every view shows the board from the same orientation: only the
        // aspect ratio is constrained, never the focal length itself.
        let model = ground_truth_model();
        let geometry = PatternGeometry::new(6, 8, 22.5);
        let poses: Vec<Pose> = [380.0, 420.0, 460.0]
            .iter()
            .map(|&z| Pose {
                rotation: Rotation3::identity(),
                translation: Vector3::new(-60.0, -45.0, z),
            })
            .collect();
        let set = synthetic_correspondences(&model, &poses, &geometry);

        let err = estimate_intrinsics(&set, model.resolution).unwrap_err();
        assert!(matches!(err, CalibrationError::DegenerateGeometry(_)));
    }

    #[test]
    fn empty_set_is_insufficient_data() {
        let set = Correspondences::new();
        let err = estimate_intrinsics(
            &set,
            Resolution {
                width: 640,
                height: 480,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::InsufficientData { .. }));
    }

    #[test]
    fn pose_decomposition_round_trips() {
        let model = ground_truth_model();
        let geometry = PatternGeometry::new(6, 8, 22.5);
        let poses = synthetic_poses();
        let set = synthetic_correspondences(&model, &poses, &geometry);

        let homographies = view_homographies(&set).unwrap();
        for (h, truth) in homographies.iter().zip(poses.iter()) {
            let pose = pose_from_homography(h, &model.intrinsics).unwrap();
            assert!(pose.translation.z > 0.0);
            assert_relative_eq!(
                pose.translation.z,
                truth.translation.z,
                max_relative = 1e-6
            );
            let rot_diff = pose.rotation.rotation_to(&truth.rotation).angle();
            assert!(rot_diff < 1e-6, "rotation differs by {}", rot_diff);
        }
    }
}
