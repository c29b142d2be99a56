//! End-to-end pipeline tests on synthetic chessboard renders.
//!
//! Images are rasterized by mapping each pixel through the inverse of the
//! board-to-image homography `K [r1 r2 t]` (exact for the zero-distortion
//! ground truth used here) and coloring by square parity, with 3x3
//! supersampling for clean edges.

use chessboard_tools::camera::{CameraModel, Intrinsics, RadTanModel, Resolution};
use chessboard_tools::optimization::Pose;
use chessboard_tools::pattern::{detect_chessboard, PatternGeometry};
use chessboard_tools::{CalibrationError, CalibrationSession};
use image::GrayImage;
use nalgebra::{Matrix3, Rotation3, Vector2, Vector3};

const DARK: f64 = 30.0;
const LIGHT: f64 = 225.0;

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

/// A pose that keeps the board center on the optical axis at distance `z`.
fn look_at_pose(euler: (f64, f64, f64), z: f64, geometry: &PatternGeometry) -> Pose {
    let rotation = Rotation3::from_euler_angles(euler.0, euler.1, euler.2);
    let center = Vector3::new(
        (geometry.cols as f64 - 1.0) * geometry.square_size / 2.0,
        (geometry.rows as f64 - 1.0) * geometry.square_size / 2.0,
        0.0,
    );
    Pose {
        rotation,
        translation: Vector3::new(0.0, 0.0, z) - rotation * center,
    }
}

/// Renders the chessboard seen through `model` at `pose`. The board has
/// one square of margin beyond the internal-corner grid on every side and
/// a light background.
fn render_view(model: &RadTanModel, pose: &Pose, geometry: &PatternGeometry) -> GrayImage {
    let k = model.intrinsics.camera_matrix();
    let r = pose.rotation.matrix();
    let plane = Matrix3::from_columns(&[
        r.column(0).into_owned(),
        r.column(1).into_owned(),
        pose.translation,
    ]);
    let h = k * plane;
    let h_inv = h.try_inverse().expect("board homography must be invertible");

    let side = geometry.square_size;
    let x_min = -side;
    let x_max = geometry.cols as f64 * side;
    let y_min = -side;
    let y_max = geometry.rows as f64 * side;

    let board_color = |u: f64, v: f64| -> f64 {
        let q = h_inv * Vector3::new(u, v, 1.0);
        if q.z.abs() < 1e-12 {
            return LIGHT;
        }
        let x = q.x / q.z;
        let y = q.y / q.z;
        if x < x_min || x > x_max || y < y_min || y > y_max {
            return LIGHT;
        }
        let i = (x / side).floor() as i64;
        let j = (y / side).floor() as i64;
        if (i + j).rem_euclid(2) == 0 {
            DARK
        } else {
            LIGHT
        }
    };

    GrayImage::from_fn(
        model.resolution.width,
        model.resolution.height,
        |px, py| {
            let mut sum = 0.0;
            for sy in 0..3 {
                for sx in 0..3 {
                    let u = px as f64 + (sx as f64 + 0.5) / 3.0 - 0.5;
                    let v = py as f64 + (sy as f64 + 0.5) / 3.0 - 0.5;
                    sum += board_color(u, v);
                }
            }
            image::Luma([(sum / 9.0).round() as u8])
        },
    )
}

fn synthetic_poses(geometry: &PatternGeometry) -> Vec<Pose> {
    [
        ((0.0, 0.0, 0.0), 560.0),
        ((0.25, 0.0, 0.0), 540.0),
        ((0.0, 0.25, 0.0), 580.0),
        ((-0.2, 0.15, 0.1), 600.0),
        ((0.15, -0.25, -0.05), 620.0),
        ((0.3, 0.1, 0.2), 550.0),
        ((-0.15, -0.2, 0.1), 570.0),
        ((0.2, 0.25, -0.1), 590.0),
        ((-0.25, 0.1, -0.15), 610.0),
        ((0.1, 0.3, 0.05), 630.0),
    ]
    .iter()
    .map(|&(euler, z)| look_at_pose(euler, z, geometry))
    .collect()
}

#[test]
fn detector_recovers_ground_truth_corners() {
    let model = ground_truth_model();
    let geometry = PatternGeometry::new(6, 8, 22.5);
    let pose = look_at_pose((0.2, -0.15, 0.08), 560.0, &geometry);
    let image = render_view(&model, &pose, &geometry);

    let result = detect_chessboard(&image, &geometry);
    let corners = result.corners().expect("board should be detected");
    assert_eq!(corners.len(), geometry.corner_count());

    let template = geometry.object_template();
    for (corner, p3) in corners.iter().zip(template.iter()) {
        let truth = model.project(&pose.transform(p3)).unwrap();
        let err = (corner - Vector2::new(truth.x, truth.y)).norm();
        assert!(
            err < 0.5,
            "corner at {:?} is {:.3} px from ground truth {:?}",
            corner,
            err,
            truth
        );
    }
}

#[test]
fn full_pipeline_recovers_camera_matrix() {
    let model = ground_truth_model();
    let geometry = PatternGeometry::new(6, 8, 22.5);
    let poses = synthetic_poses(&geometry);

    let images: Vec<GrayImage> = poses
        .iter()
        .map(|pose| render_view(&model, pose, &geometry))
        .collect();

    let session = CalibrationSession::new(images, geometry);
    let report = session.run(None).expect("calibration should succeed");

    assert_eq!(report.accepted.len(), 10, "rejected {:?}", report.rejected);
    assert!(report.rejected.is_empty());

    let est = &report.model.intrinsics;
    assert!((est.fx - 800.0).abs() / 800.0 < 0.01, "fx {}", est.fx);
    assert!((est.fy - 800.0).abs() / 800.0 < 0.01, "fy {}", est.fy);
    assert!((est.cx - 320.0).abs() / 320.0 < 0.01, "cx {}", est.cx);
    assert!((est.cy - 240.0).abs() / 240.0 < 0.01, "cy {}", est.cy);

    // Zero-distortion renders: the recovered coefficients stay small and
    // the residual is bounded by detector noise.
    assert!(report.rms_error < 0.15, "rms {}", report.rms_error);
    for d in report.model.distortions {
        assert!(d.abs() < 0.05, "distortions {:?}", report.model.distortions);
    }
}

#[test]
fn pipeline_is_idempotent() {
    let model = ground_truth_model();
    let geometry = PatternGeometry::new(6, 8, 22.5);
    let poses = synthetic_poses(&geometry);
    let images: Vec<GrayImage> = poses
        .iter()
        .take(4)
        .map(|pose| render_view(&model, pose, &geometry))
        .collect();

    let session_a = CalibrationSession::new(images.clone(), geometry);
    let session_b = CalibrationSession::new(images, geometry);
    let a = session_a.run(None).unwrap();
    let b = session_b.run(None).unwrap();

    assert_eq!(a.rms_error, b.rms_error);
    assert_eq!(a.model.intrinsics.fx, b.model.intrinsics.fx);
    assert_eq!(a.model.intrinsics.fy, b.model.intrinsics.fy);
    assert_eq!(a.model.distortions, b.model.distortions);
    assert_eq!(a.accepted, b.accepted);
}

#[test]
fn partially_occluded_board_is_rejected() {
    let model = ground_truth_model();
    let geometry = PatternGeometry::new(6, 8, 22.5);
    let pose = look_at_pose((0.1, 0.1, 0.0), 560.0, &geometry);
    let mut image = render_view(&model, &pose, &geometry);

    // Blank out the lower half of the board.
    for y in 240..480 {
        for x in 0..640 {
            image.put_pixel(x, y, image::Luma([128u8]));
        }
    }

    assert!(!detect_chessboard(&image, &geometry).is_found());
}

#[test]
fn too_few_detectable_images_fail_with_insufficient_data() {
    let model = ground_truth_model();
    let geometry = PatternGeometry::new(6, 8, 22.5);
    let pose = look_at_pose((0.15, 0.1, 0.0), 560.0, &geometry);

    let good = render_view(&model, &pose, &geometry);
    let blank = GrayImage::from_pixel(640, 480, image::Luma([200u8]));

    let session = CalibrationSession::new(vec![good, blank.clone(), blank], geometry);
    match session.run(None) {
        Err(CalibrationError::InsufficientData { accepted, required }) => {
            assert_eq!(accepted, 1);
            assert_eq!(required, 2);
        }
        other => panic!("expected InsufficientData, got {:?}", other.map(|r| r.rms_error)),
    }
}
