//! Homography estimation (plane-induced projective transform).
//!
//! Implements the normalized Direct Linear Transform (DLT). The homography
//! `H` maps planar board points to image points in pixels: `x' ~ H x`.
//! Hartley-style point normalization (zero mean, average distance sqrt(2))
//! is applied internally for numerical stability and the output is
//! de-normalized and scaled so that `H[2,2] == 1` when possible.

use crate::optimization::CalibrationError;
use nalgebra::{DMatrix, Matrix3, Vector2, Vector3};

/// Applies a homography to a 2D point.
#[inline]
pub fn apply_homography(h: &Matrix3<f64>, p: &Vector2<f64>) -> Vector2<f64> {
    let q = h * Vector3::new(p.x, p.y, 1.0);
    Vector2::new(q.x / q.z, q.y / q.z)
}

/// Normalizing similarity transform for a 2D point set.
///
/// Returns the transformed points and the 3x3 transform, or `None` when the
/// points are degenerate (coincident).
fn normalize_points(points: &[Vector2<f64>]) -> Option<(Vec<Vector2<f64>>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - mean_x).powi(2) + (p.y - mean_y).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if mean_dist <= 1e-12 {
        return None;
    }

    let scale = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(
        scale,
        0.0,
        -mean_x * scale,
        0.0,
        scale,
        -mean_y * scale,
        0.0,
        0.0,
        1.0,
    );

    let normalized = points
        .iter()
        .map(|p| Vector2::new((p.x - mean_x) * scale, (p.y - mean_y) * scale))
        .collect();

    Some((normalized, t))
}

/// Estimate `H` such that `image ~ H * world` using the normalized DLT.
///
/// `world` are planar points in the board frame (z dropped), `image` their
/// pixel coordinates. Needs at least 4 correspondences.
pub fn dlt_homography(
    world: &[Vector2<f64>],
    image: &[Vector2<f64>],
) -> Result<Matrix3<f64>, CalibrationError> {
    let n = world.len();
    if n < 4 || image.len() != n {
        return Err(CalibrationError::DegenerateGeometry(format!(
            "need at least 4 point correspondences, got {}",
            n
        )));
    }

    let (world_n, t_w) = normalize_points(world).ok_or_else(|| {
        CalibrationError::DegenerateGeometry(
            "degenerate point configuration for normalization".to_string(),
        )
    })?;
    let (image_n, t_i) = normalize_points(image).ok_or_else(|| {
        CalibrationError::DegenerateGeometry(
            "degenerate point configuration for normalization".to_string(),
        )
    })?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (pw, pi)) in world_n.iter().zip(image_n.iter()).enumerate() {
        let x = pw.x;
        let y = pw.y;
        let u = pi.x;
        let v = pi.y;

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    // Solve A h = 0: singular vector for the smallest singular value. Pad
    // the 8x9 minimal case to a square matrix so v_t is complete.
    let mut a_work = a;
    if a_work.nrows() < a_work.ncols() {
        let rows = a_work.nrows();
        let cols = a_work.ncols();
        let mut a_pad = DMatrix::<f64>::zeros(cols, cols);
        a_pad.view_mut((0, 0), (rows, cols)).copy_from(&a_work);
        a_work = a_pad;
    }

    let svd = a_work.svd(true, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| CalibrationError::DegenerateGeometry("svd failed".to_string()))?;
    let h_vec = v_t.row(v_t.nrows() - 1);

    let mut h_mat = Matrix3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            h_mat[(r, c)] = h_vec[3 * r + c];
        }
    }

    let t_i_inv = t_i
        .try_inverse()
        .ok_or_else(|| CalibrationError::DegenerateGeometry("svd failed".to_string()))?;
    h_mat = t_i_inv * h_mat * t_w;

    let scale = h_mat[(2, 2)];
    if scale.abs() > f64::EPSILON {
        h_mat /= scale;
    }

    Ok(h_mat)
}
