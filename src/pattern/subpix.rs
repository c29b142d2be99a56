//! Sub-pixel corner refinement.
//!
//! Final stage of chessboard detection. At a saddle point every image
//! gradient in the neighborhood is orthogonal to the vector from the true
//! corner to the gradient's location, so the corner solves the weighted
//! normal equations `(sum w g g^T) q = sum w (g g^T) p` over the window.
//! The solve is iterated from the lattice estimate until the update falls
//! below `epsilon` or `max_iterations` is reached, whichever comes first.

use image::GrayImage;
use nalgebra::{Matrix2, Vector2};

/// Window half-width in pixels (an 11x11 neighborhood).
pub const DEFAULT_HALF_WINDOW: usize = 5;
/// Iteration cap of the refinement loop.
pub const DEFAULT_MAX_ITERATIONS: usize = 30;
/// Positional update below which the loop stops, in pixels.
pub const DEFAULT_EPSILON: f64 = 0.1;

/// Bilinear intensity sample with border clamping.
fn sample(img: &GrayImage, x: f64, y: f64) -> f64 {
    let w = img.width() as f64;
    let h = img.height() as f64;
    let xc = x.clamp(0.0, w - 1.0);
    let yc = y.clamp(0.0, h - 1.0);

    let x0 = xc.floor();
    let y0 = yc.floor();
    let x1 = (x0 + 1.0).min(w - 1.0);
    let y1 = (y0 + 1.0).min(h - 1.0);
    let fx = xc - x0;
    let fy = yc - y0;

    let p = |xi: f64, yi: f64| img.get_pixel(xi as u32, yi as u32)[0] as f64;

    p(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + p(x1, y0) * fx * (1.0 - fy)
        + p(x0, y1) * (1.0 - fx) * fy
        + p(x1, y1) * fx * fy
}

/// Central-difference intensity gradient at a sub-pixel location.
fn gradient(img: &GrayImage, x: f64, y: f64) -> Vector2<f64> {
    Vector2::new(
        (sample(img, x + 1.0, y) - sample(img, x - 1.0, y)) / 2.0,
        (sample(img, x, y + 1.0) - sample(img, x, y - 1.0)) / 2.0,
    )
}

/// Refines one corner estimate to sub-pixel accuracy.
///
/// Returns the refined position; when the normal matrix is singular (flat
/// neighborhood) the current estimate is returned unchanged.
pub fn refine_corner(
    img: &GrayImage,
    initial: Vector2<f64>,
    half_window: usize,
    max_iterations: usize,
    epsilon: f64,
) -> Vector2<f64> {
    let hw = half_window as isize;
    let sigma = half_window as f64 / 2.0;
    let mut corner = initial;

    for _ in 0..max_iterations {
        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let px = corner.x + dx as f64;
                let py = corner.y + dy as f64;

                let g = gradient(img, px, py);
                let weight =
                    (-((dx * dx + dy * dy) as f64) / (2.0 * sigma * sigma)).exp();

                let gg = g * g.transpose() * weight;
                a += gg;
                b += gg * Vector2::new(px, py);
            }
        }

        let Some(a_inv) = a.try_inverse() else {
            break;
        };
        let updated = a_inv * b;
        let shift = (updated - corner).norm();
        corner = updated;

        if shift < epsilon {
            break;
        }
    }

    // Guard against divergence onto a different feature: never report a
    // position outside the search window of the initial estimate.
    if (corner - initial).norm() > half_window as f64 {
        return initial;
    }
    corner
}

/// Refines a whole corner list with the default window and termination
/// rule (11x11 window, 30 iterations, 0.1 px).
pub fn refine_corners(img: &GrayImage, corners: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
    corners
        .iter()
        .map(|c| {
            refine_corner(
                img,
                *c,
                DEFAULT_HALF_WINDOW,
                DEFAULT_MAX_ITERATIONS,
                DEFAULT_EPSILON,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Renders an ideal saddle centered at (cx, cy): dark where the signs
    /// of (x - cx) and (y - cy) agree, light elsewhere, with linear
    /// interpolation across the boundary pixel.
    fn saddle_image(cx: f64, cy: f64) -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            let mut value = 0.0;
            let samples = 4;
            for sy in 0..samples {
                for sx in 0..samples {
                    let px = x as f64 + (sx as f64 + 0.5) / samples as f64 - 0.5;
                    let py = y as f64 + (sy as f64 + 0.5) / samples as f64 - 0.5;
                    let dark = (px - cx) * (py - cy) > 0.0;
                    value += if dark { 20.0 } else { 235.0 };
                }
            }
            image::Luma([(value / (samples * samples) as f64) as u8])
        })
    }

    #[test]
    fn converges_to_saddle_center() {
        let truth = Vector2::new(19.3, 20.6);
        let img = saddle_image(truth.x, truth.y);

        let refined = refine_corner(&img, Vector2::new(18.0, 22.0), 5, 30, 0.01);
        assert!(
            (refined - truth).norm() < 0.3,
            "refined {:?} vs truth {:?}",
            refined,
            truth
        );
    }

    #[test]
    fn flat_region_returns_initial_estimate() {
        let img = GrayImage::from_pixel(32, 32, image::Luma([128u8]));
        let initial = Vector2::new(16.0, 16.0);
        let refined = refine_corner(&img, initial, 5, 30, 0.1);
        assert_eq!(refined, initial);
    }

    #[test]
    fn stays_within_search_window() {
        let truth = Vector2::new(20.0, 20.0);
        let img = saddle_image(truth.x, truth.y);

        // Start far away; the guard keeps the output near the start even if
        // the iteration walks off.
        let initial = Vector2::new(5.0, 5.0);
        let refined = refine_corner(&img, initial, 3, 30, 0.1);
        assert!((refined - initial).norm() <= 3.0 + 1e-9);
    }
}
