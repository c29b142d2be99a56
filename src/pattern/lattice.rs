//! Grid assembly and validation of internal-corner candidates.
//!
//! Third stage of chessboard detection: given the unordered candidate
//! corners, locate the four extreme corners of the grid (maximum-area
//! quadrilateral on the candidate hull), fit a homography from the unit
//! grid onto them, and accept the lattice only if every predicted grid
//! position matches a distinct candidate. The surviving corners come out
//! in canonical row-major order.
//!
//! Orientation convention (the grid is rotationally ambiguous): mirrored
//! assignments are excluded by walking the extreme quad in the same screen
//! direction as the object template, and among the remaining rotations the
//! one that places grid corner (0,0) nearest the image origin wins. Ties
//! are broken by the lowest rotation index, so repeated runs agree.

use crate::geometry::{convex_hull, max_area_quad, signed_area};
use crate::optimization::homography::{apply_homography, dlt_homography};
use nalgebra::Vector2;

/// Fraction of the local grid pitch within which a predicted corner must
/// find its candidate.
const MATCH_TOLERANCE: f64 = 0.35;

/// Orders candidate corners into a `cols` x `rows` lattice.
///
/// Returns `None` when no consistent lattice of the expected size exists
/// (too few candidates, degenerate hull, or unmatched predictions).
pub fn assemble_lattice(
    candidates: &[Vector2<f64>],
    cols: usize,
    rows: usize,
) -> Option<Vec<Vector2<f64>>> {
    let expected = cols * rows;
    if expected == 0 || candidates.len() < expected {
        return None;
    }

    let hull = convex_hull(candidates);
    let mut quad = max_area_quad(&hull)?;

    // Walk the quad in the template's screen direction (positive shoelace
    // with y down) so no mirrored assignment is ever tried.
    if signed_area(&quad) < 0.0 {
        quad.reverse();
    }

    let template_corners = [
        Vector2::new(0.0, 0.0),
        Vector2::new(cols as f64 - 1.0, 0.0),
        Vector2::new(cols as f64 - 1.0, rows as f64 - 1.0),
        Vector2::new(0.0, rows as f64 - 1.0),
    ];

    let mut best: Option<(f64, Vec<Vector2<f64>>)> = None;

    for rotation in 0..4 {
        let assigned = [
            quad[rotation],
            quad[(rotation + 1) % 4],
            quad[(rotation + 2) % 4],
            quad[(rotation + 3) % 4],
        ];

        let Ok(h) = dlt_homography(&template_corners, &assigned) else {
            continue;
        };

        let Some(grid) = match_grid(candidates, &h, cols, rows) else {
            continue;
        };

        let origin_dist = grid[0].norm();
        let better = match &best {
            Some((best_dist, _)) => origin_dist < *best_dist,
            None => true,
        };
        if better {
            best = Some((origin_dist, grid));
        }
    }

    best.map(|(_, grid)| grid)
}

/// Predicts every grid position through `h` and matches each to a distinct
/// candidate within a pitch-relative tolerance.
fn match_grid(
    candidates: &[Vector2<f64>],
    h: &nalgebra::Matrix3<f64>,
    cols: usize,
    rows: usize,
) -> Option<Vec<Vector2<f64>>> {
    let mut predicted = Vec::with_capacity(cols * rows);
    for i in 0..rows {
        for j in 0..cols {
            let p = apply_homography(h, &Vector2::new(j as f64, i as f64));
            if !p.x.is_finite() || !p.y.is_finite() {
                return None;
            }
            predicted.push(p);
        }
    }

    let mut used = vec![false; candidates.len()];
    let mut grid = Vec::with_capacity(cols * rows);

    for i in 0..rows {
        for j in 0..cols {
            let idx = i * cols + j;
            let p = predicted[idx];

            // Local pitch from the nearest grid neighbors of this cell.
            let mut pitch = f64::INFINITY;
            if j + 1 < cols {
                pitch = pitch.min((predicted[idx + 1] - p).norm());
            }
            if j > 0 {
                pitch = pitch.min((predicted[idx - 1] - p).norm());
            }
            if i + 1 < rows {
                pitch = pitch.min((predicted[idx + cols] - p).norm());
            }
            if i > 0 {
                pitch = pitch.min((predicted[idx - cols] - p).norm());
            }
            if !pitch.is_finite() || pitch < 1.0 {
                return None;
            }

            let (nearest, dist) = nearest_candidate(candidates, &p)?;
            if dist > MATCH_TOLERANCE * pitch || used[nearest] {
                return None;
            }
            used[nearest] = true;
            grid.push(candidates[nearest]);
        }
    }

    Some(grid)
}

fn nearest_candidate(candidates: &[Vector2<f64>], p: &Vector2<f64>) -> Option<(usize, f64)> {
    let mut best_idx = None;
    let mut best_dist = f64::INFINITY;
    for (i, c) in candidates.iter().enumerate() {
        let d = (c - p).norm();
        if d < best_dist {
            best_dist = d;
            best_idx = Some(i);
        }
    }
    best_idx.map(|i| (i, best_dist))
}
