//! Candidate corner extraction from the binarized image.
//!
//! Second stage of chessboard detection: connected dark regions are grown
//! from the eroded mask, filtered down to convex quadrilaterals (the black
//! squares), and each square contributes its 4 outline corners. Because the
//! erosion separated squares that meet diagonally, every internal corner of
//! the board shows up as a close pair of corners from two different
//! squares; the midpoint of such a pair is a candidate internal corner.
//! Erosion displaces the two square corners symmetrically about the true
//! intersection, so the midpoint lands back on it.

use crate::geometry::{convex_hull, max_area_quad, signed_area};
use crate::pattern::threshold::BinaryImage;
use nalgebra::Vector2;

/// One dark connected region with its fitted quadrilateral outline.
#[derive(Debug, Clone)]
pub struct Quad {
    pub corners: [Vector2<f64>; 4],
    pub pixel_count: usize,
}

/// Extracts connected dark regions (4-connectivity) and keeps those whose
/// convex outline is consistent with a filled quadrilateral.
pub fn extract_quads(mask: &BinaryImage, min_area: usize, max_area: usize) -> Vec<Quad> {
    let w = mask.width;
    let h = mask.height;
    let mut visited = vec![false; w * h];
    let mut quads = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start_y in 0..h {
        for start_x in 0..w {
            let idx = start_y * w + start_x;
            if visited[idx] || !mask.data[idx] {
                continue;
            }

            // Flood fill one component.
            let mut pixels: Vec<Vector2<f64>> = Vec::new();
            visited[idx] = true;
            stack.push((start_x, start_y));
            while let Some((x, y)) = stack.pop() {
                pixels.push(Vector2::new(x as f64, y as f64));
                let neighbors = [
                    (x.wrapping_sub(1), y),
                    (x + 1, y),
                    (x, y.wrapping_sub(1)),
                    (x, y + 1),
                ];
                for (nx, ny) in neighbors {
                    if nx < w && ny < h {
                        let nidx = ny * w + nx;
                        if mask.data[nidx] && !visited[nidx] {
                            visited[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            if pixels.len() < min_area || pixels.len() > max_area {
                continue;
            }

            let hull = convex_hull(&pixels);
            let Some(corners) = max_area_quad(&hull) else {
                continue;
            };

            // A filled convex quad covers roughly its outline area; reject
            // elongated or concave blobs.
            let quad_area = signed_area(&corners).abs();
            if quad_area < 1.0 {
                continue;
            }
            let fill_ratio = pixels.len() as f64 / quad_area;
            if !(0.6..=1.8).contains(&fill_ratio) {
                continue;
            }

            quads.push(Quad {
                corners,
                pixel_count: pixels.len(),
            });
        }
    }

    quads
}

/// Pairs up corners of different squares that nearly coincide and returns
/// the midpoints as internal-corner candidates.
///
/// Each corner joins at most one pair; pairs are formed greedily by
/// ascending distance. Corners on the board's outer boundary have no
/// diagonal partner and drop out here.
pub fn pair_quad_corners(quads: &[Quad], pair_radius: f64) -> Vec<Vector2<f64>> {
    struct Tagged {
        position: Vector2<f64>,
        quad_index: usize,
    }

    let corners: Vec<Tagged> = quads
        .iter()
        .enumerate()
        .flat_map(|(qi, q)| {
            q.corners.iter().map(move |c| Tagged {
                position: *c,
                quad_index: qi,
            })
        })
        .collect();

    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for i in 0..corners.len() {
        for j in (i + 1)..corners.len() {
            if corners[i].quad_index == corners[j].quad_index {
                continue;
            }
            let dist = (corners[i].position - corners[j].position).norm();
            if dist <= pair_radius {
                pairs.push((dist, i, j));
            }
        }
    }
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let mut used = vec![false; corners.len()];
    let mut candidates = Vec::new();
    for (_, i, j) in pairs {
        if used[i] || used[j] {
            continue;
        }
        used[i] = true;
        used[j] = true;
        candidates.push((corners[i].position + corners[j].position) / 2.0);
    }

    candidates
}
