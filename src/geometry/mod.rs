//! Small planar geometry helpers shared by the detection stages.

use nalgebra::Vector2;

/// Convex hull of a point set (Andrew's monotone chain).
///
/// Returns the hull vertices in counter-clockwise order for a y-up frame;
/// with image coordinates (y down) the cycle appears clockwise on screen.
/// Collinear points on the hull boundary are dropped.
pub fn convex_hull(points: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut sorted: Vec<Vector2<f64>> = points.to_vec();
    sorted.sort_by(|a, b| (a.x, a.y).partial_cmp(&(b.x, b.y)).unwrap());
    sorted.dedup_by(|a, b| a.x == b.x && a.y == b.y);

    if sorted.len() < 3 {
        return sorted;
    }

    let cross = |o: &Vector2<f64>, a: &Vector2<f64>, b: &Vector2<f64>| {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };

    let mut lower: Vec<Vector2<f64>> = Vec::new();
    for p in &sorted {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0
        {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Vector2<f64>> = Vec::new();
    for p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0
        {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Signed area of a polygon (shoelace). Positive when the vertex cycle is
/// clockwise on screen (y pointing down).
pub fn signed_area(polygon: &[Vector2<f64>]) -> f64 {
    let n = polygon.len();
    let mut sum = 0.0;
    for i in 0..n {
        let a = &polygon[i];
        let b = &polygon[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// The 4 hull vertices spanning the maximum-area quadrilateral, in hull
/// cycle order.
///
/// Hull sizes here are small (boundary corners of the grid, or one square's
/// outline), so the exhaustive ordered scan is fine.
pub fn max_area_quad(hull: &[Vector2<f64>]) -> Option<[Vector2<f64>; 4]> {
    let n = hull.len();
    if n < 4 {
        return None;
    }

    let mut best_area = -1.0;
    let mut best = [hull[0]; 4];

    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                for l in (k + 1)..n {
                    let quad = [hull[i], hull[j], hull[k], hull[l]];
                    let area = signed_area(&quad).abs();
                    if area > best_area {
                        best_area = area;
                        best = quad;
                    }
                }
            }
        }
    }

    Some(best)
}
