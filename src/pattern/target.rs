//! Planar calibration target geometry and 2D/3D correspondence assembly.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Geometry of a planar chessboard target.
///
/// `cols` and `rows` count the internal corners (square intersections)
/// along each axis, not the squares. `square_size` is the physical side
/// length of one square; the calibration translations come out in the same
/// unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternGeometry {
    pub cols: usize,
    pub rows: usize,
    pub square_size: f64,
}

impl PatternGeometry {
    pub fn new(cols: usize, rows: usize, square_size: f64) -> Self {
        PatternGeometry {
            cols,
            rows,
            square_size,
        }
    }

    /// Total number of internal corners.
    pub fn corner_count(&self) -> usize {
        self.cols * self.rows
    }

    /// The fixed 3D object-point template on the z=0 plane, row-major from
    /// the origin corner: `(j * square_size, i * square_size, 0)` for
    /// `i in [0, rows)`, `j in [0, cols)`.
    pub fn object_template(&self) -> Vec<Vector3<f64>> {
        let mut points = Vec::with_capacity(self.corner_count());
        for i in 0..self.rows {
            for j in 0..self.cols {
                points.push(Vector3::new(
                    j as f64 * self.square_size,
                    i as f64 * self.square_size,
                    0.0,
                ));
            }
        }
        points
    }
}

/// Accumulated 2D/3D correspondences across all accepted images.
///
/// The object list is the same template instance for every view; the image
/// lists hold the detected corners in template order. Views are stored in
/// input image order.
#[derive(Debug, Clone, Default)]
pub struct Correspondences {
    pub object_points: Vec<Vec<Vector3<f64>>>,
    pub image_points: Vec<Vec<Vector2<f64>>>,
}

impl Correspondences {
    pub fn new() -> Self {
        Correspondences::default()
    }

    /// Appends one accepted view.
    ///
    /// # Panics
    ///
    /// Panics if the two point lists differ in length; the detector
    /// guarantees template-ordered output of the full corner count.
    pub fn push(&mut self, object: Vec<Vector3<f64>>, image: Vec<Vector2<f64>>) {
        assert_eq!(object.len(), image.len());
        self.object_points.push(object);
        self.image_points.push(image);
    }

    /// Number of accepted views.
    pub fn len(&self) -> usize {
        self.object_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_points.is_empty()
    }

    /// Total point count over all views.
    pub fn total_points(&self) -> usize {
        self.object_points.iter().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_is_row_major_from_origin() {
        let geometry = PatternGeometry::new(3, 2, 22.5);
        let template = geometry.object_template();

        assert_eq!(template.len(), 6);
        assert_eq!(template[0], Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(template[1], Vector3::new(22.5, 0.0, 0.0));
        assert_eq!(template[2], Vector3::new(45.0, 0.0, 0.0));
        assert_eq!(template[3], Vector3::new(0.0, 22.5, 0.0));
        assert!(template.iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn correspondences_preserve_view_order_and_counts() {
        let geometry = PatternGeometry::new(2, 2, 1.0);
        let template = geometry.object_template();

        let mut set = Correspondences::new();
        for shift in [0.0, 10.0] {
            let corners: Vec<Vector2<f64>> = template
                .iter()
                .map(|p| Vector2::new(p.x + shift, p.y + shift))
                .collect();
            set.push(template.clone(), corners);
        }

        assert_eq!(set.len(), 2);
        assert_eq!(set.total_points(), 8);
        assert_eq!(set.object_points[0], set.object_points[1]);
        assert_eq!(set.image_points[0][0], Vector2::new(0.0, 0.0));
        assert_eq!(set.image_points[1][0], Vector2::new(10.0, 10.0));
    }
}
