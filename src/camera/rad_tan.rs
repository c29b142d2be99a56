//! Implements the Radial-Tangential (RadTan) camera model.
//!
//! This is the standard Brown-Conrady model combining radial (`k1`, `k2`,
//! `k3`) and tangential (`p1`, `p2`) lens distortion. It is the model the
//! calibration pipeline estimates: the linear stage produces it with all
//! coefficients at zero, the refinement stage overwrites intrinsics and
//! distortion with the converged values.

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{DVector, Matrix2, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io::Write};
use yaml_rust::YamlLoader;

/// Radial-Tangential camera model with 9 parameters.
///
/// # Examples
///
/// ```rust
/// use nalgebra::DVector;
/// use chessboard_tools::camera::rad_tan::RadTanModel;
/// use chessboard_tools::camera::Resolution;
///
/// // Parameters: fx, fy, cx, cy, k1, k2, p1, p2, k3
/// let params = DVector::from_vec(vec![
///     500.0, 500.0, 320.0, 240.0,
///     0.1, -0.05, 0.001, 0.001, 0.02,
/// ]);
/// let mut model = RadTanModel::new(&params).unwrap();
/// model.resolution = Resolution { width: 640, height: 480 };
///
/// assert_eq!(model.intrinsics.fx, 500.0);
/// assert_eq!(model.distortions[0], 0.1); // k1
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct RadTanModel {
    /// The intrinsic parameters of the camera (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image (width, height).
    pub resolution: Resolution,
    /// The 5 distortion coefficients: `[k1, k2, p1, p2, k3]`.
    pub distortions: [f64; 5],
}

impl RadTanModel {
    /// Creates a new [`RadTanModel`] from parameters ordered
    /// `fx, fy, cx, cy, k1, k2, p1, p2, k3`.
    ///
    /// The resolution is initialized to 0x0 and should be set manually or by
    /// loading from YAML.
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        if parameters.len() != 9 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 9 parameters, got {}",
                parameters.len()
            )));
        }

        let model = RadTanModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            distortions: [
                parameters[4], // k1
                parameters[5], // k2
                parameters[6], // p1
                parameters[7], // p2
                parameters[8], // k3
            ],
        };

        model.validate_params()?;
        Ok(model)
    }

    /// Builds a zero-distortion model around the given intrinsics.
    pub fn from_intrinsics(intrinsics: Intrinsics, resolution: Resolution) -> Self {
        RadTanModel {
            intrinsics,
            resolution,
            distortions: [0.0; 5],
        }
    }

    /// Applies the distortion polynomial to normalized image coordinates.
    ///
    /// Input and output are on the z=1 plane; intrinsics are not applied.
    pub fn distort(&self, x_prime: f64, y_prime: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.distortions;

        let r2 = x_prime * x_prime + y_prime * y_prime;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
        let xy = x_prime * y_prime;

        let x_distorted = x_prime * radial + 2.0 * p1 * xy + p2 * (r2 + 2.0 * x_prime * x_prime);
        let y_distorted = y_prime * radial + p1 * (r2 + 2.0 * y_prime * y_prime) + 2.0 * p2 * xy;

        (x_distorted, y_distorted)
    }
}

impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} distortions: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions,
        )
    }
}

impl CameraModel for RadTanModel {
    /// Projects a 3D point in camera coordinates to pixel coordinates,
    /// applying distortion.
    ///
    /// The projected point is returned even when it falls outside the image
    /// bounds: the refinement stage evaluates residuals for predictions that
    /// drift out of frame during iteration.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let x_prime = point_3d.x / point_3d.z;
        let y_prime = point_3d.y / point_3d.z;

        let (x_distorted, y_distorted) = self.distort(x_prime, y_prime);

        Ok(Vector2::new(
            self.intrinsics.fx * x_distorted + self.intrinsics.cx,
            self.intrinsics.fy * y_distorted + self.intrinsics.cy,
        ))
    }

    /// Unprojects a pixel to a normalized 3D ray by iteratively inverting the
    /// distortion with Newton's method.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let [k1, k2, p1, p2, k3] = self.distortions;

        // Normalized coordinates of the distorted point; the undistorted
        // estimate starts there.
        let x_distorted = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let y_distorted = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;
        let target = Vector2::new(x_distorted, y_distorted);

        let mut point = target;

        const EPS: f64 = 1e-6;
        const MAX_ITERATIONS: u32 = 100;

        let mut converged = false;
        for _ in 0..MAX_ITERATIONS {
            let x = point.x;
            let y = point.y;
            let r2 = x * x + y * y;
            let r4 = r2 * r2;

            let (x_est, y_est) = self.distort(x, y);
            let error = Vector2::new(x_est, y_est) - target;

            if error.norm() < EPS {
                converged = true;
                break;
            }

            let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r4 * r2;
            let d_radial_dr2 = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4;
            let d_radial_dx = d_radial_dr2 * 2.0 * x;
            let d_radial_dy = d_radial_dr2 * 2.0 * y;

            let j00 = radial + x * d_radial_dx + 2.0 * p1 * y + p2 * (2.0 * x + 4.0 * x);
            let j01 = x * d_radial_dy + 2.0 * p1 * x + p2 * 2.0 * y;
            let j10 = y * d_radial_dx + p1 * 2.0 * x + 2.0 * p2 * y;
            let j11 = radial + y * d_radial_dy + p1 * (2.0 * y + 4.0 * y) + 2.0 * p2 * x;

            let jacobian = Matrix2::new(j00, j01, j10, j11);

            let Some(inv_jacobian) = jacobian.try_inverse() else {
                return Err(CameraModelError::NumericalError(
                    "Jacobian is singular".to_string(),
                ));
            };

            let delta = inv_jacobian * error;
            point -= delta;

            if delta.norm() < EPS {
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(CameraModelError::NumericalError(format!(
                "Unprojection did not converge after {} iterations",
                MAX_ITERATIONS
            )));
        }

        Ok(Vector3::new(point.x, point.y, 1.0).normalize())
    }

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if docs.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "Empty YAML document".to_string(),
            ));
        }

        let doc = &docs[0];

        let intrinsics_yaml = doc["cam0"]["intrinsics"]
            .as_vec()
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid intrinsics".to_string()))?;
        let resolution_yaml = doc["cam0"]["resolution"]
            .as_vec()
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid resolution".to_string()))?;
        let distortion_node = doc["cam0"]["distortion"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("Missing distortion parameters".to_string())
        })?;

        let intrinsics = Intrinsics {
            fx: intrinsics_yaml[0]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid fx".to_string()))?,
            fy: intrinsics_yaml[1]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid fy".to_string()))?,
            cx: intrinsics_yaml[2]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid cx".to_string()))?,
            cy: intrinsics_yaml[3]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid cy".to_string()))?,
        };

        let resolution = Resolution {
            width: resolution_yaml[0]
                .as_i64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid width".to_string()))?
                as u32,
            height: resolution_yaml[1]
                .as_i64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid height".to_string()))?
                as u32,
        };

        if distortion_node.len() != 5 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 5 distortion parameters in YAML, found {}",
                distortion_node.len()
            )));
        }

        let mut distortions = [0.0; 5];
        for (i, param) in distortion_node.iter().enumerate() {
            distortions[i] = param.as_f64().ok_or_else(|| {
                CameraModelError::InvalidParams(format!(
                    "Invalid distortion parameter at index {}",
                    i
                ))
            })?;
        }

        let model = RadTanModel {
            intrinsics,
            resolution,
            distortions,
        };

        model.validate_params()?;

        Ok(model)
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let yaml = serde_yaml::to_value(&serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::to_value(&serde_yaml::Mapping::from_iter([
                (
                    serde_yaml::Value::String("camera_model".to_string()),
                    serde_yaml::Value::String("rad_tan".to_string()),
                ),
                (
                    serde_yaml::Value::String("intrinsics".to_string()),
                    serde_yaml::to_value(vec![
                        self.intrinsics.fx,
                        self.intrinsics.fy,
                        self.intrinsics.cx,
                        self.intrinsics.cy,
                    ])
                    .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
                (
                    serde_yaml::Value::String("distortion".to_string()),
                    serde_yaml::to_value(self.distortions.to_vec())
                        .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
                (
                    serde_yaml::Value::String("resolution".to_string()),
                    serde_yaml::to_value(vec![self.resolution.width, self.resolution.height])
                        .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
            ]))
            .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
        )]))
        .map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let mut file =
            fs::File::create(path).map_err(|e| CameraModelError::IOError(e.to_string()))?;

        file.write_all(yaml_string.as_bytes())
            .map_err(|e| CameraModelError::IOError(e.to_string()))?;

        Ok(())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        if self.distortions.iter().any(|d| !d.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "Distortion coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.distortions.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> RadTanModel {
        RadTanModel {
            intrinsics: Intrinsics {
                fx: 461.629,
                fy: 460.152,
                cx: 362.680,
                cy: 246.049,
            },
            resolution: Resolution {
                width: 752,
                height: 480,
            },
            distortions: [-0.2834, 0.0739, 0.0001, 1.7618e-05, 0.0],
        }
    }

    #[test]
    fn test_radtan_project_unproject() {
        let model = sample_model();

        let point_3d = Vector3::new(0.5, -0.3, 2.0);
        let norm_3d = point_3d.normalize();

        let point_2d = model.project(&point_3d).unwrap();
        let ray = model.unproject(&point_2d).unwrap();

        assert!((norm_3d.x - ray.x).abs() < 1e-6);
        assert!((norm_3d.y - ray.y).abs() < 1e-6);
        assert!((norm_3d.z - ray.z).abs() < 1e-6);
    }

    #[test]
    fn test_radtan_zero_distortion_matches_pinhole() {
        let mut model = sample_model();
        model.distortions = [0.0; 5];

        let point_3d = Vector3::new(0.2, 0.1, 1.5);
        let point_2d = model.project(&point_3d).unwrap();

        let expected_u = model.intrinsics.fx * (0.2 / 1.5) + model.intrinsics.cx;
        let expected_v = model.intrinsics.fy * (0.1 / 1.5) + model.intrinsics.cy;
        assert!((point_2d.x - expected_u).abs() < 1e-12);
        assert!((point_2d.y - expected_v).abs() < 1e-12);
    }

    #[test]
    fn test_radtan_multiple_points() {
        let model = sample_model();

        let test_points = vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.5, 0.0, 1.0),
            Vector3::new(-0.5, 0.0, 1.0),
            Vector3::new(0.0, 0.5, 1.0),
            Vector3::new(0.0, -0.5, 1.0),
            Vector3::new(0.3, 0.4, 1.0),
            Vector3::new(-0.3, 0.4, 1.0),
            Vector3::new(0.3, -0.4, 1.0),
            Vector3::new(-0.3, -0.4, 1.0),
            Vector3::new(0.1, 0.1, 2.0),
        ];

        for (i, original_point) in test_points.iter().enumerate() {
            let pixel_point = model.project(original_point).unwrap();
            let ray_direction = model.unproject(&pixel_point).unwrap();

            let original_direction = original_point.normalize();
            let dot_product = original_direction.dot(&ray_direction);

            assert!(
                dot_product > 0.99,
                "Test point {}: direction mismatch, dot product {}",
                i,
                dot_product
            );
        }
    }

    #[test]
    fn test_radtan_save_load_round_trip() {
        let dir = std::env::temp_dir().join("chessboard_tools_radtan_yaml");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rad_tan_saved.yaml");
        let path = path.to_str().unwrap();

        let model = sample_model();
        model.save_to_yaml(path).unwrap();
        let loaded = RadTanModel::load_from_yaml(path).unwrap();

        assert_eq!(model.intrinsics.fx, loaded.intrinsics.fx);
        assert_eq!(model.intrinsics.fy, loaded.intrinsics.fy);
        assert_eq!(model.intrinsics.cx, loaded.intrinsics.cx);
        assert_eq!(model.intrinsics.cy, loaded.intrinsics.cy);
        assert_eq!(model.resolution.width, loaded.resolution.width);
        assert_eq!(model.resolution.height, loaded.resolution.height);
        for i in 0..5 {
            assert_eq!(model.distortions[i], loaded.distortions[i]);
        }

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_radtan_new_rejects_wrong_parameter_count() {
        let params = DVector::from_vec(vec![500.0, 500.0, 320.0, 240.0]);
        assert!(RadTanModel::new(&params).is_err());
    }
}
