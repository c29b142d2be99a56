//! Implements the Pinhole camera model.
//!
//! The pinhole model is the simplest camera model, assuming no lens
//! distortion. It serves as the zero-distortion starting point produced by
//! the linear intrinsic estimator before refinement fills in the
//! distortion coefficients.

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{DVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

/// Pinhole camera with intrinsics (fx, fy, cx, cy) and no distortion.
///
/// # Examples
///
/// ```rust
/// use nalgebra::DVector;
/// use chessboard_tools::camera::pinhole::PinholeModel;
/// use chessboard_tools::camera::Resolution;
///
/// let params = DVector::from_vec(vec![500.0, 500.0, 320.0, 240.0]); // fx, fy, cx, cy
/// let mut model = PinholeModel::new(&params).unwrap();
/// model.resolution = Resolution { width: 640, height: 480 };
///
/// assert_eq!(model.intrinsics.fx, 500.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinholeModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`] from parameters ordered `fx, fy, cx, cy`.
    ///
    /// The resolution is initialized to 0x0 and should be set manually or by
    /// loading from YAML.
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
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
        };

        model.validate_params()?;

        Ok(model)
    }
}

impl CameraModel for PinholeModel {
    /// Projects a 3D point in camera coordinates to pixel coordinates:
    /// `u = fx * X / Z + cx`, `v = fy * Y / Z + cy`.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let x_prime = point_3d.x / point_3d.z;
        let y_prime = point_3d.y / point_3d.z;

        Ok(Vector2::new(
            self.intrinsics.fx * x_prime + self.intrinsics.cx,
            self.intrinsics.fy * y_prime + self.intrinsics.cy,
        ))
    }

    /// Unprojects a pixel to a normalized 3D ray direction.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let x = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let y = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;

        Ok(Vector3::new(x, y, 1.0).normalize())
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

        let model = PinholeModel {
            intrinsics,
            resolution,
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
                    serde_yaml::Value::String("pinhole".to_string()),
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
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        Vec::new()
    }
}
