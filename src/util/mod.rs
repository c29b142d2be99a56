//! Image-directory loading and calibration persistence.

use crate::camera::RadTanModel;
use image::GrayImage;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use yaml_rust::YamlLoader;

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("Invalid matrix file: {0}")]
    InvalidFormat(String),
    #[error("No readable images in {0}")]
    NoImages(PathBuf),
}

impl From<std::io::Error> for UtilError {
    fn from(err: std::io::Error) -> Self {
        UtilError::IOError(err.to_string())
    }
}

/// Loads every decodable image in `dir`, sorted by file name, converted to
/// grayscale.
///
/// Files that fail to decode are skipped with a warning; an empty result
/// is an error.
pub fn load_images(dir: &Path) -> Result<Vec<GrayImage>, UtilError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in &paths {
        match image::open(path) {
            Ok(decoded) => images.push(decoded.to_luma8()),
            Err(err) => {
                warn!("skipping {}: {}", path.display(), err);
            }
        }
    }

    if images.is_empty() {
        return Err(UtilError::NoImages(dir.to_path_buf()));
    }
    Ok(images)
}

/// Ensure the output directory exists.
pub fn ensure_output_dir(dir: &Path) -> Result<(), UtilError> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .map_err(|e| UtilError::IOError(format!("failed to create output directory: {e}")))?;
    }
    Ok(())
}

/// On-disk layout of one numeric matrix, round-trip-loadable by downstream
/// consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixFile {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub dt: String,
    pub data: Vec<f64>,
}

/// Writes one matrix as a YAML document with `rows`/`cols`/`dt`/`data`
/// fields.
pub fn write_matrix_yaml(
    path: &Path,
    name: &str,
    rows: usize,
    cols: usize,
    data: &[f64],
) -> Result<(), UtilError> {
    if data.len() != rows * cols {
        return Err(UtilError::InvalidFormat(format!(
            "{}x{} matrix needs {} values, got {}",
            rows,
            cols,
            rows * cols,
            data.len()
        )));
    }

    let file = MatrixFile {
        name: name.to_string(),
        rows,
        cols,
        dt: "d".to_string(),
        data: data.to_vec(),
    };

    let yaml_string =
        serde_yaml::to_string(&file).map_err(|e| UtilError::InvalidFormat(e.to_string()))?;
    let mut out = fs::File::create(path)?;
    out.write_all(yaml_string.as_bytes())?;
    Ok(())
}

/// Reads a matrix document written by [`write_matrix_yaml`].
pub fn read_matrix_yaml(path: &Path) -> Result<MatrixFile, UtilError> {
    let contents = fs::read_to_string(path)?;
    let docs = YamlLoader::load_from_str(&contents)
        .map_err(|e| UtilError::InvalidFormat(e.to_string()))?;
    if docs.is_empty() {
        return Err(UtilError::InvalidFormat("empty YAML document".to_string()));
    }
    let doc = &docs[0];

    let name = doc["name"]
        .as_str()
        .ok_or_else(|| UtilError::InvalidFormat("missing name".to_string()))?
        .to_string();
    let rows = doc["rows"]
        .as_i64()
        .ok_or_else(|| UtilError::InvalidFormat("missing rows".to_string()))? as usize;
    let cols = doc["cols"]
        .as_i64()
        .ok_or_else(|| UtilError::InvalidFormat("missing cols".to_string()))? as usize;
    let dt = doc["dt"]
        .as_str()
        .ok_or_else(|| UtilError::InvalidFormat("missing dt".to_string()))?
        .to_string();

    let data_node = doc["data"]
        .as_vec()
        .ok_or_else(|| UtilError::InvalidFormat("missing data".to_string()))?;
    let mut data = Vec::with_capacity(data_node.len());
    for (i, value) in data_node.iter().enumerate() {
        // yaml-rust keeps integers and floats apart; accept both.
        let v = value
            .as_f64()
            .or_else(|| value.as_i64().map(|x| x as f64))
            .ok_or_else(|| UtilError::InvalidFormat(format!("bad value at index {}", i)))?;
        data.push(v);
    }

    if data.len() != rows * cols {
        return Err(UtilError::InvalidFormat(format!(
            "{}x{} matrix with {} values",
            rows,
            cols,
            data.len()
        )));
    }

    Ok(MatrixFile {
        name,
        rows,
        cols,
        dt,
        data,
    })
}

/// Persists the converged model as the two matrix files downstream
/// consumers load: `intrinsics.yaml` (3x3 camera matrix) and
/// `distortion.yaml` (1x5 coefficient vector).
pub fn save_calibration(model: &RadTanModel, dir: &Path) -> Result<(), UtilError> {
    ensure_output_dir(dir)?;

    let k = model.intrinsics.camera_matrix();
    let mut k_values = Vec::with_capacity(9);
    for r in 0..3 {
        for c in 0..3 {
            k_values.push(k[(r, c)]);
        }
    }
    write_matrix_yaml(&dir.join("intrinsics.yaml"), "Intrinsics", 3, 3, &k_values)?;
    write_matrix_yaml(
        &dir.join("distortion.yaml"),
        "Distortion",
        1,
        5,
        &model.distortions,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Intrinsics, Resolution};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chessboard_tools_util_{tag}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn matrix_yaml_round_trips_exact_values() {
        let dir = temp_dir("matrix");
        let path = dir.join("m.yaml");

        let data = [
            801.2345678901234,
            0.0,
            319.5,
            0.0,
            -0.28340811,
            240.5,
            1.7618711e-05,
            0.0,
            1.0,
        ];
        write_matrix_yaml(&path, "Intrinsics", 3, 3, &data).unwrap();
        let loaded = read_matrix_yaml(&path).unwrap();

        assert_eq!(loaded.name, "Intrinsics");
        assert_eq!(loaded.rows, 3);
        assert_eq!(loaded.cols, 3);
        assert_eq!(loaded.dt, "d");
        for (a, b) in data.iter().zip(loaded.data.iter()) {
            assert_eq!(a, b);
        }

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn matrix_yaml_rejects_size_mismatch() {
        let dir = temp_dir("bad");
        let path = dir.join("m.yaml");
        let err = write_matrix_yaml(&path, "M", 2, 2, &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, UtilError::InvalidFormat(_)));
    }

    #[test]
    fn save_calibration_writes_both_files() {
        let dir = temp_dir("calib");
        let model = RadTanModel {
            intrinsics: Intrinsics {
                fx: 800.0,
                fy: 799.5,
                cx: 320.0,
                cy: 240.0,
            },
            resolution: Resolution {
                width: 640,
                height: 480,
            },
            distortions: [-0.2, 0.05, 0.001, -0.0005, 0.01],
        };

        save_calibration(&model, &dir).unwrap();

        let k = read_matrix_yaml(&dir.join("intrinsics.yaml")).unwrap();
        assert_eq!(k.rows, 3);
        assert_eq!(k.data[0], 800.0);
        assert_eq!(k.data[4], 799.5);
        assert_eq!(k.data[8], 1.0);

        let d = read_matrix_yaml(&dir.join("distortion.yaml")).unwrap();
        assert_eq!(d.rows, 1);
        assert_eq!(d.cols, 5);
        assert_eq!(d.data[0], -0.2);

        fs::remove_file(dir.join("intrinsics.yaml")).unwrap();
        fs::remove_file(dir.join("distortion.yaml")).unwrap();
    }

    #[test]
    fn load_images_errors_on_empty_directory() {
        let dir = temp_dir("empty");
        let err = load_images(&dir).unwrap_err();
        assert!(matches!(err, UtilError::NoImages(_)));
    }
}
