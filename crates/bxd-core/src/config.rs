//! Export configuration
//!
//! Stored as RON. Every field has a default, so partial files are fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cad::MAX_BATCH_VERTICES;
use crate::error::ConfigError;

/// Combined vertex count above which an exported group triggers a warning
pub const VERTEX_WARNING_THRESHOLD: usize = 65_000;

/// Settings for one export run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory receiving the skeleton and every mesh file
    pub output_dir: PathBuf,
    /// File name of the skeleton document inside `output_dir`
    pub skeleton_file: String,
    /// Extension of per-group mesh files
    pub mesh_extension: String,
    pub vertex_warning_threshold: usize,
    /// Largest triangulation batch requested from the CAD side
    pub max_batch_vertices: usize,
    /// Weight for CAD connections that carry none
    pub default_edge_weight: f32,
    /// Merge coincident vertices while accumulating a group
    pub dedupe_vertices: bool,
    /// Quantization factor for vertex comparison
    pub dedupe_precision: f32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("Skeleton"),
            skeleton_file: "skeleton.bxdj".to_string(),
            mesh_extension: "bxda".to_string(),
            vertex_warning_threshold: VERTEX_WARNING_THRESHOLD,
            max_batch_vertices: MAX_BATCH_VERTICES,
            default_edge_weight: 1.0,
            dedupe_vertices: true,
            dedupe_precision: 10000.0,
        }
    }
}

impl ExportConfig {
    /// Load configuration from a RON file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = ron::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save the configuration as pretty RON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Full path of the skeleton document
    pub fn skeleton_path(&self) -> PathBuf {
        self.output_dir.join(&self.skeleton_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig::load(&dir.path().join("absent.ron")).unwrap();
        assert_eq!(config, ExportConfig::default());
        assert_eq!(config.vertex_warning_threshold, 65_000);
        assert_eq!(config.max_batch_vertices, 8192);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.ron");
        std::fs::write(&path, "(mesh_extension: \"mesh\", dedupe_vertices: false)").unwrap();

        let config = ExportConfig::load(&path).unwrap();
        assert_eq!(config.mesh_extension, "mesh");
        assert!(!config.dedupe_vertices);
        assert_eq!(config.skeleton_file, "skeleton.bxdj");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.ron");
        let config = ExportConfig {
            output_dir: PathBuf::from("out"),
            vertex_warning_threshold: 10,
            ..ExportConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ExportConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ron");
        std::fs::write(&path, "(mesh_extension: )").unwrap();
        let err = ExportConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.ron"));
    }

    #[test]
    fn test_skeleton_path() {
        let config = ExportConfig {
            output_dir: PathBuf::from("out"),
            ..ExportConfig::default()
        };
        assert_eq!(config.skeleton_path(), PathBuf::from("out").join("skeleton.bxdj"));
    }
}
