//! Model specification for the segmentation backends
//!
//! A model is a single ONNX file. Its preprocessing parameters come either from
//! the defaults (`ISNet` general-use, 1024x1024) or from a JSON sidecar next to
//! the model file (`<model>.json`) in this layout:
//!
//! ```json
//! {
//!   "name": "isnet-general",
//!   "preprocessing": {
//!     "target_size": [1024, 1024],
//!     "normalization": { "mean": [0.5, 0.5, 0.5], "std": [1.0, 1.0, 1.0] }
//!   }
//! }
//! ```

use crate::error::{CanvasError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the segmentation model, relative to the working directory
pub const DEFAULT_MODEL_PATH: &str = "models/isnet-general.onnx";

/// Preprocessing parameters for the model input tensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

impl PreprocessingConfig {
    /// Validate tensor size and normalization values
    ///
    /// # Errors
    /// - Zero target size
    /// - Non-positive or non-finite standard deviations
    pub fn validate(&self) -> Result<()> {
        if self.target_size.iter().any(|&s| s == 0) {
            return Err(CanvasError::invalid_config(format!(
                "Model target size must be positive, got {:?}",
                self.target_size
            )));
        }
        if self
            .normalization_std
            .iter()
            .any(|&s| !s.is_finite() || s <= 0.0)
        {
            return Err(CanvasError::invalid_config(format!(
                "Normalization std must be positive, got {:?}",
                self.normalization_std
            )));
        }
        Ok(())
    }
}

/// Which model file to load and how to feed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Path to the ONNX model file
    pub path: PathBuf,
    /// Display name used in logs
    pub name: String,
    pub preprocessing: PreprocessingConfig,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            name: "isnet-general".to_string(),
            preprocessing: PreprocessingConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct SidecarNormalization {
    mean: [f32; 3],
    std: [f32; 3],
}

#[derive(Deserialize)]
struct SidecarPreprocessing {
    target_size: [u32; 2],
    normalization: SidecarNormalization,
}

#[derive(Deserialize)]
struct Sidecar {
    name: Option<String>,
    preprocessing: Option<SidecarPreprocessing>,
}

impl ModelSpec {
    /// Build a spec for a model file, reading its JSON sidecar when present
    ///
    /// # Errors
    /// - Sidecar exists but cannot be read or parsed
    /// - Sidecar preprocessing values are invalid
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned());
        let mut spec = Self {
            path,
            name,
            preprocessing: PreprocessingConfig::default(),
        };

        let sidecar_path = spec.sidecar_path();
        if sidecar_path.is_file() {
            let content = std::fs::read_to_string(&sidecar_path)
                .map_err(|e| CanvasError::file_io_error("read model sidecar", &sidecar_path, &e))?;
            let sidecar: Sidecar = serde_json::from_str(&content).map_err(|e| {
                CanvasError::model(format!(
                    "Invalid model sidecar '{}': {}",
                    sidecar_path.display(),
                    e
                ))
            })?;
            if let Some(name) = sidecar.name {
                spec.name = name;
            }
            if let Some(preprocessing) = sidecar.preprocessing {
                spec.preprocessing = PreprocessingConfig {
                    target_size: preprocessing.target_size,
                    normalization_mean: preprocessing.normalization.mean,
                    normalization_std: preprocessing.normalization.std,
                };
            }
            tracing::debug!(sidecar = %sidecar_path.display(), "Loaded model sidecar");
        }

        spec.preprocessing.validate()?;
        Ok(spec)
    }

    /// Path of the optional JSON sidecar (`<model>.json`)
    #[must_use]
    pub fn sidecar_path(&self) -> PathBuf {
        self.path.with_extension("json")
    }

    /// Read the model file into memory
    ///
    /// # Errors
    /// Returns `CanvasError::Model` when the file is missing or unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| {
            CanvasError::model(format!(
                "Failed to read model '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}
