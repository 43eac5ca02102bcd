//! Configuration types for canvas normalization and batch processing

use crate::error::{CanvasError, Result};
use crate::models::ModelSpec;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Width of the output canvas in pixels
pub const CANVAS_WIDTH: u32 = 2048;
/// Height of the output canvas in pixels
pub const CANVAS_HEIGHT: u32 = 2732;
/// Widest the pasted subject may be
pub const MAX_CONTENT_WIDTH: u32 = 1400;
/// Tallest the pasted subject may be
pub const MAX_CONTENT_HEIGHT: u32 = 2400;
/// Suffix appended to every output stem
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_processed";

/// Execution provider options for the inference backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    Auto,
    /// CPU execution (always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl ExecutionProvider {
    /// Provider used for a batch given the "use accelerated device" flag
    #[must_use]
    pub fn for_device_request(use_accelerated: bool) -> Self {
        if use_accelerated {
            Self::Auto
        } else {
            Self::Cpu
        }
    }

    /// Whether this provider asks for hardware acceleration
    #[must_use]
    pub fn is_accelerated(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Resampling filter used when scaling the cutout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    #[default]
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Geometry of the normalized output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    /// Fill color behind the subject (RGB)
    pub background: [u8; 3],
    pub max_content_width: u32,
    pub max_content_height: u32,
    pub resize_filter: ResizeFilter,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
            background: [255, 255, 255],
            max_content_width: MAX_CONTENT_WIDTH,
            max_content_height: MAX_CONTENT_HEIGHT,
            resize_filter: ResizeFilter::Lanczos3,
        }
    }
}

impl CanvasConfig {
    /// Validate canvas geometry
    ///
    /// # Errors
    /// - Zero canvas or content dimensions
    /// - Content bounds larger than the canvas
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CanvasError::invalid_config(format!(
                "Canvas dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.max_content_width == 0 || self.max_content_height == 0 {
            return Err(CanvasError::invalid_config(format!(
                "Content bounds must be positive, got {}x{}",
                self.max_content_width, self.max_content_height
            )));
        }
        if self.max_content_width > self.width || self.max_content_height > self.height {
            return Err(CanvasError::invalid_config(format!(
                "Content bounds {}x{} exceed canvas {}x{}",
                self.max_content_width, self.max_content_height, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Configuration for one batch invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Request an accelerated device (falls back to CPU when unavailable)
    pub use_accelerated: bool,

    /// Model used by the background remover
    pub model_spec: ModelSpec,

    /// Output canvas geometry
    pub canvas: CanvasConfig,

    /// Suffix appended to each output stem before `.png`
    pub output_suffix: String,

    /// Directory for the archive (None = system temp)
    pub archive_dir: Option<PathBuf>,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            use_accelerated: false,
            model_spec: ModelSpec::default(),
            canvas: CanvasConfig::default(),
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            archive_dir: None,
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl BatchConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::new()
    }

    /// Execution provider implied by the device flag
    #[must_use]
    pub fn execution_provider(&self) -> ExecutionProvider {
        ExecutionProvider::for_device_request(self.use_accelerated)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Invalid canvas geometry
    /// - Empty output suffix or one containing path separators
    pub fn validate(&self) -> Result<()> {
        self.canvas.validate()?;
        if self.output_suffix.is_empty() {
            return Err(CanvasError::invalid_config("Output suffix must not be empty"));
        }
        if self.output_suffix.contains(['/', '\\']) {
            return Err(CanvasError::invalid_config(format!(
                "Output suffix must not contain path separators: '{}'",
                self.output_suffix
            )));
        }
        Ok(())
    }
}

/// Builder for `BatchConfig`
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn use_accelerated(mut self, use_accelerated: bool) -> Self {
        self.config.use_accelerated = use_accelerated;
        self
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn canvas(mut self, canvas: CanvasConfig) -> Self {
        self.config.canvas = canvas;
        self
    }

    #[must_use]
    pub fn output_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.config.output_suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn archive_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.archive_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Returns `CanvasError::InvalidConfig` when validation fails
    pub fn build(self) -> Result<BatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
