#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Canvas
//!
//! Batch background removal that places every subject on a fixed
//! 2048x2732 portrait canvas and bundles the results into one ZIP archive.
//!
//! Each image goes through the same steps:
//!
//! 1. Load, reading the EXIF orientation without applying it yet
//! 2. Rotate landscape inputs to portrait
//! 3. Remove the background with a segmentation model (ONNX Runtime or Tract)
//! 4. Trim fully transparent borders
//! 5. Apply the EXIF orientation read at load time
//! 6. Scale the subject to fit the 1400x2400 content box
//! 7. Center it on the white canvas and save as PNG
//!
//! Failing items are skipped; the batch still produces an archive.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_canvas::{
//!     process_files, BatchConfig, BackendType, DefaultRemoverFactory, ModelSpec,
//! };
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = BatchConfig::builder()
//!     .model_spec(ModelSpec::from_path("models/isnet-general.onnx")?)
//!     .use_accelerated(true)
//!     .build()?;
//! let factory = Arc::new(DefaultRemoverFactory::new(BackendType::default()));
//!
//! let inputs = vec![PathBuf::from("a.jpg"), PathBuf::from("b.png")];
//! let result = process_files(&inputs, config, factory)?;
//! result.archive.save_to("processed.zip")?;
//! # Ok(())
//! # }
//! ```
//!
//! Interactive front-ends use [`BackgroundDispatcher`] instead, which runs
//! the batch on a blocking worker and reports progress through events.
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA/CoreML support
//! - `tract` (default): Pure Rust backend, CPU only
//! - `cli` (default): Command-line front-end
//! - `tracing-json`: JSON log output for the CLI
//! - `tracing-files`: Log file output for the CLI

pub mod backends;
pub mod batch;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod geometry;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod remover;
pub mod services;
pub mod session;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use backends::*;
pub use batch::BatchProcessor;
pub use config::{
    BatchConfig, BatchConfigBuilder, CanvasConfig, ExecutionProvider, ResizeFilter, CANVAS_HEIGHT,
    CANVAS_WIDTH, MAX_CONTENT_HEIGHT, MAX_CONTENT_WIDTH,
};
pub use dispatcher::{BackgroundDispatcher, DispatchEvent, DispatchState};
pub use error::{CanvasError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelSpec, PreprocessingConfig};
pub use pipeline::CanvasPipeline;
pub use remover::{
    BackendType, BackgroundRemover, DefaultRemoverFactory, RemoverFactory, SegmentationRemover,
};
pub use services::{
    BatchProgress, BatchStage, ImageIOService, LogProgressReporter, NoOpProgressReporter,
    ProgressReporter,
};
pub use session::{Rejected, UploadSession};
pub use types::{
    BatchArchive, BatchResult, ItemOutcome, ItemResult, SegmentationMask, SourceImage,
};
pub use utils::{ExecutionProviderManager, ImagePreprocessor, ProviderInfo};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};

/// Process a list of files synchronously and return the finished batch
///
/// Blocks the calling thread for the whole batch. Use
/// [`BackgroundDispatcher`] to keep a UI responsive.
///
/// # Errors
/// - `EmptyBatch` when `inputs` is empty
/// - Invalid configuration or remover creation failures
/// - Archive creation failures
pub fn process_files(
    inputs: &[PathBuf],
    config: BatchConfig,
    factory: Arc<dyn RemoverFactory>,
) -> Result<BatchResult> {
    let processor = BatchProcessor::new(factory, config)?;
    processor.process(inputs, &CancellationToken::new(), &NoOpProgressReporter)
}
