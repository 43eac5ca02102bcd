//! Error types for canvas batch operations

use thiserror::Error;

/// Result type alias for canvas batch operations
pub type Result<T> = std::result::Result<T, CanvasError>;

/// Error taxonomy for the pipeline, the batch processor and the dispatcher
#[derive(Error, Debug)]
pub enum CanvasError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode or encode errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Archive creation errors
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Background removal inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input rejected before entering the pipeline
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Pipeline stage errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// A batch was submitted without any input files
    #[error("Batch contains no input files")]
    EmptyBatch,

    /// A batch was submitted while another one is still running
    #[error("A batch is already running")]
    Busy,

    /// The batch stopped early because its task was cancelled
    #[error("Batch was cancelled")]
    Cancelled,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CanvasError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create image loading error with format context
    pub fn image_load_error<P: AsRef<std::path::Path>>(
        path: P,
        error: &image::ImageError,
    ) -> Self {
        let path_display = path.as_ref().display();
        let extension = path
            .as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");

        Self::Image(image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "Failed to load image '{}' (format: {}): {}",
                path_display, extension, error
            ),
        )))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }

    /// Whether this error is contained per item inside a batch
    ///
    /// Decode, inference and staging failures skip the item; everything else
    /// ends the batch.
    #[must_use]
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Image(_)
                | Self::Inference(_)
                | Self::Processing(_)
                | Self::UnsupportedFormat(_)
        )
    }
}
