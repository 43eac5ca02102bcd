//! Inference backend abstraction

use crate::{
    config::{BatchConfig, ExecutionProvider},
    error::Result,
    models::PreprocessingConfig,
};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// A segmentation model runtime that maps an NCHW image tensor to a mask tensor
pub trait InferenceBackend: Send {
    /// Load the model and configure the execution provider
    ///
    /// Returns the model load time, or `None` when already initialized.
    ///
    /// # Errors
    /// - Model file missing or unreadable
    /// - Runtime session creation failures
    fn initialize(&mut self, config: &BatchConfig) -> Result<Option<Duration>>;

    /// Run inference on a `(1, 3, H, W)` input tensor, producing `(1, 1, H, W)`
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Runtime inference failures
    /// - Unexpected output tensor rank
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Preprocessing parameters of the loaded model
    fn preprocessing_config(&self) -> PreprocessingConfig;

    /// Provider actually in use after initialization
    fn active_provider(&self) -> ExecutionProvider;

    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn is_initialized(&self) -> bool;
}
