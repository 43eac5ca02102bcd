//! Tract segmentation backend
//!
//! Pure Rust inference on the CPU. Accelerated device requests are accepted
//! and served on the CPU.

use crate::config::{BatchConfig, ExecutionProvider};
use crate::error::{CanvasError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelSpec, PreprocessingConfig};
use log;
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for the segmentation model
#[derive(Debug)]
pub struct TractBackend {
    model_spec: ModelSpec,
    model: Option<TractModel>,
}

impl TractBackend {
    /// Tract runs on the CPU only
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    #[must_use]
    pub fn new(model_spec: ModelSpec) -> Self {
        Self {
            model_spec,
            model: None,
        }
    }

    fn load_model(&mut self, config: &BatchConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        if config.execution_provider().is_accelerated() {
            log::warn!("Tract backend has no accelerated provider, using CPU");
        }

        let model_data = self.model_spec.load_model()?;
        let [width, height] = self.model_spec.preprocessing.target_size;

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| CanvasError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(
                0,
                f32::fact([1, 3, height as usize, width as usize]).into(),
            )
            .map_err(|e| CanvasError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| CanvasError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| CanvasError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend loaded '{}' in {:.2}ms",
            self.model_spec.name,
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &BatchConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| CanvasError::internal("Tract model not initialized"))?;

        let inference_start = Instant::now();
        let input_tensor = Tensor::from(input.clone());

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| CanvasError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| CanvasError::inference("No output tensor found"))?
            .into_arc_tensor();
        let output_data = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| CanvasError::inference(format!("Failed to convert output tensor: {e}")))?;

        let output_shape = output_data.shape().to_vec();
        let &[batch, channels, height, width] = output_shape.as_slice() else {
            return Err(CanvasError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };
        let output_array = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_data.iter().copied().collect(),
        )
        .map_err(|e| CanvasError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference {:?} -> {:?} in {:.2}ms",
            input.dim(),
            output_array.dim(),
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(output_array)
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        self.model_spec.preprocessing
    }

    fn active_provider(&self) -> ExecutionProvider {
        ExecutionProvider::Cpu
    }

    fn name(&self) -> &'static str {
        "tract"
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
