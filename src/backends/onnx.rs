//! ONNX Runtime segmentation backend
//!
//! Runs the segmentation model through ONNX Runtime on CPU, CUDA or `CoreML`.
//! An accelerated request that cannot be honoured falls back to CPU.

use crate::config::{BatchConfig, ExecutionProvider};
use crate::error::{CanvasError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelSpec, PreprocessingConfig};
use instant::{Duration, Instant};
use log;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::{self, value::Value};

/// ONNX Runtime backend for the segmentation model
#[derive(Debug)]
pub struct OnnxBackend {
    model_spec: ModelSpec,
    session: Option<Session>,
    active_provider: ExecutionProvider,
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}

fn ort_error<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> CanvasError + '_ {
    move |e| CanvasError::inference(format!("{context}: {e}"))
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers as `(name, available, description)`
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Probing ONNX Runtime providers on {os}/{arch}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available(),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    #[must_use]
    pub fn new(model_spec: ModelSpec) -> Self {
        Self {
            model_spec,
            session: None,
            active_provider: ExecutionProvider::Cpu,
        }
    }

    /// Attach the execution provider, returning the provider actually used
    fn configure_provider(
        builder: SessionBuilder,
        requested: ExecutionProvider,
    ) -> Result<(SessionBuilder, ExecutionProvider)> {
        let resolved = match requested {
            ExecutionProvider::Cpu => ExecutionProvider::Cpu,
            ExecutionProvider::Auto if cuda_available() => ExecutionProvider::Cuda,
            ExecutionProvider::Auto if coreml_available() => ExecutionProvider::CoreMl,
            ExecutionProvider::Auto => {
                log::warn!("No hardware acceleration available, falling back to CPU");
                ExecutionProvider::Cpu
            },
            ExecutionProvider::Cuda if cuda_available() => ExecutionProvider::Cuda,
            ExecutionProvider::CoreMl if coreml_available() => ExecutionProvider::CoreMl,
            other => {
                log::warn!("{other} execution provider requested but not available, falling back to CPU");
                ExecutionProvider::Cpu
            },
        };

        let builder = match resolved {
            ExecutionProvider::Cuda => builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(ort_error("Failed to set CUDA execution provider"))?,
            ExecutionProvider::CoreMl => builder
                .with_execution_providers([CoreMLExecutionProvider::default()
                    .with_subgraphs(true)
                    .build()])
                .map_err(ort_error("Failed to set CoreML execution provider"))?,
            ExecutionProvider::Cpu | ExecutionProvider::Auto => builder,
        };

        Ok((builder, resolved))
    }

    fn load_model(&mut self, config: &BatchConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_spec.load_model()?;

        let builder = Session::builder()
            .map_err(ort_error("Failed to create session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error("Failed to set optimization level"))?;
        let (builder, provider) = Self::configure_provider(builder, config.execution_provider())?;

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(ort_error("Failed to set intra threads"))?
            .with_inter_threads(inter_threads)
            .map_err(ort_error("Failed to set inter threads"))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                CanvasError::model(format!(
                    "Failed to create session from '{}': {e}",
                    self.model_spec.path.display()
                ))
            })?;

        self.session = Some(session);
        self.active_provider = provider;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Loaded model '{}' on {} ({intra_threads} intra / {inter_threads} inter threads) in {:.0}ms",
            self.model_spec.name,
            provider,
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &BatchConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CanvasError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        let input_value =
            Value::from_array(input.clone()).map_err(ort_error("Failed to convert input tensor"))?;

        // Positional inputs and outputs, so tensor names do not matter
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(ort_error("ONNX inference failed"))?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| CanvasError::inference("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| CanvasError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(ort_error("Failed to extract output tensor"))?;

        let output_shape = output_tensor.shape().to_vec();
        let &[batch, channels, height, width] = output_shape.as_slice() else {
            return Err(CanvasError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };
        let output_array = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_tensor.iter().copied().collect(),
        )
        .map_err(|e| CanvasError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "ONNX inference {:?} -> {:?} in {:.2}ms",
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
        self.active_provider
    }

    fn name(&self) -> &'static str {
        "onnx"
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}
