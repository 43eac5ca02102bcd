//! The background-removal capability and its factories
//!
//! A [`BackgroundRemover`] takes a list of decoded images and returns a list
//! of the same length and order with the background replaced by transparency.
//! The batch processor creates one remover per batch through a
//! [`RemoverFactory`] and drops it when the batch ends, which releases the
//! loaded model.

use crate::{
    config::{BatchConfig, ExecutionProvider},
    error::{CanvasError, Result},
    inference::InferenceBackend,
    utils::ImagePreprocessor,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Foreground extraction over a list of images
pub trait BackgroundRemover: Send {
    /// Remove the background of every image, preserving length and order
    ///
    /// # Errors
    /// Any failure of the underlying model; the caller decides how to isolate it
    fn remove_backgrounds(&mut self, images: Vec<DynamicImage>) -> Result<Vec<DynamicImage>>;

    /// Short name for logs
    fn name(&self) -> &str;

    /// Provider the remover actually runs on
    fn execution_provider(&self) -> ExecutionProvider {
        ExecutionProvider::Cpu
    }
}

/// Supported inference engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Creates one remover per batch
pub trait RemoverFactory: Send + Sync {
    /// Build and initialize a remover for the given batch configuration
    ///
    /// # Errors
    /// - Requested backend not compiled in
    /// - Model loading failures
    fn create_remover(&self, config: &BatchConfig) -> Result<Box<dyn BackgroundRemover>>;

    /// Backends this factory can build
    fn available_backends(&self) -> Vec<BackendType> {
        Vec::new()
    }
}

impl<F> RemoverFactory for F
where
    F: Fn(&BatchConfig) -> Result<Box<dyn BackgroundRemover>> + Send + Sync,
{
    fn create_remover(&self, config: &BatchConfig) -> Result<Box<dyn BackgroundRemover>> {
        self(config)
    }
}

/// Factory for the segmentation backends compiled into this build
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRemoverFactory {
    backend_type: BackendType,
}

impl DefaultRemoverFactory {
    #[must_use]
    pub fn new(backend_type: BackendType) -> Self {
        Self { backend_type }
    }

    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    /// Backends enabled by crate features
    #[must_use]
    pub fn compiled_backends() -> Vec<BackendType> {
        let mut backends = Vec::new();
        if cfg!(feature = "onnx") {
            backends.push(BackendType::Onnx);
        }
        if cfg!(feature = "tract") {
            backends.push(BackendType::Tract);
        }
        backends
    }
}

impl RemoverFactory for DefaultRemoverFactory {
    fn create_remover(&self, config: &BatchConfig) -> Result<Box<dyn BackgroundRemover>> {
        match self.backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => {
                let backend = crate::backends::OnnxBackend::new(config.model_spec.clone());
                Ok(Box::new(SegmentationRemover::new(backend, config)?))
            },
            #[cfg(feature = "tract")]
            BackendType::Tract => {
                let backend = crate::backends::TractBackend::new(config.model_spec.clone());
                Ok(Box::new(SegmentationRemover::new(backend, config)?))
            },
            #[allow(unreachable_patterns)]
            other => Err(CanvasError::invalid_config(format!(
                "The {other} backend is not enabled in this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        Self::compiled_backends()
    }
}

/// Remover built on a segmentation model
///
/// Each image is letterboxed into the model input, the predicted mask is
/// mapped back to the image size and written into the alpha channel.
pub struct SegmentationRemover<B: InferenceBackend> {
    backend: B,
}

impl<B: InferenceBackend> SegmentationRemover<B> {
    /// Initialize the backend for the batch
    ///
    /// # Errors
    /// Backend initialization failures (missing model, runtime errors)
    pub fn new(mut backend: B, config: &BatchConfig) -> Result<Self> {
        if let Some(load_time) = backend.initialize(config)? {
            debug!(
                backend = backend.name(),
                provider = %backend.active_provider(),
                load_ms = load_time.as_millis() as u64,
                "Background remover ready"
            );
        }
        Ok(Self { backend })
    }

    /// Cut out a single image
    ///
    /// # Errors
    /// Preprocessing, inference or mask application failures
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn remove_background(&mut self, image: &DynamicImage) -> Result<DynamicImage> {
        let preprocessing = self.backend.preprocessing_config();
        let input = ImagePreprocessor::preprocess_for_inference(image, &preprocessing)?;
        let output = self.backend.infer(&input)?;
        let mask = ImagePreprocessor::tensor_to_mask(&output, (image.width(), image.height()))?;

        let mut rgba = image.to_rgba8();
        mask.apply_to_image(&mut rgba)?;
        debug!(foreground = mask.foreground_ratio(), "Mask applied");

        Ok(DynamicImage::ImageRgba8(rgba))
    }
}

impl<B: InferenceBackend> BackgroundRemover for SegmentationRemover<B> {
    fn remove_backgrounds(&mut self, images: Vec<DynamicImage>) -> Result<Vec<DynamicImage>> {
        images
            .iter()
            .map(|image| self.remove_background(image))
            .collect()
    }

    fn name(&self) -> &str {
        self.backend.name()
    }

    fn execution_provider(&self) -> ExecutionProvider {
        self.backend.active_provider()
    }
}

impl<B: InferenceBackend> Drop for SegmentationRemover<B> {
    fn drop(&mut self) {
        debug!(backend = self.backend.name(), "Releasing background remover");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PreprocessingConfig;
    use image::{Rgb, RgbImage};
    use instant::Duration;
    use ndarray::Array4;

    /// Backend predicting foreground on the left half of the model input
    struct HalfMaskBackend {
        initialized: bool,
        calls: usize,
    }

    impl InferenceBackend for HalfMaskBackend {
        fn initialize(&mut self, _config: &BatchConfig) -> Result<Option<Duration>> {
            self.initialized = true;
            Ok(Some(Duration::from_millis(1)))
        }

        fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
            self.calls += 1;
            let (_, _, height, width) = input.dim();
            let mut output = Array4::<f32>::zeros((1, 1, height, width));
            for y in 0..height {
                for x in 0..width / 2 {
                    output[[0, 0, y, x]] = 1.0;
                }
            }
            Ok(output)
        }

        fn preprocessing_config(&self) -> PreprocessingConfig {
            PreprocessingConfig {
                target_size: [32, 32],
                ..PreprocessingConfig::default()
            }
        }

        fn active_provider(&self) -> ExecutionProvider {
            ExecutionProvider::Cpu
        }

        fn name(&self) -> &'static str {
            "half-mask"
        }

        fn is_initialized(&self) -> bool {
            self.initialized
        }
    }

    #[test]
    fn test_segmentation_remover_preserves_length_and_order() {
        let backend = HalfMaskBackend {
            initialized: false,
            calls: 0,
        };
        let mut remover = SegmentationRemover::new(backend, &BatchConfig::default()).unwrap();
        assert_eq!(remover.name(), "half-mask");

        let images = vec![
            DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([9, 9, 9]))),
            DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 32, Rgb([1, 1, 1]))),
        ];
        let results = remover.remove_backgrounds(images).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(remover.backend.calls, 2);
        assert_eq!((results[0].width(), results[0].height()), (32, 32));
        assert_eq!((results[1].width(), results[1].height()), (16, 32));

        let first = results[0].to_rgba8();
        assert_eq!(first.get_pixel(0, 10)[3], 255);
        assert_eq!(first.get_pixel(31, 10).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_closure_factory() {
        let factory = |_: &BatchConfig| -> Result<Box<dyn BackgroundRemover>> {
            Err(CanvasError::model("no model"))
        };
        assert!(factory.create_remover(&BatchConfig::default()).is_err());
        assert!(factory.available_backends().is_empty());
    }

    #[test]
    fn test_default_factory_lists_compiled_backends() {
        let factory = DefaultRemoverFactory::default();
        let backends = factory.available_backends();
        #[cfg(feature = "onnx")]
        assert!(backends.contains(&BackendType::Onnx));
        #[cfg(feature = "tract")]
        assert!(backends.contains(&BackendType::Tract));
        assert_eq!(BackendType::Tract.to_string(), "tract");
    }
}
