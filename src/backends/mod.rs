//! Inference engines behind the segmentation remover
//!
//! - ONNX Runtime backend (CPU, CUDA, `CoreML`)
//! - Tract backend (pure Rust, CPU only)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
