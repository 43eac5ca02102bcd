//! Shared utilities for the inference backends

pub mod preprocessing;
pub mod providers;

pub use preprocessing::{ImagePreprocessor, Letterbox};
pub use providers::{ExecutionProviderManager, ProviderInfo};
