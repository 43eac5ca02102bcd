//! Execution provider discovery and device resolution

use crate::{
    config::ExecutionProvider,
    error::{CanvasError, Result},
    remover::BackendType,
};

/// Availability of one backend/provider combination
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// `backend:provider`, e.g. `onnx:cuda`
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Utility for parsing backends and resolving the batch device
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse a backend name (`onnx` or `tract`, case-insensitive)
    ///
    /// # Errors
    /// Returns `CanvasError::InvalidConfig` for unknown names
    pub fn parse_backend(name: &str) -> Result<BackendType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(BackendType::Onnx),
            "tract" => Ok(BackendType::Tract),
            other => Err(CanvasError::invalid_config(format!(
                "Unknown backend: {other}. Supported backends: onnx, tract"
            ))),
        }
    }

    /// Every provider combination with its availability on this machine
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let execution_provider = match name.as_str() {
                "CUDA" => ExecutionProvider::Cuda,
                "CoreML" => ExecutionProvider::CoreMl,
                _ => ExecutionProvider::Cpu,
            };
            providers.push(ProviderInfo {
                name: format!("onnx:{}", name.to_lowercase()),
                backend_type: BackendType::Onnx,
                execution_provider,
                available,
                description,
            });
        }

        #[cfg(feature = "tract")]
        for (name, available, description) in crate::backends::TractBackend::list_providers() {
            providers.push(ProviderInfo {
                name: format!("tract:{}", name.to_lowercase()),
                backend_type: BackendType::Tract,
                execution_provider: ExecutionProvider::Cpu,
                available,
                description,
            });
        }

        providers
    }

    /// Whether any accelerated provider of `backend` is usable here
    #[must_use]
    pub fn accelerator_available(backend: BackendType) -> bool {
        Self::list_all_providers().iter().any(|info| {
            info.backend_type == backend
                && info.available
                && info.execution_provider.is_accelerated()
        })
    }

    /// Provider a batch will run on for the "use accelerated device" flag
    ///
    /// The accelerated device is used when requested and available; otherwise
    /// the batch runs on the CPU.
    #[must_use]
    pub fn resolve_device(use_accelerated: bool, backend: BackendType) -> ExecutionProvider {
        if !use_accelerated {
            return ExecutionProvider::Cpu;
        }
        Self::list_all_providers()
            .into_iter()
            .find(|info| {
                info.backend_type == backend
                    && info.available
                    && info.execution_provider.is_accelerated()
            })
            .map_or(ExecutionProvider::Cpu, |info| info.execution_provider)
    }
}
