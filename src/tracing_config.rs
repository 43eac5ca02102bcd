//! Tracing subscriber setup for the command-line front-end
//!
//! The library only emits events; the binary decides where they go.

use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Compact colored console output
    #[default]
    Console,
    /// Compact output without colors, for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug, Default)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Additional log file, written without colors
    pub log_file: Option<PathBuf>,
}

/// Keeps background log writers alive; drop it only at exit
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn,bgremove_canvas=info",
            1 => "info,bgremove_canvas=debug",
            2 => "debug,bgremove_canvas=trace",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    /// - Log file requested without the `tracing-files` feature
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(self.verbosity_to_filter()))?,
        };

        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
        match self.format {
            TracingFormat::Console => {
                layers.push(fmt::layer().with_target(false).compact().boxed());
            },
            TracingFormat::Compact => {
                layers.push(
                    fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .compact()
                        .boxed(),
                );
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                layers.push(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .boxed(),
                );
            },
        }

        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();
        if let Some(path) = &self.log_file {
            #[cfg(feature = "tracing-files")]
            {
                use tracing_appender::{non_blocking, rolling};

                let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("bgremove-canvas.log"));
                let (writer, file_guard) = non_blocking(rolling::never(directory, file_name));
                layers.push(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer)
                        .compact()
                        .boxed(),
                );
                guard._file_guard = Some(file_guard);
            }
            #[cfg(not(feature = "tracing-files"))]
            anyhow::bail!(
                "Log file '{}' requires the tracing-files feature",
                path.display()
            );
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()?;

        Ok(guard)
    }
}
