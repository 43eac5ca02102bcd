//! Batch canvas CLI
//!
//! Collects image files, runs them through the background dispatcher and
//! saves the resulting archive.

use crate::{
    config::BatchConfig,
    dispatcher::{BackgroundDispatcher, DispatchEvent},
    models::ModelSpec,
    remover::DefaultRemoverFactory,
    services::{BatchStage, ImageIOService},
    session::UploadSession,
    tracing_config::{TracingConfig, TracingFormat},
    types::{BatchResult, ItemOutcome},
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remove image backgrounds and place every subject on a 2048x2732 canvas
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-canvas")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories (png, jpg, jpeg, heic)
    #[arg(value_name = "INPUT", required_unless_present = "show_providers")]
    pub input: Vec<PathBuf>,

    /// Archive destination (file or directory) [default: Downloads/processed_<timestamp>.zip]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Use an accelerated device when one is available
    #[arg(long)]
    pub gpu: bool,

    /// Inference backend (onnx, tract)
    #[arg(short, long, default_value = "onnx")]
    pub backend: String,

    /// Path to the segmentation model (.onnx, optional .json sidecar next to it)
    #[arg(short, long, value_name = "MODEL")]
    pub model: Option<PathBuf>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Plain log output without colors
    #[arg(long)]
    pub no_color: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.no_color {
        TracingFormat::Compact
    } else {
        TracingFormat::Console
    };
    let _tracing_guard = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .init()
        .context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics(cli.gpu);
        return Ok(());
    }

    let backend =
        ExecutionProviderManager::parse_backend(&cli.backend).context("Invalid --backend")?;
    let mut session = collect_inputs(&cli)?;
    if session.is_empty() {
        anyhow::bail!("No supported image files found (expected png, jpg, jpeg or heic)");
    }

    let model_spec = match &cli.model {
        Some(path) => ModelSpec::from_path(path)
            .with_context(|| format!("Failed to read model '{}'", path.display()))?,
        None => ModelSpec::default(),
    };
    let config = BatchConfig::builder()
        .use_accelerated(cli.gpu)
        .model_spec(model_spec)
        .intra_threads(cli.threads)
        .build()
        .context("Invalid configuration")?;

    info!(
        files = session.len(),
        %backend,
        device = %ExecutionProviderManager::resolve_device(cli.gpu, backend),
        "Starting batch"
    );

    let factory = Arc::new(DefaultRemoverFactory::new(backend));
    let mut dispatcher = BackgroundDispatcher::from_current(factory)?;
    let total = session.len();
    dispatcher.submit(session.take_files(), config)?;

    let result = drive(&mut dispatcher, total).await?;
    report_failures(&result);

    let destination = resolve_output_path(cli.output.as_deref())?;
    let bytes = dispatcher
        .save_archive(&destination)
        .with_context(|| format!("Failed to save archive to '{}'", destination.display()))?;

    println!(
        "Processed {}/{} image(s) -> {} ({} bytes)",
        result.succeeded(),
        result.items.len(),
        destination.display(),
        bytes
    );
    Ok(())
}

/// Poll the dispatcher like an interactive loop until the batch ends
async fn drive(dispatcher: &mut BackgroundDispatcher, total: usize) -> Result<BatchResult> {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars("#>-")),
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in dispatcher.poll() {
                    match event {
                        DispatchEvent::Progress { progress: update, .. } => {
                            progress.set_position(update.completed as u64);
                            let message = match (&update.stage, &update.current) {
                                (BatchStage::ProcessingItem, Some(current)) => current
                                    .file_name()
                                    .map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
                                (stage, _) => stage.description().to_string(),
                            };
                            progress.set_message(message);
                        },
                        DispatchEvent::Completed { result, .. } => {
                            progress.finish_and_clear();
                            return Ok(result);
                        },
                        DispatchEvent::Failed { error, .. } => {
                            progress.abandon();
                            anyhow::bail!("Batch failed: {error}");
                        },
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                progress.abandon_with_message("cancelled");
                dispatcher.cancel();
                anyhow::bail!("Cancelled by user");
            },
        }
    }
}

/// Gather files from the command line into an upload session
fn collect_inputs(cli: &Cli) -> Result<UploadSession> {
    let mut session = UploadSession::new();
    for input in &cli.input {
        if input.is_file() {
            session.add_files([input]);
        } else if input.is_dir() {
            let mut files = find_image_files(input, cli.recursive, cli.pattern.as_deref())?;
            files.sort();
            session.add_files(files);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                input.display()
            );
        }
    }
    debug!(files = session.len(), "Inputs collected");
    Ok(session)
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type().is_file()
                && ImageIOService::is_supported_extension(path)
                && matches_pattern(path, pattern)
            {
                files.push(path.to_path_buf());
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_file()
                && ImageIOService::is_supported_extension(&path)
                && matches_pattern(&path, pattern)
            {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    let Some(pat) = pattern else {
        return true;
    };
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| glob::Pattern::new(pat).is_ok_and(|p| p.matches(name)))
}

/// Where the archive goes: the given file, a timestamped file inside the
/// given directory, or the user's download folder
fn resolve_output_path(output: Option<&Path>) -> Result<PathBuf> {
    let file_name = format!(
        "processed_{}.zip",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = match output {
        Some(path) if path.is_dir() => path.join(file_name),
        Some(path) => path.to_path_buf(),
        None => dirs::download_dir()
            .map_or_else(std::env::current_dir, Ok)
            .context("Failed to determine a download directory")?
            .join(file_name),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    Ok(path)
}

fn report_failures(result: &BatchResult) {
    for item in &result.items {
        if let ItemOutcome::Failed { reason } = &item.outcome {
            warn!("Skipped {}: {}", item.input.display(), reason);
        }
    }
}

fn show_provider_diagnostics(use_accelerated: bool) {
    println!("Available execution providers:");
    for info in ExecutionProviderManager::list_all_providers() {
        let status = if info.available { "yes" } else { "no " };
        println!("  [{status}] {:<14} {}", info.name, info.description);
    }
    for backend in DefaultRemoverFactory::compiled_backends() {
        println!(
            "Batch device for {backend} (--gpu={use_accelerated}): {}",
            ExecutionProviderManager::resolve_device(use_accelerated, backend)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["bgremove-canvas", "--gpu", "-r", "a.png", "dir"]).unwrap();
        assert!(cli.gpu);
        assert!(cli.recursive);
        assert_eq!(cli.input.len(), 2);
        assert_eq!(cli.backend, "onnx");

        assert!(Cli::try_parse_from(["bgremove-canvas"]).is_err());
        assert!(Cli::try_parse_from(["bgremove-canvas", "--show-providers"]).is_ok());
    }

    #[test]
    fn test_find_image_files_filters_extensions_and_pattern() {
        let dir = TempDir::new().unwrap();
        for name in ["a.png", "b.JPG", "c.gif", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("d.jpeg"), b"x").unwrap();

        let flat = find_image_files(dir.path(), false, None).unwrap();
        assert_eq!(flat.len(), 2);
        let deep = find_image_files(dir.path(), true, None).unwrap();
        assert_eq!(deep.len(), 3);
        let pngs = find_image_files(dir.path(), true, Some("*.png")).unwrap();
        assert_eq!(pngs.len(), 1);
    }

    #[test]
    fn test_resolve_output_path() {
        let dir = TempDir::new().unwrap();
        let in_dir = resolve_output_path(Some(dir.path())).unwrap();
        assert_eq!(in_dir.parent().unwrap(), dir.path());
        assert!(in_dir.file_name().unwrap().to_string_lossy().starts_with("processed_"));

        let explicit = dir.path().join("out").join("result.zip");
        assert_eq!(resolve_output_path(Some(&explicit)).unwrap(), explicit);
        assert!(dir.path().join("out").is_dir());
    }
}
