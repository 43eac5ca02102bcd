//! Batch processor
//!
//! Runs the canvas pipeline over an ordered list of files, stages each
//! success as a PNG and bundles the staged files into one deflate ZIP.
//! A failing item is logged and skipped; only archive failures end the batch
//! with an error.

use crate::{
    config::BatchConfig,
    error::{CanvasError, Result},
    pipeline::CanvasPipeline,
    remover::{BackgroundRemover, RemoverFactory},
    services::{BatchStage, ImageIOService, ProgressReporter, ProgressTracker},
    types::{BatchArchive, BatchResult, ItemOutcome, ItemResult},
};
use image::DynamicImage;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// A processed output waiting in the staging directory
#[derive(Debug)]
struct StagedOutput {
    path: PathBuf,
    entry_name: String,
}

/// Processes batches of image files into a single archive
#[derive(Clone)]
pub struct BatchProcessor {
    factory: Arc<dyn RemoverFactory>,
    config: BatchConfig,
    pipeline: CanvasPipeline,
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchProcessor {
    /// Create a processor for the given remover factory and configuration
    ///
    /// # Errors
    /// Returns `CanvasError::InvalidConfig` when the configuration is invalid
    pub fn new(factory: Arc<dyn RemoverFactory>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        let pipeline = CanvasPipeline::new(config.canvas.clone())?;
        Ok(Self {
            factory,
            config,
            pipeline,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process every input in order and write the archive
    ///
    /// The remover is created once for the batch and dropped before the
    /// archive is written, whatever the outcome.
    ///
    /// # Errors
    /// - `EmptyBatch` for an empty input list
    /// - Remover creation failures (model missing, backend unavailable)
    /// - `Cancelled` when the token fires between items
    /// - Archive creation failures; the partial archive is deleted first
    #[instrument(skip_all, fields(items = inputs.len(), accelerated = self.config.use_accelerated))]
    pub fn process(
        &self,
        inputs: &[PathBuf],
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchResult> {
        if inputs.is_empty() {
            return Err(CanvasError::EmptyBatch);
        }

        let mut tracker = ProgressTracker::new(reporter, inputs.len());
        tracker.stage(BatchStage::LoadingModel, None);
        let mut remover = self.factory.create_remover(&self.config)?;
        info!(
            remover = remover.name(),
            provider = %remover.execution_provider(),
            "Batch started"
        );

        let staging = tempfile::Builder::new()
            .prefix("bgremove-staging-")
            .tempdir()
            .map_err(|e| CanvasError::file_io_error("create staging directory", std::env::temp_dir(), &e))?;

        let mut items = Vec::with_capacity(inputs.len());
        let mut staged = Vec::with_capacity(inputs.len());
        let mut used_names = HashSet::new();

        for input in inputs {
            if cancel.is_cancelled() {
                info!(processed = items.len(), "Batch cancelled");
                return Err(CanvasError::Cancelled);
            }
            tracker.stage(BatchStage::ProcessingItem, Some(input.clone()));

            let outcome =
                match self.process_item(input, remover.as_mut(), staging.path(), &mut used_names) {
                    Ok(output) => {
                        tracker.item_succeeded();
                        let entry_name = output.entry_name.clone();
                        staged.push(output);
                        ItemOutcome::Processed { entry_name }
                    },
                    Err(e) => {
                        if e.is_item_level() {
                            warn!(input = %input.display(), error = %e, "Skipping item");
                        } else {
                            error!(input = %input.display(), error = %e, "Skipping item");
                        }
                        let reason = e.to_string();
                        tracker.item_failed(input, &reason);
                        ItemOutcome::Failed { reason }
                    },
                };
            items.push(ItemResult {
                input: input.clone(),
                outcome,
            });
        }

        drop(remover);

        tracker.stage(BatchStage::Archiving, None);
        let archive_path = self.write_archive(&staged)?;
        tracker.stage(BatchStage::Completed, None);

        let result = BatchResult {
            items,
            archive: BatchArchive::new(archive_path, staged.len()),
            total_ms: tracker.elapsed_ms(),
        };
        info!(
            succeeded = result.succeeded(),
            failed = result.failed(),
            archive = %result.archive.path().display(),
            total_ms = result.total_ms,
            "Batch finished"
        );
        Ok(result)
    }

    /// Decode, run the pipeline and stage one input
    fn process_item(
        &self,
        input: &Path,
        remover: &mut dyn BackgroundRemover,
        staging_dir: &Path,
        used_names: &mut HashSet<String>,
    ) -> Result<StagedOutput> {
        let source = ImageIOService::load_image(input)?;
        let canvas = self.pipeline.process(source, remover)?;

        let base_name = ImageIOService::output_file_name(input, &self.config.output_suffix)?;
        let entry_name = unique_entry_name(&base_name, used_names);
        let path = staging_dir.join(&entry_name);
        ImageIOService::save_png(&DynamicImage::ImageRgb8(canvas), &path)?;

        used_names.insert(entry_name.clone());
        debug!(input = %input.display(), entry = %entry_name, "Staged output");
        Ok(StagedOutput { path, entry_name })
    }

    /// Create the archive file and add every staged output in order
    fn write_archive(&self, staged: &[StagedOutput]) -> Result<PathBuf> {
        let dir = self
            .config
            .archive_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&dir)
            .map_err(|e| CanvasError::file_io_error("create archive directory", &dir, &e))?;

        let (file, path) = tempfile::Builder::new()
            .prefix("bgremove-")
            .suffix(".zip")
            .tempfile_in(&dir)
            .map_err(|e| CanvasError::file_io_error("create archive in", &dir, &e))?
            .keep()
            .map_err(|e| CanvasError::file_io_error("keep archive in", &dir, &e.error))?;

        match fill_archive(file, staged) {
            Ok(()) => {
                debug!(archive = %path.display(), entries = staged.len(), "Archive written");
                Ok(path)
            },
            Err(e) => {
                if let Err(remove_err) = std::fs::remove_file(&path) {
                    warn!(archive = %path.display(), error = %remove_err, "Failed to delete partial archive");
                }
                Err(e)
            },
        }
    }
}

fn fill_archive(file: File, staged: &[StagedOutput]) -> Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for output in staged {
        zip.start_file(output.entry_name.as_str(), options)?;
        let mut source = File::open(&output.path)
            .map_err(|e| CanvasError::file_io_error("read staged output", &output.path, &e))?;
        std::io::copy(&mut source, &mut zip)?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(())
}

/// `base` when unused, otherwise `<stem>_<n>.<ext>` with the first free `n >= 2`
fn unique_entry_name(base: &str, used: &HashSet<String>) -> String {
    if !used.contains(base) {
        return base.to_string();
    }
    let (stem, extension) = base.rsplit_once('.').unwrap_or((base, ""));
    (2..)
        .map(|n| {
            if extension.is_empty() {
                format!("{stem}_{n}")
            } else {
                format!("{stem}_{n}.{extension}")
            }
        })
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unique_entry_names() {
        let mut used = HashSet::new();
        assert_eq!(unique_entry_name("a_processed.png", &used), "a_processed.png");
        used.insert("a_processed.png".to_string());
        assert_eq!(unique_entry_name("a_processed.png", &used), "a_processed_2.png");
        used.insert("a_processed_2.png".to_string());
        assert_eq!(unique_entry_name("a_processed.png", &used), "a_processed_3.png");
    }

    #[test]
    fn test_failed_archive_is_removed() {
        let archive_dir = TempDir::new().unwrap();
        let config = BatchConfig::builder()
            .archive_dir(archive_dir.path())
            .build()
            .unwrap();
        let factory = |_: &BatchConfig| -> Result<Box<dyn BackgroundRemover>> {
            Err(CanvasError::model("unused"))
        };
        let processor = BatchProcessor::new(Arc::new(factory), config).unwrap();

        let staged = vec![StagedOutput {
            path: archive_dir.path().join("vanished.png"),
            entry_name: "vanished_processed.png".to_string(),
        }];
        assert!(processor.write_archive(&staged).is_err());
        assert_eq!(std::fs::read_dir(archive_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_archive_is_valid_zip() {
        let archive_dir = TempDir::new().unwrap();
        let config = BatchConfig::builder()
            .archive_dir(archive_dir.path())
            .build()
            .unwrap();
        let factory = |_: &BatchConfig| -> Result<Box<dyn BackgroundRemover>> {
            Err(CanvasError::model("unused"))
        };
        let processor = BatchProcessor::new(Arc::new(factory), config).unwrap();

        let path = processor.write_archive(&[]).unwrap();
        let archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 0);
        assert_eq!(path.extension().unwrap(), "zip");
    }
}
