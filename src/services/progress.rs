//! Progress reporting service
//!
//! The batch processor reports through a [`ProgressReporter`] so each
//! frontend (dispatcher channel, CLI bar, logs) can render it its own way.

use instant::Instant;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Phases of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStage {
    /// Creating the background remover and loading the model
    LoadingModel,
    /// Running the pipeline on one input
    ProcessingItem,
    /// Writing the archive
    Archiving,
    /// Archive written
    Completed,
}

impl BatchStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::LoadingModel => "Loading background removal model",
            Self::ProcessingItem => "Processing image",
            Self::Archiving => "Writing archive",
            Self::Completed => "Batch completed",
        }
    }
}

/// One progress update of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub stage: BatchStage,
    /// Items finished so far (processed or failed)
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Input being worked on, for [`BatchStage::ProcessingItem`]
    pub current: Option<PathBuf>,
    pub elapsed_ms: u64,
}

impl BatchProgress {
    /// Completion percentage (0-100)
    #[must_use]
    pub fn percentage(&self) -> u8 {
        if self.stage == BatchStage::Completed {
            return 100;
        }
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total).min(100) as u8
    }
}

/// Receives batch progress
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, update: BatchProgress);

    /// An item was skipped; the batch continues
    fn report_item_failure(&self, _input: &std::path::Path, _reason: &str) {}
}

/// No-op progress reporter for when progress reporting is disabled
#[derive(Debug, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: BatchProgress) {}
}

/// Reporter that writes updates to the `tracing` log
#[derive(Debug, Default)]
pub struct LogProgressReporter;

impl ProgressReporter for LogProgressReporter {
    fn report_progress(&self, update: BatchProgress) {
        tracing::info!(
            stage = update.stage.description(),
            completed = update.completed,
            total = update.total,
            percent = update.percentage(),
            "Batch progress"
        );
    }

    fn report_item_failure(&self, input: &std::path::Path, reason: &str) {
        tracing::warn!(input = %input.display(), reason, "Skipped item");
    }
}

/// Counts outcomes and emits [`BatchProgress`] updates to a reporter
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    start_time: Instant,
    total: usize,
    succeeded: usize,
    failed: usize,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter, total: usize) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            total,
            succeeded: 0,
            failed: 0,
        }
    }

    /// Milliseconds since the tracker was created
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn stage(&self, stage: BatchStage, current: Option<PathBuf>) {
        self.reporter.report_progress(BatchProgress {
            stage,
            completed: self.succeeded + self.failed,
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            current,
            elapsed_ms: self.elapsed_ms(),
        });
    }

    pub fn item_succeeded(&mut self) {
        self.succeeded += 1;
    }

    pub fn item_failed(&mut self, input: &std::path::Path, reason: &str) {
        self.failed += 1;
        self.reporter.report_item_failure(input, reason);
    }
}
