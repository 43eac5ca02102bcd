//! I/O and progress services used by the batch processor

pub mod io;
pub mod progress;

pub use io::{ImageIOService, SUPPORTED_EXTENSIONS};
pub use progress::{
    BatchProgress, BatchStage, LogProgressReporter, NoOpProgressReporter, ProgressReporter,
    ProgressTracker,
};
