//! Background dispatcher
//!
//! Runs one batch at a time on the tokio blocking pool and hands progress
//! and the final outcome back to the interactive thread through a channel
//! that the caller drains with [`BackgroundDispatcher::poll`] (non-blocking)
//! or awaits with [`BackgroundDispatcher::next_event`].
//!
//! State machine: `Idle -> Running -> {Completed, Failed}`. Cancelling
//! detaches the listener and signals the worker between items; a worker
//! already inside inference finishes that item first.

use crate::{
    batch::BatchProcessor,
    config::BatchConfig,
    error::{CanvasError, Result},
    remover::RemoverFactory,
    services::{BatchProgress, ProgressReporter},
    types::BatchResult,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where the dispatcher stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Running { task_id: Uuid },
    Completed(BatchResult),
    Failed(String),
}

/// Signals delivered to the interactive thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Progress {
        task_id: Uuid,
        progress: BatchProgress,
    },
    Completed {
        task_id: Uuid,
        result: BatchResult,
    },
    Failed {
        task_id: Uuid,
        error: String,
    },
}

impl DispatchEvent {
    #[must_use]
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Progress { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. } => *task_id,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Forwards batch progress into the event channel
struct ChannelReporter {
    task_id: Uuid,
    sender: UnboundedSender<DispatchEvent>,
}

impl ProgressReporter for ChannelReporter {
    fn report_progress(&self, progress: BatchProgress) {
        // A closed channel means the listener detached
        let _ = self.sender.send(DispatchEvent::Progress {
            task_id: self.task_id,
            progress,
        });
    }
}

struct ActiveTask {
    id: Uuid,
    cancel: CancellationToken,
    events: UnboundedReceiver<DispatchEvent>,
}

/// Single-flight runner for batches
pub struct BackgroundDispatcher {
    factory: Arc<dyn RemoverFactory>,
    runtime: Handle,
    state: DispatchState,
    active: Option<ActiveTask>,
}

impl std::fmt::Debug for BackgroundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundDispatcher")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl BackgroundDispatcher {
    #[must_use]
    pub fn new(factory: Arc<dyn RemoverFactory>, runtime: Handle) -> Self {
        Self {
            factory,
            runtime,
            state: DispatchState::Idle,
            active: None,
        }
    }

    /// Create a dispatcher on the runtime of the calling context
    ///
    /// # Errors
    /// Returns `CanvasError::Internal` outside a tokio runtime
    pub fn from_current(factory: Arc<dyn RemoverFactory>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CanvasError::internal(format!("No tokio runtime available: {e}")))?;
        Ok(Self::new(factory, runtime))
    }

    #[must_use]
    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, DispatchState::Running { .. })
    }

    /// Start a batch on the worker pool and return immediately
    ///
    /// An archive still held from a previous completed batch is discarded.
    ///
    /// # Errors
    /// - `Busy` while another batch is running
    /// - `EmptyBatch` for an empty input list
    /// - `InvalidConfig` for an invalid configuration
    pub fn submit(&mut self, inputs: Vec<PathBuf>, config: BatchConfig) -> Result<Uuid> {
        if self.is_running() {
            return Err(CanvasError::Busy);
        }
        if inputs.is_empty() {
            return Err(CanvasError::EmptyBatch);
        }
        let processor = BatchProcessor::new(Arc::clone(&self.factory), config)?;
        self.reset()?;

        let task_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (sender, events) = mpsc::unbounded_channel();

        let worker_cancel = cancel.clone();
        self.runtime.spawn_blocking(move || {
            let reporter = ChannelReporter {
                task_id,
                sender: sender.clone(),
            };
            let event = match processor.process(&inputs, &worker_cancel, &reporter) {
                Ok(result) => DispatchEvent::Completed { task_id, result },
                Err(e) => DispatchEvent::Failed {
                    task_id,
                    error: e.to_string(),
                },
            };
            if let Err(mpsc::error::SendError(unclaimed)) = sender.send(event) {
                discard_unclaimed(unclaimed);
            }
        });

        info!(%task_id, "Batch dispatched");
        self.active = Some(ActiveTask {
            id: task_id,
            cancel,
            events,
        });
        self.state = DispatchState::Running { task_id };
        Ok(task_id)
    }

    /// Drain pending events without blocking
    pub fn poll(&mut self) -> Vec<DispatchEvent> {
        let mut drained = Vec::new();
        loop {
            let Some(active) = self.active.as_mut() else {
                break;
            };
            match active.events.try_recv() {
                Ok(event) => {
                    self.apply(&event);
                    drained.push(event);
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    let event = self.worker_vanished();
                    drained.push(event);
                },
            }
        }
        drained
    }

    /// Wait for the next event of the running batch
    ///
    /// Returns `None` when no batch is running.
    pub async fn next_event(&mut self) -> Option<DispatchEvent> {
        let active = self.active.as_mut()?;
        let event = match active.events.recv().await {
            Some(event) => {
                self.apply(&event);
                event
            },
            None => self.worker_vanished(),
        };
        Some(event)
    }

    /// Detach from the running batch and ask the worker to stop
    ///
    /// No further events are delivered for the cancelled batch.
    /// An outcome the worker already queued but nobody polled is dropped
    /// together with its archive.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            info!(task_id = %active.id, "Batch cancelled");
            detach(active);
        }
        if self.is_running() {
            self.state = DispatchState::Idle;
        }
    }

    /// Hand the completed result to the caller, who then owns the archive
    pub fn take_result(&mut self) -> Option<BatchResult> {
        match std::mem::replace(&mut self.state, DispatchState::Idle) {
            DispatchState::Completed(result) => Some(result),
            other => {
                self.state = other;
                None
            },
        }
    }

    /// Return to `Idle`, cancelling a running batch and deleting a held archive
    ///
    /// # Errors
    /// Returns `CanvasError::Io` when the held archive cannot be deleted
    pub fn reset(&mut self) -> Result<()> {
        self.cancel();
        if let DispatchState::Completed(result) =
            std::mem::replace(&mut self.state, DispatchState::Idle)
        {
            result.archive.discard()?;
        }
        Ok(())
    }

    /// Copy the held archive to `destination` and reset
    ///
    /// # Errors
    /// - No completed batch
    /// - Copy or cleanup failures
    pub fn save_archive<P: AsRef<Path>>(&mut self, destination: P) -> Result<u64> {
        let DispatchState::Completed(result) = &self.state else {
            return Err(CanvasError::processing("No completed batch to save"));
        };
        let bytes = result.archive.save_to(destination)?;
        self.reset()?;
        Ok(bytes)
    }

    fn apply(&mut self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Progress { .. } => {},
            DispatchEvent::Completed { task_id, result } => {
                debug!(%task_id, entries = result.archive.entries(), "Batch completed");
                self.state = DispatchState::Completed(result.clone());
                self.active = None;
            },
            DispatchEvent::Failed { task_id, error } => {
                warn!(%task_id, %error, "Batch failed");
                self.state = DispatchState::Failed(error.clone());
                self.active = None;
            },
        }
    }

    fn worker_vanished(&mut self) -> DispatchEvent {
        let task_id = self.active.take().map_or_else(Uuid::nil, |active| active.id);
        let event = DispatchEvent::Failed {
            task_id,
            error: "Batch worker exited without a result".to_string(),
        };
        self.apply(&event);
        event
    }
}

impl Drop for BackgroundDispatcher {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            detach(active);
        }
        if let DispatchState::Completed(result) =
            std::mem::replace(&mut self.state, DispatchState::Idle)
        {
            debug!("Discarding held archive on drop");
            if let Err(e) = result.archive.discard() {
                warn!(error = %e, "Failed to discard held archive on drop");
            }
        }
    }
}

/// Stop listening to a task and clean up whatever it already queued
///
/// Once the receiver is closed a late worker gets its event back from
/// `send` and discards the archive itself.
fn detach(mut active: ActiveTask) {
    active.cancel.cancel();
    active.events.close();
    while let Ok(event) = active.events.try_recv() {
        discard_unclaimed(event);
    }
}

/// Delete the archive of a batch whose listener has gone away
fn discard_unclaimed(event: DispatchEvent) {
    if let DispatchEvent::Completed { task_id, result } = event {
        debug!(%task_id, "Discarding archive of detached batch");
        if let Err(e) = result.archive.discard() {
            warn!(%task_id, error = %e, "Failed to discard archive of detached batch");
        }
    }
}
