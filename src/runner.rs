//! Running a batch of files through a [`FileProcessor`], one at a time.
//!
//! The runner is a small state machine:
//!
//! ```text
//! Idle -> Running -> Processing(0) -> Processing(1) -> ... -> Idle
//! ```
//!
//! Files are processed strictly in the order given, never concurrently.
//! After each file, observers get a [`BatchEvent::FileFinished`] and a
//! [`BatchEvent::Progress`], and the log sink gets a status line. A failed
//! file never stops the batch. Cancellation does, between files or between
//! pages.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    input::InputFile,
    log_sink::LogSink,
    prelude::*,
    processor::{FileOutcome, FileProcessor, OutcomeStatus},
};

/// Where is the runner in its lifecycle?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BatchStatus {
    /// No batch is running.
    #[default]
    Idle,
    /// A batch has started, but no file is being processed right now.
    Running,
    /// The file at `index` (0-based) is being processed.
    Processing { index: usize },
}

/// A snapshot of the current batch.
#[derive(Clone, Debug, Default)]
pub struct BatchState {
    /// Lifecycle state.
    pub status: BatchStatus,
    /// The files in this batch, in processing order.
    pub queue: Vec<InputFile>,
    /// The number of files in this batch.
    pub total: usize,
    /// The number of files finished so far.
    pub index: usize,
    /// Outcomes so far, in queue order.
    pub outcomes: Vec<FileOutcome>,
}

/// Totals for a finished batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSummary {
    /// Files in the batch.
    pub total: usize,
    /// Files we produced an outcome for.
    pub processed: usize,
    /// Outcomes with [`OutcomeStatus::Failed`].
    pub failed: usize,
    /// Did we stop early because of cancellation?
    pub cancelled: bool,
}

/// Events reported to [`BatchObserver`]s.
#[derive(Clone, Debug)]
pub enum BatchEvent {
    /// A batch of `total` files has started.
    Started { total: usize },
    /// We're about to process the file at `index` (0-based).
    FileStarted {
        index: usize,
        total: usize,
        path: PathBuf,
    },
    /// The file at `index` has an outcome.
    FileFinished { index: usize, outcome: FileOutcome },
    /// `current` files out of `total` are done. `current` counts from 1.
    Progress { current: usize, total: usize },
    /// The batch is over.
    Completed(BatchSummary),
}

/// Receives batch events. This is how a UI follows along.
pub trait BatchObserver: Send + Sync {
    /// Called for each event, in order.
    fn on_event(&self, event: &BatchEvent);
}

/// Processes batches of files sequentially.
pub struct BatchRunner {
    processor: FileProcessor,
    log: tokio::sync::Mutex<Box<dyn LogSink>>,
    state: Mutex<BatchState>,
    observers: Mutex<Vec<Arc<dyn BatchObserver>>>,
    /// Optional pause between files.
    pacing: Option<Duration>,
}

impl BatchRunner {
    /// Create a new runner. `log` is opened at the start of each batch and
    /// closed at the end.
    pub fn new(processor: FileProcessor, log: Box<dyn LogSink>) -> Self {
        Self {
            processor,
            log: tokio::sync::Mutex::new(log),
            state: Mutex::new(BatchState::default()),
            observers: Mutex::new(vec![]),
            pacing: None,
        }
    }

    /// Pause for `delay` between files.
    pub fn with_pacing(mut self, delay: Duration) -> Self {
        self.pacing = (!delay.is_zero()).then_some(delay);
        self
    }

    /// Register an observer for all future events.
    pub fn subscribe(&self, observer: Arc<dyn BatchObserver>) {
        self.observers.lock().expect("lock poisoned").push(observer);
    }

    /// A snapshot of the current batch.
    pub fn state(&self) -> BatchState {
        self.state.lock().expect("lock poisoned").clone()
    }

    /// The current lifecycle state.
    pub fn status(&self) -> BatchStatus {
        self.state.lock().expect("lock poisoned").status
    }

    /// Process `paths` in order, replacing any previous batch.
    ///
    /// Returns once every file has an outcome, or once `cancel` fires.
    #[instrument(level = "debug", skip_all, fields(total = paths.len()))]
    pub async fn start(
        &self,
        paths: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let queue = paths
            .into_iter()
            .map(InputFile::from_path)
            .collect::<Vec<_>>();
        let total = queue.len();
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.status != BatchStatus::Idle {
                return Err(anyhow!("a batch is already running"));
            }
            *state = BatchState {
                status: BatchStatus::Running,
                queue: queue.clone(),
                total,
                index: 0,
                outcomes: Vec::with_capacity(total),
            };
        }

        if let Err(err) = self.log.lock().await.open().await {
            self.set_status(BatchStatus::Idle);
            return Err(err.context("Failed to open processing log"));
        }

        info!(total, "Starting batch");
        self.emit(&BatchEvent::Started { total });

        let mut cancelled = false;
        for (index, input) in queue.into_iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            self.process_one(index, total, input, cancel).await;

            // Pause between files, but not after the last one.
            if let Some(delay) = self.pacing
                && index + 1 < total
            {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        cancelled |= cancel.is_cancelled() && self.state().index < total;

        self.finish(total, cancelled).await
    }

    /// Process the file at `index` and advance.
    async fn process_one(
        &self,
        index: usize,
        total: usize,
        input: InputFile,
        cancel: &CancellationToken,
    ) {
        self.set_status(BatchStatus::Processing { index });
        self.emit(&BatchEvent::FileStarted {
            index,
            total,
            path: input.path.clone(),
        });
        info!(
            path = %input.path.display(),
            kind = %input.kind,
            "Processing {} of {}",
            index + 1,
            total
        );
        self.log_line(&format!("Processing file: {}", input.path.display()))
            .await;

        let outcome = match self.processor.process(&input, cancel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(path = %input.path.display(), "Failed to process file: {err:#}");
                let output_path = input
                    .output_path(self.processor.output_dir())
                    .unwrap_or_default();
                FileOutcome::failed(input, output_path, format!("{err:#}"))
            }
        };

        let path = outcome.input.path.display().to_string();
        match outcome.status {
            OutcomeStatus::Ok => {
                self.log_line(&format!("Finished processing: {path}")).await;
            }
            OutcomeStatus::Incomplete | OutcomeStatus::Failed => {
                let status = if outcome.status == OutcomeStatus::Failed {
                    "Failed"
                } else {
                    "Incomplete"
                };
                warn!(%path, errors = ?outcome.errors, "{status}");
                self.log_line(&format!(
                    "{status}: {path}: {}",
                    outcome.errors.join("; ")
                ))
                .await;
            }
        }

        // Advance.
        let current = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.outcomes.push(outcome.clone());
            state.index = index + 1;
            state.status = BatchStatus::Running;
            state.index
        };
        self.emit(&BatchEvent::FileFinished { index, outcome });
        self.emit(&BatchEvent::Progress { current, total });
    }

    /// Wrap up the batch and return to [`BatchStatus::Idle`].
    async fn finish(&self, total: usize, cancelled: bool) -> Result<BatchSummary> {
        let summary = {
            let state = self.state.lock().expect("lock poisoned");
            BatchSummary {
                total,
                processed: state.outcomes.len(),
                failed: state
                    .outcomes
                    .iter()
                    .filter(|o| o.status == OutcomeStatus::Failed)
                    .count(),
                cancelled,
            }
        };

        if cancelled {
            warn!(processed = summary.processed, total, "Batch cancelled");
            self.log_line(&format!(
                "Batch cancelled after {} of {} files.",
                summary.processed, total
            ))
            .await;
        } else {
            info!(total, failed = summary.failed, "All files processed");
            self.log_line("All files have been processed.").await;
        }

        let close_result = self.log.lock().await.close().await;
        self.set_status(BatchStatus::Idle);
        self.emit(&BatchEvent::Completed(summary));
        close_result.context("Failed to close processing log")?;
        Ok(summary)
    }

    fn set_status(&self, status: BatchStatus) {
        self.state.lock().expect("lock poisoned").status = status;
    }

    /// Send an event to every observer.
    fn emit(&self, event: &BatchEvent) {
        let observers = self.observers.lock().expect("lock poisoned").clone();
        for observer in observers {
            observer.on_event(event);
        }
    }

    /// Write a status line. Log failures are reported but never stop a batch.
    async fn log_line(&self, line: &str) {
        if let Err(err) = self.log.lock().await.write_line(line).await {
            warn!("Could not write to processing log: {err:#}");
        }
    }
}
