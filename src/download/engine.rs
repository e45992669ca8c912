//! Download engine running [`DownloadTask`]s with bounded concurrency.
//!
//! # Concurrency Model
//!
//! - Each file runs in its own Tokio task
//! - A semaphore permit is acquired before starting each task
//! - Each running task borrows one progress slot; slots and permits are
//!   released when the task finishes (RAII)
//! - The claim loop stops handing out files as soon as the session stops;
//!   unclaimed files are reported back as interrupted
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use artwork_downloader::download::{DirectorySink, DownloadEngine, HttpFileFetcher, TaskContext, TaskSettings};
//! use artwork_downloader::session::Session;
//!
//! # async fn example(files: Vec<artwork_downloader::model::WorkFile>) -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(Session::new());
//! let batch = session.start();
//! let ctx = TaskContext::new(
//!     Arc::new(HttpFileFetcher::new(reqwest::Client::new())),
//!     Arc::new(DirectorySink::new("./downloads")),
//!     session,
//!     TaskSettings::default(),
//! );
//! let engine = DownloadEngine::new(5)?;
//! let report = engine.run(files, &ctx, batch).await?;
//! println!("Completed: {}, Failed: {}", report.stats.completed(), report.stats.failed());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::retry::RetryVerdict;
use super::task::{DownloadTask, TaskContext, TaskOutcome, TaskReport};
use crate::model::WorkFile;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 10;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Statistics from a download batch run.
///
/// Uses atomic counters for thread-safe updates from concurrent tasks.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of files handed to the sink.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of skipped files (filters, permanent statuses, stops).
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of files that exhausted their retries.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of failed attempts that were retried or escalated.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of files that reached a terminal state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.skipped() + self.failed()
    }

    fn record(&self, report: &TaskReport) {
        let counter = match report.outcome {
            TaskOutcome::Completed { .. } => &self.completed,
            TaskOutcome::Skipped(_) => &self.skipped,
            TaskOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        let retries = usize::try_from(report.retries).unwrap_or(usize::MAX);
        self.retried.fetch_add(retries, Ordering::SeqCst);
    }
}

/// Everything a batch run produced besides the saved files.
#[derive(Debug, Default)]
pub struct EngineReport {
    /// Counters.
    pub stats: DownloadStats,
    /// Files that ended in `RetryEscalate`, eligible for a bulk re-attempt.
    pub failed: Vec<WorkFile>,
    /// Files cut short by a stop or pause, or never started.
    pub interrupted: Vec<WorkFile>,
}

/// Pool of progress-bar slots. Each running task holds one.
#[derive(Debug)]
struct SlotPool {
    free: Mutex<Vec<usize>>,
}

impl SlotPool {
    fn new(count: usize) -> Self {
        Self {
            free: Mutex::new((0..count).rev().collect()),
        }
    }

    fn acquire(self: &Arc<Self>) -> SlotGuard {
        let slot = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or(0);
        SlotGuard {
            pool: Arc::clone(self),
            slot,
        }
    }
}

struct SlotGuard {
    pool: Arc<SlotPool>,
    slot: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.slot);
    }
}

/// Download engine for concurrent file downloads.
#[derive(Debug)]
pub struct DownloadEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    slots: Arc<SlotPool>,
}

impl DownloadEngine {
    /// Creates an engine running at most `concurrency` tasks at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-10).
    #[instrument(level = "debug")]
    pub fn new(concurrency: usize) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(concurrency, "creating download engine");

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            slots: Arc::new(SlotPool::new(concurrency)),
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every file to a terminal state and returns the batch report.
    ///
    /// Individual failures never fail the run; they are counted and listed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip(self, files, ctx), fields(files = files.len()))]
    pub async fn run(
        &self,
        files: Vec<WorkFile>,
        ctx: &TaskContext,
        batch_id: u64,
    ) -> Result<EngineReport, EngineError> {
        let stats = Arc::new(DownloadStats::new());
        let mut handles = Vec::new();
        let mut interrupted = Vec::new();

        info!(batch = batch_id, "starting download batch");

        let mut pending = files.into_iter();
        while let Some(file) = pending.next() {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            if !ctx.session.is_downloading() {
                debug!("session stopped, no more files will be claimed");
                interrupted.push(file);
                interrupted.extend(pending);
                break;
            }

            let slot = self.slots.acquire();
            let ctx = ctx.clone();
            let stats = Arc::clone(&stats);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let report = DownloadTask::new(file, batch_id, slot.slot).run(&ctx).await;
                stats.record(&report);
                report
            }));
        }

        debug!(task_count = handles.len(), "waiting for downloads to complete");

        let mut failed = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(report) => match report.outcome {
                    TaskOutcome::Failed {
                        verdict: RetryVerdict::RetryEscalate,
                        ..
                    } => failed.push(report.file),
                    TaskOutcome::Failed {
                        verdict: RetryVerdict::PauseAll,
                        ..
                    } => interrupted.push(report.file),
                    ref outcome if outcome.is_aborted() => interrupted.push(report.file),
                    _ => {}
                },
                // Task panics are logged but don't fail the batch.
                Err(e) => warn!(error = %e, "download task panicked"),
            }
        }

        info!(
            completed = stats.completed(),
            skipped = stats.skipped(),
            failed = stats.failed(),
            retried = stats.retried(),
            interrupted = interrupted.len(),
            "download batch complete"
        );

        let stats = Arc::try_unwrap(stats).unwrap_or_else(|shared| {
            let copy = DownloadStats::new();
            copy.completed.store(shared.completed(), Ordering::SeqCst);
            copy.skipped.store(shared.skipped(), Ordering::SeqCst);
            copy.failed.store(shared.failed(), Ordering::SeqCst);
            copy.retried.store(shared.retried(), Ordering::SeqCst);
            copy
        });

        Ok(EngineReport {
            stats,
            failed,
            interrupted,
        })
    }
}
