//! Ties the crawl and download pipelines together.
//!
//! A run crawls the list, resolves each candidate to its files, and feeds
//! them to the [`DownloadEngine`] as one batch. The orchestrator keeps the
//! files that ended unresolved (`RetryEscalate`) for [`Orchestrator::retry_failed`]
//! and the files cut short by a stop or pause for [`Orchestrator::resume`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::DEFAULT_MAX_THREADS;
use crate::crawl::{CrawlError, CrawlQuery, CrawlSummary, ListCrawler};
use crate::download::{DownloadEngine, DownloadStats, EngineError, TaskContext};
use crate::model::{CandidateItem, WorkFile};
use crate::session::Session;

/// Errors raised while looking up the files of a work.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Network-level error talking to the detail endpoint.
    #[error("network error resolving work {id}: {source}")]
    Network {
        /// Work identifier.
        id: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status.
    #[error("work {id} lookup returned HTTP {status}")]
    Status {
        /// Work identifier.
        id: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body was not valid work detail.
    #[error("failed to decode work {id}: {message}")]
    Decode {
        /// Work identifier.
        id: String,
        /// Decoder message.
        message: String,
    },
}

impl ResolveError {
    /// Creates a network error.
    pub fn network(id: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            id: id.into(),
            source,
        }
    }

    /// Creates a decode error.
    pub fn decode(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Turns an admitted candidate into the files to download.
#[async_trait]
pub trait WorkResolver: Send + Sync {
    /// Returns one [`WorkFile`] per page of the work.
    async fn resolve(&self, candidate: &CandidateItem) -> Result<Vec<WorkFile>, ResolveError>;
}

/// Errors that end a run early.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The list crawl failed or was interrupted.
    #[error(transparent)]
    Crawl(#[from] CrawlError),

    /// The download engine could not run the batch.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Outcome of one run, retry sweep, or resume.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Batch the downloads ran under, 0 when nothing was downloaded.
    pub batch_id: u64,
    /// Crawl result; `None` for retry sweeps and resumes.
    pub crawl: Option<CrawlSummary>,
    /// Files handed to the engine.
    pub files: usize,
    /// Candidates whose detail lookup failed.
    pub resolve_failures: usize,
    /// Engine counters.
    pub stats: DownloadStats,
    /// Files kept for a retry sweep.
    pub failed: usize,
    /// Files kept for a resume.
    pub interrupted: usize,
    /// Whether the batch ended in a pause.
    pub paused: bool,
}

impl RunReport {
    /// Whether anything needs the user's attention.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.paused || self.resolve_failures > 0
    }
}

/// Runs crawls and download batches against one session.
pub struct Orchestrator {
    crawler: ListCrawler,
    resolver: Arc<dyn WorkResolver>,
    engine: DownloadEngine,
    ctx: TaskContext,
    interrupt: Arc<AtomicBool>,
    resolve_threads: usize,
    failed: Mutex<Vec<WorkFile>>,
    interrupted: Mutex<Vec<WorkFile>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("crawler", &self.crawler)
            .field("engine", &self.engine)
            .field("resolve_threads", &self.resolve_threads)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wires the pipelines. The crawler's interrupt flag and the context's
    /// session are what [`Orchestrator::stop`] flips.
    #[must_use]
    pub fn new(
        crawler: ListCrawler,
        resolver: Arc<dyn WorkResolver>,
        engine: DownloadEngine,
        ctx: TaskContext,
    ) -> Self {
        let interrupt = crawler.interrupt_handle();
        Self {
            crawler,
            resolver,
            engine,
            ctx,
            interrupt,
            resolve_threads: DEFAULT_MAX_THREADS,
            failed: Mutex::new(Vec::new()),
            interrupted: Mutex::new(Vec::new()),
        }
    }

    /// Sets how many detail lookups run at once (at least one).
    #[must_use]
    pub fn with_resolve_threads(mut self, threads: usize) -> Self {
        self.resolve_threads = threads.max(1);
        self
    }

    /// The shared session.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.ctx.session
    }

    /// Stops the crawl and every in-flight download.
    ///
    /// The stop holds until the next [`Orchestrator::run`] or
    /// [`Orchestrator::resume`]: a retry sweep started after it downloads
    /// nothing and parks its files as interrupted.
    pub fn stop(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.ctx.session.stop();
    }

    /// Whether [`Orchestrator::stop`] was called since the last run or resume.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Files waiting for [`Orchestrator::retry_failed`].
    #[must_use]
    pub fn failed_files(&self) -> Vec<WorkFile> {
        lock(&self.failed).clone()
    }

    /// Files waiting for [`Orchestrator::resume`].
    #[must_use]
    pub fn interrupted_files(&self) -> Vec<WorkFile> {
        lock(&self.interrupted).clone()
    }

    /// Crawls the list, resolves candidates, and downloads their files.
    ///
    /// Files kept from an earlier run are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Crawl`] when the list cannot be crawled,
    /// and [`OrchestratorError::Engine`] when the batch cannot start.
    #[instrument(skip(self, query), fields(source = %query.source))]
    pub async fn run(
        &self,
        query: &CrawlQuery,
        start_page: u32,
        requested: Option<u32>,
    ) -> Result<RunReport, OrchestratorError> {
        self.interrupt.store(false, Ordering::SeqCst);
        lock(&self.failed).clear();
        lock(&self.interrupted).clear();

        let crawl = self.crawler.crawl_from(query, start_page, requested).await?;
        if crawl.candidates.is_empty() {
            info!("no candidates to download");
            return Ok(RunReport {
                crawl: Some(crawl),
                ..RunReport::default()
            });
        }

        let (files, resolve_failures) = self.resolve(&crawl.candidates).await;
        if self.interrupt.load(Ordering::SeqCst) {
            info!(resolved = files.len(), "stopped before downloading");
            lock(&self.interrupted).extend(files);
            return Ok(RunReport {
                crawl: Some(crawl),
                resolve_failures,
                interrupted: self.interrupted_files().len(),
                ..RunReport::default()
            });
        }

        let mut report = self.download(files).await?;
        report.crawl = Some(crawl);
        report.resolve_failures = resolve_failures;
        Ok(report)
    }

    /// Re-queues every file that ended unresolved, once, under a new batch.
    ///
    /// After a stop the files move to the interrupted list untouched.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Engine`] when the batch cannot start.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self) -> Result<RunReport, OrchestratorError> {
        let files = std::mem::take(&mut *lock(&self.failed));
        info!(files = files.len(), "retrying failed downloads");
        self.download(files).await
    }

    /// Re-queues every file a stop or pause cut short.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Engine`] when the batch cannot start.
    #[instrument(skip(self))]
    pub async fn resume(&self) -> Result<RunReport, OrchestratorError> {
        let files = std::mem::take(&mut *lock(&self.interrupted));
        info!(files = files.len(), "resuming interrupted downloads");
        self.interrupt.store(false, Ordering::SeqCst);
        self.download(files).await
    }

    async fn resolve(&self, candidates: &[CandidateItem]) -> (Vec<WorkFile>, usize) {
        let results: Vec<Option<Result<Vec<WorkFile>, ResolveError>>> = stream::iter(candidates)
            .map(|candidate| async move {
                if self.interrupt.load(Ordering::SeqCst) {
                    return None;
                }
                Some(self.resolver.resolve(candidate).await)
            })
            .buffered(self.resolve_threads)
            .collect()
            .await;

        let mut files = Vec::new();
        let mut failures = 0;
        for (candidate, result) in candidates.iter().zip(results) {
            match result {
                Some(Ok(resolved)) => files.extend(resolved),
                Some(Err(e)) => {
                    failures += 1;
                    warn!(id = %candidate.id, error = %e, "failed to resolve work");
                }
                None => {}
            }
        }
        debug!(
            candidates = candidates.len(),
            files = files.len(),
            failures,
            "resolved candidates"
        );
        (files, failures)
    }

    async fn download(&self, files: Vec<WorkFile>) -> Result<RunReport, OrchestratorError> {
        if files.is_empty() {
            return Ok(RunReport::default());
        }

        let count = files.len();
        if self.is_stopped() {
            info!(files = count, "stopped; parking files as interrupted");
            lock(&self.interrupted).extend(files);
            return Ok(RunReport {
                files: count,
                interrupted: count,
                ..RunReport::default()
            });
        }

        let batch_id = self.ctx.session.start();
        // A stop landing between the check above and start() must still win.
        if self.is_stopped() {
            self.ctx.session.stop();
        }
        let outcome = self.engine.run(files, &self.ctx, batch_id).await?;
        let paused = self.ctx.session.is_paused();
        self.ctx.session.stop();

        if paused {
            warn!(batch = batch_id, "downloads paused; resume once the cause is fixed");
        }

        let failed = outcome.failed.len();
        let interrupted = outcome.interrupted.len();
        lock(&self.failed).extend(outcome.failed);
        lock(&self.interrupted).extend(outcome.interrupted);

        Ok(RunReport {
            batch_id,
            crawl: None,
            files: count,
            resolve_failures: 0,
            stats: outcome.stats,
            failed,
            interrupted,
            paused,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
