//! Per-file download state machine.
//!
//! ```text
//! Pending -> Checking -> Fetching <-> Retrying
//!                            |
//!                            v
//!                      Postprocessing -> Completed
//!
//! any state -> Skipped | Failed
//! ```
//!
//! A task runs to exactly one terminal state. Along the way it emits at most
//! one terminal event (skip, error, or pause) and hands at most one file to
//! the sink. Every await is raced against the session's stop flag; a stopped
//! task ends as `Skipped(Aborted)` and emits nothing.
//!
//! Retries loop inside [`DownloadTask::run`] rather than re-entering it, so
//! the retry budget is the only thing bounding the attempt count.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use super::dedup::{Deduplicator, Fingerprint};
use super::dimensions::{DimensionFetcher, UnknownDimensions};
use super::error::{TranscodeError, TransportError};
use super::filename::{build_file_name, file_extension};
use super::postprocess::{FrameTranscoder, Transcoder, render_novel};
use super::retry::{
    RetryVerdict, RetryWindow, STATUS_NO_RESPONSE, classify_terminal, is_permanent_status,
};
use super::sink::{SavedFile, Sink};
use super::transfer::{FileFetcher, STATUS_OK, TransferResponse};
use crate::config::{DimensionFetchPolicy, DownloadSettings, ImageSize, UgoiraFormat};
use crate::events::{
    EventSink, NoProgress, NullEvents, PipelineEvent, ProgressReporter, ProgressUpdate, SkipReason,
};
use crate::filter::{ContentProbe, FilterGate, ImageContentProbe, ItemMetadata};
use crate::model::{WorkFile, WorkKind};
use crate::session::Session;

/// Lifecycle state of a [`DownloadTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not started.
    Pending,
    /// Running duplicate, kind, and dimension checks.
    Checking,
    /// Transfer in flight.
    Fetching,
    /// Last attempt failed; about to try again.
    Retrying,
    /// Converting and running late filters.
    Postprocessing,
    /// Handed to the sink.
    Completed,
    /// Skipped by a filter, a permanent status, or a stop.
    Skipped,
    /// Gave up after the retry budget.
    Failed,
}

impl TaskState {
    /// Whether no further transitions can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The file was handed to the sink.
    Completed {
        /// Relative file name given to the sink.
        file_name: String,
        /// Final byte count.
        bytes: u64,
    },
    /// The file was skipped.
    Skipped(SkipReason),
    /// The retry budget ran out.
    Failed {
        /// Last status observed.
        status: u16,
        /// Terminal classification (`RetryEscalate` or `PauseAll`).
        verdict: RetryVerdict,
    },
}

impl TaskOutcome {
    /// Terminal state matching this outcome.
    #[must_use]
    pub fn state(&self) -> TaskState {
        match self {
            Self::Completed { .. } => TaskState::Completed,
            Self::Skipped(_) => TaskState::Skipped,
            Self::Failed { .. } => TaskState::Failed,
        }
    }

    /// Whether the task was cut short by a stop.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Skipped(SkipReason::Aborted))
    }
}

/// Configuration a task reads.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    /// Attempts before the terminal decision.
    pub max_retry: u32,
    /// Preferred size variant.
    pub image_size: ImageSize,
    /// Target container for animated works.
    pub ugoira_format: UgoiraFormat,
    /// Whether animated works are downloaded at all.
    pub download_animated: bool,
    /// Whether the width/height or ratio filter runs.
    pub width_height_filter_active: bool,
    /// Whether the byte-size filter runs.
    pub size_filter_active: bool,
    /// Whether the color filter runs.
    pub color_filter_active: bool,
    /// What an unreadable dimension means.
    pub dimension_fetch_policy: DimensionFetchPolicy,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self::from(&DownloadSettings::default())
    }
}

impl From<&DownloadSettings> for TaskSettings {
    fn from(settings: &DownloadSettings) -> Self {
        Self {
            max_retry: settings.max_retry,
            image_size: settings.image_size,
            ugoira_format: settings.ugoira_format,
            download_animated: settings.download_animated,
            width_height_filter_active: settings.filters.width_height_active(),
            size_filter_active: settings.filters.size_active(),
            color_filter_active: settings.filters.color_active(),
            dimension_fetch_policy: settings.dimension_fetch_policy,
        }
    }
}

/// Collaborators and shared state handed to every task.
#[derive(Clone)]
pub struct TaskContext {
    /// Opens transfers.
    pub fetcher: Arc<dyn FileFetcher>,
    /// Looks up dimensions for the width/height filter.
    pub dimensions: Arc<dyn DimensionFetcher>,
    /// Converts animated works.
    pub transcoder: Arc<dyn Transcoder>,
    /// Samples colors for the color filter.
    pub probe: Arc<dyn ContentProbe>,
    /// Receives finished files.
    pub sink: Arc<dyn Sink>,
    /// Receives terminal events.
    pub events: Arc<dyn EventSink>,
    /// Receives per-slot progress.
    pub progress: Arc<dyn ProgressReporter>,
    /// Shared duplicate store.
    pub dedup: Arc<Deduplicator>,
    /// Filters evaluated at download time.
    pub gate: Arc<FilterGate>,
    /// Stop flag and pause gate.
    pub session: Arc<Session>,
    /// Task configuration.
    pub settings: TaskSettings,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("gate", &self.gate)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// Creates a context with no-op progress and events, no dimension
    /// lookup, and the `image`-backed color sampler and frame transcoder.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn FileFetcher>,
        sink: Arc<dyn Sink>,
        session: Arc<Session>,
        settings: TaskSettings,
    ) -> Self {
        Self {
            fetcher,
            dimensions: Arc::new(UnknownDimensions),
            transcoder: Arc::new(FrameTranscoder),
            probe: Arc::new(ImageContentProbe),
            sink,
            events: Arc::new(NullEvents),
            progress: Arc::new(NoProgress),
            dedup: Arc::new(Deduplicator::new()),
            gate: Arc::new(FilterGate::new()),
            session,
            settings,
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the progress reporter.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the dimension fetcher.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: Arc<dyn DimensionFetcher>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Replaces the transcoder.
    #[must_use]
    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Replaces the content probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ContentProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the duplicate store.
    #[must_use]
    pub fn with_dedup(mut self, dedup: Arc<Deduplicator>) -> Self {
        self.dedup = dedup;
        self
    }

    /// Replaces the filter gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<FilterGate>) -> Self {
        self.gate = gate;
        self
    }
}

/// What a finished task reports to its owner.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// The file the task worked on.
    pub file: WorkFile,
    /// How it ended.
    pub outcome: TaskOutcome,
    /// Failed attempts (transfer or conversion).
    pub retries: u32,
    /// Every state entered, in order.
    pub states: Vec<TaskState>,
}

/// Result of one fetch attempt.
enum Attempt {
    Body(Vec<u8>),
    Failed { status: u16, started: Instant },
    Terminal(TaskOutcome),
}

/// One file moving through the download pipeline.
#[derive(Debug)]
pub struct DownloadTask {
    file: WorkFile,
    id: String,
    batch_id: u64,
    slot: usize,
    state: TaskState,
    retry_count: u32,
    window: RetryWindow,
    size_checked: bool,
    states: Vec<TaskState>,
}

impl DownloadTask {
    /// Creates a pending task for `file` bound to a progress slot.
    #[must_use]
    pub fn new(file: WorkFile, batch_id: u64, slot: usize) -> Self {
        let id = file.file_id();
        Self {
            file,
            id,
            batch_id,
            slot,
            state: TaskState::Pending,
            retry_count: 0,
            window: RetryWindow::default(),
            size_checked: false,
            states: vec![TaskState::Pending],
        }
    }

    /// File identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Drives the task to a terminal state.
    #[instrument(skip(self, ctx), fields(id = %self.id, slot = self.slot, batch = self.batch_id))]
    pub async fn run(mut self, ctx: &TaskContext) -> TaskReport {
        let outcome = self.drive(ctx).await;
        self.enter(outcome.state());
        debug!(?outcome, retries = self.retry_count, "task finished");
        TaskReport {
            file: self.file,
            outcome,
            retries: self.retry_count,
            states: self.states,
        }
    }

    fn enter(&mut self, state: TaskState) {
        self.state = state;
        self.states.push(state);
    }

    async fn drive(&mut self, ctx: &TaskContext) -> TaskOutcome {
        if !ctx.session.is_downloading() {
            return self.abort("pending");
        }

        self.enter(TaskState::Checking);
        if let Some(outcome) = self.check(ctx).await {
            return outcome;
        }

        let url = self
            .file
            .select_url(ctx.settings.image_size)
            .map(str::to_owned);
        let converting = self.needs_conversion(ctx);
        let target = if converting {
            ctx.settings.ugoira_format
        } else {
            UgoiraFormat::None
        };
        let file_name = build_file_name(
            &self.file,
            &file_extension(&self.file, url.as_deref(), target),
        );

        loop {
            self.enter(TaskState::Fetching);
            match self.fetch(ctx, url.as_deref(), &file_name).await {
                Attempt::Body(bytes) => {
                    ctx.progress.set_error(self.slot, false);
                    self.enter(TaskState::Postprocessing);
                    return self.postprocess(ctx, bytes, converting, file_name).await;
                }
                Attempt::Terminal(outcome) => return outcome,
                Attempt::Failed { status, started } => {
                    if let Some(outcome) = self.register_failure(ctx, status, started) {
                        return outcome;
                    }
                    self.enter(TaskState::Retrying);
                }
            }
        }
    }

    async fn check(&mut self, ctx: &TaskContext) -> Option<TaskOutcome> {
        if ctx.dedup.check(&self.file) {
            return Some(self.skip(ctx, SkipReason::Duplicate));
        }

        let kind = self.file.kind;
        let kind_meta = ItemMetadata {
            kind: Some(kind),
            ..ItemMetadata::default()
        };
        if (kind == WorkKind::Ugoira && !ctx.settings.download_animated)
            || !ctx.gate.admit(&kind_meta)
        {
            return Some(self.skip(ctx, SkipReason::ExcludedType));
        }

        if ctx.settings.width_height_filter_active && !kind.is_synthesized() {
            let dimensions = match self.file.known_dimensions() {
                Some(known) => Some(known),
                None => match self.file.select_url(ImageSize::Original).map(str::to_owned) {
                    Some(url) => {
                        match unless_stopped(&ctx.session, ctx.dimensions.fetch_dimensions(&url))
                            .await
                        {
                            Some(found) => found.filter(|d| !d.is_unknown()),
                            None => return Some(self.abort("checking")),
                        }
                    }
                    None => None,
                },
            };

            match dimensions {
                Some(dimensions) => {
                    if !ctx.gate.admit(&ItemMetadata::with_dimensions(dimensions)) {
                        return Some(self.skip(ctx, SkipReason::WidthHeight));
                    }
                }
                None => {
                    error!(id = %self.id, policy = ?ctx.settings.dimension_fetch_policy, "could not read image dimensions");
                    if ctx.settings.dimension_fetch_policy == DimensionFetchPolicy::Strict {
                        return Some(self.skip(ctx, SkipReason::WidthHeight));
                    }
                }
            }
        }

        None
    }

    fn needs_conversion(&self, ctx: &TaskContext) -> bool {
        // A thumbnail of an animated work is a still image.
        self.file.kind == WorkKind::Ugoira
            && self.file.ugoira.is_some()
            && ctx.settings.ugoira_format.extension().is_some()
            && ctx.settings.image_size != ImageSize::Thumb
    }

    async fn fetch(&mut self, ctx: &TaskContext, url: Option<&str>, name: &str) -> Attempt {
        self.report_progress(ctx, name, 0, 0);
        let started = Instant::now();

        let response = if self.file.kind.is_synthesized() {
            match &self.file.novel {
                Some(meta) => {
                    let text = render_novel(meta);
                    let total = byte_len(&text);
                    TransferResponse::from_chunks(STATUS_OK, Some(total), vec![text])
                }
                None => {
                    let error = TranscodeError::MissingContent {
                        id: self.id.clone(),
                    };
                    return Attempt::Terminal(self.escalate(ctx, STATUS_NO_RESPONSE, &error));
                }
            }
        } else {
            let Some(url) = url else {
                let error = TransportError::MissingSource {
                    id: self.id.clone(),
                };
                return Attempt::Terminal(self.escalate(ctx, STATUS_NO_RESPONSE, &error));
            };
            match unless_stopped(&ctx.session, ctx.fetcher.open(url)).await {
                None => return Attempt::Terminal(self.abort("fetching")),
                Some(Ok(response)) => response,
                Some(Err(e)) => {
                    debug!(id = %self.id, error = %e, "transfer failed without response");
                    return Attempt::Failed {
                        status: e.status(),
                        started,
                    };
                }
            }
        };

        if !response.is_success() {
            return Attempt::Failed {
                status: response.status,
                started,
            };
        }

        let total = response.total;
        let mut body = response.body;
        let mut bytes = Vec::new();
        loop {
            let next = match unless_stopped(&ctx.session, body.next()).await {
                Some(next) => next,
                None => return Attempt::Terminal(self.abort("fetching")),
            };
            match next {
                None => break,
                Some(Ok(chunk)) => {
                    bytes.extend_from_slice(&chunk);
                    if let Some(total) = total
                        && let Some(outcome) = self.check_size_once(ctx, total, name)
                    {
                        // Dropping the body aborts the transfer.
                        return Attempt::Terminal(outcome);
                    }
                    self.report_progress(ctx, name, byte_len(&bytes), total.unwrap_or(0));
                }
                Some(Err(e)) => {
                    debug!(id = %self.id, error = %e, "transfer interrupted");
                    return Attempt::Failed {
                        status: e.status(),
                        started,
                    };
                }
            }
        }

        if let Some(outcome) = self.check_size_once(ctx, byte_len(&bytes), name) {
            return Attempt::Terminal(outcome);
        }
        Attempt::Body(bytes)
    }

    /// Runs the size filter the first time a total is known, never again.
    fn check_size_once(&mut self, ctx: &TaskContext, total: u64, name: &str) -> Option<TaskOutcome> {
        if self.size_checked || !ctx.settings.size_filter_active {
            return None;
        }
        self.size_checked = true;
        if ctx.gate.admit(&ItemMetadata::with_size(total)) {
            return None;
        }
        self.report_progress(ctx, name, 1, 1);
        Some(self.skip(ctx, SkipReason::Size))
    }

    /// Records a failed attempt. Returns the terminal outcome once retrying is over.
    fn register_failure(
        &mut self,
        ctx: &TaskContext,
        status: u16,
        started: Instant,
    ) -> Option<TaskOutcome> {
        self.window.push(started.elapsed());
        self.retry_count += 1;
        ctx.progress.set_error(self.slot, true);

        if is_permanent_status(status) || self.retry_count >= ctx.settings.max_retry {
            return Some(self.terminal(ctx, status));
        }
        info!(id = %self.id, status, retry_count = self.retry_count, "retrying download");
        None
    }

    fn terminal(&mut self, ctx: &TaskContext, status: u16) -> TaskOutcome {
        match classify_terminal(status, &self.window) {
            RetryVerdict::SkipPermanent => {
                error!(id = %self.id, status, "permanent remote error");
                self.skip(ctx, SkipReason::PermanentStatus(status))
            }
            RetryVerdict::PauseAll => {
                error!(id = %self.id, status, "transfer failed without response");
                if ctx.session.try_latch_pause() {
                    error!(
                        "downloads keep failing immediately; local storage may be full or unwritable. \
                         Downloading is paused"
                    );
                    ctx.events.emit(PipelineEvent::RequestPauseDownload);
                }
                TaskOutcome::Failed {
                    status,
                    verdict: RetryVerdict::PauseAll,
                }
            }
            RetryVerdict::RetryEscalate => {
                warn!(id = %self.id, status, retries = self.retry_count, "giving up on file for now");
                ctx.events.emit(PipelineEvent::DownloadError {
                    id: self.id.clone(),
                });
                TaskOutcome::Failed {
                    status,
                    verdict: RetryVerdict::RetryEscalate,
                }
            }
        }
    }

    fn escalate(
        &self,
        ctx: &TaskContext,
        status: u16,
        error: &dyn std::error::Error,
    ) -> TaskOutcome {
        error!(id = %self.id, error = %error, "file cannot be produced");
        ctx.events.emit(PipelineEvent::DownloadError {
            id: self.id.clone(),
        });
        TaskOutcome::Failed {
            status,
            verdict: RetryVerdict::RetryEscalate,
        }
    }

    async fn postprocess(
        &mut self,
        ctx: &TaskContext,
        mut bytes: Vec<u8>,
        converting: bool,
        file_name: String,
    ) -> TaskOutcome {
        if converting && let Some(meta) = self.file.ugoira.clone() {
            let format = ctx.settings.ugoira_format;
            loop {
                let started = Instant::now();
                let converted = unless_stopped(
                    &ctx.session,
                    ctx.transcoder.convert(bytes.clone(), &meta, format),
                )
                .await;
                match converted {
                    None => return self.abort("postprocessing"),
                    Some(Ok(output)) => {
                        bytes = output;
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(id = %self.id, error = %e, "conversion failed");
                        if let Some(outcome) = self.register_failure(ctx, STATUS_OK, started) {
                            return outcome;
                        }
                        self.enter(TaskState::Retrying);
                        self.enter(TaskState::Postprocessing);
                    }
                }
            }
        }

        let content = Fingerprint::of_bytes(&bytes);
        if ctx.dedup.contains(&content) {
            return self.skip(ctx, SkipReason::Duplicate);
        }

        if ctx.settings.color_filter_active && self.file.kind.is_image() {
            match unless_stopped(&ctx.session, ctx.probe.sample_colors(&bytes)).await {
                None => return self.abort("postprocessing"),
                Some(Some(sample)) => {
                    if !ctx.gate.admit(&ItemMetadata::with_color(sample)) {
                        return self.skip(ctx, SkipReason::Color);
                    }
                }
                Some(None) => debug!(id = %self.id, "no color sample, admitting"),
            }
        }

        if !ctx.session.is_downloading() {
            return self.abort("handoff");
        }

        ctx.dedup.record(Fingerprint::of_file(&self.file), &self.id);
        ctx.dedup.record(content, &self.id);

        let size = byte_len(&bytes);
        ctx.sink
            .save(SavedFile {
                bytes,
                file_name: file_name.clone(),
                id: self.id.clone(),
                batch_id: self.batch_id,
            })
            .await;
        info!(id = %self.id, name = %file_name, bytes = size, "download completed");

        TaskOutcome::Completed {
            file_name,
            bytes: size,
        }
    }

    fn skip(&self, ctx: &TaskContext, reason: SkipReason) -> TaskOutcome {
        if !matches!(reason, SkipReason::PermanentStatus(_)) {
            warn!(id = %self.id, %reason, "skipping download");
        }
        if ctx.session.is_downloading() {
            ctx.events.emit(PipelineEvent::SkipDownload {
                id: self.id.clone(),
                reason,
            });
        }
        TaskOutcome::Skipped(reason)
    }

    fn abort(&self, at: &'static str) -> TaskOutcome {
        debug!(id = %self.id, at, "download stopped, aborting task");
        TaskOutcome::Skipped(SkipReason::Aborted)
    }

    fn report_progress(&self, ctx: &TaskContext, name: &str, loaded: u64, total: u64) {
        ctx.progress.set_progress(
            self.slot,
            ProgressUpdate {
                name: name.to_string(),
                loaded,
                total,
            },
        );
    }
}

/// Awaits `future` unless the session stops first.
async fn unless_stopped<F: Future>(session: &Session, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = session.stopped() => None,
        output = future => Some(output),
    }
}

fn byte_len(bytes: &[u8]) -> u64 {
    u64::try_from(bytes.len()).unwrap_or(u64::MAX)
}
