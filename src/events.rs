//! Observable side effects of the crawl and download pipelines.
//!
//! Each emission is a [`PipelineEvent`] value delivered to an [`EventSink`].
//! Emissions are fire-and-forget: a sink must not block, and a listener that
//! has gone away is not an error. Per-slot progress goes through the separate
//! [`ProgressReporter`] seam because it is high-frequency and lossy.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::trace;

/// Why a file was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Equivalent content was already saved.
    Duplicate,
    /// The work kind is excluded by current settings.
    ExcludedType,
    /// Width, height, or aspect ratio rejected.
    WidthHeight,
    /// Byte size rejected.
    Size,
    /// Color sample rejected.
    Color,
    /// The remote answered with a status that will never succeed (404, 500).
    PermanentStatus(u16),
    /// The run was stopped while the file was in flight. Never emitted.
    Aborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => f.write_str("duplicate"),
            Self::ExcludedType => f.write_str("excludedType"),
            Self::WidthHeight => f.write_str("widthHeight"),
            Self::Size => f.write_str("size"),
            Self::Color => f.write_str("color"),
            Self::PermanentStatus(status) => write!(f, "{status}"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// A pipeline emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A file exhausted its retries with an unresolved error.
    DownloadError {
        /// File identifier.
        id: String,
    },
    /// A file was skipped.
    SkipDownload {
        /// File identifier.
        id: String,
        /// Why it was skipped.
        reason: SkipReason,
    },
    /// The whole download subsystem should pause.
    RequestPauseDownload,
    /// The list crawl finished.
    CrawlFinish,
    /// The list crawl produced no candidates.
    CrawlEmpty,
}

/// Receiver of pipeline emissions.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Must not block.
    fn emit(&self, event: PipelineEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEvents;

impl EventSink for NullEvents {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Sink forwarding events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: UnboundedSender<PipelineEvent>,
}

impl ChannelEvents {
    /// Creates a sink and the receiver that drains it.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEvents {
    fn emit(&self, event: PipelineEvent) {
        if let Err(error) = self.tx.send(event) {
            trace!(event = ?error.0, "event listener dropped");
        }
    }
}

/// Fan-out to any number of independent listeners.
#[derive(Default)]
pub struct Listeners {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Listeners {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn register(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.sinks.len())
            .finish()
    }
}

impl EventSink for Listeners {
    fn emit(&self, event: PipelineEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Progress of one transfer slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// File name shown for the slot.
    pub name: String,
    /// Bytes received so far.
    pub loaded: u64,
    /// Total bytes, 0 when unknown.
    pub total: u64,
}

/// Receiver of per-slot transfer progress.
pub trait ProgressReporter: Send + Sync {
    /// Replaces the progress of `slot`.
    fn set_progress(&self, slot: usize, update: ProgressUpdate);

    /// Flags the slot as erroring (retrying) or healthy.
    fn set_error(&self, _slot: usize, _erroring: bool) {}
}

/// Reporter that ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn set_progress(&self, _slot: usize, _update: ProgressUpdate) {}
}
