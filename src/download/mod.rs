//! Per-file download pipeline.
//!
//! Each [`WorkFile`](crate::model::WorkFile) becomes a [`DownloadTask`]: it
//! is checked against the duplicate store and the early filters, fetched
//! with retries, converted if needed, run through the late filters, and
//! handed to a [`Sink`]. The [`DownloadEngine`] runs tasks with bounded
//! concurrency.
//!
//! # Features
//!
//! - Streaming transfers with per-slot progress and no read timeout
//! - Retry budget with a terminal skip / pause / escalate decision
//! - Metadata and content fingerprints for duplicate detection
//! - Size filter on the first progress event, color filter before handoff
//! - Cooperative stop at every await point

mod client;
mod constants;
mod dedup;
mod dimensions;
mod engine;
mod error;
mod filename;
mod postprocess;
mod retry;
mod sink;
mod task;
mod transfer;

pub use client::{ClientOptions, build_client};
pub use constants::{API_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS};
pub use dedup::{Deduplicator, Fingerprint};
pub use dimensions::{DimensionFetcher, HttpDimensionFetcher, UnknownDimensions, sniff_dimensions};
pub use engine::{DownloadEngine, DownloadStats, EngineError, EngineReport};
pub use error::{SinkError, TranscodeError, TransportError};
pub use filename::{build_file_name, file_extension};
pub use postprocess::{FrameTranscoder, Transcoder, render_novel};
pub use retry::{
    PAUSE_SHORT_DENOMINATOR, PAUSE_SHORT_NUMERATOR, RETRY_WINDOW_CAPACITY, RetryVerdict,
    RetryWindow, SHORT_INTERVAL_THRESHOLD, STATUS_NO_RESPONSE, classify_terminal,
    is_permanent_status,
};
pub use sink::{DirectorySink, SavedFile, Sink};
pub use task::{DownloadTask, TaskContext, TaskOutcome, TaskReport, TaskSettings, TaskState};
pub use transfer::{FileFetcher, HttpFileFetcher, STATUS_OK, TransferResponse};
