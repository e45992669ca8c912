//! Artwork Downloader Library
//!
//! Crawls list pages of an artwork platform, filters the works they list,
//! and batch downloads the files behind them.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Run settings and their JSON file form
//! - [`model`] - List items, candidates, and downloadable files
//! - [`filter`] - Composable admit/reject predicates
//! - [`crawl`] - Concurrent list-page crawler and page planning
//! - [`download`] - Per-file state machine, retry classifier, and engine
//! - [`events`] - Event and progress seams observed by the front end
//! - [`session`] - Stop flag, pause gate, and batch ids
//! - [`orchestrator`] - Crawl, resolve, download, retry, and resume
//! - [`api`] - JSON list and detail endpoints over reqwest

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod crawl;
pub mod download;
pub mod events;
pub mod filter;
pub mod model;
pub mod orchestrator;
pub mod session;
mod user_agent;

// Re-export commonly used types
pub use api::JsonApi;
pub use config::{DownloadSettings, load_settings};
pub use crawl::{CrawlQuery, ListCrawler, ListPageFetcher, PagePlan, plan_pages};
pub use download::{
    DownloadEngine, DownloadStats, DownloadTask, RetryVerdict, TaskContext, TaskOutcome,
    TaskSettings, classify_terminal,
};
pub use events::{EventSink, PipelineEvent, ProgressReporter, SkipReason};
pub use filter::FilterGate;
pub use orchestrator::{Orchestrator, RunReport, WorkResolver};
pub use session::Session;
