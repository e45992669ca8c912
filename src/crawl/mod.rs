//! List-page crawling.
//!
//! A crawl walks a fixed range of list pages with a small pool of fetch
//! loops, runs each entry through the list-time [`FilterGate`](crate::filter::FilterGate),
//! and collects admitted candidates in page order. The range itself comes
//! from [`plan_pages`], computed from the total advertised by the first page.

mod crawler;
mod plan;

pub use crawler::{CrawlSummary, ListCrawler};
pub use plan::{PagePlan, plan_pages};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ListPageResult;

/// Errors raised while fetching or decoding a list page.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Network-level error talking to the list endpoint.
    #[error("network error fetching list page {page}: {source}")]
    Network {
        /// Page being fetched.
        page: u32,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status.
    #[error("list page {page} returned HTTP {status}")]
    Status {
        /// Page being fetched.
        page: u32,
        /// HTTP status code.
        status: u16,
    },

    /// The body was not a valid list page.
    #[error("failed to decode list page {page}: {message}")]
    Decode {
        /// Page being fetched.
        page: u32,
        /// Decoder message.
        message: String,
    },

    /// The query could not be turned into a request URL.
    #[error("invalid list query for source {source_name}: {reason}")]
    InvalidQuery {
        /// Query source.
        source_name: String,
        /// What was wrong.
        reason: String,
    },

    /// The crawl was interrupted before every page finished.
    #[error("crawl interrupted after {finished} of {needed} pages")]
    Interrupted {
        /// Pages fully processed.
        finished: u32,
        /// Pages the crawl was planned for.
        needed: u32,
    },
}

impl CrawlError {
    /// Creates a network error for `page`.
    pub fn network(page: u32, source: reqwest::Error) -> Self {
        Self::Network { page, source }
    }

    /// Creates a decode error for `page`.
    pub fn decode(page: u32, message: impl Into<String>) -> Self {
        Self::Decode {
            page,
            message: message.into(),
        }
    }
}

/// What list to crawl: a source path plus query parameters.
///
/// The crawler never looks inside; it is handed back to the
/// [`ListPageFetcher`] with each page number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlQuery {
    /// List source, e.g. `search/illustrations` or `users/11/works`.
    pub source: String,
    /// Extra query parameters in order.
    pub params: Vec<(String, String)>,
}

impl CrawlQuery {
    /// Creates a query with no parameters.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            params: Vec::new(),
        }
    }

    /// Adds a query parameter, builder style.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// Fetches one page of a list.
#[async_trait]
pub trait ListPageFetcher: Send + Sync {
    /// Returns the items of `page` (1-based) and the advertised total.
    async fn fetch_list_page(
        &self,
        query: &CrawlQuery,
        page: u32,
    ) -> Result<ListPageResult, CrawlError>;
}
