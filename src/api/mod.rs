//! JSON list and detail endpoints.
//!
//! Both endpoints wrap their payload in an envelope:
//!
//! ```json
//! { "error": false, "message": "", "body": { ... } }
//! ```
//!
//! - `GET {base}/{source}?{params}&p={page}` returns a list page:
//!   `{ "total": 120, "works": [ { "id": "1", "kind": "illustration", ... } ] }`
//! - `GET {base}/works/{id}` returns the detail of one work, with one entry
//!   in `pages` per file. Single-file works may carry `urls` instead.
//!
//! Do not log the cookie; request logs carry ids and page numbers only.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ImageSize;
use crate::crawl::{CrawlError, CrawlQuery, ListPageFetcher};
use crate::download::{API_TIMEOUT_SECS, ClientOptions, build_client};
use crate::model::{
    CandidateItem, Dimensions, ListPageResult, NovelMeta, RawItem, UgoiraMeta, WorkFile, WorkKind,
};
use crate::orchestrator::{ResolveError, WorkResolver};

/// Query parameter carrying the page number.
const PAGE_PARAM: &str = "p";

/// Errors raised while setting up the API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The base URL cannot carry a path.
    #[error("API base URL cannot be used as a base: {url}")]
    InvalidBase {
        /// The offending URL.
        url: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: String,
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListBody {
    total: u64,
    #[serde(default)]
    works: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    urls: HashMap<ImageSize, String>,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
struct WorkBody {
    id: String,
    kind: WorkKind,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    urls: HashMap<ImageSize, String>,
    #[serde(default)]
    pages: Vec<PageBody>,
    ugoira: Option<UgoiraMeta>,
    novel: Option<NovelMeta>,
}

impl WorkBody {
    fn into_files(self) -> Vec<WorkFile> {
        let dimensions = Some(Dimensions::new(self.width, self.height));
        let template = WorkFile {
            work_id: self.id,
            index: 0,
            kind: self.kind,
            user_id: self.user_id,
            source_variants: self.urls,
            full_dimensions: dimensions,
            ugoira: self.ugoira,
            novel: self.novel,
        };

        if self.pages.is_empty() || template.kind.is_synthesized() {
            return vec![template];
        }

        self.pages
            .into_iter()
            .zip(0u32..)
            .map(|(page, index)| {
                let full_dimensions = if index == 0 && page.width == 0 {
                    template.full_dimensions
                } else {
                    Some(Dimensions::new(page.width, page.height))
                };
                WorkFile {
                    index,
                    source_variants: page.urls,
                    full_dimensions,
                    ..template.clone()
                }
            })
            .collect()
    }
}

/// Why a request failed, before it is mapped onto the caller's error type.
#[derive(Debug)]
enum RequestFailure {
    Network(reqwest::Error),
    Status(u16),
    Decode(String),
}

/// Client for the JSON list and detail endpoints.
#[derive(Debug, Clone)]
pub struct JsonApi {
    client: Client,
    base: Url,
}

impl JsonApi {
    /// Wraps an existing client.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidBase`] for URLs like `data:` that cannot
    /// carry a path.
    pub fn new(client: Client, base: Url) -> Result<Self, ApiError> {
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidBase {
                url: base.to_string(),
            });
        }
        Ok(Self { client, base })
    }

    /// Builds a client from `options` with the API timeout applied.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the base is unusable or the client cannot
    /// be built.
    pub fn from_options(base: Url, options: &ClientOptions) -> Result<Self, ApiError> {
        let options = options
            .clone()
            .with_timeout(std::time::Duration::from_secs(API_TIMEOUT_SECS));
        Self::new(build_client(&options)?, base)
    }

    /// URL of one list page.
    #[must_use]
    pub fn list_url(&self, query: &CrawlQuery, page: u32) -> Url {
        let mut url = self.endpoint(query.source.split('/'));
        url.query_pairs_mut()
            .extend_pairs(query.params.iter())
            .append_pair(PAGE_PARAM, &page.to_string());
        url
    }

    /// URL of one work's detail.
    #[must_use]
    pub fn work_url(&self, id: &str) -> Url {
        self.endpoint(["works", id])
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(segments.into_iter().filter(|s| !s.is_empty()));
        }
        url
    }

    async fn get_body<T: DeserializeOwned>(&self, url: Url) -> Result<T, RequestFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(RequestFailure::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestFailure::Status(status.as_u16()));
        }

        let text = response.text().await.map_err(RequestFailure::Network)?;
        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| RequestFailure::Decode(e.to_string()))?;
        if envelope.error {
            return Err(RequestFailure::Decode(format!(
                "endpoint reported an error: {}",
                envelope.message
            )));
        }
        envelope
            .body
            .ok_or_else(|| RequestFailure::Decode("response has no body".to_string()))
    }
}

#[async_trait]
impl ListPageFetcher for JsonApi {
    #[instrument(skip(self, query), fields(source = %query.source))]
    async fn fetch_list_page(
        &self,
        query: &CrawlQuery,
        page: u32,
    ) -> Result<ListPageResult, CrawlError> {
        let body: ListBody = self
            .get_body(self.list_url(query, page))
            .await
            .map_err(|failure| match failure {
                RequestFailure::Network(source) => CrawlError::network(page, source),
                RequestFailure::Status(status) => CrawlError::Status { page, status },
                RequestFailure::Decode(message) => CrawlError::decode(page, message),
            })?;
        debug!(page, total = body.total, works = body.works.len(), "fetched list page");
        Ok(ListPageResult {
            total_count: body.total,
            items: body.works,
        })
    }
}

#[async_trait]
impl WorkResolver for JsonApi {
    #[instrument(skip(self, candidate), fields(id = %candidate.id))]
    async fn resolve(&self, candidate: &CandidateItem) -> Result<Vec<WorkFile>, ResolveError> {
        let id = candidate.id.as_str();
        let body: WorkBody = self
            .get_body(self.work_url(id))
            .await
            .map_err(|failure| match failure {
                RequestFailure::Network(source) => ResolveError::network(id, source),
                RequestFailure::Status(status) => ResolveError::Status {
                    id: id.to_string(),
                    status,
                },
                RequestFailure::Decode(message) => ResolveError::decode(id, message),
            })?;
        let files = body.into_files();
        debug!(files = files.len(), "resolved work");
        Ok(files)
    }
}
