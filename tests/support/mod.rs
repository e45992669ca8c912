//! Shared mock collaborators for integration tests.
//!
//! Each mock records what it was asked so tests can assert on call counts,
//! order, and peak concurrency.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use artwork_downloader::config::ImageSize;
use artwork_downloader::crawl::{CrawlError, CrawlQuery, ListPageFetcher};
use artwork_downloader::download::{FileFetcher, SavedFile, Sink, TransferResponse, TransportError};
use artwork_downloader::model::{CandidateItem, ListPageResult, RawItem, WorkFile, WorkKind};
use artwork_downloader::orchestrator::{ResolveError, WorkResolver};
use async_trait::async_trait;

// ==================== List Pages ====================

/// Serves fixed list pages and tracks peak concurrency.
#[derive(Default)]
pub struct MockLister {
    pub total: u64,
    pub pages: HashMap<u32, Vec<RawItem>>,
    pub fail_first: Mutex<HashMap<u32, u32>>,
    pub failures: AtomicUsize,
    pub calls: Mutex<Vec<u32>>,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub delay: Duration,
}

impl MockLister {
    /// `pages` pages of `per_page` illustrations each, ids `"{page}-{i}"`.
    pub fn uniform(pages: u32, per_page: u32) -> Self {
        let mut map = HashMap::new();
        for page in 1..=pages {
            map.insert(
                page,
                (0..per_page)
                    .map(|i| raw_item(&format!("{page}-{i}"), WorkKind::Illustration))
                    .collect(),
            );
        }
        Self {
            total: u64::from(pages * per_page),
            pages: map,
            delay: Duration::from_millis(2),
            ..Self::default()
        }
    }

    pub fn fail_page(self, page: u32, times: u32) -> Self {
        self.fail_first.lock().unwrap().insert(page, times);
        self
    }

    pub fn successful_calls(&self) -> usize {
        self.calls.lock().unwrap().len() - self.failures.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, page: u32) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| **p == page)
            .count()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListPageFetcher for MockLister {
    async fn fetch_list_page(
        &self,
        _query: &CrawlQuery,
        page: u32,
    ) -> Result<ListPageResult, CrawlError> {
        self.calls.lock().unwrap().push(page);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.fail_first.lock().unwrap();
            if let Some(left) = failures.get_mut(&page)
                && *left > 0
            {
                *left -= 1;
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(CrawlError::Status { page, status: 502 });
            }
        }

        Ok(ListPageResult {
            total_count: self.total,
            items: self.pages.get(&page).cloned().unwrap_or_default(),
        })
    }
}

pub fn raw_item(id: &str, kind: WorkKind) -> RawItem {
    RawItem {
        id: id.to_string(),
        kind,
        tags: Vec::new(),
        bookmark_count: 0,
        restricted: false,
        user_id: "7".to_string(),
    }
}

// ==================== Work Resolution ====================

/// Resolves every candidate to one image file at `https://img.test/{id}.png`.
#[derive(Default)]
pub struct MockResolver {
    pub missing: Vec<String>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkResolver for MockResolver {
    async fn resolve(&self, candidate: &CandidateItem) -> Result<Vec<WorkFile>, ResolveError> {
        self.calls.lock().unwrap().push(candidate.id.clone());
        if self.missing.contains(&candidate.id) {
            return Err(ResolveError::Status {
                id: candidate.id.clone(),
                status: 404,
            });
        }
        Ok(vec![image_file(&candidate.id)])
    }
}

pub fn image_url(id: &str) -> String {
    format!("https://img.test/{id}.png")
}

pub fn image_file(id: &str) -> WorkFile {
    WorkFile {
        work_id: id.to_string(),
        index: 0,
        kind: WorkKind::Illustration,
        user_id: "7".to_string(),
        source_variants: HashMap::from([(ImageSize::Original, image_url(id))]),
        full_dimensions: None,
        ugoira: None,
        novel: None,
    }
}

// ==================== Transfers ====================

/// One scripted answer to a transfer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with this body and a known length.
    Body(Vec<u8>),
    /// This status and no body.
    Status(u16),
    /// No response at all (status 0).
    NoResponse,
}

/// Answers transfers by URL. Each route replays its script; the last
/// reply repeats. Unknown URLs answer with a small body.
#[derive(Default)]
pub struct RouteFetcher {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    pub calls: Mutex<Vec<String>>,
}

impl RouteFetcher {
    pub fn route(&self, url: impl Into<String>, replies: Vec<Reply>) {
        self.routes.lock().unwrap().insert(url.into(), replies.into());
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl FileFetcher for RouteFetcher {
    async fn open(&self, url: &str) -> Result<TransferResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(url) {
                Some(script) if script.len() > 1 => script.pop_front().unwrap(),
                Some(script) => script.front().cloned().unwrap(),
                None => Reply::Body(format!("bytes of {url}").into_bytes()),
            }
        };
        match reply {
            Reply::Body(bytes) => {
                let total = bytes.len() as u64;
                Ok(TransferResponse::from_chunks(200, Some(total), vec![bytes]))
            }
            Reply::Status(status) => Ok(TransferResponse::status_only(status)),
            Reply::NoResponse => Err(TransportError::interrupted(url, "connection reset")),
        }
    }
}

// ==================== Sink ====================

/// Keeps every saved file in memory.
#[derive(Default)]
pub struct RecordingSink {
    pub saved: Mutex<Vec<SavedFile>>,
}

impl RecordingSink {
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .saved
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn save(&self, file: SavedFile) {
        self.saved.lock().unwrap().push(file);
    }
}
