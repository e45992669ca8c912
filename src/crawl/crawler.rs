//! Concurrent list-page crawler.
//!
//! # Concurrency Model
//!
//! - `min(needed, max_threads)` fetch loops run as Tokio tasks
//! - Each loop claims the next page from a shared counter; the counter never
//!   runs past the planned range, so every page is claimed exactly once
//! - A failed fetch is retried on the same page until it succeeds or the
//!   crawl is interrupted
//! - The loop whose increment of the finished counter reaches the planned
//!   count emits the completion events; no other loop can

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, instrument, warn};

use super::plan::{PagePlan, plan_pages};
use super::{CrawlError, CrawlQuery, ListPageFetcher};
use crate::config::{AccountTier, DEFAULT_MAX_THREADS, DEFAULT_PAGE_SIZE, DownloadSettings};
use crate::events::{EventSink, NullEvents, PipelineEvent};
use crate::filter::{FilterGate, ItemMetadata};
use crate::model::{CandidateCollection, CandidateItem, ListPageResult};

/// Page a crawl probes for the advertised total.
const PROBE_PAGE: u32 = 1;

/// Result of a finished crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    /// The page range that was crawled.
    pub plan: PagePlan,
    /// Admitted candidates, ordered by page then source order.
    pub candidates: Vec<CandidateItem>,
    /// Pages fetched successfully.
    pub pages_fetched: u32,
    /// Failed fetch attempts that were retried.
    pub fetch_failures: u32,
    /// Whether some page advertised a different total than the first.
    pub total_drifted: bool,
}

impl CrawlSummary {
    fn empty(plan: PagePlan) -> Self {
        Self {
            plan,
            candidates: Vec::new(),
            pages_fetched: 0,
            fetch_failures: 0,
            total_drifted: false,
        }
    }
}

/// Shared state of one crawl. The two counters are the only values the
/// fetch loops mutate together.
#[derive(Debug)]
struct CrawlState {
    start: u32,
    needed: u32,
    claimed: AtomicU32,
    finished: AtomicU32,
    failures: AtomicU32,
    first_total: OnceLock<u64>,
    drifted: AtomicBool,
    candidates: CandidateCollection,
}

impl CrawlState {
    fn new(start: u32, needed: u32, expected_total: Option<u64>) -> Self {
        let first_total = OnceLock::new();
        if let Some(total) = expected_total {
            let _ = first_total.set(total);
        }
        Self {
            start,
            needed,
            claimed: AtomicU32::new(0),
            finished: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            first_total,
            drifted: AtomicBool::new(false),
            candidates: CandidateCollection::new(),
        }
    }

    /// Claims the next unclaimed page, `None` once the range is exhausted.
    fn claim(&self) -> Option<u32> {
        self.claimed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.needed).then_some(n + 1)
            })
            .ok()
            .map(|offset| self.start + offset)
    }

    /// Marks a page done. Returns `true` for exactly one caller: the one
    /// that finished the last page.
    fn finish_page(&self) -> bool {
        self.finished.fetch_add(1, Ordering::SeqCst) + 1 == self.needed
    }

    fn observe_total(&self, page: u32, total: u64) {
        let first = *self.first_total.get_or_init(|| total);
        if first != total {
            self.drifted.store(true, Ordering::SeqCst);
            warn!(
                page,
                first_total = first,
                total, "list total changed during crawl, keeping the original page range"
            );
        }
    }
}

/// Crawls list pages with a bounded pool of fetch loops.
pub struct ListCrawler {
    fetcher: Arc<dyn ListPageFetcher>,
    gate: Arc<FilterGate>,
    events: Arc<dyn EventSink>,
    max_threads: usize,
    page_size: u32,
    tier: AccountTier,
    interrupt: Arc<AtomicBool>,
}

impl std::fmt::Debug for ListCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListCrawler")
            .field("max_threads", &self.max_threads)
            .field("page_size", &self.page_size)
            .field("tier", &self.tier)
            .field("interrupted", &self.interrupt.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ListCrawler {
    /// Creates a crawler with default thread count, page size, and tier.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ListPageFetcher>, gate: Arc<FilterGate>) -> Self {
        Self {
            fetcher,
            gate,
            events: Arc::new(NullEvents),
            max_threads: DEFAULT_MAX_THREADS,
            page_size: DEFAULT_PAGE_SIZE,
            tier: AccountTier::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Applies thread count, page size, and tier from the run settings.
    #[must_use]
    pub fn with_settings(mut self, settings: &DownloadSettings) -> Self {
        self.max_threads = settings.max_threads.max(1);
        self.page_size = settings.page_size.max(1);
        self.tier = settings.account_tier;
        self
    }

    /// Sets the event listener.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the maximum number of concurrent fetch loops (at least one).
    #[must_use]
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.max(1);
        self
    }

    /// Shares an interrupt flag; setting it stops every fetch loop at its
    /// next attempt.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Returns the interrupt flag.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Probes the first page for the total, plans the range, and crawls it.
    ///
    /// A range with nothing to fetch emits `CrawlFinish` and `CrawlEmpty`
    /// without further requests.
    ///
    /// # Errors
    ///
    /// Returns the probe's [`CrawlError`], or [`CrawlError::Interrupted`]
    /// when the crawl was stopped early.
    #[instrument(skip(self, query), fields(source = %query.source))]
    pub async fn crawl_from(
        &self,
        query: &CrawlQuery,
        start_page: u32,
        requested: Option<u32>,
    ) -> Result<CrawlSummary, CrawlError> {
        let probe = self.fetcher.fetch_list_page(query, PROBE_PAGE).await?;
        let plan = plan_pages(
            probe.total_count,
            self.page_size,
            start_page,
            requested,
            self.tier,
        );
        info!(total = probe.total_count, ?plan, "planned list crawl");

        match plan {
            PagePlan::Pages { start, count } => {
                self.run(query, start, count, Some(probe.total_count)).await
            }
            PagePlan::OutOfRange { last_page } => {
                warn!(start_page, last_page, "start page is past the last page");
                self.signal_empty();
                Ok(CrawlSummary::empty(plan))
            }
            PagePlan::Empty => {
                self.signal_empty();
                Ok(CrawlSummary::empty(plan))
            }
        }
    }

    /// Crawls pages `start..start + needed`.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Interrupted`] when the interrupt flag stopped
    /// the loops before every page finished.
    #[instrument(skip(self, query), fields(source = %query.source))]
    pub async fn crawl(
        &self,
        query: &CrawlQuery,
        start: u32,
        needed: u32,
    ) -> Result<CrawlSummary, CrawlError> {
        self.run(query, start, needed, None).await
    }

    fn signal_empty(&self) {
        info!("list crawl found nothing to fetch");
        self.events.emit(PipelineEvent::CrawlFinish);
        self.events.emit(PipelineEvent::CrawlEmpty);
    }

    async fn run(
        &self,
        query: &CrawlQuery,
        start: u32,
        needed: u32,
        expected_total: Option<u64>,
    ) -> Result<CrawlSummary, CrawlError> {
        let plan = PagePlan::Pages {
            start,
            count: needed,
        };
        if needed == 0 {
            self.signal_empty();
            return Ok(CrawlSummary::empty(PagePlan::Empty));
        }

        let threads = usize::try_from(needed)
            .unwrap_or(usize::MAX)
            .min(self.max_threads);
        info!(start, needed, threads, "starting list crawl");

        let state = Arc::new(CrawlState::new(start, needed, expected_total));
        let query = Arc::new(query.clone());
        let mut handles = Vec::with_capacity(threads);

        for worker in 0..threads {
            let fetch_loop = FetchLoop {
                worker,
                state: Arc::clone(&state),
                fetcher: Arc::clone(&self.fetcher),
                gate: Arc::clone(&self.gate),
                events: Arc::clone(&self.events),
                query: Arc::clone(&query),
                interrupt: Arc::clone(&self.interrupt),
            };
            handles.push(tokio::spawn(fetch_loop.run()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "list fetch loop panicked");
            }
        }

        let finished = state.finished.load(Ordering::SeqCst);
        if finished < needed {
            warn!(finished, needed, "list crawl stopped before completion");
            return Err(CrawlError::Interrupted { finished, needed });
        }

        let summary = CrawlSummary {
            plan,
            candidates: state.candidates.ordered(),
            pages_fetched: finished,
            fetch_failures: state.failures.load(Ordering::SeqCst),
            total_drifted: state.drifted.load(Ordering::SeqCst),
        };
        info!(
            pages = summary.pages_fetched,
            candidates = summary.candidates.len(),
            failures = summary.fetch_failures,
            "list crawl complete"
        );
        Ok(summary)
    }
}

/// One fetch loop and the handles it needs.
struct FetchLoop {
    worker: usize,
    state: Arc<CrawlState>,
    fetcher: Arc<dyn ListPageFetcher>,
    gate: Arc<FilterGate>,
    events: Arc<dyn EventSink>,
    query: Arc<CrawlQuery>,
    interrupt: Arc<AtomicBool>,
}

impl FetchLoop {
    async fn run(self) {
        while let Some(page) = self.state.claim() {
            let Some(result) = self.fetch_until_success(page).await else {
                debug!(worker = self.worker, page, "fetch loop interrupted");
                return;
            };

            self.state.observe_total(page, result.total_count);
            let listed = result.items.len();
            let admitted: Vec<CandidateItem> = result
                .items
                .iter()
                .filter(|item| self.gate.admit(&ItemMetadata::from_raw(item)))
                .map(|item| CandidateItem {
                    id: item.id.clone(),
                    page_number: page,
                    kind: item.kind,
                })
                .collect();
            debug!(
                worker = self.worker,
                page,
                listed,
                admitted = admitted.len(),
                "list page filtered"
            );
            self.state.candidates.add_page(page, admitted);

            if self.state.finish_page() {
                info!(page, "last list page finished");
                self.events.emit(PipelineEvent::CrawlFinish);
                if self.state.candidates.is_empty() {
                    self.events.emit(PipelineEvent::CrawlEmpty);
                }
            }
        }
        debug!(worker = self.worker, "no pages left to claim");
    }

    async fn fetch_until_success(&self, page: u32) -> Option<ListPageResult> {
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return None;
            }
            match self.fetcher.fetch_list_page(&self.query, page).await {
                Ok(result) => return Some(result),
                Err(e) => {
                    self.state.failures.fetch_add(1, Ordering::SeqCst);
                    warn!(worker = self.worker, page, error = %e, "list page fetch failed, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::events::ChannelEvents;
    use crate::filter::KindPredicate;
    use crate::model::{RawItem, WorkKind};

    /// Serves `pages` items per page, failing each page's first
    /// `failures[page]` attempts. Tracks calls and peak concurrency.
    #[derive(Default)]
    struct MockLister {
        total: u64,
        items: HashMap<u32, Vec<RawItem>>,
        failures: Mutex<HashMap<u32, u32>>,
        totals: HashMap<u32, u64>,
        calls: Mutex<Vec<u32>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_always: bool,
        interrupt_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl MockLister {
        fn with_pages(total: u64, pages: u32, per_page: u32) -> Self {
            let mut items = HashMap::new();
            for page in 1..=pages {
                let list = (0..per_page)
                    .map(|i| raw(&format!("{page}-{i}"), WorkKind::Illustration))
                    .collect();
                items.insert(page, list);
            }
            Self {
                total,
                items,
                ..Self::default()
            }
        }

        fn calls_for(&self, page: u32) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|p| **p == page)
                .count()
        }
    }

    #[async_trait]
    impl ListPageFetcher for MockLister {
        async fn fetch_list_page(
            &self,
            _query: &CrawlQuery,
            page: u32,
        ) -> Result<ListPageResult, CrawlError> {
            let calls = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(page);
                calls.len()
            };
            if let Some((after, flag)) = &self.interrupt_after
                && calls >= *after
            {
                flag.store(true, Ordering::SeqCst);
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let failing = {
                let mut failures = self.failures.lock().unwrap();
                match failures.get_mut(&page) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if self.fail_always || failing {
                return Err(CrawlError::Status { page, status: 503 });
            }
            Ok(ListPageResult {
                total_count: self.totals.get(&page).copied().unwrap_or(self.total),
                items: self.items.get(&page).cloned().unwrap_or_default(),
            })
        }
    }

    fn raw(id: &str, kind: WorkKind) -> RawItem {
        RawItem {
            id: id.to_string(),
            kind,
            tags: Vec::new(),
            bookmark_count: 0,
            restricted: false,
            user_id: String::new(),
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn crawler(
        lister: &Arc<MockLister>,
        threads: usize,
    ) -> (ListCrawler, tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) {
        let (events, rx) = ChannelEvents::channel();
        let fetcher: Arc<dyn ListPageFetcher> = lister.clone();
        let crawler = ListCrawler::new(fetcher, Arc::new(FilterGate::new()))
            .with_events(Arc::new(events))
            .with_max_threads(threads);
        (crawler, rx)
    }

    // ==================== Completion Tests ====================

    #[tokio::test]
    async fn test_two_empty_pages_complete_empty_with_two_loops() {
        let lister = Arc::new(MockLister::with_pages(0, 2, 0));
        let (crawler, mut rx) = crawler(&lister, 5);

        let summary = crawler.crawl(&CrawlQuery::new("q"), 1, 2).await.unwrap();

        assert!(summary.candidates.is_empty());
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(lister.calls.lock().unwrap().len(), 2);
        assert!(lister.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(
            drain(&mut rx),
            vec![PipelineEvent::CrawlFinish, PipelineEvent::CrawlEmpty]
        );
    }

    #[tokio::test]
    async fn test_every_page_fetched_once_within_thread_bound() {
        let lister = Arc::new(MockLister::with_pages(7 * 2, 7, 2));
        let (crawler, mut rx) = crawler(&lister, 3);

        let summary = crawler.crawl(&CrawlQuery::new("q"), 1, 7).await.unwrap();

        for page in 1..=7 {
            assert_eq!(lister.calls_for(page), 1, "page {page}");
        }
        assert_eq!(lister.peak.load(Ordering::SeqCst), 3);
        assert_eq!(summary.candidates.len(), 14);
        let pages: Vec<u32> = summary.candidates.iter().map(|c| c.page_number).collect();
        let mut sorted = pages.clone();
        sorted.sort_unstable();
        assert_eq!(pages, sorted);
        assert_eq!(summary.candidates[0].id, "1-0");
        assert_eq!(summary.candidates[1].id, "1-1");
        assert_eq!(drain(&mut rx), vec![PipelineEvent::CrawlFinish]);
    }

    #[tokio::test]
    async fn test_crawl_from_offset_start_page() {
        let lister = Arc::new(MockLister::with_pages(10, 5, 2));
        let (crawler, _rx) = crawler(&lister, 5);

        let summary = crawler.crawl(&CrawlQuery::new("q"), 3, 2).await.unwrap();

        assert_eq!(lister.calls_for(3), 1);
        assert_eq!(lister.calls_for(4), 1);
        assert_eq!(lister.calls_for(5), 0);
        assert_eq!(summary.candidates.len(), 4);
    }

    #[tokio::test]
    async fn test_zero_pages_signals_empty_without_fetching() {
        let lister = Arc::new(MockLister::with_pages(0, 0, 0));
        let (crawler, mut rx) = crawler(&lister, 5);

        let summary = crawler.crawl(&CrawlQuery::new("q"), 1, 0).await.unwrap();

        assert_eq!(summary.plan, PagePlan::Empty);
        assert!(lister.calls.lock().unwrap().is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![PipelineEvent::CrawlFinish, PipelineEvent::CrawlEmpty]
        );
    }

    // ==================== Retry Tests ====================

    #[tokio::test]
    async fn test_failed_page_retried_on_same_page_number() {
        let lister = MockLister::with_pages(6, 3, 2);
        lister.failures.lock().unwrap().insert(2, 2);
        let lister = Arc::new(lister);
        let (crawler, mut rx) = crawler(&lister, 2);

        let summary = crawler.crawl(&CrawlQuery::new("q"), 1, 3).await.unwrap();

        assert_eq!(lister.calls_for(2), 3);
        assert_eq!(lister.calls_for(1), 1);
        assert_eq!(lister.calls_for(3), 1);
        assert_eq!(summary.fetch_failures, 2);
        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(drain(&mut rx), vec![PipelineEvent::CrawlFinish]);
    }

    #[tokio::test]
    async fn test_interrupt_stops_retry_loop_without_completion() {
        let flag = Arc::new(AtomicBool::new(false));
        let lister = Arc::new(MockLister {
            fail_always: true,
            interrupt_after: Some((4, Arc::clone(&flag))),
            ..MockLister::with_pages(2, 2, 1)
        });
        let (crawler, mut rx) = crawler(&lister, 2);
        let crawler = crawler.with_interrupt(flag);

        let err = crawler.crawl(&CrawlQuery::new("q"), 1, 2).await.unwrap_err();

        assert!(matches!(
            err,
            CrawlError::Interrupted {
                finished: 0,
                needed: 2
            }
        ));
        assert!(drain(&mut rx).is_empty());
    }

    // ==================== Filter Tests ====================

    #[tokio::test]
    async fn test_list_gate_drops_rejected_items_in_source_order() {
        let mut lister = MockLister::with_pages(3, 1, 0);
        lister.items.insert(
            1,
            vec![
                raw("a", WorkKind::Illustration),
                raw("n", WorkKind::Novel),
                raw("b", WorkKind::Manga),
            ],
        );
        let lister = Arc::new(lister);
        let gate = FilterGate::new().with(KindPredicate::new(vec![WorkKind::Novel]));
        let fetcher: Arc<dyn ListPageFetcher> = lister.clone();
        let crawler = ListCrawler::new(fetcher, Arc::new(gate));

        let summary = crawler.crawl(&CrawlQuery::new("q"), 1, 1).await.unwrap();

        let ids: Vec<&str> = summary.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_all_items_filtered_signals_empty() {
        let mut lister = MockLister::with_pages(1, 1, 0);
        lister.items.insert(1, vec![raw("n", WorkKind::Novel)]);
        let lister = Arc::new(lister);
        let (events, mut rx) = ChannelEvents::channel();
        let gate = FilterGate::new().with(KindPredicate::new(vec![WorkKind::Novel]));
        let fetcher: Arc<dyn ListPageFetcher> = lister.clone();
        let crawler = ListCrawler::new(fetcher, Arc::new(gate)).with_events(Arc::new(events));

        crawler.crawl(&CrawlQuery::new("q"), 1, 1).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![PipelineEvent::CrawlFinish, PipelineEvent::CrawlEmpty]
        );
    }

    // ==================== Planning Tests ====================

    #[tokio::test]
    async fn test_crawl_from_plans_from_probe_total() {
        let lister = Arc::new(MockLister::with_pages(150, 3, 1));
        let (crawler, _rx) = crawler(&lister, 5);

        let summary = crawler
            .crawl_from(&CrawlQuery::new("q"), 1, None)
            .await
            .unwrap();

        assert_eq!(summary.plan, PagePlan::Pages { start: 1, count: 3 });
        // Probe plus one fetch per page.
        assert_eq!(lister.calls_for(1), 2);
        assert_eq!(lister.calls_for(3), 1);
        assert!(!summary.total_drifted);
    }

    #[tokio::test]
    async fn test_crawl_from_past_last_page_signals_finish_then_empty() {
        let lister = Arc::new(MockLister::with_pages(60, 1, 1));
        let (crawler, mut rx) = crawler(&lister, 5);

        let summary = crawler
            .crawl_from(&CrawlQuery::new("q"), 4, None)
            .await
            .unwrap();

        assert_eq!(summary.plan, PagePlan::OutOfRange { last_page: 1 });
        assert_eq!(lister.calls.lock().unwrap().len(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![PipelineEvent::CrawlFinish, PipelineEvent::CrawlEmpty]
        );
    }

    #[tokio::test]
    async fn test_total_drift_is_reported_not_applied() {
        let mut lister = MockLister::with_pages(120, 2, 1);
        lister.totals.insert(2, 180);
        let lister = Arc::new(lister);
        let (crawler, _rx) = crawler(&lister, 1);

        let summary = crawler
            .crawl_from(&CrawlQuery::new("q"), 1, None)
            .await
            .unwrap();

        assert!(summary.total_drifted);
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(lister.calls_for(3), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_is_returned() {
        let lister = Arc::new(MockLister {
            fail_always: true,
            ..MockLister::with_pages(1, 1, 1)
        });
        let (crawler, mut rx) = crawler(&lister, 5);

        let err = crawler
            .crawl_from(&CrawlQuery::new("q"), 1, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CrawlError::Status { page: 1, .. }));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_claim_never_exceeds_needed() {
        let state = CrawlState::new(5, 2, None);
        assert_eq!(state.claim(), Some(5));
        assert_eq!(state.claim(), Some(6));
        assert_eq!(state.claim(), None);
        assert_eq!(state.claim(), None);
        assert!(!state.finish_page());
        assert!(state.finish_page());
    }
}
