//! How many list pages a crawl needs.

use tracing::{debug, warn};

use crate::config::AccountTier;

/// The page range a crawl should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePlan {
    /// Nothing to fetch; the list is empty or zero pages were requested.
    Empty,
    /// The start page lies past the last page.
    OutOfRange {
        /// Last page the list has after capping.
        last_page: u32,
    },
    /// Fetch `count` pages starting at `start`.
    Pages {
        /// First page, 1-based.
        start: u32,
        /// Number of pages.
        count: u32,
    },
}

impl PagePlan {
    /// Number of pages to fetch.
    #[must_use]
    pub fn page_count(self) -> u32 {
        match self {
            Self::Pages { count, .. } => count,
            Self::Empty | Self::OutOfRange { .. } => 0,
        }
    }
}

/// Computes the page range from the advertised item total.
///
/// The page count is `ceil(total / page_size)`, capped by the account tier.
/// `requested` of `None` means every remaining page; a larger request than
/// available is clamped.
///
/// # Example
///
/// ```
/// use artwork_downloader::config::AccountTier;
/// use artwork_downloader::crawl::{PagePlan, plan_pages};
///
/// let plan = plan_pages(250, 60, 2, Some(10), AccountTier::Standard);
/// assert_eq!(plan, PagePlan::Pages { start: 2, count: 4 });
/// ```
#[must_use]
pub fn plan_pages(
    total: u64,
    page_size: u32,
    start: u32,
    requested: Option<u32>,
    tier: AccountTier,
) -> PagePlan {
    let page_size = u64::from(page_size.max(1));
    let uncapped = total.div_ceil(page_size);
    let cap = tier.page_cap();
    let page_count = u32::try_from(uncapped).unwrap_or(u32::MAX).min(cap);
    if u64::from(page_count) < uncapped {
        debug!(uncapped, cap, "page count capped for account tier");
    }

    let start = start.max(1);
    if start > page_count {
        return PagePlan::OutOfRange {
            last_page: page_count,
        };
    }

    let remaining = page_count - start + 1;
    let count = match requested {
        None => remaining,
        Some(n) if n > remaining => {
            warn!(
                requested = n,
                available = remaining,
                "requested more pages than available, crawling all remaining pages"
            );
            remaining
        }
        Some(n) => n,
    };

    if count == 0 {
        PagePlan::Empty
    } else {
        PagePlan::Pages { start, count }
    }
}
