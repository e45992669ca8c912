//! Terminal decision for a file that exhausted its retries.
//!
//! While a file is retried, each failed attempt records how long it took from
//! request start to failure into a bounded [`RetryWindow`]. Once the retry
//! budget is spent, [`classify_terminal`] turns the last status code and that
//! window into a [`RetryVerdict`].
//!
//! # Status Classification
//!
//! | Status | Verdict | Rationale |
//! |--------|---------|-----------|
//! | 404 | SkipPermanent | The file does not exist |
//! | 500 | SkipPermanent | The platform answers 500 for files it will never serve |
//! | 0 | PauseAll or RetryEscalate | No response; see below |
//! | other | RetryEscalate | Unresolved transient error |
//!
//! # Status 0
//!
//! A transfer that fails without any response is either a network timeout or
//! a local failure such as a full disk. Timeouts take long to surface (tens of
//! seconds); local failures surface almost immediately. When at least
//! [`PAUSE_SHORT_NUMERATOR`]/[`PAUSE_SHORT_DENOMINATOR`] of the recorded
//! intervals are at most [`SHORT_INTERVAL_THRESHOLD`], retrying other files
//! will not help either, so the whole subsystem pauses.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use artwork_downloader::download::{RetryVerdict, RetryWindow, classify_terminal};
//!
//! let mut window = RetryWindow::default();
//! for _ in 0..10 {
//!     window.push(Duration::from_millis(200));
//! }
//! assert_eq!(classify_terminal(0, &window), RetryVerdict::PauseAll);
//! assert_eq!(classify_terminal(404, &window), RetryVerdict::SkipPermanent);
//! assert_eq!(classify_terminal(503, &window), RetryVerdict::RetryEscalate);
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, instrument};

/// Number of timing samples kept per file.
pub const RETRY_WINDOW_CAPACITY: usize = 10;

/// Intervals at or under this count as "failed fast".
pub const SHORT_INTERVAL_THRESHOLD: Duration = Duration::from_secs(10);

/// Numerator of the fast-failure share that triggers a pause.
pub const PAUSE_SHORT_NUMERATOR: usize = 9;

/// Denominator of the fast-failure share that triggers a pause.
pub const PAUSE_SHORT_DENOMINATOR: usize = 10;

/// Status reported when a transfer produced no HTTP response.
pub const STATUS_NO_RESPONSE: u16 = 0;

/// Outcome of the terminal retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// The resource will never succeed; skip it without counting as an error.
    SkipPermanent,

    /// Local resources look exhausted; pause the whole download subsystem.
    PauseAll,

    /// Unresolved transient error; surface it once and keep the file
    /// eligible for a later bulk re-attempt.
    RetryEscalate,
}

/// Bounded sliding window of retry intervals. Oldest samples are evicted first.
#[derive(Debug, Clone)]
pub struct RetryWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl Default for RetryWindow {
    fn default() -> Self {
        Self::with_capacity(RETRY_WINDOW_CAPACITY)
    }
}

impl RetryWindow {
    /// Creates a window holding at most `capacity` samples (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records one interval, evicting the oldest when full.
    pub fn push(&mut self, interval: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(interval);
    }

    /// Number of recorded samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples kept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples at or under `threshold`.
    #[must_use]
    pub fn count_at_most(&self, threshold: Duration) -> usize {
        self.samples.iter().filter(|s| **s <= threshold).count()
    }

    /// Iterates samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Duration> {
        self.samples.iter()
    }

    /// Whether the failures look like local resource exhaustion.
    #[must_use]
    pub fn indicates_local_exhaustion(&self) -> bool {
        if self.samples.is_empty() {
            return false;
        }
        let short = self.count_at_most(SHORT_INTERVAL_THRESHOLD);
        short * PAUSE_SHORT_DENOMINATOR >= self.samples.len() * PAUSE_SHORT_NUMERATOR
    }
}

/// Statuses that will never succeed however often they are retried.
#[must_use]
pub fn is_permanent_status(status: u16) -> bool {
    matches!(status, 404 | 500)
}

/// Decides the terminal outcome for a file that exhausted its retries.
#[instrument(level = "debug", skip(window), fields(samples = window.len()))]
pub fn classify_terminal(status: u16, window: &RetryWindow) -> RetryVerdict {
    let verdict = match status {
        s if is_permanent_status(s) => RetryVerdict::SkipPermanent,
        STATUS_NO_RESPONSE if window.indicates_local_exhaustion() => RetryVerdict::PauseAll,
        _ => RetryVerdict::RetryEscalate,
    };
    debug!(status, ?verdict, "terminal retry decision");
    verdict
}
