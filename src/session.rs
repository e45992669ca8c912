//! Run-wide state owned by the orchestrator and shared with every task.
//!
//! The `downloading` flag is single-writer (the owner, or the one task that
//! wins the pause gate) and read-mostly; tasks poll it at every suspension
//! point and abort when it goes false.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info};

/// Poll interval used while racing a suspension point against a stop.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Downloading flag, one-shot pause gate, and batch counter.
#[derive(Debug, Default)]
pub struct Session {
    downloading: AtomicBool,
    pause_latched: AtomicBool,
    batch: AtomicU64,
}

impl Session {
    /// Creates an idle session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new batch: sets the downloading flag, re-arms the pause gate,
    /// and returns the new batch id.
    pub fn start(&self) -> u64 {
        let batch = self.batch.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause_latched.store(false, Ordering::SeqCst);
        self.downloading.store(true, Ordering::SeqCst);
        info!(batch, "download session started");
        batch
    }

    /// Clears the downloading flag. In-flight tasks abort at their next poll.
    pub fn stop(&self) {
        if self.downloading.swap(false, Ordering::SeqCst) {
            info!("download session stopped");
        }
    }

    /// Whether the subsystem is actively downloading.
    #[must_use]
    pub fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::SeqCst)
    }

    /// Current batch id (0 before the first start).
    #[must_use]
    pub fn batch_id(&self) -> u64 {
        self.batch.load(Ordering::SeqCst)
    }

    /// Claims the pause for this episode and stops the session.
    ///
    /// Returns `true` for exactly one caller per episode; every other caller
    /// gets `false` and must not raise the pause again.
    pub fn try_latch_pause(&self) -> bool {
        let won = self
            .pause_latched
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            debug!("pause gate latched");
            self.stop();
        }
        won
    }

    /// Whether a pause was raised during the current episode.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause_latched.load(Ordering::SeqCst)
    }

    /// Resolves once the downloading flag is observed false.
    pub async fn stopped(&self) {
        while self.is_downloading() {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }
}
