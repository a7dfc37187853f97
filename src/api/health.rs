//! Shared health state for the /health endpoint.
//! Updated by the FeedSynchronizer, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared health metrics. Updated by the feed task, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True while the live subscription is delivering snapshots.
    pub feed_live: AtomicBool,
    /// Epoch ms of the last applied snapshot (0 = none).
    pub last_snapshot_at_ms: AtomicU64,
    /// Deals in the current mirror.
    pub deals_mirrored: AtomicU64,
    /// Snapshot loads that failed since start.
    pub snapshot_errors: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed_live(&self, v: bool) {
        self.feed_live.store(v, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self, at_ms: u64, deals: u64) {
        self.last_snapshot_at_ms.store(at_ms, Ordering::Relaxed);
        self.deals_mirrored.store(deals, Ordering::Relaxed);
    }

    pub fn inc_snapshot_errors(&self) {
        self.snapshot_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn feed_live(&self) -> bool {
        self.feed_live.load(Ordering::Relaxed)
    }

    pub fn last_snapshot_at_ms(&self) -> u64 {
        self.last_snapshot_at_ms.load(Ordering::Relaxed)
    }

    pub fn deals_mirrored(&self) -> u64 {
        self.deals_mirrored.load(Ordering::Relaxed)
    }

    pub fn snapshot_errors(&self) -> u64 {
        self.snapshot_errors.load(Ordering::Relaxed)
    }
}
