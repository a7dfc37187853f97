//! In-memory latency histogram for the live feed.
//! Records how long each snapshot load takes before it reaches the mirror.

use std::sync::Mutex;
use std::time::Duration;

/// Shared latency stats. Feed task records, API reads.
/// Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Create a new histogram. Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record_us(&self, us: u64) {
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us.max(1));
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        self.record_us(us);
    }

    /// Return (p50_us, p95_us, p99_us). None if no samples.
    pub fn percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let Ok(h) = self.inner.lock() else {
            return (None, None, None);
        };
        if h.len() == 0 {
            return (None, None, None);
        }
        (
            Some(h.value_at_quantile(0.5)),
            Some(h.value_at_quantile(0.95)),
            Some(h.value_at_quantile(0.99)),
        )
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = LatencyStats::new();
        assert_eq!(stats.percentiles(), (None, None, None));
        assert_eq!(stats.len(), 0);
    }

    #[test]
    fn percentiles_follow_samples() {
        let stats = LatencyStats::new();
        for us in 1..=100 {
            stats.record(Duration::from_micros(us));
        }
        let (p50, _, p99) = stats.percentiles();
        assert_eq!(stats.len(), 100);
        assert!(p50.unwrap() >= 49 && p50.unwrap() <= 51);
        assert!(p99.unwrap() >= 98);
    }
}
