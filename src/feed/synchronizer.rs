use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::RESUBSCRIBE_BACKOFF_MS;
use crate::db::DealStore;
use crate::error::Result;
use crate::types::{now_ms, Deal, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    /// No snapshot applied yet.
    Connecting,
    Live,
    /// The subscription failed. The mirror still holds the last good list.
    Degraded { message: String },
}

/// The client-local mirror of the deal collection.
#[derive(Debug, Clone)]
pub struct FeedState {
    pub revision: u64,
    /// Store order, newest first. Replaced wholesale on every snapshot.
    pub deals: Arc<Vec<Deal>>,
    pub status: FeedStatus,
}

impl FeedState {
    fn connecting() -> Self {
        Self {
            revision: 0,
            deals: Arc::new(Vec::new()),
            status: FeedStatus::Connecting,
        }
    }
}

/// Backoff before re-subscribing after the `attempt`-th consecutive failure.
pub fn backoff_delay(attempt: usize) -> Duration {
    let ms = RESUBSCRIBE_BACKOFF_MS
        .get(attempt)
        .or(RESUBSCRIBE_BACKOFF_MS.last())
        .copied()
        .unwrap_or(1000);
    Duration::from_millis(ms)
}

// ---------------------------------------------------------------------------
// FeedSynchronizer
// ---------------------------------------------------------------------------

/// Single reader of the store's live query. Republishes every snapshot to any
/// number of views through a watch channel.
pub struct FeedSynchronizer {
    store: DealStore,
    state_tx: watch::Sender<FeedState>,
    retry: Arc<Notify>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl FeedSynchronizer {
    pub fn spawn(
        store: DealStore,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> FeedHandle {
        let (state_tx, state_rx) = watch::channel(FeedState::connecting());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let retry = Arc::new(Notify::new());

        let sync = Self {
            store,
            state_tx,
            retry: Arc::clone(&retry),
            health,
            latency,
        };
        let task = tokio::spawn(sync.run(shutdown_rx));

        FeedHandle {
            state: state_rx,
            retry,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut failures = 0usize;

        loop {
            let outcome = tokio::select! {
                _ = &mut shutdown => break,
                outcome = self.follow(&mut failures) => outcome,
            };

            match outcome {
                Ok(()) => {
                    info!("Deal store gone, feed stopped");
                    break;
                }
                Err(e) => self.degrade(&e.to_string()),
            }

            let delay = backoff_delay(failures);
            failures += 1;
            warn!("Feed re-subscribing in {}ms", delay.as_millis());

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.retry.notified() => info!("Feed retry requested"),
            }
        }

        self.health.set_feed_live(false);
        debug!("Feed task exited");
    }

    /// Follow one subscription until it fails (`Err`) or the store goes away (`Ok`).
    async fn follow(&self, failures: &mut usize) -> Result<()> {
        let mut subscription = self.store.subscribe();
        while let Some(next) = subscription.next().await {
            self.apply(next?);
            *failures = 0;
        }
        Ok(())
    }

    fn apply(&self, snapshot: Snapshot) {
        let count = snapshot.deals.len();
        self.latency.record(snapshot.loaded_in);
        self.health.set_feed_live(true);
        self.health.record_snapshot(now_ms().max(0) as u64, count as u64);

        self.state_tx.send_replace(FeedState {
            revision: snapshot.revision,
            deals: Arc::new(snapshot.deals),
            status: FeedStatus::Live,
        });
        debug!(revision = snapshot.revision, deals = count, "Feed snapshot applied");
    }

    fn degrade(&self, message: &str) {
        error!(error = %message, "Live feed subscription failed");
        self.health.set_feed_live(false);
        self.health.inc_snapshot_errors();
        self.state_tx.send_modify(|state| {
            state.status = FeedStatus::Degraded {
                message: message.to_string(),
            };
        });
    }
}

// ---------------------------------------------------------------------------
// FeedHandle
// ---------------------------------------------------------------------------

/// Owner of the feed task. The subscription lives exactly as long as the task:
/// `shutdown()` stops it cleanly, dropping the handle aborts it.
pub struct FeedHandle {
    state: watch::Receiver<FeedState>,
    retry: Arc<Notify>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedHandle {
    /// A receiver that observes every republished state.
    pub fn view(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// Current mirror. Cloning shares the deal list.
    pub fn current(&self) -> FeedState {
        self.state.borrow().clone()
    }

    /// Skip the remaining backoff of a degraded feed. Returns false when the
    /// feed was not degraded. A request made while a re-subscribe attempt is
    /// in flight is kept for the next backoff.
    pub fn retry(&self) -> bool {
        let degraded = matches!(self.state.borrow().status, FeedStatus::Degraded { .. });
        if degraded {
            self.retry.notify_one();
        }
        degraded
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().map_or(false, |t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the feed task and wait for it to release the subscription.
    pub async fn shutdown(&self) {
        let tx = self.shutdown.lock().ok().and_then(|mut s| s.take());
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
            info!("Feed synchronizer stopped");
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Ok(task) = self.task.get_mut() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::tests::new_deal;
    use crate::types::Category;

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn(store: &DealStore) -> (FeedHandle, Arc<HealthState>) {
        let health = Arc::new(HealthState::new());
        let handle = FeedSynchronizer::spawn(
            store.clone(),
            Arc::clone(&health),
            Arc::new(LatencyStats::new()),
        );
        (handle, health)
    }

    async fn wait_for(handle: &FeedHandle, pred: impl FnMut(&FeedState) -> bool) -> FeedState {
        let mut view = handle.view();
        let state = tokio::time::timeout(WAIT, view.wait_for(pred))
            .await
            .expect("feed state not reached in time")
            .expect("feed channel closed");
        (*state).clone()
    }

    #[tokio::test]
    async fn mirror_matches_store_order() {
        let store = DealStore::in_memory().await.unwrap();
        let a = store.add(new_deal("a", Category::Tech)).await.unwrap();
        let (handle, health) = spawn(&store);

        let state = wait_for(&handle, |s| s.status == FeedStatus::Live).await;
        assert_eq!(*state.deals, vec![a.clone()]);

        let b = store.add(new_deal("b", Category::Home)).await.unwrap();
        let c = store.add(new_deal("c", Category::Fashion)).await.unwrap();
        let state = wait_for(&handle, |s| s.deals.len() == 3).await;
        assert_eq!(*state.deals, store.list_all().await.unwrap());
        assert_eq!(*state.deals, vec![c, b, a]);
        assert!(health.feed_live());
        assert_eq!(health.deals_mirrored(), 3);
    }

    #[tokio::test]
    async fn deletions_replace_the_mirror_wholesale() {
        let store = DealStore::in_memory().await.unwrap();
        let a = store.add(new_deal("a", Category::Tech)).await.unwrap();
        let b = store.add(new_deal("b", Category::Tech)).await.unwrap();
        let (handle, _) = spawn(&store);
        wait_for(&handle, |s| s.deals.len() == 2).await;

        store.delete(&a.id).await.unwrap();
        let state = wait_for(&handle, |s| s.deals.len() == 1).await;
        assert_eq!(*state.deals, vec![b]);

        store.purge_all(500).await.unwrap();
        let state = wait_for(&handle, |s| s.deals.is_empty()).await;
        assert_eq!(state.status, FeedStatus::Live);
    }

    #[tokio::test]
    async fn subscription_failure_degrades_without_crashing() {
        let store = DealStore::in_memory().await.unwrap();
        store.close().await;
        let (handle, health) = spawn(&store);

        let state = wait_for(&handle, |s| matches!(s.status, FeedStatus::Degraded { .. })).await;
        assert!(state.deals.is_empty());
        assert!(health.snapshot_errors() >= 1);
        assert!(!health.feed_live());
        assert!(handle.is_running(), "feed task must keep retrying");
        assert!(handle.retry());

        handle.shutdown().await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn retry_cuts_the_backoff_short() {
        let store = DealStore::in_memory().await.unwrap();
        store.close().await;
        let (handle, health) = spawn(&store);

        // Four failures in, the next wait is the full 2000ms.
        tokio::time::timeout(Duration::from_secs(10), async {
            while health.snapshot_errors() < 4 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("feed never backed off");

        let before = health.snapshot_errors();
        assert!(handle.retry());
        tokio::time::timeout(Duration::from_millis(1000), async {
            while health.snapshot_errors() == before {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("retry did not re-subscribe before the backoff ran out");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_the_subscription() {
        let store = DealStore::in_memory().await.unwrap();
        let (handle, health) = spawn(&store);
        wait_for(&handle, |s| s.status == FeedStatus::Live).await;
        assert!(!handle.retry(), "retry is a no-op while live");

        handle.shutdown().await;
        assert!(!health.feed_live());

        store.add(new_deal("late", Category::Beauty)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.current().deals.is_empty());
    }

    #[test]
    fn backoff_repeats_last_value() {
        assert_eq!(backoff_delay(0), Duration::from_millis(250));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(42), Duration::from_millis(2000));
    }
}
