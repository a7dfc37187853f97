use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::types::{now_ms, Deal, NewDeal, Snapshot};

/// Length of store-assigned deal keys.
const DEAL_ID_LEN: usize = 20;

/// The live query: every deal, newest first. `seq` breaks same-millisecond ties.
const SNAPSHOT_SQL: &str = r#"
    SELECT id, title, price, original_price, platform, category, image, link,
           verified, trending_count, created_at, expires_at
    FROM deals
    ORDER BY created_at DESC, seq DESC
"#;

// ---------------------------------------------------------------------------
// DealStore
// ---------------------------------------------------------------------------

/// Handle to the deal collection. Cheap to clone; every clone shares the pool
/// and the change-revision channel that drives live subscriptions.
#[derive(Clone)]
pub struct DealStore {
    pool: SqlitePool,
    /// Bumped once per committed write. Subscribers wake on change.
    revisions: Arc<watch::Sender<u64>>,
}

impl DealStore {
    /// Open (or create) the SQLite file at `db_path` and apply migrations.
    pub async fn open(db_path: &str) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single long-lived connection keeps the
    /// data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        let (revisions, _) = watch::channel(0u64);
        Ok(Self {
            pool,
            revisions: Arc::new(revisions),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current change revision.
    pub fn revision(&self) -> u64 {
        *self.revisions.borrow()
    }

    /// Close the pool. Pending and future queries fail; live subscriptions
    /// report errors on their next load.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Deal store closed");
    }

    /// Insert one deal. The store assigns `id` and `created_at`.
    pub async fn add(&self, deal: NewDeal) -> Result<Deal> {
        let id = generate_id();
        let created_at = now_ms();

        sqlx::query(
            r#"
            INSERT INTO deals (
                id, title, price, original_price, platform, category, image, link,
                verified, trending_count, created_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&deal.title)
        .bind(deal.price)
        .bind(deal.original_price)
        .bind(&deal.platform)
        .bind(deal.category)
        .bind(&deal.image)
        .bind(&deal.link)
        .bind(deal.verified)
        .bind(deal.trending_count)
        .bind(created_at)
        .bind(deal.expires_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::Write)?;

        self.bump();
        info!(deal_id = %id, platform = %deal.platform, category = %deal.category, "Deal published: {}", deal.title);

        Ok(Deal {
            id,
            title: deal.title,
            price: deal.price,
            original_price: deal.original_price,
            platform: deal.platform,
            category: deal.category,
            image: deal.image,
            link: deal.link,
            verified: deal.verified,
            trending_count: deal.trending_count,
            created_at,
            expires_at: deal.expires_at,
        })
    }

    /// Delete one deal by id. Returns false (and emits no change) when the id is unknown.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM deals WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(AppError::Write)?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.bump();
            info!(deal_id = %id, "Deal deleted");
        } else {
            debug!(deal_id = %id, "Delete of unknown deal ignored");
        }
        Ok(removed)
    }

    /// Enumerate the whole collection in feed order.
    pub async fn list_all(&self) -> Result<Vec<Deal>> {
        Ok(load_deals(&self.pool).await?)
    }

    /// Delete every deal, `chunk_size` ids per transaction, until an
    /// enumeration comes back empty. Returns the number of deleted deals.
    ///
    /// Each chunk commits atomically; a failure part way leaves earlier
    /// chunks deleted.
    pub async fn purge_all(&self, chunk_size: usize) -> Result<usize> {
        let chunk_size = chunk_size.max(1);
        let mut deleted = 0usize;
        let mut chunks = 0usize;

        loop {
            let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM deals ORDER BY seq LIMIT ?")
                .bind(chunk_size as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(AppError::Write)?;
            if ids.is_empty() {
                break;
            }

            let mut tx = self.pool.begin().await.map_err(AppError::Write)?;
            let mut removed = 0u64;
            for id in &ids {
                removed += sqlx::query("DELETE FROM deals WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(AppError::Write)?
                    .rows_affected();
            }
            tx.commit().await.map_err(AppError::Write)?;

            chunks += 1;
            deleted += removed as usize;
            self.bump();
            debug!(chunk = chunks, removed, "Purge chunk committed");
        }

        info!(deleted, chunks, "Deal collection purged");
        Ok(deleted)
    }

    /// Open a live subscription to the ordered collection.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            pool: self.pool.clone(),
            revisions: self.revisions.subscribe(),
            primed: false,
        }
    }

    fn bump(&self) {
        self.revisions.send_modify(|rev| *rev += 1);
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Standing query over the deal collection. Yields the full ordered snapshot
/// on first poll and again after every change. Bursts coalesce: a slow reader
/// sees the latest state, never a backlog.
pub struct Subscription {
    pool: SqlitePool,
    revisions: watch::Receiver<u64>,
    primed: bool,
}

impl Subscription {
    /// Next snapshot. `None` once every `DealStore` handle is gone.
    /// A failed load is reported as `AppError::Subscription` and the
    /// subscription stays usable.
    pub async fn next(&mut self) -> Option<Result<Snapshot>> {
        if self.primed && self.revisions.changed().await.is_err() {
            return None;
        }
        self.primed = true;

        let revision = *self.revisions.borrow_and_update();
        let started = Instant::now();
        let loaded = load_deals(&self.pool)
            .await
            .map(|deals| Snapshot {
                revision,
                deals,
                loaded_in: started.elapsed(),
            })
            .map_err(|e| AppError::Subscription(e.to_string()));
        Some(loaded)
    }
}

async fn load_deals(pool: &SqlitePool) -> std::result::Result<Vec<Deal>, sqlx::Error> {
    sqlx::query_as::<_, Deal>(SNAPSHOT_SQL).fetch_all(pool).await
}

fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DEAL_ID_LEN)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{Category, Platform};

    pub(crate) fn new_deal(title: &str, category: Category) -> NewDeal {
        NewDeal {
            title: title.to_string(),
            price: 499.0,
            original_price: 999.0,
            platform: Platform::new("Amazon"),
            category,
            image: "https://m.media-amazon.com/images/I/x.jpg".to_string(),
            link: "https://amzn.to/abc".to_string(),
            verified: true,
            trending_count: 800,
            expires_at: Some(now_ms() + 3_600_000),
        }
    }

    #[tokio::test]
    async fn add_assigns_id_and_created_at() {
        let store = DealStore::in_memory().await.unwrap();
        let before = now_ms();
        let deal = store.add(new_deal("Smartphone X", Category::Tech)).await.unwrap();

        assert_eq!(deal.id.len(), DEAL_ID_LEN);
        assert!(deal.created_at >= before);
        assert_eq!(store.list_all().await.unwrap(), vec![deal]);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = DealStore::in_memory().await.unwrap();
        let a = store.add(new_deal("first", Category::Tech)).await.unwrap();
        let b = store.add(new_deal("second", Category::Home)).await.unwrap();
        let c = store.add(new_deal("third", Category::Beauty)).await.unwrap();

        let ids: Vec<String> = store.list_all().await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[tokio::test]
    async fn deleting_unknown_id_is_a_noop() {
        let store = DealStore::in_memory().await.unwrap();
        store.add(new_deal("kept", Category::Fashion)).await.unwrap();
        let rev = store.revision();

        assert!(!store.delete("does-not-exist").await.unwrap());
        assert_eq!(store.revision(), rev, "no change must be emitted");
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_one_deal() {
        let store = DealStore::in_memory().await.unwrap();
        let a = store.add(new_deal("a", Category::Tech)).await.unwrap();
        let b = store.add(new_deal("b", Category::Tech)).await.unwrap();

        assert!(store.delete(&a.id).await.unwrap());
        assert_eq!(store.list_all().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn purge_deletes_across_chunks() {
        let store = DealStore::in_memory().await.unwrap();
        for i in 0..7 {
            store.add(new_deal(&format!("deal {i}"), Category::Home)).await.unwrap();
        }
        let rev = store.revision();

        let deleted = store.purge_all(3).await.unwrap();
        assert_eq!(deleted, 7);
        assert!(store.list_all().await.unwrap().is_empty());
        // 3 + 3 + 1
        assert_eq!(store.revision(), rev + 3);
    }

    #[tokio::test]
    async fn purge_of_empty_collection_deletes_nothing() {
        let store = DealStore::in_memory().await.unwrap();
        assert_eq!(store.purge_all(500).await.unwrap(), 0);
        assert_eq!(store.revision(), 0);
    }

    #[tokio::test]
    async fn subscription_yields_initial_then_changed_snapshots() {
        let store = DealStore::in_memory().await.unwrap();
        let a = store.add(new_deal("a", Category::Tech)).await.unwrap();
        let mut sub = store.subscribe();

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.deals, vec![a.clone()]);

        let b = store.add(new_deal("b", Category::Tech)).await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.deals, vec![b, a]);
        assert!(second.revision > first.revision);
    }

    #[tokio::test]
    async fn subscription_coalesces_bursts() {
        let store = DealStore::in_memory().await.unwrap();
        let mut sub = store.subscribe();
        assert!(sub.next().await.unwrap().unwrap().deals.is_empty());

        for i in 0..5 {
            store.add(new_deal(&format!("d{i}"), Category::Beauty)).await.unwrap();
        }
        let snap = sub.next().await.unwrap().unwrap();
        assert_eq!(snap.deals.len(), 5);
        assert_eq!(snap.revision, 5);
    }

    #[tokio::test]
    async fn subscription_ends_when_store_dropped() {
        let store = DealStore::in_memory().await.unwrap();
        let mut sub = store.subscribe();
        assert!(sub.next().await.unwrap().is_ok());

        drop(store);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn subscription_reports_load_failure() {
        let store = DealStore::in_memory().await.unwrap();
        let mut sub = store.subscribe();
        store.close().await;

        match sub.next().await {
            Some(Err(AppError::Subscription(_))) => {}
            other => panic!("expected subscription error, got {other:?}"),
        }
    }
}
