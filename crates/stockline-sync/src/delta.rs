//! # Delta Sync Client
//!
//! Pulls product records from the remote inventory service into the Local
//! Store.
//!
//! ## Pull Modes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Delta Sync Flow                                  │
//! │                                                                         │
//! │  delta_sync()                                                          │
//! │       │                                                                 │
//! │       ├── no cursor persisted ──────────────────► full_sync()          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  GET /products?since=<cursor>&page=1..n                                │
//! │       │                                                                 │
//! │       ├── 400/409/410/422 (cursor rejected) ────► full_sync()          │
//! │       ├── any other failure ──► Err, store and cursor untouched        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  merge_remote(records, as_of)   last-write-wins on updated_at          │
//! │                                                                         │
//! │  full_sync()                                                           │
//! │       GET /products?page=1..n  ──►  replace_all(records, as_of)        │
//! │                                                                         │
//! │  as_of = server Date of the first page. Nothing is written until       │
//! │  every page arrived. No retry here: the orchestrator's next tick is    │
//! │  the retry.                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use stockline_core::{MergeStats, ProductSnapshot, SyncCursor};
use stockline_db::SnapshotRepository;
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::config::RemoteSettings;
use crate::error::{ApiError, SyncError, SyncResult};
use crate::remote::{with_deadline, InventoryApi, ListQuery};

/// Upper bound on pages walked in one pull.
const MAX_PAGES: u32 = 10_000;

// =============================================================================
// Sync Summary
// =============================================================================

/// Which pull ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Delta,
}

/// What one pull did to the Local Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub mode: SyncMode,

    /// Records received across all pages.
    pub fetched: usize,

    pub pages: u32,

    /// Merge counts (delta only; a full sync replaces everything).
    #[serde(skip)]
    pub merge: Option<MergeStats>,

    /// Cursor persisted after the pull.
    pub cursor: SyncCursor,

    /// True when a rejected delta query was answered by a full sync.
    pub fell_back: bool,
}

/// All pages of one listing.
struct Listing {
    products: Vec<ProductSnapshot>,
    as_of: DateTime<Utc>,
    pages: u32,
}

// =============================================================================
// Client
// =============================================================================

/// Keeps local snapshots current with the remote service.
#[derive(Clone)]
pub struct DeltaSyncClient {
    api: Arc<dyn InventoryApi>,
    tokens: Arc<dyn TokenProvider>,
    snapshots: SnapshotRepository,
    per_page: u32,
    request_timeout: Duration,
}

impl DeltaSyncClient {
    pub fn new(
        api: Arc<dyn InventoryApi>,
        tokens: Arc<dyn TokenProvider>,
        snapshots: SnapshotRepository,
        settings: &RemoteSettings,
    ) -> Self {
        DeltaSyncClient {
            api,
            tokens,
            snapshots,
            per_page: settings.per_page.max(1),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
        }
    }

    pub fn snapshots(&self) -> &SnapshotRepository {
        &self.snapshots
    }

    /// Fetches the complete listing and replaces the local snapshot set.
    pub async fn full_sync(&self) -> SyncResult<SyncSummary> {
        let token = self.token().await?;
        self.full_sync_with(&token).await
    }

    /// Fetches records changed since the cursor and merges them.
    ///
    /// Runs a full sync instead when no cursor exists yet, or when the
    /// server refuses the delta query.
    pub async fn delta_sync(&self) -> SyncResult<SyncSummary> {
        let token = self.token().await?;

        let Some(cursor) = self.snapshots.cursor().await? else {
            info!("No sync cursor persisted, running full sync");
            return self.full_sync_with(&token).await;
        };

        let listing = match self.fetch_all(&token, Some(cursor)).await {
            Ok(listing) => listing,
            Err(err) if err.is_structural_rejection() => {
                warn!(
                    error = %err,
                    since = %cursor.to_query_param(),
                    "Delta query rejected, falling back to full sync"
                );
                let mut summary = self.full_sync_with(&token).await?;
                summary.fell_back = true;
                return Ok(summary);
            }
            Err(err) => return Err(err.into()),
        };

        let fetched = listing.products.len();
        let (stats, cursor) = self
            .snapshots
            .merge_remote(listing.products, SyncCursor::new(listing.as_of))
            .await?;

        info!(
            fetched,
            inserted = stats.inserted,
            updated = stats.updated,
            kept_local = stats.kept_local,
            cursor = %cursor.to_query_param(),
            "Delta sync complete"
        );

        Ok(SyncSummary {
            mode: SyncMode::Delta,
            fetched,
            pages: listing.pages,
            merge: Some(stats),
            cursor,
            fell_back: false,
        })
    }

    async fn full_sync_with(&self, token: &str) -> SyncResult<SyncSummary> {
        let listing = self.fetch_all(token, None).await?;
        let fetched = listing.products.len();

        let cursor = self
            .snapshots
            .replace_all(listing.products, SyncCursor::new(listing.as_of))
            .await?;

        info!(
            fetched,
            pages = listing.pages,
            cursor = %cursor.to_query_param(),
            "Full sync complete"
        );

        Ok(SyncSummary {
            mode: SyncMode::Full,
            fetched,
            pages: listing.pages,
            merge: None,
            cursor,
            fell_back: false,
        })
    }

    async fn token(&self) -> SyncResult<String> {
        self.tokens
            .bearer_token()
            .await
            .ok_or(SyncError::Unauthenticated)
    }

    /// Walks pages until a short page, the reported page count, or an error.
    async fn fetch_all(
        &self,
        token: &str,
        since: Option<SyncCursor>,
    ) -> Result<Listing, ApiError> {
        let mut products = Vec::new();
        let mut as_of = None;
        let mut page = 1;

        loop {
            let query = ListQuery {
                page,
                per_page: self.per_page,
                since,
            };
            let listing =
                with_deadline(self.request_timeout, self.api.list_products(token, &query)).await?;

            let received = listing.products.len();
            let first_as_of = *as_of.get_or_insert(listing.as_of);
            products.extend(listing.products);

            debug!(page, received, as_of = %first_as_of, "Fetched listing page");

            let short_page = received < self.per_page as usize;
            let reached_total = listing.total_pages.is_some_and(|total| page >= total);
            if short_page || reached_total {
                break;
            }
            if page >= MAX_PAGES {
                warn!(page, "Listing did not end, stopping at page limit");
                break;
            }
            page += 1;
        }

        Ok(Listing {
            products,
            as_of: as_of.unwrap_or_else(Utc::now),
            pages: page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::testing::{product, FakeInventory};
    use stockline_core::ProductKey;
    use stockline_db::StoreHandle;

    fn client(fake: Arc<FakeInventory>, handle: StoreHandle) -> DeltaSyncClient {
        let settings = RemoteSettings {
            per_page: 2,
            ..RemoteSettings::default()
        };
        DeltaSyncClient::new(
            fake,
            Arc::new(StaticToken::new("token")),
            SnapshotRepository::new(handle),
            &settings,
        )
    }

    fn catalog() -> Arc<FakeInventory> {
        Arc::new(FakeInventory::with_products(
            (1..=5).map(|id| product(id, id * 10)),
        ))
    }

    #[tokio::test]
    async fn test_full_sync_pages_until_short_page() {
        let fake = catalog();
        let as_of = Utc::now();
        fake.set_as_of(as_of);
        let sync = client(fake.clone(), StoreHandle::in_memory());

        let summary = sync.full_sync().await.unwrap();

        assert_eq!(summary.mode, SyncMode::Full);
        assert_eq!(summary.fetched, 5);
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.cursor, SyncCursor::new(as_of));
        assert_eq!(fake.list_calls().len(), 3);
        assert_eq!(sync.snapshots().count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_delta_without_cursor_runs_full_sync() {
        let fake = catalog();
        let sync = client(fake.clone(), StoreHandle::in_memory());

        let summary = sync.delta_sync().await.unwrap();

        assert_eq!(summary.mode, SyncMode::Full);
        assert!(fake.list_calls().iter().all(|q| q.since.is_none()));
    }

    #[tokio::test]
    async fn test_full_then_delta_without_changes() {
        let fake = catalog();
        let sync = client(fake.clone(), StoreHandle::in_memory());

        let full = sync.full_sync().await.unwrap();
        let before = sync.snapshots().load_all().await.unwrap();

        let delta = sync.delta_sync().await.unwrap();

        assert_eq!(delta.mode, SyncMode::Delta);
        assert_eq!(delta.fetched, 0);
        assert!(!delta.merge.unwrap().changed());
        assert!(delta.cursor >= full.cursor);
        assert_eq!(sync.snapshots().load_all().await.unwrap(), before);

        let last = fake.list_calls().pop().unwrap();
        assert_eq!(last.since, Some(full.cursor));
    }

    #[tokio::test]
    async fn test_repeated_delta_is_idempotent_and_monotonic() {
        let fake = catalog();
        let sync = client(fake.clone(), StoreHandle::in_memory());
        sync.full_sync().await.unwrap();

        let first = sync.delta_sync().await.unwrap();
        let snapshot = sync.snapshots().load_all().await.unwrap();

        // Server clock going backward must not move the cursor back
        fake.set_as_of(first.cursor.last_sync_timestamp - chrono::Duration::minutes(10));
        let second = sync.delta_sync().await.unwrap();

        assert_eq!(second.cursor, first.cursor);
        assert_eq!(sync.snapshots().load_all().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_delta_merges_changed_records() {
        let fake = catalog();
        let sync = client(fake.clone(), StoreHandle::in_memory());
        sync.full_sync().await.unwrap();

        let mut changed = product(3, 1);
        changed.updated_at = Utc::now() + chrono::Duration::seconds(5);
        fake.put_product(changed);
        fake.set_as_of(Utc::now() + chrono::Duration::seconds(10));

        let summary = sync.delta_sync().await.unwrap();

        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.merge.unwrap().updated, 1);
        let local = sync.snapshots().get(ProductKey::product(3)).await.unwrap();
        assert_eq!(local.unwrap().stock_quantity, 1);
    }

    #[tokio::test]
    async fn test_failed_page_leaves_store_unchanged() {
        let fake = catalog();
        let handle = StoreHandle::in_memory();
        let sync = client(fake.clone(), handle);
        let full = sync.full_sync().await.unwrap();
        let before = sync.snapshots().load_all().await.unwrap();

        let mut changed = product(1, 0);
        changed.updated_at = Utc::now() + chrono::Duration::seconds(5);
        fake.put_product(changed);
        for id in 6..=8 {
            let mut p = product(id, 1);
            p.updated_at = Utc::now() + chrono::Duration::seconds(5);
            fake.put_product(p);
        }
        fake.set_as_of(Utc::now() + chrono::Duration::seconds(10));
        fake.fail_page(2, 500);

        let err = sync.delta_sync().await.unwrap_err();

        assert!(matches!(err, SyncError::Api(ApiError::Status { status: 500, .. })));
        assert_eq!(sync.snapshots().load_all().await.unwrap(), before);
        assert_eq!(sync.snapshots().cursor().await.unwrap(), Some(full.cursor));
    }

    #[tokio::test]
    async fn test_rejected_cursor_falls_back_to_full_sync() {
        let fake = catalog();
        let sync = client(fake.clone(), StoreHandle::in_memory());
        sync.full_sync().await.unwrap();
        fake.reject_since(Some(410));

        let summary = sync.delta_sync().await.unwrap();

        assert!(summary.fell_back);
        assert_eq!(summary.mode, SyncMode::Full);
        assert_eq!(summary.fetched, 5);
    }

    #[tokio::test]
    async fn test_transient_failure_does_not_fall_back() {
        let fake = catalog();
        let sync = client(fake.clone(), StoreHandle::in_memory());
        sync.full_sync().await.unwrap();
        let calls = fake.list_calls().len();
        fake.reject_since(Some(503));

        let err = sync.delta_sync().await.unwrap_err();

        assert!(err.is_retryable());
        // One rejected delta call, no full-sync pages and no retry
        assert_eq!(fake.list_calls().len(), calls + 1);
    }

    #[tokio::test]
    async fn test_missing_token_makes_no_calls() {
        let fake = catalog();
        let sync = DeltaSyncClient::new(
            fake.clone(),
            Arc::new(StaticToken::none()),
            SnapshotRepository::new(StoreHandle::in_memory()),
            &RemoteSettings::default(),
        );

        assert!(matches!(
            sync.delta_sync().await,
            Err(SyncError::Unauthenticated)
        ));
        assert_eq!(fake.total_calls(), 0);
    }
}
