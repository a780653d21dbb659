//! # Snapshot Repository
//!
//! Local product snapshots and the sync cursor that dates them.
//!
//! ## Commit Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  replace_all(all, as_of)        full sync                              │
//! │  merge_remote(changed, as_of)   delta sync, last-write-wins            │
//! │                                                                         │
//! │  Both run under the store's write lock and write                       │
//! │                                                                         │
//! │     catalog.products ─┐                                                 │
//! │                       ├── one set_many ──► visible together or not     │
//! │     catalog.cursor ───┘                                                 │
//! │                                                                         │
//! │  The cursor written is max(stored, as_of): it never moves backward.    │
//! │  Incoming stock below 0 is stored as 0; records with invalid ids are   │
//! │  skipped.                                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockline_core::validation::{validate_snapshot, validate_stock_quantity};
use stockline_core::{
    index_snapshots, merge_last_write_wins, MergeStats, ProductKey, ProductSnapshot, SnapshotSet,
    SyncCursor,
};
use tracing::{debug, info, warn};

use super::{CURSOR_KEY, PRODUCTS_KEY};
use crate::error::DbResult;
use crate::store::{encode_entry, StoreHandle};

/// Repository for product snapshots and the sync cursor.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    handle: StoreHandle,
}

impl SnapshotRepository {
    pub fn new(handle: StoreHandle) -> Self {
        SnapshotRepository { handle }
    }

    /// Loads the whole local snapshot set.
    pub async fn load_all(&self) -> DbResult<SnapshotSet> {
        let stored: Option<Vec<ProductSnapshot>> = self.handle.get_json(PRODUCTS_KEY).await?;
        Ok(index_snapshots(stored.unwrap_or_default()))
    }

    /// Returns one snapshot by key.
    pub async fn get(&self, key: ProductKey) -> DbResult<Option<ProductSnapshot>> {
        Ok(self.load_all().await?.remove(&key))
    }

    /// Number of locally known products.
    pub async fn count(&self) -> DbResult<usize> {
        Ok(self.load_all().await?.len())
    }

    /// Returns the persisted cursor, or `None` before the first full sync.
    pub async fn cursor(&self) -> DbResult<Option<SyncCursor>> {
        self.handle.get_json(CURSOR_KEY).await
    }

    /// Replaces the entire snapshot set (full sync).
    ///
    /// Returns the cursor actually persisted.
    pub async fn replace_all(
        &self,
        snapshots: Vec<ProductSnapshot>,
        as_of: SyncCursor,
    ) -> DbResult<SyncCursor> {
        let _guard = self.handle.write_lock().await;

        let cursor = self.clamped(as_of).await?;
        let set = index_snapshots(admit(snapshots));
        self.write(&set, cursor).await?;

        info!(
            products = set.len(),
            cursor = %cursor.to_query_param(),
            "Replaced local snapshot set"
        );
        Ok(cursor)
    }

    /// Merges changed records into the local set (delta sync).
    ///
    /// When nothing changed only the cursor is advanced.
    pub async fn merge_remote(
        &self,
        incoming: Vec<ProductSnapshot>,
        as_of: SyncCursor,
    ) -> DbResult<(MergeStats, SyncCursor)> {
        let _guard = self.handle.write_lock().await;

        let mut set = self.load_all().await?;
        let stats = merge_last_write_wins(&mut set, admit(incoming));
        let previous = self.cursor().await?;
        let cursor = previous.map_or(as_of, |c| c.advance(as_of));

        if stats.changed() {
            self.write(&set, cursor).await?;
        } else if previous != Some(cursor) {
            self.handle.set_json(CURSOR_KEY, &cursor).await?;
        }

        debug!(
            inserted = stats.inserted,
            updated = stats.updated,
            kept_local = stats.kept_local,
            unchanged = stats.unchanged,
            "Merged remote snapshots"
        );
        Ok((stats, cursor))
    }

    async fn clamped(&self, as_of: SyncCursor) -> DbResult<SyncCursor> {
        Ok(self
            .cursor()
            .await?
            .map_or(as_of, |current| current.advance(as_of)))
    }

    async fn write(&self, set: &SnapshotSet, cursor: SyncCursor) -> DbResult<()> {
        let products: Vec<&ProductSnapshot> = set.values().collect();
        let entries = vec![
            encode_entry(PRODUCTS_KEY, &products)?,
            encode_entry(CURSOR_KEY, &cursor)?,
        ];
        self.handle.store().set_many(&entries).await
    }
}

/// Applies the stock rule to incoming remote records.
fn admit(snapshots: Vec<ProductSnapshot>) -> Vec<ProductSnapshot> {
    snapshots
        .into_iter()
        .filter_map(|mut snapshot| {
            if let Err(e) = validate_stock_quantity(snapshot.stock_quantity) {
                warn!(product = %snapshot.key(), error = %e, "Clamping remote stock to 0");
                snapshot.stock_quantity = 0;
            }
            match validate_snapshot(&snapshot) {
                Ok(()) => Some(snapshot),
                Err(e) => {
                    warn!(id = snapshot.id, error = %e, "Skipping invalid remote snapshot");
                    None
                }
            }
        })
        .collect()
}
