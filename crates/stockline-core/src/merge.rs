//! # Last-Write-Wins Merge
//!
//! Folds remote product snapshots into the local set.
//!
//! ## Merge Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  For each incoming snapshot, keyed by (id, variation_id):               │
//! │                                                                         │
//! │   local missing                  ──► insert incoming                   │
//! │   incoming.updated_at >= local   ──► incoming replaces local           │
//! │   incoming.updated_at <  local   ──► local kept (pending sale wins)    │
//! │                                                                         │
//! │  Applying the same page twice leaves the set unchanged.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use crate::types::{ProductKey, ProductSnapshot};

/// Local snapshot set, unique by product key.
pub type SnapshotSet = BTreeMap<ProductKey, ProductSnapshot>;

/// What a merge did, for logging and sync summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub kept_local: usize,
    pub unchanged: usize,
}

impl MergeStats {
    /// Returns true when the merge changed the set.
    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

/// Builds a keyed set from a list. Later duplicates win.
pub fn index_snapshots(snapshots: impl IntoIterator<Item = ProductSnapshot>) -> SnapshotSet {
    snapshots.into_iter().map(|s| (s.key(), s)).collect()
}

/// Merges `incoming` into `local` using last-write-wins on `updated_at`.
pub fn merge_last_write_wins(
    local: &mut SnapshotSet,
    incoming: impl IntoIterator<Item = ProductSnapshot>,
) -> MergeStats {
    let mut stats = MergeStats::default();

    for snapshot in incoming {
        match local.get_mut(&snapshot.key()) {
            None => {
                local.insert(snapshot.key(), snapshot);
                stats.inserted += 1;
            }
            Some(existing) if *existing == snapshot => stats.unchanged += 1,
            Some(existing) if snapshot.updated_at >= existing.updated_at => {
                *existing = snapshot;
                stats.updated += 1;
            }
            Some(_) => stats.kept_local += 1,
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn snapshot(id: i64, stock: i64, at: DateTime<Utc>) -> ProductSnapshot {
        ProductSnapshot {
            id,
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            price_cents: 500,
            stock_quantity: stock,
            variation_id: None,
            updated_at: at,
        }
    }

    #[test]
    fn test_newer_remote_replaces_local() {
        let t0 = Utc::now();
        let mut local = index_snapshots([snapshot(1, 10, t0)]);

        let stats = merge_last_write_wins(&mut local, [snapshot(1, 4, t0 + Duration::seconds(5))]);

        assert_eq!(stats.updated, 1);
        assert_eq!(local[&ProductKey::product(1)].stock_quantity, 4);
    }

    #[test]
    fn test_newer_local_is_kept() {
        let t0 = Utc::now();
        let mut local = index_snapshots([snapshot(1, 8, t0)]);

        let stats = merge_last_write_wins(&mut local, [snapshot(1, 10, t0 - Duration::minutes(1))]);

        assert_eq!(stats.kept_local, 1);
        assert_eq!(local[&ProductKey::product(1)].stock_quantity, 8);
    }

    #[test]
    fn test_equal_timestamps_take_remote() {
        let t0 = Utc::now();
        let mut local = index_snapshots([snapshot(1, 8, t0)]);

        merge_last_write_wins(&mut local, [snapshot(1, 9, t0)]);

        assert_eq!(local[&ProductKey::product(1)].stock_quantity, 9);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let t0 = Utc::now();
        let mut local = index_snapshots([snapshot(1, 8, t0)]);
        let page = vec![snapshot(1, 3, t0 + Duration::seconds(1)), snapshot(2, 7, t0)];

        let first = merge_last_write_wins(&mut local, page.clone());
        let after_first = local.clone();
        let second = merge_last_write_wins(&mut local, page);

        assert!(first.changed());
        assert_eq!(first.inserted, 1);
        assert!(!second.changed());
        assert_eq!(second.unchanged, 2);
        assert_eq!(local, after_first);
    }

    #[test]
    fn test_variations_are_distinct_keys() {
        let t0 = Utc::now();
        let mut parent = snapshot(5, 1, t0);
        let mut child = snapshot(5, 2, t0);
        child.variation_id = Some(51);
        parent.variation_id = None;

        let set = index_snapshots([parent, child]);
        assert_eq!(set.len(), 2);
        assert_eq!(set[&ProductKey::variation(5, 51)].stock_quantity, 2);
    }
}
