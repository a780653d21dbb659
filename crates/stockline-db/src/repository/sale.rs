//! # Sale Recorder
//!
//! Hook the checkout path calls when a sale commits locally.
//!
//! ## What One Commit Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE set_many                                       │
//! │                                                                         │
//! │  1. catalog.products   stock_quantity -= qty (floor 0)                 │
//! │                        updated_at = now                                │
//! │                                                                         │
//! │  2. dispatch.queue     + StockDelta { adjustment: -qty } per line      │
//! │                                                                         │
//! │  The local decrement carries the commit time, so a delta sync that    │
//! │  returns an older remote record does not undo it before dispatch.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use stockline_core::validation::{validate_product_id, validate_sale_quantity};
use stockline_core::{index_snapshots, ProductSnapshot, SaleLine, StockChange, StockDelta};
use tracing::{info, warn};

use super::{PRODUCTS_KEY, QUEUE_KEY};
use crate::error::DbResult;
use crate::store::{encode_entry, StoreHandle};

/// Records committed sales against local stock.
#[derive(Debug, Clone)]
pub struct SaleRecorder {
    handle: StoreHandle,
}

impl SaleRecorder {
    pub fn new(handle: StoreHandle) -> Self {
        SaleRecorder { handle }
    }

    /// Decrements local stock and enqueues one adjustment per line.
    ///
    /// Every line is validated before anything is written. Lines for
    /// products not yet known locally still enqueue their delta; the remote
    /// record is authoritative.
    pub async fn commit_sale(&self, lines: &[SaleLine]) -> DbResult<Vec<StockDelta>> {
        for line in lines {
            validate_product_id(line.product_id)?;
            validate_sale_quantity(line.quantity)?;
        }
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.handle.write_lock().await;

        let stored: Vec<ProductSnapshot> = self
            .handle
            .get_json(PRODUCTS_KEY)
            .await?
            .unwrap_or_default();
        let mut snapshots = index_snapshots(stored);
        let mut pending: Vec<StockDelta> =
            self.handle.get_json(QUEUE_KEY).await?.unwrap_or_default();

        let now = Utc::now();
        let mut deltas = Vec::with_capacity(lines.len());

        for line in lines {
            match snapshots.get_mut(&line.key()) {
                Some(snapshot) => {
                    snapshot.stock_quantity = (snapshot.stock_quantity - line.quantity).max(0);
                    snapshot.updated_at = now;
                }
                None => warn!(product = %line.key(), "Sold product is not in the local catalog"),
            }
            deltas.push(StockDelta::new(
                line.key(),
                StockChange::Adjustment(-line.quantity),
            ));
        }

        pending.extend(deltas.iter().cloned());
        let products: Vec<&ProductSnapshot> = snapshots.values().collect();
        let entries = vec![
            encode_entry(PRODUCTS_KEY, &products)?,
            encode_entry(QUEUE_KEY, &pending)?,
        ];
        self.handle.store().set_many(&entries).await?;

        info!(lines = lines.len(), "Sale committed to local stock");
        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::{SnapshotRepository, StockDeltaQueue};
    use chrono::Duration;
    use stockline_core::{ProductKey, SyncCursor};

    fn snapshot(id: i64, stock: i64) -> ProductSnapshot {
        ProductSnapshot {
            id,
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            price_cents: 350,
            stock_quantity: stock,
            variation_id: None,
            updated_at: Utc::now() - Duration::hours(2),
        }
    }

    async fn seeded() -> (StoreHandle, SnapshotRepository) {
        let handle = StoreHandle::in_memory();
        let snapshots = SnapshotRepository::new(handle.clone());
        snapshots
            .replace_all(vec![snapshot(1, 10), snapshot(2, 1)], SyncCursor::new(Utc::now()))
            .await
            .unwrap();
        (handle, snapshots)
    }

    fn line(product_id: i64, quantity: i64) -> SaleLine {
        SaleLine {
            product_id,
            variation_id: None,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_commit_decrements_and_enqueues() {
        let (handle, snapshots) = seeded().await;
        let recorder = SaleRecorder::new(handle.clone());

        let deltas = recorder
            .commit_sale(&[line(1, 3), line(2, 5)])
            .await
            .unwrap();

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].change, StockChange::Adjustment(-3));

        let p1 = snapshots.get(ProductKey::product(1)).await.unwrap().unwrap();
        let p2 = snapshots.get(ProductKey::product(2)).await.unwrap().unwrap();
        assert_eq!(p1.stock_quantity, 7);
        assert_eq!(p2.stock_quantity, 0);

        let queue = StockDeltaQueue::new(handle);
        assert_eq!(queue.count_pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_line_writes_nothing() {
        let (handle, snapshots) = seeded().await;
        let recorder = SaleRecorder::new(handle.clone());

        let err = recorder
            .commit_sale(&[line(1, 2), line(2, 0)])
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(
            snapshots.get(ProductKey::product(1)).await.unwrap().unwrap().stock_quantity,
            10
        );
        assert_eq!(StockDeltaQueue::new(handle).count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_product_still_enqueues() {
        let (handle, _) = seeded().await;
        let recorder = SaleRecorder::new(handle.clone());

        recorder.commit_sale(&[line(99, 1)]).await.unwrap();

        assert_eq!(StockDeltaQueue::new(handle).count_pending().await.unwrap(), 1);
    }
}
