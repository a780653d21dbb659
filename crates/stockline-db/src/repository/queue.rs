//! # Stock Delta Queue
//!
//! Durable outbox of stock updates waiting for the dispatcher.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Stock Delta Lifecycle                                │
//! │                                                                         │
//! │  SaleRecorder::commit_sale / enqueue_repairs                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  dispatch.queue (pending, oldest first)                                │
//! │       │                                                                 │
//! │       │  dispatcher run                                                 │
//! │       ├── updated  ──► removed (settle)                                │
//! │       ├── deferred ──► stays pending, attempt_count and last_error     │
//! │       │                updated; the next run tries again               │
//! │       └── failed   ──► dispatch.dead_letter                            │
//! │                          status = failed, last_error, attempt_count    │
//! │                          never retried automatically                   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A delta is never lost between the two lists (one set_many)          │
//! │  • Deltas enqueued while a run is in flight are left untouched         │
//! │  • The dead letter keeps at most `dead_letter_limit` entries,          │
//! │    dropping the oldest                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockline_core::{DeltaStatus, StockDelta};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DEAD_LETTER_KEY, QUEUE_KEY};

/// Default bound on the dead letter list.
pub const DEFAULT_DEAD_LETTER_LIMIT: usize = 500;
use crate::error::DbResult;
use crate::store::{encode_entry, StoreHandle};

/// Final outcome for one delta after a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Remote accepted the update; drop the delta.
    Applied { id: Uuid },
    /// The remote never judged the update (unreachable, overloaded or
    /// credential refused); keep the delta pending.
    Deferred {
        id: Uuid,
        error: String,
        attempts: u32,
    },
    /// Dispatcher gave up; move the delta to the dead letter list.
    Failed {
        id: Uuid,
        error: String,
        attempts: u32,
    },
}

/// Repository for pending and dead-lettered stock deltas.
#[derive(Debug, Clone)]
pub struct StockDeltaQueue {
    handle: StoreHandle,
    dead_letter_limit: usize,
}

impl StockDeltaQueue {
    pub fn new(handle: StoreHandle) -> Self {
        Self::with_dead_letter_limit(handle, DEFAULT_DEAD_LETTER_LIMIT)
    }

    pub fn with_dead_letter_limit(handle: StoreHandle, limit: usize) -> Self {
        StockDeltaQueue {
            handle,
            dead_letter_limit: limit.max(1),
        }
    }

    /// Appends deltas to the pending queue.
    pub async fn enqueue(&self, deltas: Vec<StockDelta>) -> DbResult<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let _guard = self.handle.write_lock().await;

        let mut pending = self.load(QUEUE_KEY).await?;
        debug!(count = deltas.len(), "Queuing stock deltas");
        pending.extend(deltas);
        self.handle.set_json(QUEUE_KEY, &pending).await
    }

    /// Returns up to `limit` pending deltas, oldest first.
    pub async fn pending(&self, limit: usize) -> DbResult<Vec<StockDelta>> {
        let mut pending = self.load(QUEUE_KEY).await?;
        // Stable: equal timestamps keep insertion order
        pending.sort_by_key(|d| d.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    /// Dead-lettered deltas, oldest first.
    pub async fn failed(&self) -> DbResult<Vec<StockDelta>> {
        self.load(DEAD_LETTER_KEY).await
    }

    pub async fn count_pending(&self) -> DbResult<usize> {
        Ok(self.load(QUEUE_KEY).await?.len())
    }

    pub async fn count_failed(&self) -> DbResult<usize> {
        Ok(self.load(DEAD_LETTER_KEY).await?.len())
    }

    /// Removes successfully applied deltas.
    pub async fn mark_applied(&self, ids: &[Uuid]) -> DbResult<()> {
        let outcomes: Vec<DeltaOutcome> = ids
            .iter()
            .map(|&id| DeltaOutcome::Applied { id })
            .collect();
        self.settle(&outcomes).await
    }

    /// Moves one delta to the dead letter list.
    pub async fn mark_failed(&self, id: Uuid, error: &str, attempts: u32) -> DbResult<()> {
        self.settle(&[DeltaOutcome::Failed {
            id,
            error: error.to_string(),
            attempts,
        }])
        .await
    }

    /// Applies the outcomes of a dispatch run in one atomic write.
    pub async fn settle(&self, outcomes: &[DeltaOutcome]) -> DbResult<()> {
        if outcomes.is_empty() {
            return Ok(());
        }
        let _guard = self.handle.write_lock().await;

        let mut pending = self.load(QUEUE_KEY).await?;
        let mut dead = self.load(DEAD_LETTER_KEY).await?;

        for outcome in outcomes {
            match outcome {
                DeltaOutcome::Applied { id } => pending.retain(|d| d.id != *id),
                DeltaOutcome::Deferred {
                    id,
                    error,
                    attempts,
                } => {
                    let Some(delta) = pending.iter_mut().find(|d| d.id == *id) else {
                        continue;
                    };
                    delta.attempt_count = delta.attempt_count.saturating_add(*attempts);
                    delta.last_error = Some(error.clone());
                    debug!(
                        delta_id = %delta.id,
                        product = %delta.key(),
                        error = %error,
                        "Stock delta left pending"
                    );
                }
                DeltaOutcome::Failed {
                    id,
                    error,
                    attempts,
                } => {
                    let Some(pos) = pending.iter().position(|d| d.id == *id) else {
                        warn!(delta_id = %id, "Failed delta no longer pending");
                        continue;
                    };
                    let mut delta = pending.remove(pos);
                    delta.status = DeltaStatus::Failed;
                    delta.attempt_count = delta.attempt_count.saturating_add(*attempts);
                    delta.last_error = Some(error.clone());
                    warn!(
                        delta_id = %delta.id,
                        product = %delta.key(),
                        error = %error,
                        "Stock delta moved to dead letter"
                    );
                    dead.push(delta);
                }
            }
        }

        if dead.len() > self.dead_letter_limit {
            let excess = dead.len() - self.dead_letter_limit;
            warn!(
                dropped = excess,
                limit = self.dead_letter_limit,
                "Dead letter full, dropping oldest"
            );
            dead.drain(..excess);
        }

        let entries = vec![
            encode_entry(QUEUE_KEY, &pending)?,
            encode_entry(DEAD_LETTER_KEY, &dead)?,
        ];
        self.handle.store().set_many(&entries).await
    }

    /// Drops dead-lettered deltas after operator review.
    ///
    /// Returns how many were removed.
    pub async fn discard_failed(&self, ids: &[Uuid]) -> DbResult<usize> {
        let _guard = self.handle.write_lock().await;

        let mut dead = self.load(DEAD_LETTER_KEY).await?;
        let before = dead.len();
        dead.retain(|d| !ids.contains(&d.id));
        let removed = before - dead.len();

        if removed > 0 {
            self.handle.set_json(DEAD_LETTER_KEY, &dead).await?;
        }
        Ok(removed)
    }

    async fn load(&self, key: &str) -> DbResult<Vec<StockDelta>> {
        Ok(self.handle.get_json(key).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stockline_core::{ProductKey, StockChange};

    fn delta(id: i64) -> StockDelta {
        StockDelta::new(ProductKey::product(id), StockChange::Adjustment(-1))
    }

    #[tokio::test]
    async fn test_pending_is_oldest_first() {
        let queue = StockDeltaQueue::new(StoreHandle::in_memory());
        let mut newer = delta(1);
        let mut older = delta(2);
        newer.created_at = Utc::now();
        older.created_at = Utc::now() - Duration::minutes(3);

        queue.enqueue(vec![newer.clone(), older.clone()]).await.unwrap();

        let pending = queue.pending(10).await.unwrap();
        assert_eq!(pending[0].id, older.id);
        assert_eq!(pending[1].id, newer.id);
        assert_eq!(queue.pending(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settle_removes_applied_and_dead_letters_failed() {
        let queue = StockDeltaQueue::new(StoreHandle::in_memory());
        let (a, b, c) = (delta(1), delta(2), delta(3));
        queue
            .enqueue(vec![a.clone(), b.clone(), c.clone()])
            .await
            .unwrap();

        queue
            .settle(&[
                DeltaOutcome::Applied { id: a.id },
                DeltaOutcome::Failed {
                    id: b.id,
                    error: "HTTP 404".to_string(),
                    attempts: 1,
                },
            ])
            .await
            .unwrap();

        assert_eq!(queue.count_pending().await.unwrap(), 1);
        assert_eq!(queue.pending(10).await.unwrap()[0].id, c.id);

        let failed = queue.failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, DeltaStatus::Failed);
        assert_eq!(failed[0].attempt_count, 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("HTTP 404"));
    }

    #[tokio::test]
    async fn test_deferred_delta_stays_pending() {
        let queue = StockDeltaQueue::new(StoreHandle::in_memory());
        let d = delta(1);
        queue.enqueue(vec![d.clone()]).await.unwrap();

        for _ in 0..2 {
            queue
                .settle(&[DeltaOutcome::Deferred {
                    id: d.id,
                    error: "network error: connection refused".to_string(),
                    attempts: 1,
                }])
                .await
                .unwrap();
        }

        let pending = queue.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, DeltaStatus::Pending);
        assert_eq!(pending[0].attempt_count, 2);
        assert_eq!(
            pending[0].last_error.as_deref(),
            Some("network error: connection refused")
        );
        assert_eq!(queue.count_failed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_drops_oldest_past_limit() {
        let queue = StockDeltaQueue::with_dead_letter_limit(StoreHandle::in_memory(), 2);
        let deltas: Vec<StockDelta> = (1..=3).map(delta).collect();
        queue.enqueue(deltas.clone()).await.unwrap();

        for d in &deltas {
            queue.mark_failed(d.id, "HTTP 404", 1).await.unwrap();
        }

        let failed = queue.failed().await.unwrap();
        let ids: Vec<Uuid> = failed.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![deltas[1].id, deltas[2].id]);
    }

    #[tokio::test]
    async fn test_discard_failed() {
        let queue = StockDeltaQueue::new(StoreHandle::in_memory());
        let d = delta(1);
        queue.enqueue(vec![d.clone()]).await.unwrap();
        queue.mark_failed(d.id, "HTTP 500", 1).await.unwrap();
        assert_eq!(queue.count_failed().await.unwrap(), 1);

        assert_eq!(queue.discard_failed(&[d.id]).await.unwrap(), 1);
        assert_eq!(queue.discard_failed(&[d.id]).await.unwrap(), 0);
        assert_eq!(queue.count_failed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_applied_ignores_unknown_ids() {
        let queue = StockDeltaQueue::new(StoreHandle::in_memory());
        queue.enqueue(vec![delta(1)]).await.unwrap();

        queue.mark_applied(&[Uuid::new_v4()]).await.unwrap();

        assert_eq!(queue.count_pending().await.unwrap(), 1);
    }
}
