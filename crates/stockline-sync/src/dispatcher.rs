//! # Batched Update Dispatcher
//!
//! Pushes queued stock deltas to the remote inventory service.
//!
//! ## Dispatch Run
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Dispatch Run (batch size 3)                        │
//! │                                                                         │
//! │  deltas: d1 d2 d3 │ d4 d5 d6 │ d7 ...                                  │
//! │          ───────── ──────────                                           │
//! │          batch 1    batch 2      batches run one after another,        │
//! │          (3 concurrent)          500ms pause in between                │
//! │                                                                         │
//! │  Per item:                                                             │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ 1. absolute < 0          ──► failed, no call                     │  │
//! │  │ 2. lock the product key (same-key items never interleave)       │  │
//! │  │ 3. adjustment? read current stock, final = max(0, cur + adj)    │  │
//! │  │ 4. PUT final under the request deadline                         │  │
//! │  │       429/503/timeout ──► back off 1s, 2s ... retry             │  │
//! │  │       other failure   ──► failed                                │  │
//! │  │ 5. ack without our id ──► one verification read                 │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  Output: UpdateResult per item in input order, plus counts and an      │
//! │  outcome. Item failures never fail the run.                            │
//! │                                                                         │
//! │  Queue outcome per failed item:                                        │
//! │    unreachable / overloaded / 401 / 403 ──► Deferred (stays pending)   │
//! │    anything else                        ──► Failed (dead letter)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stockline_core::{
    DispatchReport, DispatchRequest, ProductKey, StockChange, StockDelta, UpdateResult,
};
use stockline_db::DeltaOutcome;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::config::SyncConfig;
use crate::error::{ApiError, SyncError, SyncResult};
use crate::remote::{with_deadline, InventoryApi};
use crate::retry::{execute_with_retry, RetryPolicy};

/// Result of a dispatch run: the caller-facing report and what the queue
/// should do with each delta.
#[derive(Debug, Clone)]
pub struct DispatchRun {
    pub report: DispatchReport,
    pub outcomes: Vec<DeltaOutcome>,
}

/// One item after all its attempts.
struct ItemResult {
    id: Uuid,
    key: ProductKey,
    result: Result<(), ItemFailure>,
    attempts: u32,
}

struct ItemFailure {
    error: String,
    /// Keep the delta queued; the remote never judged it.
    deferred: bool,
}

impl ItemFailure {
    fn rejected(error: String) -> Self {
        ItemFailure {
            error,
            deferred: false,
        }
    }
}

impl From<ApiError> for ItemFailure {
    fn from(err: ApiError) -> Self {
        ItemFailure {
            deferred: err.defers_delivery(),
            error: err.to_string(),
        }
    }
}

/// Sends stock updates in throttled, bounded batches.
#[derive(Clone)]
pub struct UpdateDispatcher {
    api: Arc<dyn InventoryApi>,
    tokens: Arc<dyn TokenProvider>,
    policy: RetryPolicy,
    batch_size: usize,
    inter_batch_delay: Duration,
    request_timeout: Duration,
}

impl UpdateDispatcher {
    pub fn new(
        api: Arc<dyn InventoryApi>,
        tokens: Arc<dyn TokenProvider>,
        config: &SyncConfig,
    ) -> Self {
        UpdateDispatcher {
            api,
            tokens,
            policy: RetryPolicy::from(&config.dispatch),
            batch_size: config.dispatch.batch_size.max(1),
            inter_batch_delay: config.inter_batch_delay(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Handles the public `{updates: [...]}` call.
    pub async fn dispatch_request(&self, request: DispatchRequest) -> SyncResult<DispatchReport> {
        let deltas: Vec<StockDelta> = request.updates.iter().map(StockDelta::from).collect();
        Ok(self.dispatch(&deltas).await?.report)
    }

    /// Dispatches `deltas` in order.
    ///
    /// Fails as a whole only when no bearer token is available, before any
    /// call is made.
    pub async fn dispatch(&self, deltas: &[StockDelta]) -> SyncResult<DispatchRun> {
        if deltas.is_empty() {
            return Ok(DispatchRun {
                report: DispatchReport::from_results(Vec::new()),
                outcomes: Vec::new(),
            });
        }

        let token = self
            .tokens
            .bearer_token()
            .await
            .ok_or(SyncError::Unauthenticated)?;

        let mut locks: HashMap<ProductKey, Arc<Mutex<()>>> = HashMap::new();
        for delta in deltas {
            locks.entry(delta.key()).or_default();
        }

        let batches = deltas.len().div_ceil(self.batch_size);
        let mut items = Vec::with_capacity(deltas.len());

        for (index, batch) in deltas.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }
            debug!(batch = index + 1, of = batches, size = batch.len(), "Dispatching batch");

            let running = batch.iter().map(|delta| {
                let lock = locks.get(&delta.key()).cloned().unwrap_or_default();
                self.apply(&token, delta, lock)
            });
            items.extend(join_all(running).await);
        }

        let mut details = Vec::with_capacity(items.len());
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            match item.result {
                Ok(()) => {
                    details.push(UpdateResult::updated(item.key));
                    outcomes.push(DeltaOutcome::Applied { id: item.id });
                }
                Err(failure) => {
                    details.push(UpdateResult::failed(item.key, failure.error.clone()));
                    outcomes.push(if failure.deferred {
                        DeltaOutcome::Deferred {
                            id: item.id,
                            error: failure.error,
                            attempts: item.attempts,
                        }
                    } else {
                        DeltaOutcome::Failed {
                            id: item.id,
                            error: failure.error,
                            attempts: item.attempts,
                        }
                    });
                }
            }
        }

        let report = DispatchReport::from_results(details);
        info!(
            updated = report.updated,
            failed = report.failed,
            outcome = ?report.outcome,
            "Dispatch run complete"
        );
        Ok(DispatchRun { report, outcomes })
    }

    async fn apply(&self, token: &str, delta: &StockDelta, lock: Arc<Mutex<()>>) -> ItemResult {
        let key = delta.key();
        let item = |result, attempts| ItemResult {
            id: delta.id,
            key,
            result,
            attempts,
        };

        if let StockChange::Absolute(quantity) = delta.change {
            if quantity < 0 {
                warn!(product = %key, quantity, "Rejecting negative stock quantity");
                return item(
                    Err(ItemFailure::rejected(format!("invalid quantity: {quantity}"))),
                    0,
                );
            }
        }

        let _guard = lock.lock().await;

        let (quantity, read_attempts) = match self.resolve(token, key, delta.change).await {
            Ok(resolved) => resolved,
            Err((err, attempts)) => {
                warn!(product = %key, error = %err, "Could not read current stock");
                return item(Err(err.into()), attempts);
            }
        };

        let outcome = execute_with_retry(&self.policy, ApiError::is_retryable, |attempt| {
            debug!(product = %key, quantity, attempt, "Sending stock update");
            self.write(token, key, quantity)
        })
        .await;

        let attempts = read_attempts + outcome.attempts;
        match outcome.result {
            Ok(()) => item(Ok(()), attempts),
            Err(err) => {
                warn!(
                    product = %key,
                    attempts = outcome.attempts,
                    error = %err,
                    "Stock update failed"
                );
                item(Err(err.into()), attempts)
            }
        }
    }

    /// Final quantity to write. Adjustments read the remote value now, so
    /// retries of the write stay idempotent.
    async fn resolve(
        &self,
        token: &str,
        key: ProductKey,
        change: StockChange,
    ) -> Result<(i64, u32), (ApiError, u32)> {
        let StockChange::Adjustment(adjustment) = change else {
            return Ok((change.resolve(0), 0));
        };

        let read = execute_with_retry(&self.policy, ApiError::is_retryable, |_| {
            with_deadline(self.request_timeout, self.api.get_product(token, key))
        })
        .await;

        match read.result {
            Ok(record) => {
                let target = change.resolve(record.stock_quantity);
                if record.stock_quantity.saturating_add(adjustment) < 0 {
                    warn!(
                        product = %key,
                        current = record.stock_quantity,
                        adjustment,
                        "Adjustment would go negative, clamping to 0"
                    );
                }
                Ok((target, read.attempts))
            }
            Err(err) => Err((err, read.attempts)),
        }
    }

    /// One write attempt, plus a verification read when the ack does not
    /// echo our record id.
    async fn write(&self, token: &str, key: ProductKey, quantity: i64) -> Result<(), ApiError> {
        let ack = with_deadline(
            self.request_timeout,
            self.api.update_stock(token, key, quantity),
        )
        .await?;

        if ack.id == Some(key.remote_id()) {
            return Ok(());
        }

        debug!(product = %key, ack_id = ?ack.id, "Ack lacks record id, verifying");
        let record = with_deadline(self.request_timeout, self.api.get_product(token, key)).await?;
        if record.stock_quantity == quantity {
            Ok(())
        } else {
            Err(ApiError::Mismatch {
                expected: quantity,
                actual: record.stock_quantity,
            })
        }
    }
}
