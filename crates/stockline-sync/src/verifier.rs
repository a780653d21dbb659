//! # Reconciliation Verifier
//!
//! Reads remote stock back and compares it with what the terminal expects.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  [{productId, expectedQuantity}, ...]                                  │
//! │       │                                                                 │
//! │       ▼   at most max_concurrency reads in flight, one deadline each   │
//! │  GET /products/{id}                                                    │
//! │       │                                                                 │
//! │       ├── equal      ──► verified                                      │
//! │       ├── different  ──► mismatch  (currentStock, expectedStock)       │
//! │       └── read error ──► failed    (no retry)                          │
//! │                                                                         │
//! │  Detail order follows input order. Repairs are the caller's choice:    │
//! │  repair_deltas() turns mismatches into absolute deltas to enqueue.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use stockline_core::{ExpectedStock, StockDelta, VerificationResult, VerifyReport, VerifyRequest};
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{with_deadline, InventoryApi};

/// Verifies remote stock against expectations.
#[derive(Clone)]
pub struct ReconciliationVerifier {
    api: Arc<dyn InventoryApi>,
    tokens: Arc<dyn TokenProvider>,
    max_concurrency: usize,
    request_timeout: Duration,
}

impl ReconciliationVerifier {
    pub fn new(
        api: Arc<dyn InventoryApi>,
        tokens: Arc<dyn TokenProvider>,
        config: &SyncConfig,
    ) -> Self {
        ReconciliationVerifier {
            api,
            tokens,
            max_concurrency: config.verify.max_concurrency.max(1),
            request_timeout: config.request_timeout(),
        }
    }

    /// Handles the public `{updates: [...]}` call.
    pub async fn verify_request(&self, request: VerifyRequest) -> SyncResult<VerifyReport> {
        self.verify(&request.updates).await
    }

    pub async fn verify(&self, expected: &[ExpectedStock]) -> SyncResult<VerifyReport> {
        let token = self
            .tokens
            .bearer_token()
            .await
            .ok_or(SyncError::Unauthenticated)?;

        let details: Vec<VerificationResult> = stream::iter(expected)
            .map(|item| self.check(&token, item))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let report = VerifyReport::from_results(details);
        info!(
            verified = report.verified,
            mismatched = report.mismatched,
            failed = report.failed,
            "Verification complete"
        );
        Ok(report)
    }

    async fn check(&self, token: &str, item: &ExpectedStock) -> VerificationResult {
        let key = item.key();
        match with_deadline(self.request_timeout, self.api.get_product(token, key)).await {
            Ok(record) => {
                let result = VerificationResult::compare(item, record.stock_quantity);
                debug!(product = %key, status = ?result.status, "Verified stock");
                result
            }
            Err(err) => {
                warn!(product = %key, error = %err, "Verification read failed");
                VerificationResult::failed(item, err.to_string())
            }
        }
    }
}

/// Fresh absolute deltas that restore the expected stock of every
/// mismatched item.
pub fn repair_deltas(report: &VerifyReport) -> Vec<StockDelta> {
    report.mismatches().map(StockDelta::repair_for).collect()
}
