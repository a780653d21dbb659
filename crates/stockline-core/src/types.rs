//! # Domain Types
//!
//! Core types shared by every layer of the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  PERSISTED (Local Store)             EPHEMERAL (per call)              │
//! │  ───────────────────────             ────────────────────              │
//! │  ┌─────────────────┐                 ┌──────────────────────┐          │
//! │  │ ProductSnapshot │                 │ UpdateResult         │          │
//! │  │ (id, variation) │                 │ updated | failed     │          │
//! │  │ stock_quantity  │                 └──────────────────────┘          │
//! │  │ updated_at      │                 ┌──────────────────────┐          │
//! │  └─────────────────┘                 │ VerificationResult   │          │
//! │  ┌─────────────────┐                 │ verified | mismatch  │          │
//! │  │ SyncCursor      │                 │ | failed             │          │
//! │  │ (monotonic)     │                 └──────────────────────┘          │
//! │  └─────────────────┘                                                    │
//! │  ┌─────────────────┐                                                    │
//! │  │ StockDelta      │  newQuantity | adjustment                         │
//! │  │ pending/failed  │  owned by the dispatcher until terminal           │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::money::Money;

// =============================================================================
// Product Key
// =============================================================================

/// Identity of a stock-keeping record: a product, or one variation of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductKey {
    pub product_id: i64,
    pub variation_id: Option<i64>,
}

impl ProductKey {
    /// Key for a simple (non-variable) product.
    pub const fn product(product_id: i64) -> Self {
        ProductKey {
            product_id,
            variation_id: None,
        }
    }

    /// Key for a variation of a variable product.
    pub const fn variation(product_id: i64, variation_id: i64) -> Self {
        ProductKey {
            product_id,
            variation_id: Some(variation_id),
        }
    }

    pub const fn new(product_id: i64, variation_id: Option<i64>) -> Self {
        ProductKey {
            product_id,
            variation_id,
        }
    }

    /// The id the remote service echoes back for this record.
    ///
    /// Variation endpoints answer with the variation's own id.
    pub fn remote_id(&self) -> i64 {
        self.variation_id.unwrap_or(self.product_id)
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variation_id {
            Some(v) => write!(f, "{}/{}", self.product_id, v),
            None => write!(f, "{}", self.product_id),
        }
    }
}

// =============================================================================
// Product Snapshot
// =============================================================================

/// Local copy of one remote product record.
///
/// Unique by `(id, variation_id)`; `stock_quantity` is never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductSnapshot {
    /// Remote product id.
    pub id: i64,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name shown to cashier and on receipt.
    pub name: String,

    /// Price in cents (smallest currency unit).
    pub price_cents: i64,

    /// Units on hand as last known locally.
    pub stock_quantity: i64,

    /// Set when this snapshot describes a variation of `id`.
    pub variation_id: Option<i64>,

    /// Last modification time; drives last-write-wins merging.
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl ProductSnapshot {
    /// Returns the merge/identity key.
    #[inline]
    pub fn key(&self) -> ProductKey {
        ProductKey::new(self.id, self.variation_id)
    }

    /// Returns the price as Money.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Sync Cursor
// =============================================================================

/// Checkpoint of the last successful pull. One per terminal, never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    #[ts(as = "String")]
    pub last_sync_timestamp: DateTime<Utc>,
}

impl SyncCursor {
    pub const fn new(last_sync_timestamp: DateTime<Utc>) -> Self {
        SyncCursor {
            last_sync_timestamp,
        }
    }

    /// Returns the later of `self` and `candidate`.
    pub fn advance(self, candidate: SyncCursor) -> SyncCursor {
        self.max(candidate)
    }

    /// ISO 8601 form used for the `since=` query parameter.
    pub fn to_query_param(&self) -> String {
        self.last_sync_timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

// =============================================================================
// Stock Change
// =============================================================================

/// How a pending update changes stock.
///
/// Serialized as `{"newQuantity": n}` or `{"adjustment": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum StockChange {
    /// Set stock to an absolute value.
    #[serde(rename = "newQuantity")]
    Absolute(i64),

    /// Add to whatever the remote holds when the update is applied.
    #[serde(rename = "adjustment")]
    Adjustment(i64),
}

impl StockChange {
    /// Resolves the final quantity against the current remote stock.
    ///
    /// Negative results are clamped to zero.
    pub fn resolve(&self, current: i64) -> i64 {
        match *self {
            StockChange::Absolute(q) => q.max(0),
            StockChange::Adjustment(d) => current.saturating_add(d).max(0),
        }
    }

    /// Returns true when the remote value must be read before writing.
    pub fn needs_current(&self) -> bool {
        matches!(self, StockChange::Adjustment(_))
    }
}

// =============================================================================
// Stock Delta
// =============================================================================

/// Lifecycle of a queued delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaStatus {
    /// Waiting for the next dispatch run.
    #[default]
    Pending,
    /// Dispatcher gave up; kept for operator review.
    Failed,
}

/// A pending stock update produced by a committed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub id: Uuid,
    pub product_id: i64,
    #[serde(default)]
    pub variation_id: Option<i64>,
    pub change: StockChange,
    /// Remote attempts spent on this delta across dispatch runs.
    #[serde(default)]
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: DeltaStatus,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl StockDelta {
    /// Creates a fresh pending delta.
    pub fn new(key: ProductKey, change: StockChange) -> Self {
        StockDelta {
            id: Uuid::new_v4(),
            product_id: key.product_id,
            variation_id: key.variation_id,
            change,
            attempt_count: 0,
            created_at: Utc::now(),
            status: DeltaStatus::Pending,
            last_error: None,
        }
    }

    #[inline]
    pub fn key(&self) -> ProductKey {
        ProductKey::new(self.product_id, self.variation_id)
    }

    /// Fresh absolute delta that restores `expected_stock` on the remote.
    ///
    /// Used by callers that repair verification mismatches by re-enqueueing.
    pub fn repair_for(result: &VerificationResult) -> Self {
        StockDelta::new(
            ProductKey::new(result.product_id, result.variation_id),
            StockChange::Absolute(result.expected_stock),
        )
    }
}

impl From<&StockUpdateRequest> for StockDelta {
    fn from(req: &StockUpdateRequest) -> Self {
        StockDelta::new(ProductKey::new(req.product_id, req.variation_id), req.change)
    }
}

// =============================================================================
// Dispatcher Public Call
// =============================================================================

/// One update in a dispatcher call: `{productId, variationId?, newQuantity | adjustment}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdateRequest {
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<i64>,
    #[serde(flatten)]
    pub change: StockChange,
}

/// Dispatcher call body: `{updates: [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub updates: Vec<StockUpdateRequest>,
}

/// Terminal status of one dispatched update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Updated,
    Failed,
}

/// Per-item dispatch outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<i64>,
    pub status: UpdateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateResult {
    pub fn updated(key: ProductKey) -> Self {
        UpdateResult {
            product_id: key.product_id,
            variation_id: key.variation_id,
            status: UpdateStatus::Updated,
            error: None,
        }
    }

    pub fn failed(key: ProductKey, error: impl Into<String>) -> Self {
        UpdateResult {
            product_id: key.product_id,
            variation_id: key.variation_id,
            status: UpdateStatus::Failed,
            error: Some(error.into()),
        }
    }

    #[inline]
    pub fn key(&self) -> ProductKey {
        ProductKey::new(self.product_id, self.variation_id)
    }

    #[inline]
    pub fn is_updated(&self) -> bool {
        self.status == UpdateStatus::Updated
    }
}

/// Aggregate outcome so an operator knows whether to retry everything or
/// only the failed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Success,
    PartialSuccess,
    Failure,
}

impl DispatchOutcome {
    /// Classifies a run. An empty run counts as success.
    pub fn from_counts(updated: usize, failed: usize) -> Self {
        match (updated, failed) {
            (_, 0) => DispatchOutcome::Success,
            (0, _) => DispatchOutcome::Failure,
            _ => DispatchOutcome::PartialSuccess,
        }
    }
}

/// Dispatcher call response: `{updated, failed, details[]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DispatchReport {
    pub updated: usize,
    pub failed: usize,
    pub outcome: DispatchOutcome,
    pub details: Vec<UpdateResult>,
}

impl DispatchReport {
    /// Builds the report from per-item results, preserving their order.
    pub fn from_results(details: Vec<UpdateResult>) -> Self {
        let updated = details.iter().filter(|r| r.is_updated()).count();
        let failed = details.len() - updated;
        DispatchReport {
            updated,
            failed,
            outcome: DispatchOutcome::from_counts(updated, failed),
            details,
        }
    }

    /// Keys of the items an operator needs to retry.
    pub fn failed_keys(&self) -> Vec<ProductKey> {
        self.details
            .iter()
            .filter(|r| !r.is_updated())
            .map(UpdateResult::key)
            .collect()
    }
}

// =============================================================================
// Verifier Public Call
// =============================================================================

/// One expectation in a verifier call: `{productId, expectedQuantity}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedStock {
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub expected_quantity: i64,
}

impl ExpectedStock {
    pub fn new(key: ProductKey, expected_quantity: i64) -> Self {
        ExpectedStock {
            product_id: key.product_id,
            variation_id: key.variation_id,
            expected_quantity,
        }
    }

    #[inline]
    pub fn key(&self) -> ProductKey {
        ProductKey::new(self.product_id, self.variation_id)
    }
}

/// Verifier call body: `{updates: [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub updates: Vec<ExpectedStock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Remote equals the expected value.
    Verified,
    /// Remote differs: the write did not persist or another channel overwrote it.
    Mismatch,
    /// The remote record could not be read.
    Failed,
}

/// Per-item verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<i64>,
    pub status: VerificationStatus,
    /// `None` when the read failed.
    pub current_stock: Option<i64>,
    pub expected_stock: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    /// Classifies a successful read.
    pub fn compare(expected: &ExpectedStock, current_stock: i64) -> Self {
        let status = if current_stock == expected.expected_quantity {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Mismatch
        };
        VerificationResult {
            product_id: expected.product_id,
            variation_id: expected.variation_id,
            status,
            current_stock: Some(current_stock),
            expected_stock: expected.expected_quantity,
            error: None,
        }
    }

    /// Records a failed read.
    pub fn failed(expected: &ExpectedStock, error: impl Into<String>) -> Self {
        VerificationResult {
            product_id: expected.product_id,
            variation_id: expected.variation_id,
            status: VerificationStatus::Failed,
            current_stock: None,
            expected_stock: expected.expected_quantity,
            error: Some(error.into()),
        }
    }
}

/// Verifier call response: `{verified, mismatched, failed, details[]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VerifyReport {
    pub verified: usize,
    pub mismatched: usize,
    pub failed: usize,
    pub details: Vec<VerificationResult>,
}

impl VerifyReport {
    pub fn from_results(details: Vec<VerificationResult>) -> Self {
        let count = |s: VerificationStatus| details.iter().filter(|r| r.status == s).count();
        VerifyReport {
            verified: count(VerificationStatus::Verified),
            mismatched: count(VerificationStatus::Mismatch),
            failed: count(VerificationStatus::Failed),
            details,
        }
    }

    /// Items whose remote stock drifted from the expectation.
    pub fn mismatches(&self) -> impl Iterator<Item = &VerificationResult> {
        self.details
            .iter()
            .filter(|r| r.status == VerificationStatus::Mismatch)
    }

    /// Returns true when every item verified.
    pub fn is_clean(&self) -> bool {
        self.mismatched == 0 && self.failed == 0
    }
}

// =============================================================================
// Sale Line
// =============================================================================

/// One line of a locally committed sale, as seen by the stock engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: i64,
    #[serde(default)]
    pub variation_id: Option<i64>,
    /// Units sold, at least 1.
    pub quantity: i64,
}

impl SaleLine {
    #[inline]
    pub fn key(&self) -> ProductKey {
        ProductKey::new(self.product_id, self.variation_id)
    }
}

// =============================================================================
// Lenient Numbers
// =============================================================================

/// Numeric coercion for quantities: integers, integral floats, numeric
/// strings, and `null` (as 0).
pub fn coerce_i64(value: &serde_json::Value) -> Option<i64> {
    use serde_json::Value;
    match value {
        Value::Null => Some(0),
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Some(0);
            }
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

/// Serde adapter around [`coerce_i64`].
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    coerce_i64(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a quantity, got {}", value)))
}

// =============================================================================
// Unit Tests
// =============================================================================
