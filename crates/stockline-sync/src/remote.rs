//! # Remote Inventory Service
//!
//! The seam between the engine and the shop's REST inventory service.
//!
//! ## Calls
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     InventoryApi                                        │
//! │                                                                         │
//! │  list_products   GET {base}/products?page=&per_page=[&since=]          │
//! │                  ──► ListPage { products, as_of, total_pages }         │
//! │                                                                         │
//! │  get_product     GET {base}/products/{id}                              │
//! │                  GET {base}/products/{id}/variations/{vid}             │
//! │                                                                         │
//! │  update_stock    PUT same path  { stock_quantity, manage_stock }       │
//! │                  ──► StockUpdateAck { id?, stock_quantity? }           │
//! │                                                                         │
//! │  Every call takes the bearer token explicitly; callers resolve it      │
//! │  once and short-circuit when it is missing.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records arrive loosely typed. [`RemoteProduct`] accepts prices as
//! numbers or decimal strings, stock as numbers, numeric strings or null,
//! and timestamps as RFC 3339 or naive ISO 8601 (read as UTC).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::future::Future;
use std::time::Duration;
use stockline_core::{coerce_i64, Money, ProductKey, ProductSnapshot, SyncCursor};
use tracing::warn;

use crate::error::ApiError;

// =============================================================================
// Api Trait
// =============================================================================

/// Query for one page of the product listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
    /// Only records modified after this cursor (delta sync).
    pub since: Option<SyncCursor>,
}

/// One page of the product listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage {
    pub products: Vec<ProductSnapshot>,
    /// Server time the listing is valid as of.
    pub as_of: DateTime<Utc>,
    /// Page count reported by the server, when it reports one.
    pub total_pages: Option<u32>,
}

/// What a stock update response told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StockUpdateAck {
    /// Record id echoed back; `None` when the body carried none.
    pub id: Option<i64>,
    pub stock_quantity: Option<i64>,
}

/// Remote inventory service operations.
#[async_trait]
pub trait InventoryApi: Send + Sync {
    async fn list_products(&self, token: &str, query: &ListQuery) -> Result<ListPage, ApiError>;

    /// Reads the current record for `key`.
    async fn get_product(&self, token: &str, key: ProductKey) -> Result<ProductSnapshot, ApiError>;

    /// Sets absolute stock for `key`.
    async fn update_stock(
        &self,
        token: &str,
        key: ProductKey,
        quantity: i64,
    ) -> Result<StockUpdateAck, ApiError>;
}

/// Runs one remote call under `deadline`. Expiry drops the call and reads
/// as [`ApiError::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout {
            ms: deadline.as_millis() as u64,
        }),
    }
}

// =============================================================================
// Wire Records
// =============================================================================

/// A product or variation record as the service sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProduct {
    #[serde(deserialize_with = "stockline_core::lenient_i64")]
    pub id: i64,

    /// Set on variation records: the variable product they belong to.
    #[serde(default, deserialize_with = "optional_id")]
    pub parent_id: Option<i64>,

    /// Set when the listing flattens variations into product rows.
    #[serde(default, deserialize_with = "optional_id")]
    pub variation_id: Option<i64>,

    #[serde(default)]
    pub sku: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "lenient_price")]
    pub price: Option<Money>,

    #[serde(default, deserialize_with = "lenient_stock")]
    pub stock_quantity: i64,

    #[serde(default)]
    pub updated_at: Option<String>,

    #[serde(default)]
    pub date_modified_gmt: Option<String>,
}

impl RemoteProduct {
    /// Key of this record in the local snapshot set.
    pub fn key(&self) -> ProductKey {
        match (self.variation_id, self.parent_id) {
            (Some(variation_id), _) => ProductKey::variation(self.id, variation_id),
            (None, Some(parent_id)) => ProductKey::variation(parent_id, self.id),
            (None, None) => ProductKey::product(self.id),
        }
    }

    /// Last modification time, if the record carries a readable one.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(parse_remote_time)
            .or_else(|| self.date_modified_gmt.as_deref().and_then(parse_remote_time))
    }

    /// Converts to a snapshot. Records without a timestamp are dated
    /// `fallback`; negative stock is clamped to zero.
    pub fn into_snapshot(self, fallback: DateTime<Utc>) -> ProductSnapshot {
        let key = self.key();
        let updated_at = self.modified_at().unwrap_or(fallback);

        let stock_quantity = if self.stock_quantity < 0 {
            warn!(
                product = %key,
                stock = self.stock_quantity,
                "Remote reported negative stock, clamping to 0"
            );
            0
        } else {
            self.stock_quantity
        };

        ProductSnapshot {
            id: key.product_id,
            sku: self.sku.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            price_cents: self.price.unwrap_or_default().cents(),
            stock_quantity,
            variation_id: key.variation_id,
            updated_at,
        }
    }
}

/// Body of a non-2xx response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Lenient Parsing
// =============================================================================

/// Parses RFC 3339, or naive ISO 8601 interpreted as UTC.
pub fn parse_remote_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn lenient_stock<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    coerce_i64(&value).ok_or_else(|| {
        serde::de::Error::custom(format!("stock_quantity is not a number: {}", value))
    })
}

fn lenient_price<'de, D>(deserializer: D) -> Result<Option<Money>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Money::parse_decimal(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid price: {s}"))),
        Value::Number(n) => Money::parse_decimal(&n.to_string())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid price: {n}"))),
        other => Err(serde::de::Error::custom(format!("invalid price: {other}"))),
    }
}

/// Ids where `0`, `null` and absence all mean "none".
fn optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match coerce_i64(&value) {
        Some(0) => Ok(None),
        Some(id) => Ok(Some(id)),
        None => Err(serde::de::Error::custom(format!("invalid id: {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> RemoteProduct {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_simple_product_record() {
        let record = parse(json!({
            "id": 12,
            "sku": "TEA-01",
            "name": "Green Tea",
            "price": "4.50",
            "stock_quantity": 8,
            "date_modified_gmt": "2024-03-01T10:00:00"
        }));

        let snapshot = record.into_snapshot(Utc::now());
        assert_eq!(snapshot.key(), ProductKey::product(12));
        assert_eq!(snapshot.price_cents, 450);
        assert_eq!(snapshot.stock_quantity, 8);
        assert_eq!(
            snapshot.updated_at,
            "2024-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_variation_record_uses_parent() {
        let record = parse(json!({"id": 77, "parent_id": 12, "stock_quantity": "3"}));
        assert_eq!(record.key(), ProductKey::variation(12, 77));

        let flattened = parse(json!({"id": 12, "variation_id": 77, "parent_id": 0}));
        assert_eq!(flattened.key(), ProductKey::variation(12, 77));
    }

    #[test]
    fn test_lenient_stock_and_price() {
        let record = parse(json!({"id": 1, "price": 10.99, "stock_quantity": null}));
        assert_eq!(record.price, Some(Money::from_cents(1099)));
        assert_eq!(record.stock_quantity, 0);

        let record = parse(json!({"id": 1, "price": ""}));
        assert_eq!(record.price, None);
        assert_eq!(record.stock_quantity, 0);

        assert!(serde_json::from_value::<RemoteProduct>(json!({"id": 1, "stock_quantity": "lots"}))
            .is_err());
    }

    #[test]
    fn test_negative_stock_is_clamped() {
        let record = parse(json!({"id": 5, "stock_quantity": -4}));
        assert_eq!(record.into_snapshot(Utc::now()).stock_quantity, 0);
    }

    #[test]
    fn test_missing_timestamp_uses_fallback() {
        let fallback = "2024-05-05T05:05:05Z".parse::<DateTime<Utc>>().unwrap();
        let record = parse(json!({"id": 5, "updated_at": "yesterday"}));
        assert_eq!(record.into_snapshot(fallback).updated_at, fallback);
    }

    #[test]
    fn test_parse_remote_time_variants() {
        let expected = "2024-01-02T03:04:05Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(parse_remote_time("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_remote_time("2024-01-02T05:04:05+02:00"), Some(expected));
        assert_eq!(parse_remote_time("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_remote_time("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_remote_time("not a date"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_reads_as_timeout() {
        let result: Result<(), ApiError> = with_deadline(Duration::from_secs(8), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(ApiError::Timeout { ms: 8000 }));

        let fast = with_deadline(Duration::from_secs(8), async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(fast, Ok(7));
    }
}
