//! # HTTP Inventory Client
//!
//! `reqwest` implementation of [`InventoryApi`].
//!
//! ## Response Handling
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  send ──► transport error ──► timeout?  ──► ApiError::Timeout          │
//! │                           └─► otherwise ──► ApiError::Network          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  status 2xx? ── no ──► ApiError::Status { status, message }            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  decode body ── fails ──► ApiError::InvalidResponse                    │
//! │                                                                         │
//! │  Listing extras:  Date header          ──► ListPage::as_of             │
//! │                   X-WP-TotalPages      ──► ListPage::total_pages       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, DATE};
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;
use stockline_core::{coerce_i64, ProductKey, ProductSnapshot};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{ApiError, SyncError, SyncResult};
use crate::remote::{ErrorBody, InventoryApi, ListPage, ListQuery, RemoteProduct, StockUpdateAck};

const TOTAL_PAGES_HEADER: &str = "X-WP-TotalPages";

#[derive(Serialize)]
struct StockUpdateBody {
    stock_quantity: i64,
    manage_stock: bool,
}

/// REST client for the remote inventory service.
#[derive(Debug, Clone)]
pub struct HttpInventoryApi {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpInventoryApi {
    /// Creates a client for `base_url` with a per-request deadline.
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let parsed = url::Url::parse(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stockline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {e}")))?;

        Ok(HttpInventoryApi {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(&config.remote.base_url, config.request_timeout())
    }

    fn products_url(&self) -> String {
        format!("{}/products", self.base_url)
    }

    fn record_url(&self, key: ProductKey) -> String {
        match key.variation_id {
            Some(variation_id) => format!(
                "{}/products/{}/variations/{}",
                self.base_url, key.product_id, variation_id
            ),
            None => format!("{}/products/{}", self.base_url, key.product_id),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout {
                ms: self.timeout.as_millis() as u64,
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// Passes 2xx responses through; turns everything else into a status
    /// error carrying the body's `message`.
    async fn check_status(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message);
        debug!(status = status.as_u16(), ?message, "Remote returned an error status");

        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn body_bytes(&self, response: Response) -> Result<Vec<u8>, ApiError> {
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| self.transport_error(e))
    }
}

fn server_time(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = headers.get(DATE)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn total_pages(headers: &HeaderMap) -> Option<u32> {
    headers
        .get(TOTAL_PAGES_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl InventoryApi for HttpInventoryApi {
    async fn list_products(&self, token: &str, query: &ListQuery) -> Result<ListPage, ApiError> {
        // Captured before sending so a missing Date header never skips
        // records modified while the request was in flight
        let requested_at = Utc::now();

        let mut params = vec![
            ("page", query.page.to_string()),
            ("per_page", query.per_page.to_string()),
        ];
        if let Some(since) = query.since {
            params.push(("since", since.to_query_param()));
        }

        let response = self
            .client
            .get(self.products_url())
            .bearer_auth(token)
            .query(&params)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check_status(response).await?;

        let as_of = server_time(response.headers()).unwrap_or_else(|| {
            warn!("Listing response has no usable Date header, using local clock");
            requested_at
        });
        let total_pages = total_pages(response.headers());

        let body = self.body_bytes(response).await?;
        let records: Vec<RemoteProduct> = serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("product listing: {e}")))?;

        debug!(
            page = query.page,
            records = records.len(),
            ?total_pages,
            "Fetched product page"
        );

        Ok(ListPage {
            products: records
                .into_iter()
                .map(|r| r.into_snapshot(as_of))
                .collect(),
            as_of,
            total_pages,
        })
    }

    async fn get_product(&self, token: &str, key: ProductKey) -> Result<ProductSnapshot, ApiError> {
        let response = self
            .client
            .get(self.record_url(key))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check_status(response).await?;

        let body = self.body_bytes(response).await?;
        let record: RemoteProduct = serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("product {key}: {e}")))?;

        let mut snapshot = record.into_snapshot(Utc::now());
        snapshot.id = key.product_id;
        snapshot.variation_id = key.variation_id;
        Ok(snapshot)
    }

    async fn update_stock(
        &self,
        token: &str,
        key: ProductKey,
        quantity: i64,
    ) -> Result<StockUpdateAck, ApiError> {
        let response = self
            .client
            .put(self.record_url(key))
            .bearer_auth(token)
            .json(&StockUpdateBody {
                stock_quantity: quantity,
                manage_stock: true,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check_status(response).await?;

        // An unreadable 2xx body is not a failure: the dispatcher confirms
        // with a verification read when the id is missing
        let body = self.body_bytes(response).await?;
        let ack = match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => StockUpdateAck {
                id: value.get("id").and_then(coerce_i64).filter(|id| *id > 0),
                stock_quantity: value.get("stock_quantity").and_then(coerce_i64),
            },
            Err(_) => StockUpdateAck::default(),
        };
        Ok(ack)
    }
}
