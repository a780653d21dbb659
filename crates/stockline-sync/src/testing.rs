//! Scripted in-process inventory service used by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use stockline_core::{ProductKey, ProductSnapshot};
use tokio::time::Instant;

use crate::error::ApiError;
use crate::remote::{InventoryApi, ListPage, ListQuery, StockUpdateAck};

/// One scripted reply to an update call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Fail with this status.
    Status(u16),
    /// Sleep this long before answering normally.
    Stall(Duration),
    /// Apply the write but answer without an id.
    NoId,
    /// Answer without an id and drop the write.
    Dropped,
}

#[derive(Debug, Default)]
struct State {
    products: BTreeMap<ProductKey, ProductSnapshot>,
    update_script: HashMap<ProductKey, VecDeque<Reply>>,
    read_failures: HashMap<ProductKey, u16>,
    list_failure: Option<u16>,
    page_failure: Option<(u32, u16)>,
    since_failure: Option<u16>,
    as_of: Option<DateTime<Utc>>,
    update_latency: Duration,
    offline: bool,
    in_flight: usize,
    max_in_flight: usize,
    list_calls: Vec<ListQuery>,
    get_calls: Vec<ProductKey>,
    update_calls: Vec<(ProductKey, i64, Instant)>,
}

/// Fake remote. Every method is synchronous bookkeeping plus optional
/// sleeps, so paused-clock tests stay deterministic.
#[derive(Debug, Default)]
pub struct FakeInventory {
    state: Mutex<State>,
}

impl FakeInventory {
    pub fn new() -> Self {
        FakeInventory::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = ProductSnapshot>) -> Self {
        let fake = FakeInventory::new();
        for p in products {
            fake.put_product(p);
        }
        fake
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn put_product(&self, product: ProductSnapshot) {
        self.state().products.insert(product.key(), product);
    }

    pub fn stock(&self, key: ProductKey) -> Option<i64> {
        self.state().products.get(&key).map(|p| p.stock_quantity)
    }

    pub fn script_updates(&self, key: ProductKey, replies: impl IntoIterator<Item = Reply>) {
        self.state()
            .update_script
            .entry(key)
            .or_default()
            .extend(replies);
    }

    pub fn fail_reads(&self, key: ProductKey, status: u16) {
        self.state().read_failures.insert(key, status);
    }

    pub fn fail_listing(&self, status: Option<u16>) {
        self.state().list_failure = status;
    }

    /// Fails only listing page `page`.
    pub fn fail_page(&self, page: u32, status: u16) {
        self.state().page_failure = Some((page, status));
    }

    /// Makes `since` queries fail with `status` (e.g. 410 for a cursor too old).
    pub fn reject_since(&self, status: Option<u16>) {
        self.state().since_failure = status;
    }

    pub fn set_as_of(&self, as_of: DateTime<Utc>) {
        self.state().as_of = Some(as_of);
    }

    /// While offline every call fails at the connection level and never
    /// reaches the shop.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn set_update_latency(&self, latency: Duration) {
        self.state().update_latency = latency;
    }

    pub fn list_calls(&self) -> Vec<ListQuery> {
        self.state().list_calls.clone()
    }

    pub fn get_calls(&self) -> usize {
        self.state().get_calls.len()
    }

    pub fn update_calls(&self) -> Vec<(ProductKey, i64, Instant)> {
        self.state().update_calls.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn total_calls(&self) -> usize {
        let s = self.state();
        s.list_calls.len() + s.get_calls.len() + s.update_calls.len()
    }
}

#[async_trait]
impl InventoryApi for FakeInventory {
    async fn list_products(&self, _token: &str, query: &ListQuery) -> Result<ListPage, ApiError> {
        let mut s = self.state();
        if s.offline {
            return Err(refused());
        }
        s.list_calls.push(*query);

        if let Some(status) = s.list_failure {
            return Err(ApiError::status(status));
        }
        if let Some((page, status)) = s.page_failure {
            if page == query.page {
                return Err(ApiError::status(status));
            }
        }
        if query.since.is_some() {
            if let Some(status) = s.since_failure {
                return Err(ApiError::status(status));
            }
        }

        let matching: Vec<ProductSnapshot> = s
            .products
            .values()
            .filter(|p| {
                query
                    .since
                    .map_or(true, |c| p.updated_at > c.last_sync_timestamp)
            })
            .cloned()
            .collect();

        let per_page = query.per_page.max(1) as usize;
        let total_pages = matching.len().div_ceil(per_page).max(1) as u32;
        let start = (query.page.saturating_sub(1) as usize) * per_page;
        let products = matching.into_iter().skip(start).take(per_page).collect();

        Ok(ListPage {
            products,
            as_of: s.as_of.unwrap_or_else(Utc::now),
            total_pages: Some(total_pages),
        })
    }

    async fn get_product(&self, _token: &str, key: ProductKey) -> Result<ProductSnapshot, ApiError> {
        let mut s = self.state();
        if s.offline {
            return Err(refused());
        }
        s.get_calls.push(key);

        if let Some(status) = s.read_failures.get(&key) {
            return Err(ApiError::status(*status));
        }
        s.products
            .get(&key)
            .cloned()
            .ok_or(ApiError::status(404))
    }

    async fn update_stock(
        &self,
        _token: &str,
        key: ProductKey,
        quantity: i64,
    ) -> Result<StockUpdateAck, ApiError> {
        let (reply, latency) = {
            let mut s = self.state();
            if s.offline {
                return Err(refused());
            }
            s.update_calls.push((key, quantity, Instant::now()));
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            let reply = s.update_script.get_mut(&key).and_then(VecDeque::pop_front);
            (reply, s.update_latency)
        };

        let mut stall = latency;
        if let Some(Reply::Stall(d)) = &reply {
            stall += *d;
        }
        if !stall.is_zero() {
            tokio::time::sleep(stall).await;
        }

        let mut s = self.state();
        s.in_flight -= 1;

        match reply {
            Some(Reply::Status(status)) => Err(ApiError::status(status)),
            Some(Reply::Dropped) => Ok(StockUpdateAck::default()),
            other => {
                let Some(product) = s.products.get_mut(&key) else {
                    return Err(ApiError::status(404));
                };
                product.stock_quantity = quantity;
                product.updated_at = Utc::now();
                let id = match other {
                    Some(Reply::NoId) => None,
                    _ => Some(key.remote_id()),
                };
                Ok(StockUpdateAck {
                    id,
                    stock_quantity: Some(quantity),
                })
            }
        }
    }
}

fn refused() -> ApiError {
    ApiError::Network("connection refused".to_string())
}

/// Snapshot with sensible defaults for tests.
pub fn product(id: i64, stock: i64) -> ProductSnapshot {
    ProductSnapshot {
        id,
        sku: format!("SKU-{id}"),
        name: format!("Product {id}"),
        price_cents: 100 * id,
        stock_quantity: stock,
        variation_id: None,
        updated_at: Utc::now() - chrono::Duration::hours(1),
    }
}
