//! # TTL Cache
//!
//! Stale-check wrapper for reference data (tax classes, categories, store
//! settings) kept in the Local Store.
//!
//! Entries are stored as `{ value, stored_at }` under `cache.<name>`. An
//! entry older than the TTL reads as absent, so callers refetch it.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CACHE_PREFIX;
use crate::error::DbResult;
use crate::store::StoreHandle;

/// Default lifetime of a cached entry.
pub const DEFAULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    value: T,
    stored_at: DateTime<Utc>,
}

/// Reference-data cache with a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct TtlCache {
    handle: StoreHandle,
    ttl: Duration,
}

impl TtlCache {
    pub fn new(handle: StoreHandle, ttl: Duration) -> Self {
        TtlCache { handle, ttl }
    }

    /// Cache with the default 7 day TTL.
    pub fn with_default_ttl(handle: StoreHandle) -> Self {
        TtlCache::new(handle, Duration::days(DEFAULT_TTL_DAYS))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value if present and fresh.
    pub async fn get<T: DeserializeOwned>(&self, name: &str) -> DbResult<Option<T>> {
        self.get_at(name, Utc::now()).await
    }

    /// Same as [`TtlCache::get`] with an explicit clock reading.
    pub async fn get_at<T: DeserializeOwned>(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<T>> {
        let entry: Option<CacheEntry<T>> = self.handle.get_json(&cache_key(name)).await?;
        match entry {
            Some(entry) if now - entry.stored_at <= self.ttl => Ok(Some(entry.value)),
            Some(entry) => {
                debug!(name, stored_at = %entry.stored_at, "Cache entry is stale");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Stores `value`, stamped with the current time.
    pub async fn put<T: Serialize>(&self, name: &str, value: &T) -> DbResult<()> {
        self.put_at(name, value, Utc::now()).await
    }

    pub async fn put_at<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        stored_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let entry = CacheEntry { value, stored_at };
        self.handle.set_json(&cache_key(name), &entry).await
    }

    pub async fn invalidate(&self, name: &str) -> DbResult<()> {
        self.handle.store().remove(&cache_key(name)).await
    }
}

fn cache_key(name: &str) -> String {
    format!("{CACHE_PREFIX}{name}")
}
