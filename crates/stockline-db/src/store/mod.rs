//! # Local Store
//!
//! Durable key-value contract the whole engine persists through.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         LocalStore                                      │
//! │                                                                         │
//! │  get(key)          ──► Some(value) | None                              │
//! │  set(key, value)   ──► replace-on-write, never partially visible       │
//! │  set_many(entries) ──► all keys land together or none do               │
//! │  remove(key)       ──► absent afterwards (no-op if already absent)     │
//! │  clear()           ──► every key removed                               │
//! │                                                                         │
//! │  Backends:                                                              │
//! │  ┌──────────────────┐        ┌──────────────────┐                      │
//! │  │ SqliteStore      │        │ MemoryStore      │                      │
//! │  │ durable, WAL     │        │ tests, ephemeral │                      │
//! │  └──────────────────┘        └──────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are JSON documents. Typed access goes through [`StoreHandle`],
//! which also carries the write lock every read-modify-write repository
//! operation takes, keeping one logical writer per terminal.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{DbError, DbResult};

// =============================================================================
// Store Trait
// =============================================================================

/// Durable key-value storage with atomic replace-on-write.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> DbResult<()>;

    /// Stores several values in one atomic write.
    async fn set_many(&self, entries: &[(String, String)]) -> DbResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> DbResult<()>;

    /// Removes every key.
    async fn clear(&self) -> DbResult<()>;
}

// =============================================================================
// Store Handle
// =============================================================================

/// Shared handle to a Local Store plus the terminal's write lock.
///
/// Cloning is cheap; clones share both the store and the lock.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn LocalStore>,
    write_lock: Arc<Mutex<()>>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        StoreHandle {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Handle over a fresh in-memory store.
    pub fn in_memory() -> Self {
        StoreHandle::new(Arc::new(MemoryStore::new()))
    }

    /// The raw key-value store.
    pub fn store(&self) -> &dyn LocalStore {
        self.store.as_ref()
    }

    /// Serializes read-modify-write sequences across repositories.
    pub async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Reads and decodes a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| DbError::corrupt(key, e)),
            None => Ok(None),
        }
    }

    /// Encodes and writes a JSON value.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DbResult<()> {
        let (key, raw) = encode_entry(key, value)?;
        self.store.set(&key, &raw).await
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}

/// Encodes one `set_many` entry.
pub fn encode_entry<T: Serialize + ?Sized>(key: &str, value: &T) -> DbResult<(String, String)> {
    let raw = serde_json::to_string(value).map_err(|e| DbError::corrupt(key, e))?;
    Ok((key.to_string(), raw))
}
