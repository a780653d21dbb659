//! # stockline-db: Local Store for the Inventory Sync Engine
//!
//! Durable key-value storage for a single POS terminal, plus the typed
//! repositories the sync engine reads and writes through.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockline Data Flow                              │
//! │                                                                         │
//! │  Sync Orchestrator / checkout path                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 stockline-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────────┐   ┌────────────┐  │   │
//! │  │   │  LocalStore   │    │   Repositories    │   │ Migrations │  │   │
//! │  │   │  (store/)     │    │                   │   │ (embedded) │  │   │
//! │  │   │               │    │ SnapshotRepository│   │            │  │   │
//! │  │   │ SqliteStore   │◄───│ StockDeltaQueue   │   │ 001_local_ │  │   │
//! │  │   │ MemoryStore   │    │ SaleRecorder      │   │  store.sql │  │   │
//! │  │   │               │    │ TtlCache          │   │            │  │   │
//! │  │   └───────────────┘    └───────────────────┘   └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file in the platform data dir (or memory)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stockline_db::{Database, DbConfig, SnapshotRepository, StoreHandle};
//!
//! let db = Database::new(DbConfig::new("stockline.db")).await?;
//! let handle = StoreHandle::new(Arc::new(db.local_store()));
//!
//! let cursor = SnapshotRepository::new(handle).cursor().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use store::{LocalStore, MemoryStore, SqliteStore, StoreHandle};

// Repository re-exports for convenience
pub use repository::cache::TtlCache;
pub use repository::queue::{DeltaOutcome, StockDeltaQueue, DEFAULT_DEAD_LETTER_LIMIT};
pub use repository::sale::SaleRecorder;
pub use repository::snapshot::SnapshotRepository;
