//! # Repository Module
//!
//! Typed access to the documents kept in the Local Store.
//!
//! ## Key Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Local Store Keys                                     │
//! │                                                                         │
//! │  SnapshotRepository                                                    │
//! │  ├── catalog.products      Vec<ProductSnapshot>                        │
//! │  └── catalog.cursor        SyncCursor                                  │
//! │                                                                         │
//! │  StockDeltaQueue                                                       │
//! │  ├── dispatch.queue        Vec<StockDelta>   (pending, FIFO)           │
//! │  └── dispatch.dead_letter  Vec<StockDelta>   (failed)                  │
//! │                                                                         │
//! │  SaleRecorder              writes catalog.products + dispatch.queue    │
//! │                            in one set_many                             │
//! │                                                                         │
//! │  TtlCache                                                              │
//! │  └── cache.<name>          { value, stored_at }                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`SnapshotRepository`] - Product snapshots and the sync cursor
//! - [`StockDeltaQueue`] - Pending and dead-lettered stock deltas
//! - [`SaleRecorder`] - Optimistic stock decrement on sale commit
//! - [`TtlCache`] - Stale-checked reference data

pub mod cache;
pub mod queue;
pub mod sale;
pub mod snapshot;

pub use cache::TtlCache;
pub use queue::StockDeltaQueue;
pub use sale::SaleRecorder;
pub use snapshot::SnapshotRepository;

// =============================================================================
// Keys
// =============================================================================

pub const PRODUCTS_KEY: &str = "catalog.products";
pub const CURSOR_KEY: &str = "catalog.cursor";
pub const QUEUE_KEY: &str = "dispatch.queue";
pub const DEAD_LETTER_KEY: &str = "dispatch.dead_letter";
pub const CACHE_PREFIX: &str = "cache.";
