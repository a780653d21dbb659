//! # stockline-core: Data Model for the Inventory Sync Engine
//!
//! This crate contains the pure data model shared by the Local Store, the
//! sync client, the dispatcher and the verifier. It has **zero I/O
//! dependencies**.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Stockline Layers                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  stockline-sync (delta sync, dispatcher, verifier, orchestrator)│   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │  ┌────────────────────────────┴────────────────────────────────────┐   │
//! │  │  stockline-db (Local Store, repositories, TTL cache)            │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │  ┌────────────────────────────┴────────────────────────────────────┐   │
//! │  │  stockline-core (THIS CRATE)                                    │   │
//! │  │  ProductSnapshot · SyncCursor · StockDelta · UpdateResult       │   │
//! │  │  VerificationResult · Money · last-write-wins merge             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockline_core::{ProductKey, StockChange, StockDelta};
//!
//! // A sale of two units of product 42 becomes a relative adjustment
//! let delta = StockDelta::new(ProductKey::product(42), StockChange::Adjustment(-2));
//! assert_eq!(delta.attempt_count, 0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod merge;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{ValidationError, ValidationResult};
pub use merge::{index_snapshots, merge_last_write_wins, MergeStats, SnapshotSet};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single line in a committed sale.
///
/// Guards the optimistic decrement against typos (1000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 9_999;
