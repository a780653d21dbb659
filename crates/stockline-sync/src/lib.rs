//! # stockline-sync: Sync & Reconciliation Engine
//!
//! Keeps one POS terminal's local inventory consistent with the shop's
//! remote inventory service.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                SyncOrchestrator (per terminal)                   │  │
//! │  │                                                                  │  │
//! │  │  UNINITIALIZED → SYNCING_FULL → IDLE ↔ SYNCING_DELTA             │  │
//! │  │  auto-sync timer, is-syncing guard, status events                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │UpdateDispatcher│  │DeltaSyncClient │  │ReconciliationVerifier  │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Drains queued  │  │ Full / delta   │  │ Bounded reads, compare │    │
//! │  │ deltas in      │  │ pulls, LWW     │  │ with expectations      │    │
//! │  │ batches, retry │  │ merge, cursor  │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          └───────────────────┼───────────────────────┘                 │
//! │                              ▼                                          │
//! │               InventoryApi (HttpInventoryApi / reqwest)                 │
//! │               TokenProvider (bearer credential)                         │
//! │                                                                         │
//! │  Local state lives in stockline-db behind a shared StoreHandle.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`auth`] - Bearer token providers
//! - [`config`] - Sync configuration (terminal, remote, timers, batches)
//! - [`delta`] - Full and delta pulls into the Local Store
//! - [`dispatcher`] - Batched stock updates with retry and deadlines
//! - [`error`] - Per-call and per-operation error types
//! - [`http`] - reqwest implementation of the remote API
//! - [`orchestrator`] - Per-terminal state machine and timer
//! - [`remote`] - Remote API trait and wire records
//! - [`retry`] - Explicit retry policy
//! - [`verifier`] - Read-back verification of remote stock

pub mod auth;
pub mod config;
pub mod delta;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod remote;
pub mod retry;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{EnvToken, SharedToken, StaticToken, TokenProvider};
pub use config::SyncConfig;
pub use delta::{DeltaSyncClient, SyncMode, SyncSummary};
pub use dispatcher::{DispatchRun, UpdateDispatcher};
pub use error::{ApiError, SyncError, SyncResult};
pub use http::HttpInventoryApi;
pub use orchestrator::{
    NoOpEmitter, SyncEventEmitter, SyncOrchestrator, SyncOrchestratorBuilder, SyncState,
    SyncStatus,
};
pub use remote::InventoryApi;
pub use retry::{execute_with_retry, RetryPolicy};
pub use verifier::{repair_deltas, ReconciliationVerifier};
