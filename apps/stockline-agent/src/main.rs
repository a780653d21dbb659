//! # Stockline Agent
//!
//! Headless sync agent for one POS terminal.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  load config ──► open Local Store ──► build orchestrator ──► start()   │
//! │                                                                         │
//! │       start(): initial full sync when no cursor, then the auto-sync    │
//! │       timer drains queued deltas and pulls every interval              │
//! │                                                                         │
//! │  Ctrl-C / SIGTERM ──► shutdown() (in-flight cycle finishes) ──► close  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use stockline_core::DispatchReport;
use stockline_db::{Database, DbConfig, StoreHandle};
use stockline_sync::{
    EnvToken, HttpInventoryApi, SyncConfig, SyncEventEmitter, SyncOrchestratorBuilder, SyncStatus,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Forwards orchestrator events to the log.
struct LogEmitter;

impl SyncEventEmitter for LogEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        debug!(
            state = ?status.state,
            syncing = status.is_syncing,
            pending = status.pending_count,
            failed = status.failed_count,
            "Sync status"
        );
    }

    fn emit_progress(&self, report: &DispatchReport) {
        info!(
            updated = report.updated,
            failed = report.failed,
            outcome = ?report.outcome,
            "Dispatched stock updates"
        );
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        if retryable {
            warn!(%message, "Sync error, retrying next cycle");
        } else {
            error!(%message, "Sync error needs operator attention");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // A bad config must not silently fall back to the localhost defaults
    let config = SyncConfig::load(None)
        .inspect_err(|e| error!(error = %e, "Invalid sync configuration"))?;
    info!(
        terminal_id = %config.terminal_id(),
        terminal = %config.terminal.name,
        base_url = %config.remote.base_url,
        auto_sync = config.sync.auto_sync,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(config.database_path())).await?;
    let store = StoreHandle::new(Arc::new(db.local_store()));
    let api = Arc::new(HttpInventoryApi::from_config(&config)?);

    let orchestrator = SyncOrchestratorBuilder::new(config)
        .with_store(store)
        .with_api(api)
        .with_tokens(Arc::new(EnvToken))
        .with_emitter(Arc::new(LogEmitter))
        .build()?;

    orchestrator.start().await?;
    info!("Stockline agent running");

    shutdown_signal().await;

    orchestrator.shutdown().await?;
    db.close().await;
    info!("Stockline agent stopped");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` overrides the default `info,stockline=debug,sqlx=warn`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockline=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping agent");
}
