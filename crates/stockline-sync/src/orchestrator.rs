//! # Sync Orchestrator
//!
//! Per-terminal driver of the sync engine. Owns the auto-sync timer, the
//! is-syncing guard and the status snapshot pushed to the frontend.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SyncOrchestrator States                             │
//! │                                                                         │
//! │   start() without cursor          start() with cursor                  │
//! │          │                               │                              │
//! │          ▼                               ▼                              │
//! │  ┌───────────────┐  ok      ┌────────┐  tick / sync_now  ┌──────────┐  │
//! │  │ SYNCING_FULL  │────────► │  IDLE  │ ────────────────► │ SYNCING_ │  │
//! │  └───────┬───────┘          │        │ ◄──────────────── │ DELTA    │  │
//! │          │ err              └────────┘   ok or err       └──────────┘  │
//! │          ▼                                                              │
//! │  ┌───────────────┐  next tick / sync_now                               │
//! │  │ UNINITIALIZED │──────────────────────► SYNCING_FULL                 │
//! │  └───────────────┘                                                      │
//! │                                                                         │
//! │  One cycle = drain the StockDelta queue through the dispatcher, then   │
//! │  delta sync. A tick that fires while a cycle (or a manual dispatch)    │
//! │  is in flight is skipped. Disabling auto-sync or shutdown() stops the  │
//! │  timer; in-flight cycles run to completion.                            │
//! │                                                                         │
//! │  STATUS EVENTS:                                                        │
//! │  emit_status    - every state change                                   │
//! │  emit_progress  - after each dispatch run                              │
//! │  emit_error     - failed cycle or dispatch                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stockline_core::{DispatchReport, ExpectedStock, VerifyReport};
use stockline_db::{SaleRecorder, SnapshotRepository, StockDeltaQueue, StoreHandle, TtlCache};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::auth::TokenProvider;
use crate::config::SyncConfig;
use crate::delta::{DeltaSyncClient, SyncSummary};
use crate::dispatcher::UpdateDispatcher;
use crate::error::{SyncError, SyncResult};
use crate::remote::InventoryApi;
use crate::verifier::{repair_deltas, ReconciliationVerifier};

// =============================================================================
// Sync Status
// =============================================================================

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// No cursor yet, or the last full sync failed.
    Uninitialized,
    SyncingFull,
    Idle,
    SyncingDelta,
}

/// Current sync status for external queries.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,

    pub auto_sync_enabled: bool,

    /// A cycle or a manual dispatch holds the guard.
    pub is_syncing: bool,

    /// Last successful pull.
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Last error message (if any).
    pub last_error: Option<String>,

    /// Deltas waiting for the dispatcher.
    pub pending_count: usize,

    /// Dead-lettered deltas awaiting operator review.
    pub failed_count: usize,

    pub last_dispatch: Option<DispatchReport>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            state: SyncState::Uninitialized,
            auto_sync_enabled: false,
            is_syncing: false,
            last_sync_at: None,
            last_error: None,
            pending_count: 0,
            failed_count: 0,
            last_dispatch: None,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives sync events (implemented by the POS frontend bridge).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits the result of a dispatch run.
    fn emit_progress(&self, report: &DispatchReport);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _report: &DispatchReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Sync Guard
// =============================================================================

/// Holds the is-syncing flag; releases it on drop.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Running auto-sync timer.
struct Timer {
    /// Dropping the sender stops the loop.
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

struct Inner {
    client: DeltaSyncClient,
    dispatcher: UpdateDispatcher,
    verifier: ReconciliationVerifier,
    queue: StockDeltaQueue,
    sales: SaleRecorder,
    cache: TtlCache,
    status: RwLock<SyncStatus>,
    emitter: Arc<dyn SyncEventEmitter>,
    syncing: AtomicBool,
    shutting_down: AtomicBool,
    interval: Duration,
    timer: Mutex<Option<Timer>>,
}

/// Per-terminal sync orchestrator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(
        config: &SyncConfig,
        store: StoreHandle,
        api: Arc<dyn InventoryApi>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::with_emitter(config, store, api, tokens, Arc::new(NoOpEmitter))
    }

    /// Creates a new orchestrator with a custom event emitter.
    pub fn with_emitter(
        config: &SyncConfig,
        store: StoreHandle,
        api: Arc<dyn InventoryApi>,
        tokens: Arc<dyn TokenProvider>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let client = DeltaSyncClient::new(
            api.clone(),
            tokens.clone(),
            SnapshotRepository::new(store.clone()),
            &config.remote,
        );
        let dispatcher = UpdateDispatcher::new(api.clone(), tokens.clone(), config);
        let verifier = ReconciliationVerifier::new(api, tokens, config);

        let status = SyncStatus {
            auto_sync_enabled: config.sync.auto_sync,
            ..Default::default()
        };

        SyncOrchestrator {
            inner: Arc::new(Inner {
                client,
                dispatcher,
                verifier,
                queue: StockDeltaQueue::with_dead_letter_limit(
                    store.clone(),
                    config.dispatch.dead_letter_limit,
                ),
                sales: SaleRecorder::new(store.clone()),
                cache: TtlCache::new(store, config.cache_ttl()),
                status: RwLock::new(status),
                emitter,
                syncing: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                interval: config.sync_interval(),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.inner.status.read().await.clone()
    }

    /// Checkout hook for committed sales on this terminal.
    pub fn sales(&self) -> &SaleRecorder {
        &self.inner.sales
    }

    /// Reference-data cache using the configured TTL.
    pub fn reference_cache(&self) -> &TtlCache {
        &self.inner.cache
    }

    /// Starts the orchestrator.
    ///
    /// Runs the initial full sync when no cursor is persisted. A failed
    /// initial sync is recorded, not returned; the next cycle retries it.
    pub async fn start(&self) -> SyncResult<()> {
        info!(interval_secs = self.inner.interval.as_secs(), "Starting sync orchestrator");
        self.inner.refresh_counts().await?;

        if self.inner.client.snapshots().cursor().await?.is_some() {
            self.inner.set_state(SyncState::Idle).await;
        } else if let Err(e) = self.sync_now().await {
            warn!(error = %e, "Initial full sync failed");
        }

        if self.inner.status.read().await.auto_sync_enabled {
            self.start_timer().await;
        }
        Ok(())
    }

    /// Runs one cycle now: drain the queue, then pull.
    pub async fn sync_now(&self) -> SyncResult<SyncSummary> {
        self.inner.ensure_running()?;
        self.inner.run_cycle().await
    }

    /// Pushes queued deltas without pulling.
    pub async fn dispatch_pending(&self) -> SyncResult<DispatchReport> {
        self.inner.ensure_running()?;
        let Some(_guard) = SyncGuard::try_acquire(&self.inner.syncing) else {
            return Err(SyncError::SyncInProgress);
        };
        self.inner.set_syncing(true).await;

        let result = self.inner.drain_queue().await;
        if let Err(e) = &result {
            self.inner.record_error(e).await;
        }

        self.inner.set_syncing(false).await;
        result
    }

    /// Checks remote stock against expectations. Performs no repair.
    pub async fn verify(&self, expected: &[ExpectedStock]) -> SyncResult<VerifyReport> {
        self.inner.verifier.verify(expected).await
    }

    /// Queues absolute deltas restoring every mismatch in `report`.
    ///
    /// Returns how many were queued.
    pub async fn enqueue_repairs(&self, report: &VerifyReport) -> SyncResult<usize> {
        let repairs = repair_deltas(report);
        let count = repairs.len();
        if count > 0 {
            info!(count, "Queuing reconciliation repairs");
            self.inner.queue.enqueue(repairs).await?;
            self.inner.refresh_counts().await?;
        }
        Ok(count)
    }

    /// Turns the auto-sync timer on or off. In-flight cycles are not
    /// interrupted.
    pub async fn set_auto_sync(&self, enabled: bool) {
        self.inner.status.write().await.auto_sync_enabled = enabled;
        info!(enabled, "Auto-sync toggled");

        if enabled {
            self.start_timer().await;
        } else {
            self.stop_timer().await;
        }
        self.inner.emit_status().await;
    }

    /// Stops scheduling. In-flight work finishes on its own.
    pub async fn shutdown(&self) -> SyncResult<()> {
        info!("Shutting down sync orchestrator");
        self.inner.shutting_down.store(true, Ordering::Release);

        if let Some(timer) = self.inner.timer.lock().await.take() {
            drop(timer.stop_tx);
            if let Err(e) = timer.task.await {
                error!(?e, "Auto-sync timer task failed");
            }
        }

        info!("Sync orchestrator stopped");
        Ok(())
    }

    async fn start_timer(&self) {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let mut timer = self.inner.timer.lock().await;
        if timer.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(Self::timer_loop(Arc::clone(&self.inner), stop_rx));
        *timer = Some(Timer { stop_tx, task });
        debug!("Auto-sync timer started");
    }

    async fn stop_timer(&self) {
        if let Some(timer) = self.inner.timer.lock().await.take() {
            drop(timer);
            debug!("Auto-sync timer stopped");
        }
    }

    /// Timer loop. Each tick spawns its own cycle so stopping the timer
    /// never cancels one.
    async fn timer_loop(inner: Arc<Inner>, mut stop_rx: mpsc::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + inner.interval, inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        match inner.run_cycle().await {
                            Ok(_) | Err(SyncError::SyncInProgress) => {}
                            Err(e) => debug!(error = %e, "Scheduled cycle failed"),
                        }
                    });
                }

                _ = stop_rx.recv() => {
                    break;
                }
            }
        }

        debug!("Auto-sync timer loop exited");
    }
}

impl Inner {
    fn ensure_running(&self) -> SyncResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            Err(SyncError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    async fn run_cycle(&self) -> SyncResult<SyncSummary> {
        let Some(_guard) = SyncGuard::try_acquire(&self.syncing) else {
            debug!("Sync already in flight, skipping cycle");
            return Err(SyncError::SyncInProgress);
        };

        let full = self.client.snapshots().cursor().await?.is_none();
        {
            let mut s = self.status.write().await;
            s.is_syncing = true;
            s.state = if full {
                SyncState::SyncingFull
            } else {
                SyncState::SyncingDelta
            };
        }
        self.emit_status().await;

        if let Err(e) = self.drain_queue().await {
            warn!(error = %e, "Dispatch before pull failed");
            self.record_error(&e).await;
        }

        let result = self.client.delta_sync().await;

        {
            let mut s = self.status.write().await;
            s.is_syncing = false;
            match &result {
                Ok(_) => {
                    s.state = SyncState::Idle;
                    s.last_sync_at = Some(Utc::now());
                    s.last_error = None;
                }
                Err(_) if full => s.state = SyncState::Uninitialized,
                Err(_) => s.state = SyncState::Idle,
            }
        }

        match &result {
            Ok(summary) => debug!(mode = ?summary.mode, fetched = summary.fetched, "Cycle complete"),
            Err(e) => {
                warn!(error = %e, "Sync cycle failed");
                self.record_error(e).await;
            }
        }
        self.emit_status().await;
        result
    }

    async fn drain_queue(&self) -> SyncResult<DispatchReport> {
        let pending = self.queue.pending(usize::MAX).await?;
        if pending.is_empty() {
            return Ok(DispatchReport::from_results(Vec::new()));
        }

        info!(count = pending.len(), "Dispatching pending stock deltas");
        let run = self.dispatcher.dispatch(&pending).await?;
        self.queue.settle(&run.outcomes).await?;

        self.status.write().await.last_dispatch = Some(run.report.clone());
        self.emitter.emit_progress(&run.report);
        self.refresh_counts().await?;
        Ok(run.report)
    }

    async fn refresh_counts(&self) -> SyncResult<()> {
        let pending = self.queue.count_pending().await?;
        let failed = self.queue.count_failed().await?;
        let mut s = self.status.write().await;
        s.pending_count = pending;
        s.failed_count = failed;
        Ok(())
    }

    async fn record_error(&self, err: &SyncError) {
        self.status.write().await.last_error = Some(err.to_string());
        self.emitter.emit_error(&err.to_string(), err.is_retryable());
    }

    async fn set_state(&self, state: SyncState) {
        self.status.write().await.state = state;
        self.emit_status().await;
    }

    async fn set_syncing(&self, syncing: bool) {
        self.status.write().await.is_syncing = syncing;
        self.emit_status().await;
    }

    async fn emit_status(&self) {
        let s = self.status.read().await.clone();
        self.emitter.emit_status(&s);
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a SyncOrchestrator with options.
pub struct SyncOrchestratorBuilder {
    config: SyncConfig,
    store: Option<StoreHandle>,
    api: Option<Arc<dyn InventoryApi>>,
    tokens: Option<Arc<dyn TokenProvider>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncOrchestratorBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncOrchestratorBuilder {
            config,
            store: None,
            api: None,
            tokens: None,
            emitter: None,
        }
    }

    pub fn with_store(mut self, store: StoreHandle) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_api(mut self, api: Arc<dyn InventoryApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncOrchestrator.
    pub fn build(self) -> SyncResult<SyncOrchestrator> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| SyncError::InvalidConfig("Local store required".into()))?;
        let api = self
            .api
            .ok_or_else(|| SyncError::InvalidConfig("Inventory API required".into()))?;
        let tokens = self
            .tokens
            .ok_or_else(|| SyncError::InvalidConfig("Token provider required".into()))?;
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncOrchestrator::with_emitter(
            &self.config,
            store,
            api,
            tokens,
            emitter,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::testing::{product, FakeInventory, Reply};
    use std::sync::Mutex as StdMutex;
    use stockline_core::{ProductKey, SaleLine, StockChange, StockDelta, VerificationResult};

    #[derive(Default)]
    struct RecordingEmitter {
        states: StdMutex<Vec<SyncState>>,
        errors: StdMutex<Vec<String>>,
        dispatches: StdMutex<usize>,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, status: &SyncStatus) {
            self.states.lock().unwrap().push(status.state);
        }
        fn emit_progress(&self, _report: &DispatchReport) {
            *self.dispatches.lock().unwrap() += 1;
        }
        fn emit_error(&self, message: &str, _retryable: bool) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn config(auto_sync: bool) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.sync.auto_sync = auto_sync;
        config
    }

    fn shop() -> Arc<FakeInventory> {
        Arc::new(FakeInventory::with_products((1..=3).map(|id| product(id, 10))))
    }

    fn orchestrator(fake: Arc<FakeInventory>, store: StoreHandle, auto_sync: bool) -> SyncOrchestrator {
        SyncOrchestrator::new(
            &config(auto_sync),
            store,
            fake,
            Arc::new(StaticToken::new("token")),
        )
    }

    #[test]
    fn test_sync_status_default() {
        let status = SyncStatus::default();
        assert_eq!(status.state, SyncState::Uninitialized);
        assert!(!status.is_syncing);
        assert_eq!(status.pending_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_cursor_runs_full_sync() {
        let fake = shop();
        let store = StoreHandle::in_memory();
        let emitter = Arc::new(RecordingEmitter::default());
        let orch = SyncOrchestrator::with_emitter(
            &config(false),
            store.clone(),
            fake,
            Arc::new(StaticToken::new("token")),
            emitter.clone(),
        );

        orch.start().await.unwrap();

        let status = orch.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_sync_at.is_some());
        assert_eq!(SnapshotRepository::new(store).count().await.unwrap(), 3);
        assert!(emitter
            .states
            .lock()
            .unwrap()
            .contains(&SyncState::SyncingFull));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_sync_stays_uninitialized() {
        let fake = shop();
        fake.fail_listing(Some(500));
        let orch = orchestrator(fake.clone(), StoreHandle::in_memory(), false);

        orch.start().await.unwrap();

        let status = orch.status().await;
        assert_eq!(status.state, SyncState::Uninitialized);
        assert_eq!(status.last_error.as_deref(), Some("Remote call failed: HTTP 500"));

        fake.fail_listing(None);
        orch.sync_now().await.unwrap();
        assert_eq!(orch.status().await.state, SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_drains_queue_before_pull() {
        let fake = shop();
        let store = StoreHandle::in_memory();
        let queue = StockDeltaQueue::new(store.clone());
        let orch = orchestrator(fake.clone(), store, false);
        orch.start().await.unwrap();

        queue
            .enqueue(vec![
                StockDelta::new(ProductKey::product(1), StockChange::Absolute(4)),
                StockDelta::new(ProductKey::product(2), StockChange::Absolute(6)),
            ])
            .await
            .unwrap();
        fake.script_updates(ProductKey::product(2), [Reply::Status(404)]);

        orch.sync_now().await.unwrap();

        assert_eq!(fake.stock(ProductKey::product(1)), Some(4));
        let status = orch.status().await;
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.last_dispatch.unwrap().failed, 1);
        assert_eq!(status.state, SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_sale_reaches_remote_once_online() {
        let fake = shop();
        let orch = orchestrator(fake.clone(), StoreHandle::in_memory(), false);
        orch.start().await.unwrap();

        fake.set_offline(true);
        orch.sales()
            .commit_sale(&[SaleLine {
                product_id: 1,
                variation_id: None,
                quantity: 3,
            }])
            .await
            .unwrap();

        assert!(orch.sync_now().await.is_err());
        let status = orch.status().await;
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.failed_count, 0);
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(fake.stock(ProductKey::product(1)), Some(10));

        fake.set_offline(false);
        orch.sync_now().await.unwrap();

        assert_eq!(fake.stock(ProductKey::product(1)), Some(7));
        let status = orch.status().await;
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.failed_count, 0);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_cache_uses_configured_ttl() {
        let mut config = config(false);
        config.cache.ttl_days = 2;
        let orch = SyncOrchestrator::new(
            &config,
            StoreHandle::in_memory(),
            shop(),
            Arc::new(StaticToken::new("token")),
        );
        let cache = orch.reference_cache();
        assert_eq!(cache.ttl(), chrono::Duration::days(2));

        let stored_at = Utc::now() - chrono::Duration::days(3);
        cache.put_at("tax_classes", &vec!["standard"], stored_at).await.unwrap();
        let stale: Option<Vec<String>> = cache.get("tax_classes").await.unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_rejects_overlapping_runs() {
        let fake = shop();
        fake.set_update_latency(Duration::from_secs(1));
        let store = StoreHandle::in_memory();
        let orch = orchestrator(fake.clone(), store.clone(), false);
        orch.start().await.unwrap();
        StockDeltaQueue::new(store)
            .enqueue(vec![StockDelta::new(
                ProductKey::product(1),
                StockChange::Absolute(1),
            )])
            .await
            .unwrap();

        let running = tokio::spawn({
            let orch = orch.clone();
            async move { orch.dispatch_pending().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(orch.status().await.is_syncing);
        assert!(matches!(orch.sync_now().await, Err(SyncError::SyncInProgress)));

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.updated, 1);
        assert!(!orch.status().await.is_syncing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_runs_delta_cycles() {
        let fake = shop();
        let orch = orchestrator(fake.clone(), StoreHandle::in_memory(), true);
        orch.start().await.unwrap();
        let after_start = fake.list_calls().len();

        tokio::time::sleep(Duration::from_secs(121)).await;

        let calls = fake.list_calls();
        assert!(calls.len() > after_start);
        assert!(calls.last().unwrap().since.is_some());
        orch.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_auto_sync_stops_ticks() {
        let fake = shop();
        let orch = orchestrator(fake.clone(), StoreHandle::in_memory(), true);
        orch.start().await.unwrap();

        orch.set_auto_sync(false).await;
        let calls = fake.list_calls().len();
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(fake.list_calls().len(), calls);
        assert!(!orch.status().await.auto_sync_enabled);

        orch.set_auto_sync(true).await;
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(fake.list_calls().len() > calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_auto_sync_lets_running_cycle_finish() {
        let fake = shop();
        fake.set_update_latency(Duration::from_secs(5));
        let store = StoreHandle::in_memory();
        let orch = orchestrator(fake.clone(), store.clone(), true);
        orch.start().await.unwrap();
        StockDeltaQueue::new(store)
            .enqueue(vec![StockDelta::new(
                ProductKey::product(2),
                StockChange::Absolute(4),
            )])
            .await
            .unwrap();

        // First tick at 120s; its write is still in flight at 121s
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(orch.status().await.is_syncing);

        orch.set_auto_sync(false).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fake.stock(ProductKey::product(2)), Some(4));
        let status = orch.status().await;
        assert!(!status.is_syncing);
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.pending_count, 0);

        let calls = fake.list_calls().len();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fake.list_calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_repairs_queues_mismatches() {
        let fake = shop();
        let orch = orchestrator(fake, StoreHandle::in_memory(), false);
        let report = VerifyReport::from_results(vec![VerificationResult::compare(
            &ExpectedStock::new(ProductKey::product(1), 10),
            7,
        )]);

        assert_eq!(orch.enqueue_repairs(&report).await.unwrap(), 1);
        assert_eq!(orch.status().await.pending_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_cycle_keeps_queue() {
        let fake = shop();
        let store = StoreHandle::in_memory();
        let queue = StockDeltaQueue::new(store.clone());
        queue
            .enqueue(vec![StockDelta::new(
                ProductKey::product(1),
                StockChange::Absolute(1),
            )])
            .await
            .unwrap();
        let orch = SyncOrchestrator::new(
            &config(false),
            store,
            fake.clone(),
            Arc::new(StaticToken::none()),
        );

        assert!(matches!(orch.sync_now().await, Err(SyncError::Unauthenticated)));
        assert_eq!(fake.total_calls(), 0);
        assert_eq!(queue.count_pending().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_new_work() {
        let orch = orchestrator(shop(), StoreHandle::in_memory(), true);
        orch.start().await.unwrap();

        orch.shutdown().await.unwrap();

        assert!(matches!(orch.sync_now().await, Err(SyncError::ShuttingDown)));
    }

    #[test]
    fn test_builder_requires_store() {
        let result = SyncOrchestratorBuilder::new(SyncConfig::default())
            .with_api(shop())
            .with_tokens(Arc::new(StaticToken::none()))
            .build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
