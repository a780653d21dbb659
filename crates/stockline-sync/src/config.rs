//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKLINE_BASE_URL=https://shop.example.com/wp-json/wc/v3          │
//! │     STOCKLINE_AUTO_SYNC=false                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockline/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.stockline.terminal/sync.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-sync every 120s, batch size 3, 3 attempts                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [terminal]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [remote]
//! base_url = "https://shop.example.com/wp-json/wc/v3"
//! per_page = 100
//! request_timeout_ms = 8000
//!
//! [sync]
//! auto_sync = true
//! interval_secs = 120
//!
//! [dispatch]
//! batch_size = 3
//! inter_batch_delay_ms = 500
//! max_attempts = 3
//! initial_backoff_ms = 1000
//! backoff_multiplier = 2.0
//! dead_letter_limit = 500
//!
//! [verify]
//! max_concurrency = 5
//!
//! [cache]
//! ttl_days = 7
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Terminal Configuration
// =============================================================================

/// Identity of this POS terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Unique terminal identifier, generated on first run.
    pub id: String,

    /// Human-readable name (e.g., "Register 1").
    #[serde(default = "default_terminal_name")]
    pub name: String,
}

fn default_terminal_name() -> String {
    "POS Terminal".to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            id: Uuid::new_v4().to_string(),
            name: default_terminal_name(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Where the remote inventory service lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// REST base, e.g. `https://shop.example.com/wp-json/wc/v3`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Page size for listing calls (the service caps it at 100).
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Deadline applied to every outbound call (milliseconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/wp-json/wc/v3".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_request_timeout() -> u64 {
    8_000
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: default_base_url(),
            per_page: default_per_page(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Auto-sync scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Whether the timer runs at startup. Toggle at runtime through the
    /// orchestrator.
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    /// Interval between auto-sync cycles (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    120
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            auto_sync: true,
            interval_secs: default_interval(),
        }
    }
}

// =============================================================================
// Dispatch Settings
// =============================================================================

/// Batched update dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Requests in flight per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (milliseconds).
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_ms: u64,

    /// Attempts per item, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Growth factor applied to each subsequent delay.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on a single delay (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Dead-lettered deltas kept for review; the oldest are dropped first.
    #[serde(default = "default_dead_letter_limit")]
    pub dead_letter_limit: usize,
}

fn default_batch_size() -> usize {
    3
}
fn default_inter_batch_delay() -> u64 {
    500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    1_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_dead_letter_limit() -> usize {
    500
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            batch_size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            backoff_multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff(),
            dead_letter_limit: default_dead_letter_limit(),
        }
    }
}

// =============================================================================
// Verify & Cache Settings
// =============================================================================

/// Reconciliation verifier tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySettings {
    /// Reads in flight at once.
    #[serde(default = "default_verify_concurrency")]
    pub max_concurrency: usize,
}

fn default_verify_concurrency() -> usize {
    5
}

impl Default for VerifySettings {
    fn default() -> Self {
        VerifySettings {
            max_concurrency: default_verify_concurrency(),
        }
    }
}

/// Reference-data cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
}

fn default_ttl_days() -> i64 {
    7
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl_days: default_ttl_days(),
        }
    }
}

/// Local database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path of the SQLite file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub verify: VerifySettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated terminal ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    ///
    /// An invalid result is an error; there is no silent fallback to
    /// defaults.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    fn load_with(
        config_path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(lookup);
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.terminal.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("terminal.id must not be empty".into()));
        }

        let url = url::Url::parse(&self.remote.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Base URL must start with http:// or https://, got: {}",
                self.remote.base_url
            )));
        }

        if self.remote.per_page == 0 || self.remote.per_page > 100 {
            return Err(SyncError::InvalidConfig(
                "remote.per_page must be between 1 and 100".into(),
            ));
        }
        if self.remote.request_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "remote.request_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.interval_secs must be greater than 0".into(),
            ));
        }
        if self.dispatch.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "dispatch.batch_size must be greater than 0".into(),
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "dispatch.max_attempts must be at least 1".into(),
            ));
        }
        if self.dispatch.backoff_multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(
                "dispatch.backoff_multiplier must be at least 1.0".into(),
            ));
        }
        if self.dispatch.dead_letter_limit == 0 {
            return Err(SyncError::InvalidConfig(
                "dispatch.dead_letter_limit must be greater than 0".into(),
            ));
        }
        if self.verify.max_concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "verify.max_concurrency must be greater than 0".into(),
            ));
        }
        if self.cache.ttl_days <= 0 {
            return Err(SyncError::InvalidConfig(
                "cache.ttl_days must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `STOCKLINE_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("STOCKLINE_TERMINAL_ID") {
            debug!(terminal_id = %id, "Overriding terminal ID from environment");
            self.terminal.id = id;
        }

        if let Some(name) = lookup("STOCKLINE_TERMINAL_NAME") {
            self.terminal.name = name;
        }

        if let Some(url) = lookup("STOCKLINE_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.remote.base_url = url;
        }

        if let Some(flag) = lookup("STOCKLINE_AUTO_SYNC") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.sync.auto_sync = true,
                "0" | "false" | "off" | "no" => self.sync.auto_sync = false,
                _ => warn!(value = %flag, "Unknown auto-sync flag in environment"),
            }
        }

        if let Some(secs) = lookup("STOCKLINE_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.interval_secs = s,
                Err(_) => warn!(value = %secs, "Invalid sync interval in environment"),
            }
        }

        if let Some(size) = lookup("STOCKLINE_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.dispatch.batch_size = n,
                Err(_) => warn!(value = %size, "Invalid batch size in environment"),
            }
        }

        if let Some(path) = lookup("STOCKLINE_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "stockline", "terminal")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn terminal_id(&self) -> &str {
        &self.terminal.id
    }

    /// SQLite file path: configured, else the platform data dir, else the
    /// working directory.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(|| Self::project_dirs().map(|d| d.data_dir().join("stockline.db")))
            .unwrap_or_else(|| PathBuf::from("stockline.db"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.request_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch.inter_batch_delay_ms)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.cache.ttl_days)
    }
}
