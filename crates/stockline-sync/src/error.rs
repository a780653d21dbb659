//! # Sync Error Types
//!
//! Error types for sync, dispatch and verification.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ApiError (one remote call)            SyncError (one whole operation) │
//! │  ──────────────────────────            ─────────────────────────────── │
//! │  Unauthenticated   fatal               Unauthenticated                 │
//! │  Status 429/503    transient ◄─retry   Api(ApiError)                   │
//! │  Timeout           transient ◄─retry   Database                        │
//! │  Status 401/403    deferred            InvalidConfig / InvalidUrl      │
//! │  Network           deferred            ConfigLoad / ConfigSave         │
//! │  Status other      permanent           SyncInProgress / ShuttingDown   │
//! │  InvalidResponse   permanent                                           │
//! │  Mismatch          drift                                               │
//! │                                                                         │
//! │  Dispatcher and verifier turn ApiErrors into per-item results. A       │
//! │  queued delta whose last error defers delivery stays pending; only     │
//! │  permanent and drift errors dead-letter it.                            │
//! │  Delta sync surfaces one SyncError to the orchestrator, which logs    │
//! │  it and tries again on the next tick.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Api Error
// =============================================================================

/// Failure of a single call to the remote inventory service.
///
/// The `Display` form is what lands in `UpdateResult::error` and
/// `VerificationResult::error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// No bearer credential available.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Non-2xx response.
    #[error("HTTP {status}")]
    Status {
        status: u16,
        /// `message` field of the JSON error body, when present.
        message: Option<String>,
    },

    /// The call did not finish before its deadline.
    #[error("timeout after {ms}ms")]
    Timeout { ms: u64 },

    /// Connection-level failure (DNS, refused, reset).
    #[error("network error: {0}")]
    Network(String),

    /// 2xx response whose body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The verification read after an ambiguous write disagreed.
    #[error("verification mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: i64, actual: i64 },
}

impl ApiError {
    pub fn status(status: u16) -> Self {
        ApiError::Status {
            status,
            message: None,
        }
    }

    /// Transient failures worth another attempt: 429, 503 and timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => matches!(status, 429 | 503),
            ApiError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// The server never judged the item: it could not be reached, stayed
    /// overloaded through every attempt, or refused our credential.
    ///
    /// A queued delta that fails this way is kept for the next run.
    pub fn defers_delivery(&self) -> bool {
        self.is_retryable()
            || matches!(
                self,
                ApiError::Unauthenticated
                    | ApiError::Network(_)
                    | ApiError::Status {
                        status: 401 | 403,
                        ..
                    }
            )
    }

    /// The server refused the query itself (e.g. a cursor too old).
    ///
    /// Delta sync falls back to a full sync on these.
    pub fn is_structural_rejection(&self) -> bool {
        matches!(
            self,
            ApiError::Status {
                status: 400 | 409 | 410 | 422,
                ..
            }
        )
    }

    /// Returns the HTTP status, if this was a status error.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Failure of a whole sync, dispatch or configuration operation.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid remote base URL.
    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// No bearer credential; nothing was sent.
    #[error("Not authenticated with the inventory service")]
    Unauthenticated,

    /// A remote call failed.
    #[error("Remote call failed: {0}")]
    Api(ApiError),

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Local Store read or write failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Failed to build a request or decode a response.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Orchestration Errors
    // =========================================================================
    /// Another sync or dispatch run holds the guard.
    #[error("A sync is already in progress")]
    SyncInProgress,

    /// Orchestrator is shutting down.
    #[error("Sync orchestrator is shutting down")]
    ShuttingDown,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthenticated => SyncError::Unauthenticated,
            other => SyncError::Api(other),
        }
    }
}

impl From<stockline_db::DbError> for SyncError {
    fn from(err: stockline_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the next scheduled cycle may succeed without any
    /// operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Api(api) => {
                api.is_retryable() || matches!(api, ApiError::Network(_))
            }
            SyncError::DatabaseError(_) | SyncError::SyncInProgress => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if an operator has to provide credentials.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthenticated | SyncError::Api(ApiError::Status { status: 401 | 403, .. })
        )
    }
}
