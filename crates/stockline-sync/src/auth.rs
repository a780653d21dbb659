//! # Token Provider
//!
//! Supplies the bearer credential attached to every remote call.
//!
//! ## Short-Circuit Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  delta sync / dispatch / verify                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  provider.bearer_token().await                                         │
//! │       │                                                                 │
//! │       ├── Some(token) ──► remote calls carry "Authorization: Bearer"   │
//! │       │                                                                 │
//! │       └── None ──► unauthenticated, zero network calls                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The token is asked for once per operation, so a credential swapped
//! through [`SharedToken::set`] takes effect on the next cycle.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Environment variable read by [`EnvToken`].
pub const TOKEN_ENV_VAR: &str = "STOCKLINE_API_TOKEN";

/// Source of the bearer credential.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, or `None` when the terminal is not
    /// signed in.
    async fn bearer_token(&self) -> Option<String>;
}

// =============================================================================
// Providers
// =============================================================================

/// A fixed token (or none).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(Some(token.into()))
    }

    /// A provider that never has a token.
    pub fn none() -> Self {
        StaticToken(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from `STOCKLINE_API_TOKEN` on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvToken;

#[async_trait]
impl TokenProvider for EnvToken {
    async fn bearer_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

/// Token held in memory and replaceable at runtime (operator sign-in and
/// sign-out).
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new() -> Self {
        SharedToken::default()
    }

    pub async fn set(&self, token: impl Into<String>) {
        info!("Bearer token updated");
        *self.token.write().await = Some(token.into());
    }

    pub async fn clear(&self) {
        debug!("Bearer token cleared");
        *self.token.write().await = None;
    }
}

#[async_trait]
impl TokenProvider for SharedToken {
    async fn bearer_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken::new("abc").bearer_token().await, Some("abc".into()));
        assert_eq!(StaticToken::none().bearer_token().await, None);
    }

    #[tokio::test]
    async fn test_shared_token_set_and_clear() {
        let provider = SharedToken::new();
        assert_eq!(provider.bearer_token().await, None);

        let clone = provider.clone();
        clone.set("secret").await;
        assert_eq!(provider.bearer_token().await, Some("secret".into()));

        provider.clear().await;
        assert_eq!(clone.bearer_token().await, None);
    }
}
