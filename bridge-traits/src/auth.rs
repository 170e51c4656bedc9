//! Authentication Boundary
//!
//! The session module owns sign-in, refresh and sign-out. The core only needs
//! the bearer token to attach to catalog requests.

use async_trait::async_trait;

use crate::error::{BridgeError, Result};

/// Supplies the bearer token for the signed-in user.
///
/// Returns [`BridgeError::Unauthenticated`] when there is no active session;
/// fetchers translate that into the "unauthenticated" signal the UI reacts to.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token.
    async fn access_token(&self) -> Result<String>;
}

/// Token provider returning a fixed token, or no session at all.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.token
            .clone()
            .ok_or_else(|| BridgeError::Unauthenticated("no active session".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_provider() {
        let provider = StaticTokenProvider::new("abc");
        assert_eq!(provider.access_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_signed_out_provider() {
        let provider = StaticTokenProvider::signed_out();
        assert!(matches!(
            provider.access_token().await,
            Err(BridgeError::Unauthenticated(_))
        ));
    }
}
