//! The token seam consumed by the connection layer.

use async_trait::async_trait;

use crate::error::{AuthError, Result};

/// Source of bearer tokens for the chat socket.
///
/// Called once per connection attempt, so implementations should return a
/// token that is valid now rather than one cached from a previous attempt.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Resolve a fresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if no token can be obtained. Callers treat this as a
    /// failed connection attempt.
    async fn token(&self) -> Result<String>;
}

/// A provider that always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Create a provider for a fixed token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }
        Ok(self.token.clone())
    }
}
