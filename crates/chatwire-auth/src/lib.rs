//! Credentials for chatwire sessions.
//!
//! The streaming chat socket authenticates with a short-lived token passed on
//! every connection attempt. This crate provides the pieces that produce it:
//!
//! - **`TokenProvider`**: the async seam the connection layer calls on each attempt
//! - **`StaticTokenProvider`**: a fixed token, for scripts and tests
//! - **`ApiClient`**: the cookie-session REST client (login, refresh, ws-token)
//!
//! # Example
//!
//! ```no_run
//! use chatwire_auth::{ApiClient, AuthConfig, TokenProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(AuthConfig {
//!     base_url: "https://chat.example.com".to_string(),
//!     ..AuthConfig::default()
//! })?;
//!
//! client.login("user@example.com", "hunter2").await?;
//! let token = client.token().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod provider;

use std::time::Duration;

pub use client::{ApiClient, User};
pub use error::{AuthError, Result};
pub use provider::{StaticTokenProvider, TokenProvider};

/// Configuration for the REST API that issues socket tokens.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL of the API (e.g., `https://chat.example.com`).
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl AuthConfig {
    /// Get the email/password login endpoint URL.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/api/v1/users/login", self.base())
    }

    /// Get the logout endpoint URL.
    #[must_use]
    pub fn logout_url(&self) -> String {
        format!("{}/api/v1/users/logout", self.base())
    }

    /// Get the session refresh endpoint URL.
    #[must_use]
    pub fn refresh_url(&self) -> String {
        format!("{}/api/v1/users/refresh-token", self.base())
    }

    /// Get the WebSocket token endpoint URL.
    #[must_use]
    pub fn ws_token_url(&self) -> String {
        format!("{}/api/v1/auth/ws-token", self.base())
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}
