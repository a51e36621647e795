//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while obtaining credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was configured or the server returned an empty one.
    #[error("Authentication token is required")]
    MissingToken,

    /// Login was rejected.
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// The session cookie could not be refreshed; the user must log in again.
    #[error("Your session has expired. Please log in again.")]
    SessionExpired,

    /// Too many requests.
    #[error("rate limited")]
    RateLimited,

    /// The API answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body, if any.
        message: String,
    },

    /// The request could not be sent.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// Whether the error means the caller has to re-authenticate.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::LoginFailed(_) | Self::SessionExpired
        )
    }
}
