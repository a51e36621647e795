//! Client error types.

use thiserror::Error;

/// A result type using `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the chat client when constructing or configuring a session.
///
/// Runtime failures on an established session are not returned as errors:
/// they arrive as connection events, status changes or transcript messages.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A session was started outside of a Tokio runtime.
    #[error("no Tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

/// Configuration problems detected before any connection is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The endpoint URL does not parse.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The endpoint is not a WebSocket URL.
    #[error("unsupported URL scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),

    /// Think delimiters must be non-empty and distinct.
    #[error("think delimiters must be non-empty and distinct")]
    InvalidDelimiters,

    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for `ClientConfig`.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
