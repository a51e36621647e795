//! Client configuration types.
//!
//! This module defines the knobs for the socket endpoint, the verification
//! handshake, reconnection and think-section parsing.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

/// Fixed text shown in the transcript when the server reports an error.
pub const DEFAULT_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

/// How long to wait between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed {
        /// Delay in milliseconds.
        interval_ms: u64,
    },
    /// Doubling delay, clamped to `max_ms`.
    Exponential {
        /// Delay before the first retry, in milliseconds.
        initial_ms: u64,
        /// Upper bound on the delay, in milliseconds.
        max_ms: u64,
    },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            Self::Exponential { initial_ms, max_ms } => {
                let exponent = attempt.saturating_sub(1).min(5);
                let ms = initial_ms
                    .saturating_mul(2u64.saturating_pow(exponent))
                    .min(max_ms);
                Duration::from_millis(ms)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed { interval_ms: 3000 }
    }
}

/// Configuration for a chat session.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint (e.g., `wss://chat.example.com/ws`).
    #[serde(default = "ClientConfig::default_url")]
    pub url: String,

    /// Send a `verify` frame after open and wait for the `authenticated` ack.
    #[serde(default = "ClientConfig::default_true")]
    pub verify_auth: bool,

    /// Deadline for reaching the authenticated state, in milliseconds.
    #[serde(default = "ClientConfig::default_auth_timeout")]
    pub auth_timeout_ms: u64,

    /// Reconnect automatically after transient disconnects.
    #[serde(default = "ClientConfig::default_true")]
    pub auto_reconnect: bool,

    /// Delay schedule between reconnect attempts.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Stop reconnecting after this many consecutive failed attempts.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Sender name attached to outbound chat messages.
    #[serde(default = "ClientConfig::default_sender")]
    pub sender: String,

    /// Text of the transcript message shown for server-side errors.
    #[serde(default = "ClientConfig::default_error_message")]
    pub error_message: String,

    /// Marker opening a think section inside streamed text.
    #[serde(default = "ClientConfig::default_think_open")]
    pub think_open: String,

    /// Marker closing a think section.
    #[serde(default = "ClientConfig::default_think_close")]
    pub think_close: String,

    /// Lines of reasoning kept in the thinking display.
    #[serde(default = "ClientConfig::default_thinking_lines")]
    pub thinking_max_lines: usize,

    /// Characters of reasoning kept in the thinking display.
    #[serde(default = "ClientConfig::default_thinking_chars")]
    pub thinking_max_chars: usize,
}

impl ClientConfig {
    fn default_url() -> String {
        "ws://localhost:3000/ws".to_string()
    }

    const fn default_true() -> bool {
        true
    }

    const fn default_auth_timeout() -> u64 {
        5000
    }

    fn default_sender() -> String {
        "anonymous".to_string()
    }

    fn default_error_message() -> String {
        DEFAULT_ERROR_MESSAGE.to_string()
    }

    fn default_think_open() -> String {
        "<think>".to_string()
    }

    fn default_think_close() -> String {
        "</think>".to_string()
    }

    const fn default_thinking_lines() -> usize {
        15
    }

    const fn default_thinking_chars() -> usize {
        1000
    }

    /// Build a config for the given endpoint with every other field defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Get the authentication deadline as a `Duration`.
    #[must_use]
    pub const fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Parse and check the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or is not `ws`/`wss`.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Check every field that can make a session unusable.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;
        if self.think_open.is_empty()
            || self.think_close.is_empty()
            || self.think_open == self.think_close
        {
            return Err(ConfigError::InvalidDelimiters);
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            verify_auth: true,
            auth_timeout_ms: Self::default_auth_timeout(),
            auto_reconnect: true,
            reconnect: ReconnectPolicy::default(),
            max_reconnect_attempts: None,
            sender: Self::default_sender(),
            error_message: Self::default_error_message(),
            think_open: Self::default_think_open(),
            think_close: Self::default_think_close(),
            thinking_max_lines: Self::default_thinking_lines(),
            thinking_max_chars: Self::default_thinking_chars(),
        }
    }
}

/// Build the URL for one connection attempt.
///
/// The token and the attempt counter are appended as query parameters; the
/// counter makes every attempt distinguishable server-side.
#[must_use]
pub fn attempt_url(endpoint: &Url, token: &str, attempt: u32) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("reconnect", &attempt.to_string());
    url
}
