//! Chat transcript entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Who a message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Typed by the local user.
    User,
    /// Model or system output.
    Assistant,
    /// A delivery failure shown inline.
    Error,
}

impl Role {
    /// Human-readable display string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Error => "error",
        }
    }
}

/// One entry of the chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique, never reused.
    pub id: MessageId,
    /// Message role.
    pub role: Role,
    /// Message text. Grows while `is_streaming` is set.
    pub content: String,
    /// Creation time; appends do not touch it.
    pub timestamp: DateTime<Utc>,
    /// More content may still arrive.
    pub is_streaming: bool,
    /// Transient reasoning display, discarded when reasoning ends.
    pub is_thinking: bool,
    /// Terminal delivery failure.
    pub is_error: bool,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_streaming: false,
            is_thinking: false,
            is_error: false,
        }
    }

    /// Create a finalized user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message, streaming unless `is_complete`.
    #[must_use]
    pub fn assistant(content: impl Into<String>, is_complete: bool) -> Self {
        Self {
            is_streaming: !is_complete,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create the transient reasoning message.
    #[must_use]
    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            is_thinking: true,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create a finalized error message.
    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Error, content)
        }
    }

    /// Check if this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}
