//! Wire protocol for the chat socket.
//!
//! All frames are JSON text messages.
//!
//! Outbound:
//! - `{"action":"verify"}` after the socket opens
//! - `{"action":"message","data":{"message":..,"sender":..,"connectionId":..}}`
//!
//! Inbound frames are loosely shaped: every field is optional and the meaning
//! is decided by which fields are present (see [`InboundFrame::kind`]).

use serde::{Deserialize, Serialize};

/// Client -> Server: an action with an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Action name, e.g. `message` or `verify`.
    pub action: String,
    /// Action payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl OutboundFrame {
    /// Build a frame for an arbitrary action.
    pub fn new(action: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }

    /// The post-open verification handshake.
    #[must_use]
    pub fn verify() -> Self {
        Self::new("verify", None)
    }
}

/// Payload of a `message` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// The user's text.
    pub message: String,
    /// Display name of the sender.
    pub sender: String,
    /// Connection ID from the welcome frame, if one was received.
    pub connection_id: Option<String>,
}

/// Server -> Client: any frame the server may push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    /// System/welcome text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Streaming payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FrameData>,
    /// Top-level error text, used for authentication problems.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-assigned correlation ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Acknowledgement of the verification handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
}

/// The `data` object of an inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameData {
    /// Text fragment of the streamed response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Whether this fragment ends the response.
    #[serde(default)]
    pub is_complete: bool,
    /// Whether the server failed to produce a response.
    #[serde(default)]
    pub error: bool,
    /// Optional server-side detail accompanying an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What an inbound frame means to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// A piece of a streamed assistant response.
    Fragment {
        /// Raw text, think markers included.
        text: &'a str,
        /// Whether the response is finished.
        is_complete: bool,
    },
    /// The server could not produce a response.
    ServerError {
        /// Server-provided detail, for logs only.
        detail: Option<&'a str>,
    },
    /// A welcome or system notice.
    Welcome {
        /// Notice text.
        message: &'a str,
    },
    /// Handshake acks and anything else with no transcript effect.
    Control,
}

impl InboundFrame {
    /// Classify the frame.
    #[must_use]
    pub fn kind(&self) -> FrameKind<'_> {
        if let Some(data) = &self.data {
            if data.error {
                return FrameKind::ServerError {
                    detail: data.message.as_deref(),
                };
            }
            if let Some(text) = &data.text {
                return FrameKind::Fragment {
                    text: text.as_str(),
                    is_complete: data.is_complete,
                };
            }
            if data.is_complete {
                return FrameKind::Fragment {
                    text: "",
                    is_complete: true,
                };
            }
        }
        if let Some(message) = &self.message {
            return FrameKind::Welcome {
                message: message.as_str(),
            };
        }
        FrameKind::Control
    }

    /// Whether the frame acknowledges the verification handshake.
    #[must_use]
    pub fn is_auth_ack(&self) -> bool {
        self.authenticated == Some(true)
    }

    /// The top-level error, if it is about authentication.
    #[must_use]
    pub fn auth_error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .filter(|e| e.to_ascii_lowercase().contains("auth"))
    }
}
