//! Streaming chat sessions over an authenticated WebSocket.
//!
//! This crate owns the client side of a chat conversation:
//!
//! - **`ConnectionManager`**: one socket per session, verification handshake, reconnects
//! - **`FragmentParser`**: splits streamed text into visible and thinking spans
//! - **`MessageAssembler`**: the ordered transcript and its streaming state
//! - **`SessionController`**: the facade a view layer talks to
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chatwire_auth::StaticTokenProvider;
//! use chatwire_client::{ClientConfig, SessionController};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SessionController::new(
//!     ClientConfig::new("wss://chat.example.com/ws"),
//!     Arc::new(StaticTokenProvider::new("token")),
//! )?;
//! session.start();
//!
//! let mut messages = session.watch_messages();
//! while messages.changed().await.is_ok() {
//!     for message in messages.borrow().iter() {
//!         println!("{}: {}", message.role.as_str(), message.content);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod assembler;
pub mod config;
pub mod connection;
pub mod error;
pub mod ids;
pub mod message;
pub mod parser;
pub mod protocol;
pub mod session;

pub use assembler::MessageAssembler;
pub use config::{ClientConfig, ReconnectPolicy, DEFAULT_ERROR_MESSAGE};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{ClientError, ConfigError, Result};
pub use ids::{ConnectionId, IdError, MessageId};
pub use message::{ChatMessage, Role};
pub use parser::{FragmentParser, ParsedFragment, ParserState, ThinkingBuffer};
pub use protocol::{FrameData, FrameKind, InboundFrame, MessagePayload, OutboundFrame};
pub use session::{SessionController, SessionStatus, StreamState, SEND_FAILED_MESSAGE};
