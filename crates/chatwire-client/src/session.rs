//! The session facade consumed by a view layer.
//!
//! [`SessionController`] wires one [`ConnectionManager`] to a
//! [`StreamState`] (parser plus assembler) and publishes the transcript and
//! the connection status through `tokio::sync::watch` channels.

use std::sync::{Arc, Weak};

use chatwire_auth::TokenProvider;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::assembler::MessageAssembler;
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionStatus};
use crate::error::Result;
use crate::ids::{ConnectionId, MessageId};
use crate::message::ChatMessage;
use crate::parser::{FragmentParser, ParserState};
use crate::protocol::{FrameKind, InboundFrame, MessagePayload};

/// Shown when a submitted message could not be written to the socket.
pub const SEND_FAILED_MESSAGE: &str = "Message could not be sent. Please try again.";

/// Transcript reassembly without any I/O.
///
/// Feeds inbound frames through the think-marker parser into the assembler.
#[derive(Debug, Clone)]
pub struct StreamState {
    parser: FragmentParser,
    parser_state: ParserState,
    assembler: MessageAssembler,
    error_message: String,
}

impl StreamState {
    /// Create an empty stream for the given config.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        let parser = FragmentParser::from_config(config);
        let parser_state = parser.new_state();
        Self {
            parser,
            parser_state,
            assembler: MessageAssembler::new(),
            error_message: config.error_message.clone(),
        }
    }

    /// The transcript in display order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        self.assembler.messages()
    }

    /// The assembler, for inspection.
    #[must_use]
    pub const fn assembler(&self) -> &MessageAssembler {
        &self.assembler
    }

    /// Apply one inbound frame. Returns whether the transcript changed.
    pub fn handle_frame(&mut self, frame: &InboundFrame) -> bool {
        match frame.kind() {
            FrameKind::Fragment { text, is_complete } => {
                self.apply_fragment(text, is_complete);
                true
            }
            FrameKind::ServerError { detail } => {
                tracing::warn!(detail = detail.unwrap_or_default(), "Server failed to produce a response");
                self.apply_server_error();
                true
            }
            FrameKind::Welcome { message } => {
                tracing::info!(notice = message, "Server notice");
                false
            }
            FrameKind::Control => false,
        }
    }

    /// Apply one streamed text fragment.
    pub fn apply_fragment(&mut self, text: &str, is_complete: bool) {
        let mut parsed = self.parser.parse(text, &mut self.parser_state);
        let inside_think = self.parser_state.inside_think();
        let thinking = self.parser_state.thinking().display();
        if is_complete {
            parsed.absorb(self.parser.finish(&mut self.parser_state));
        }

        if parsed.think_just_closed {
            self.assembler.on_think_closed();
        }
        if inside_think && !is_complete && !parsed.thinking.is_empty() {
            self.assembler.apply_thinking(&thinking);
        }
        if !parsed.visible.is_empty() || is_complete {
            self.assembler.apply_visible(&parsed.visible, is_complete);
        }
    }

    /// The server reported a failure for the current response.
    pub fn apply_server_error(&mut self) {
        self.parser_state.reset();
        self.assembler.on_error(&self.error_message);
    }

    /// Record the user's message and start a fresh response.
    pub fn submit_user_message(&mut self, text: &str) -> MessageId {
        self.parser_state.reset();
        self.assembler.submit_user_message(text)
    }

    /// The socket went away.
    ///
    /// Text held back as a possible marker is kept. An open think section
    /// ends here, so the next response starts as visible text.
    pub fn on_disconnect(&mut self) {
        let flushed = self.parser.finish(&mut self.parser_state);
        if !flushed.visible.is_empty() {
            self.assembler.apply_visible(&flushed.visible, false);
        }
        self.assembler.on_disconnect();
    }

    /// The frame for the user's last message never left.
    pub fn on_send_failed(&mut self) {
        self.parser_state.reset();
        self.assembler.on_error(SEND_FAILED_MESSAGE);
    }
}

/// Connection status as seen by the view layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Raw connection status.
    pub connection: ConnectionStatus,
    /// Whether `submit` can send right now.
    pub is_connected: bool,
    /// A reconnect has been scheduled after a transient disconnect.
    pub reconnecting: bool,
    /// Last authentication failure, cleared once authenticated again.
    pub auth_error: Option<String>,
    /// Server-assigned correlation ID.
    pub connection_id: Option<ConnectionId>,
}

struct Inner {
    connection: ConnectionManager,
    stream: Mutex<StreamState>,
    messages: watch::Sender<Vec<ChatMessage>>,
    status: watch::Sender<SessionStatus>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

/// Handle to one chat session.
///
/// Clones share the same connection, so there is never more than one
/// socket per session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("connection", &self.inner.connection)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create a session. Call [`start`](Self::start) to connect.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or no Tokio runtime is running.
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let stream = StreamState::new(&config);
        let (connection, events) = ConnectionManager::new(config, tokens)?;
        let runtime = Handle::try_current()?;

        let (messages, _) = watch::channel(Vec::new());
        let (status, _) = watch::channel(SessionStatus::default());

        let inner = Arc::new(Inner {
            connection,
            stream: Mutex::new(stream),
            messages,
            status,
            pump: Mutex::new(None),
        });

        let pump = runtime.spawn(pump_events(Arc::downgrade(&inner), events));
        *inner.pump.lock() = Some(pump);

        Ok(Self { inner })
    }

    /// Start connecting. No-op if already connecting or connected.
    pub fn start(&self) {
        self.inner.connection.connect();
        self.inner.refresh_status(|_| {});
    }

    /// Submit user text.
    ///
    /// The user message is added to the transcript before the frame is sent.
    /// Returns `false` without touching the transcript if `text` is blank or
    /// the session is not connected. If the socket drops before the frame is
    /// written, an error message follows the user message and `false` is
    /// returned.
    pub fn submit(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if !self.inner.connection.is_ready() {
            tracing::warn!("Cannot submit, not connected");
            return false;
        }

        let state = self.inner.connection.state();
        let payload = MessagePayload {
            message: text.to_string(),
            sender: self.inner.connection.config().sender.clone(),
            connection_id: state.connection_id.map(|id| id.as_str().to_string()),
        };
        let data = match serde_json::to_value(&payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize message payload");
                return false;
            }
        };

        {
            let mut stream = self.inner.stream.lock();
            let id = stream.submit_user_message(text);
            tracing::debug!(message_id = %id, "User message added");
            self.inner.publish_messages(&stream);
        }

        if self.inner.connection.send("message", Some(data)) {
            return true;
        }

        let mut stream = self.inner.stream.lock();
        stream.on_send_failed();
        self.inner.publish_messages(&stream);
        false
    }

    /// Snapshot of the transcript.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.stream.lock().messages().to_vec()
    }

    /// Subscribe to transcript updates.
    #[must_use]
    pub fn watch_messages(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.inner.messages.subscribe()
    }

    /// Subscribe to status updates.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Snapshot of the status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Whether `submit` can send right now.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_ready()
    }

    /// Last authentication failure.
    #[must_use]
    pub fn auth_error(&self) -> Option<String> {
        self.inner.status.borrow().auth_error.clone()
    }

    /// Drop the current connection and connect again with a fresh token.
    ///
    /// Clears any authentication error.
    pub async fn reconnect(&self) {
        tracing::info!("Reconnect requested");
        self.inner.refresh_status(|status| status.auth_error = None);
        self.inner.connection.disconnect().await;
        self.inner.connection.connect();
        self.inner.refresh_status(|_| {});
    }

    /// Close the connection for good.
    pub async fn shutdown(&self) {
        self.inner.connection.disconnect().await;
        self.inner.refresh_status(|status| status.reconnecting = false);
    }
}

impl Inner {
    fn on_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                self.refresh_status(|status| status.reconnecting = false);
            }
            ConnectionEvent::Authenticated => {
                self.refresh_status(|status| status.auth_error = None);
            }
            ConnectionEvent::Message(frame) => {
                {
                    let mut stream = self.stream.lock();
                    if stream.handle_frame(&frame) {
                        self.publish_messages(&stream);
                    }
                }
                if frame.connection_id.is_some() {
                    self.refresh_status(|_| {});
                }
            }
            ConnectionEvent::Closed { reconnecting, .. } => {
                self.finalize_stream();
                self.refresh_status(|status| status.reconnecting = reconnecting);
            }
            ConnectionEvent::AuthError { message, retrying } => {
                tracing::warn!(error = %message, retrying, "Session authentication failed");
                self.finalize_stream();
                self.refresh_status(|status| {
                    status.auth_error = Some(message);
                    status.reconnecting = retrying;
                });
            }
            ConnectionEvent::GaveUp { attempts } => {
                tracing::warn!(attempts, "Session stopped reconnecting");
                self.refresh_status(|status| status.reconnecting = false);
            }
        }
    }

    fn finalize_stream(&self) {
        let mut stream = self.stream.lock();
        stream.on_disconnect();
        self.publish_messages(&stream);
    }

    fn publish_messages(&self, stream: &StreamState) {
        self.messages.send_replace(stream.messages().to_vec());
    }

    fn refresh_status(&self, f: impl FnOnce(&mut SessionStatus)) {
        let state = self.connection.state();
        let is_connected = self.connection.is_ready();
        self.status.send_modify(|status| {
            status.connection = state.status;
            status.connection_id = state.connection_id;
            status.is_connected = is_connected;
            f(status);
        });
    }
}

async fn pump_events(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::protocol::FrameData;

    fn stream() -> StreamState {
        StreamState::new(&ClientConfig::default())
    }

    fn fragment(text: &str, is_complete: bool) -> InboundFrame {
        InboundFrame {
            data: Some(FrameData {
                text: Some(text.to_string()),
                is_complete,
                ..FrameData::default()
            }),
            ..InboundFrame::default()
        }
    }

    fn streaming_count(stream: &StreamState) -> usize {
        stream.messages().iter().filter(|m| m.is_streaming).count()
    }

    #[test]
    fn hello_world() {
        let mut stream = stream();
        stream.submit_user_message("hi");
        stream.handle_frame(&fragment("Hello", false));
        stream.handle_frame(&fragment(" world", true));

        let messages = stream.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello world");
        assert!(!messages[1].is_streaming);
    }

    #[test]
    fn think_section_is_transient_for_every_chunking() {
        let text = "<think>reasoning</think>answer";
        for a in 0..=text.len() {
            for b in a..=text.len() {
                let mut stream = stream();
                stream.submit_user_message("why?");
                stream.apply_fragment(&text[..a], false);
                assert!(streaming_count(&stream) <= 1);
                stream.apply_fragment(&text[a..b], false);
                assert!(streaming_count(&stream) <= 1);
                stream.apply_fragment(&text[b..], true);

                let messages = stream.messages();
                assert_eq!(messages.len(), 2, "cuts at {a},{b}");
                assert_eq!(messages[1].content, "answer", "cuts at {a},{b}");
                assert!(!messages[1].is_streaming);
                assert!(messages.iter().all(|m| !m.is_thinking));
            }
        }
    }

    #[test]
    fn thinking_message_tracks_the_buffer() {
        let mut stream = stream();
        stream.submit_user_message("q");
        stream.apply_fragment("<think>first", false);
        stream.apply_fragment(" second", false);

        let thinking: Vec<_> = stream.messages().iter().filter(|m| m.is_thinking).collect();
        assert_eq!(thinking.len(), 1);
        assert_eq!(thinking[0].content, "first second");

        stream.apply_fragment("</think>", false);
        assert!(stream.messages().iter().all(|m| !m.is_thinking));
        assert_eq!(stream.messages().len(), 1);
    }

    #[test]
    fn long_reasoning_is_trimmed_with_ellipsis() {
        let config = ClientConfig {
            thinking_max_lines: 2,
            ..ClientConfig::default()
        };
        let mut stream = StreamState::new(&config);
        stream.apply_fragment("<think>a\nb\nc", false);

        let thinking = stream.messages().iter().find(|m| m.is_thinking).unwrap();
        assert_eq!(thinking.content, "...b\nc");
    }

    #[test]
    fn server_error_then_new_message() {
        let mut stream = stream();
        stream.submit_user_message("q");
        stream.handle_frame(&fragment("partial", false));
        let error: InboundFrame =
            serde_json::from_str(r#"{"data":{"error":true,"message":"model overloaded"}}"#).unwrap();
        assert!(stream.handle_frame(&error));

        let messages = stream.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[2].is_error);
        assert_eq!(messages[2].content, crate::config::DEFAULT_ERROR_MESSAGE);
        assert!(stream.assembler().active_message_id().is_none());

        stream.handle_frame(&fragment("retry", false));
        let messages = stream.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].content, "retry");
        assert!(!messages[3].is_error);
    }

    #[test]
    fn welcome_and_control_frames_leave_transcript_alone() {
        let mut stream = stream();
        let welcome: InboundFrame =
            serde_json::from_str(r#"{"message":"Welcome!","connectionId":"abc"}"#).unwrap();
        let ack: InboundFrame = serde_json::from_str(r#"{"authenticated":true}"#).unwrap();
        assert!(!stream.handle_frame(&welcome));
        assert!(!stream.handle_frame(&ack));
        assert!(stream.messages().is_empty());
    }

    #[test]
    fn new_user_turn_resets_think_state() {
        let mut stream = stream();
        stream.apply_fragment("<think>never closed", false);
        stream.submit_user_message("next question");
        stream.apply_fragment("plain answer", false);

        let messages = stream.messages();
        assert!(messages.iter().all(|m| !m.is_thinking));
        assert_eq!(messages.last().unwrap().content, "plain answer");
    }

    #[test]
    fn disconnect_finalizes_stream() {
        let mut stream = stream();
        stream.apply_fragment("half", false);
        stream.on_disconnect();
        assert_eq!(streaming_count(&stream), 0);
    }

    #[test]
    fn disconnect_keeps_held_back_marker_prefix() {
        let mut stream = stream();
        stream.submit_user_message("q");
        stream.apply_fragment("if a <", false);
        stream.on_disconnect();

        let messages = stream.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "if a <");
        assert!(!messages[1].is_streaming);
    }

    #[test]
    fn disconnect_inside_think_section_does_not_swallow_next_reply() {
        let mut stream = stream();
        stream.submit_user_message("q");
        stream.apply_fragment("<think>reasoning", false);
        stream.on_disconnect();
        assert!(stream.messages().iter().all(|m| !m.is_thinking));

        stream.apply_fragment("Hello after reconnect", true);
        let messages = stream.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello after reconnect");
        assert!(!messages[1].is_streaming);
    }

    #[test]
    fn failed_send_is_marked_in_transcript() {
        let mut stream = stream();
        stream.submit_user_message("lost");
        stream.on_send_failed();

        let messages = stream.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "lost");
        assert!(messages[1].is_error);
        assert_eq!(messages[1].content, SEND_FAILED_MESSAGE);
        assert_eq!(streaming_count(&stream), 0);
    }

    #[tokio::test]
    async fn submit_requires_connection() {
        let session = SessionController::new(
            ClientConfig::new("ws://localhost:1/ws"),
            Arc::new(chatwire_auth::StaticTokenProvider::new("t")),
        )
        .unwrap();

        assert!(!session.submit("hello"));
        assert!(!session.submit("   "));
        assert!(session.messages().is_empty());
        assert!(!session.is_connected());
        assert!(session.auth_error().is_none());
    }
}
