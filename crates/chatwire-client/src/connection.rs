//! Connection lifecycle for the chat socket.
//!
//! [`ConnectionManager`] keeps at most one driver task alive. The driver owns
//! the socket, the authentication deadline and the reconnect delay, so
//! stopping the task is the only thing needed to cancel every timer.
//!
//! ```text
//! disconnected --connect()--> connecting --open--> open --ack--> authenticated
//!      ^                                                              |
//!      +------------- close / error (reconnect after delay) ----------+
//! ```
//!
//! Everything observable happens through [`ConnectionEvent`]s on the channel
//! returned by [`ConnectionManager::new`] and through [`ConnectionManager::state`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chatwire_auth::TokenProvider;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::{attempt_url, ClientConfig};
use crate::error::Result;
use crate::ids::ConnectionId;
use crate::protocol::{InboundFrame, OutboundFrame};

/// Normal closure code.
pub const CLOSE_NORMAL: u16 = 1000;

/// Reported when the socket vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// A close frame arrived without a status code.
const CLOSE_NO_STATUS: u16 = 1005;

/// How long `disconnect()` waits for the driver before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle status of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// No socket and no pending attempt.
    #[default]
    Disconnected,
    /// Resolving a token or opening the socket.
    Connecting,
    /// Socket open, handshake not sent.
    Open,
    /// Handshake sent, waiting for the ack.
    Authenticating,
    /// Handshake acknowledged.
    Authenticated,
    /// Close requested locally.
    Closing,
}

impl ConnectionStatus {
    /// Lowercase name for logs and status lines.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Server-assigned correlation ID of the open socket.
    pub connection_id: Option<ConnectionId>,
    /// Reconnect attempt in progress; 0 once a socket has opened.
    pub reconnect_attempt: u32,
}

impl ConnectionState {
    /// Whether frames may be sent in this state.
    #[must_use]
    pub const fn can_send(&self, verify_auth: bool) -> bool {
        match self.status {
            ConnectionStatus::Authenticated => true,
            ConnectionStatus::Open => !verify_auth,
            _ => false,
        }
    }
}

/// Notifications from the connection driver, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The socket opened.
    Opened,
    /// The server acknowledged the verification handshake.
    Authenticated,
    /// A well-formed inbound frame.
    Message(InboundFrame),
    /// The socket closed.
    Closed {
        /// Close code, [`CLOSE_ABNORMAL`] if the socket dropped without a close frame.
        code: u16,
        /// Close reason.
        reason: String,
        /// Whether a reconnect has been scheduled.
        reconnecting: bool,
    },
    /// Authentication failed.
    ///
    /// Unless `retrying` is set, the caller should intervene (e.g. log in again).
    AuthError {
        /// Human-readable failure.
        message: String,
        /// Whether another attempt is still scheduled.
        retrying: bool,
    },
    /// Reconnecting stopped after too many failed attempts.
    GaveUp {
        /// Failed reconnect attempts.
        attempts: u32,
    },
}

impl ConnectionEvent {
    /// A terminal authentication failure.
    #[must_use]
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
            retrying: false,
        }
    }
}

enum Command {
    Send(String),
    Close,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

/// Owner of the chat socket.
pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    endpoint: Url,
    tokens: Arc<dyn TokenProvider>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    runtime: Handle,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager and the receiver for its events.
    ///
    /// The token provider is asked for a fresh token before every attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or no Tokio runtime is running.
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let runtime = Handle::try_current()?;
        let (events, events_rx) = mpsc::unbounded_channel();

        let manager = Self {
            config: Arc::new(config),
            endpoint,
            tokens,
            shared: Arc::new(Mutex::new(Shared::default())),
            events,
            runtime,
        };
        Ok((manager, events_rx))
    }

    /// The config this manager was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state.clone()
    }

    /// Whether `send` would transmit right now.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.lock().state.can_send(self.config.verify_auth)
    }

    /// Start connecting.
    ///
    /// No-op while a previous call is still connecting, connected, or
    /// waiting to reconnect.
    pub fn connect(&self) {
        let mut shared = self.shared.lock();
        if shared.task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!(status = %shared.state.status, "Connect ignored, connection already active");
            return;
        }

        shared.generation += 1;
        shared.state = ConnectionState {
            status: ConnectionStatus::Connecting,
            ..ConnectionState::default()
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            config: Arc::clone(&self.config),
            endpoint: self.endpoint.clone(),
            tokens: Arc::clone(&self.tokens),
            shared: Arc::clone(&self.shared),
            generation: shared.generation,
            events: self.events.clone(),
            commands: commands_rx,
        };

        tracing::info!(endpoint = %self.endpoint, "Connecting");
        shared.commands = Some(commands_tx);
        shared.task = Some(self.runtime.spawn(driver.run()));
    }

    /// Serialize `{action, data}` and transmit it.
    ///
    /// Returns `false` and logs a warning if the socket is not ready.
    pub fn send(&self, action: &str, data: Option<serde_json::Value>) -> bool {
        let shared = self.shared.lock();
        if !shared.state.can_send(self.config.verify_auth) {
            tracing::warn!(action, status = %shared.state.status, "Cannot send, connection not ready");
            return false;
        }

        let text = match serde_json::to_string(&OutboundFrame::new(action, data)) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(action, error = %e, "Failed to serialize outbound frame");
                return false;
            }
        };

        shared
            .commands
            .as_ref()
            .is_some_and(|tx| tx.send(Command::Send(text)).is_ok())
    }

    /// Close the socket, cancel any pending reconnect and reset the state.
    ///
    /// Safe to call any number of times.
    pub async fn disconnect(&self) {
        let (task, commands, generation) = {
            let mut shared = self.shared.lock();
            shared.generation += 1;
            if shared.task.is_some() {
                shared.state.status = ConnectionStatus::Closing;
            }
            (shared.task.take(), shared.commands.take(), shared.generation)
        };

        if let Some(commands) = commands {
            let _ = commands.send(Command::Close);
        }

        if let Some(mut task) = task {
            let was_running = !task.is_finished();
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                tracing::debug!("Driver did not stop in time, aborting");
                task.abort();
            }
            if was_running {
                tracing::info!("Disconnected");
                let _ = self.events.send(ConnectionEvent::Closed {
                    code: CLOSE_NORMAL,
                    reason: "client disconnect".to_string(),
                    reconnecting: false,
                });
            }
        }

        let mut shared = self.shared.lock();
        if shared.generation == generation {
            shared.state = ConnectionState::default();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.shared.lock().task.take() {
            task.abort();
        }
    }
}

/// How one connection attempt ended.
enum Outcome {
    /// Closed locally or failed in a way that must not be retried.
    Stop,
    /// Transient failure; reconnect if the policy allows.
    Retry {
        /// Whether the socket opened during the attempt.
        opened: bool,
    },
}

/// Why the read loop of an open socket ended.
enum SocketEnd {
    Closed { code: u16, reason: String },
    AuthRejected(String),
    AuthTimeout,
    LocalClose,
}

/// The task behind one `connect()` call.
struct Driver {
    config: Arc<ClientConfig>,
    endpoint: Url,
    tokens: Arc<dyn TokenProvider>,
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            match self.attempt(attempt).await {
                Outcome::Stop => break,
                Outcome::Retry { opened } => {
                    if opened {
                        attempt = 0;
                    }
                    if !self.config.auto_reconnect {
                        break;
                    }
                    if let Some(max) = self.config.max_reconnect_attempts {
                        if attempt >= max {
                            tracing::warn!(attempts = attempt, "Giving up on reconnecting");
                            self.emit(ConnectionEvent::GaveUp { attempts: attempt });
                            break;
                        }
                    }

                    attempt += 1;
                    let delay = self.config.reconnect.delay(attempt);
                    self.update(|state| {
                        state.status = ConnectionStatus::Disconnected;
                        state.connection_id = None;
                        state.reconnect_attempt = attempt;
                    });
                    tracing::info!(attempt, delay = ?delay, "Scheduling reconnect");

                    if until_closed(&mut self.commands, tokio::time::sleep(delay))
                        .await
                        .is_none()
                    {
                        break;
                    }
                }
            }
        }

        self.update(|state| {
            state.status = ConnectionStatus::Disconnected;
            state.connection_id = None;
        });
    }

    async fn attempt(&mut self, attempt: u32) -> Outcome {
        self.update(|state| {
            state.status = ConnectionStatus::Connecting;
            state.reconnect_attempt = attempt;
        });

        let tokens = Arc::clone(&self.tokens);
        let token = match until_closed(&mut self.commands, async move { tokens.token().await }).await
        {
            None => return Outcome::Stop,
            Some(Ok(token)) => token,
            Some(Err(e)) => {
                tracing::warn!(attempt, error = %e, "Could not obtain auth token");
                let retrying = attempt > 0;
                self.emit(ConnectionEvent::AuthError {
                    message: e.to_string(),
                    retrying,
                });
                return if retrying {
                    Outcome::Retry { opened: false }
                } else {
                    Outcome::Stop
                };
            }
        };

        let url = attempt_url(&self.endpoint, &token, attempt);
        let deadline = Instant::now() + self.config.auth_timeout();
        let connecting = tokio::time::timeout_at(deadline, connect_async(url.as_str()));

        let ws = match until_closed(&mut self.commands, connecting).await {
            None => return Outcome::Stop,
            Some(Err(_elapsed)) if self.config.verify_auth => {
                tracing::warn!(attempt, "Authentication timed out while connecting");
                self.emit(ConnectionEvent::auth_failed("Authentication timed out"));
                return Outcome::Stop;
            }
            Some(Err(_elapsed)) => {
                tracing::warn!(attempt, "Connect timed out");
                return Outcome::Retry { opened: false };
            }
            Some(Ok(Err(e))) => {
                tracing::warn!(attempt, error = %e, "WebSocket connect failed");
                return Outcome::Retry { opened: false };
            }
            Some(Ok(Ok((ws, _response)))) => ws,
        };

        self.update(|state| {
            state.status = ConnectionStatus::Open;
            state.reconnect_attempt = 0;
            state.connection_id = None;
        });
        tracing::info!(endpoint = %self.endpoint, "WebSocket connected");
        self.emit(ConnectionEvent::Opened);

        let (mut write, mut read) = ws.split();
        let mut authenticated = !self.config.verify_auth;

        if self.config.verify_auth {
            match serde_json::to_string(&OutboundFrame::verify()) {
                Ok(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::warn!(error = %e, "Failed to send verify frame");
                        return self.closed(CLOSE_ABNORMAL, e.to_string());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize verify frame"),
            }
            self.update(|state| state.status = ConnectionStatus::Authenticating);
        }

        let auth_deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(auth_deadline);

        let end = loop {
            tokio::select! {
                () = &mut auth_deadline, if !authenticated => break SocketEnd::AuthTimeout,

                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::warn!(error = %e, "WebSocket send failed");
                            break SocketEnd::Closed { code: CLOSE_ABNORMAL, reason: e.to_string() };
                        }
                    }
                    Some(Command::Close) | None => break SocketEnd::LocalClose,
                },

                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(reason) = self.on_text(&text, &mut authenticated) {
                            break SocketEnd::AuthRejected(reason);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                            (u16::from(f.code), f.reason.to_string())
                        });
                        break SocketEnd::Closed { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        break SocketEnd::Closed { code: CLOSE_ABNORMAL, reason: e.to_string() };
                    }
                    None => break SocketEnd::Closed { code: CLOSE_ABNORMAL, reason: "stream ended".to_string() },
                },
            }
        };

        match end {
            SocketEnd::LocalClose => {
                self.update(|state| state.status = ConnectionStatus::Closing);
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                let _ = write.close().await;
                Outcome::Stop
            }
            SocketEnd::AuthTimeout => {
                tracing::warn!("Authentication timed out");
                let _ = write.close().await;
                self.emit(ConnectionEvent::auth_failed("Authentication timed out"));
                Outcome::Stop
            }
            SocketEnd::AuthRejected(reason) => {
                tracing::warn!(reason = %reason, "Authentication rejected");
                let _ = write.close().await;
                self.emit(ConnectionEvent::auth_failed(reason));
                Outcome::Stop
            }
            SocketEnd::Closed { code, reason } if code == CLOSE_NORMAL && !authenticated => {
                tracing::warn!(code, reason = %reason, "Socket closed before authentication");
                self.emit(ConnectionEvent::auth_failed(
                    "Connection closed before authentication completed",
                ));
                Outcome::Stop
            }
            SocketEnd::Closed { code, reason } => self.closed(code, reason),
        }
    }

    /// Handle one text frame. `Err` carries an authentication rejection.
    fn on_text(&self, text: &str, authenticated: &mut bool) -> std::result::Result<(), String> {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "Dropping malformed frame");
                return Ok(());
            }
        };

        if let Some(id) = frame.connection_id.as_deref() {
            match ConnectionId::new(id) {
                Ok(id) => self.update(|state| {
                    if state.connection_id.is_none() {
                        tracing::debug!(connection_id = %id, "Connection ID assigned");
                        state.connection_id = Some(id);
                    }
                }),
                Err(e) => tracing::debug!(error = %e, "Ignoring connection ID"),
            }
        }

        if !*authenticated {
            if let Some(error) = frame.auth_error() {
                return Err(error.to_string());
            }
            if frame.is_auth_ack() {
                *authenticated = true;
                self.update(|state| state.status = ConnectionStatus::Authenticated);
                tracing::info!("Connection authenticated");
                self.emit(ConnectionEvent::Authenticated);
            }
        }

        self.emit(ConnectionEvent::Message(frame));
        Ok(())
    }

    fn closed(&self, code: u16, reason: String) -> Outcome {
        let reconnecting = self.config.auto_reconnect;
        tracing::info!(code, reason = %reason, reconnecting, "WebSocket closed");
        self.update(|state| {
            state.status = ConnectionStatus::Disconnected;
            state.connection_id = None;
        });
        self.emit(ConnectionEvent::Closed {
            code,
            reason,
            reconnecting,
        });
        Outcome::Retry { opened: true }
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    /// Mutate the shared state unless a newer `connect()`/`disconnect()` took over.
    fn update(&self, f: impl FnOnce(&mut ConnectionState)) {
        let mut shared = self.shared.lock();
        if shared.generation == self.generation {
            f(&mut shared.state);
        }
    }
}

/// Run `fut` while watching for a close request.
///
/// Returns `None` if the manager asked to close (or went away) first. Frames
/// submitted in the meantime are dropped with a warning.
async fn until_closed<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            command = commands.recv() => match command {
                Some(Command::Send(_)) => tracing::warn!("Dropping outbound frame, socket not open"),
                Some(Command::Close) | None => return None,
            },
        }
    }
}
