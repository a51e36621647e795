//! In-process chat server for integration tests.
//!
//! Binds `127.0.0.1:0`, accepts WebSocket connections and plays a scripted
//! [`Behavior`] per connection. Records accepted sockets, request URIs and
//! every JSON frame the client sent.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatwire_auth::{AuthError, TokenProvider};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Reply entry that makes the server drop the TCP connection without a close frame.
pub const DROP: &str = "__drop__";

/// What the server does on one connection.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Send a welcome, ack `verify`, then answer the n-th `message` with
    /// `replies[n % replies.len()]`.
    Chat { replies: Vec<Vec<String>> },
    /// Read frames but never answer.
    Silent,
    /// Close with code 1000 right after the handshake.
    CloseNormal,
    /// Answer `verify` with an authentication error.
    RejectVerify,
    /// Ack `verify`, then drop the connection.
    DropAfterAuth,
}

impl Behavior {
    /// Chat server that answers every message with the same frames.
    pub fn chat(reply: Vec<String>) -> Self {
        Self::Chat {
            replies: vec![reply],
        }
    }
}

type Script = Arc<dyn Fn(usize) -> Behavior + Send + Sync>;

#[derive(Default)]
struct Record {
    uris: Mutex<Vec<String>>,
    received: Mutex<Vec<Value>>,
    accepts: AtomicUsize,
}

/// A running test server.
pub struct TestServer {
    url: String,
    record: Arc<Record>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Every connection gets the same behavior.
    pub async fn start(behavior: Behavior) -> Self {
        Self::scripted(move |_| behavior.clone()).await
    }

    /// Connection `n` (0-based) gets `script(n)`.
    pub async fn scripted(script: impl Fn(usize) -> Behavior + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let record = Arc::new(Record::default());
        let script: Script = Arc::new(script);

        let handle = tokio::spawn({
            let record = Arc::clone(&record);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let n = record.accepts.fetch_add(1, Ordering::SeqCst);
                    let behavior = script(n);
                    tokio::spawn(serve(stream, n, behavior, Arc::clone(&record)));
                }
            }
        });

        Self {
            url,
            record,
            handle,
        }
    }

    /// Endpoint URL, e.g. `ws://127.0.0.1:40000/ws`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// TCP connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.record.accepts.load(Ordering::SeqCst)
    }

    /// Request URIs (path and query) of completed handshakes.
    pub fn uris(&self) -> Vec<String> {
        self.record.uris.lock().clone()
    }

    /// Frames received from clients, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.record.received.lock().clone()
    }

    /// Received frames with the given action.
    pub fn received_actions(&self, action: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|frame| frame["action"] == action)
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, n: usize, behavior: Behavior, record: Arc<Record>) {
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        record.uris.lock().push(request.uri().to_string());
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    match behavior {
        Behavior::CloseNormal => {
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "Unauthorized".into(),
                }))
                .await;
            while let Some(Ok(_)) = ws.next().await {}
        }
        Behavior::Silent => {
            while let Some(Ok(message)) = ws.next().await {
                record_frame(&record, &message);
            }
        }
        Behavior::RejectVerify => {
            while let Some(Ok(message)) = ws.next().await {
                if record_frame(&record, &message).is_some_and(|f| f["action"] == "verify") {
                    send(&mut ws, &json!({"error": "Authentication failed"}).to_string()).await;
                }
            }
        }
        Behavior::DropAfterAuth => {
            while let Some(Ok(message)) = ws.next().await {
                if record_frame(&record, &message).is_some_and(|f| f["action"] == "verify") {
                    send(&mut ws, &json!({"authenticated": true}).to_string()).await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    return;
                }
            }
        }
        Behavior::Chat { replies } => {
            let welcome = json!({"message": "Connected", "connectionId": format!("conn-{n}")});
            send(&mut ws, &welcome.to_string()).await;

            let mut answered = 0usize;
            while let Some(Ok(message)) = ws.next().await {
                let Some(frame) = record_frame(&record, &message) else {
                    continue;
                };
                match frame["action"].as_str() {
                    Some("verify") => {
                        send(&mut ws, &json!({"authenticated": true}).to_string()).await;
                    }
                    Some("message") if !replies.is_empty() => {
                        let reply = &replies[answered % replies.len()];
                        answered += 1;
                        for text in reply {
                            if text == DROP {
                                return;
                            }
                            send(&mut ws, text).await;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn record_frame(record: &Record, message: &Message) -> Option<Value> {
    let Message::Text(text) = message else {
        return None;
    };
    let value: Value = serde_json::from_str(text).ok()?;
    record.received.lock().push(value.clone());
    Some(value)
}

async fn send(ws: &mut WebSocketStream<TcpStream>, text: &str) {
    let _ = ws.send(Message::Text(text.to_string())).await;
}

/// A streamed text fragment frame.
pub fn fragment(text: &str, is_complete: bool) -> String {
    json!({"data": {"text": text, "isComplete": is_complete}}).to_string()
}

/// A server-side error frame.
pub fn server_error() -> String {
    json!({"data": {"error": true, "message": "model unavailable"}}).to_string()
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Token provider that hands out `tok-1`, `tok-2`, ... and counts calls.
#[derive(Default)]
pub struct CountingTokens {
    calls: AtomicUsize,
}

impl CountingTokens {
    /// Tokens handed out so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokens {
    async fn token(&self) -> chatwire_auth::Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("tok-{n}"))
    }
}

/// Token provider that succeeds once, then reports an expired session.
#[derive(Default)]
pub struct ExpiringTokens {
    calls: AtomicUsize,
}

impl ExpiringTokens {
    /// Tokens requested so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for ExpiringTokens {
    async fn token(&self) -> chatwire_auth::Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok("first".to_string())
        } else {
            Err(AuthError::SessionExpired)
        }
    }
}
