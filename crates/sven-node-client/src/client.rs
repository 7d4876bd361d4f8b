// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::device::DeviceIdentity;
use crate::error::GatewayError;
use crate::frame::{ChatEventPayload, ChatState, ConnectChallenge, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Static connection parameters the client advertises in every handshake.
#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    pub url: String,
    pub client_id: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub locale: String,
    pub token: Option<String>,
    pub handshake_timeout: Duration,
    pub base_reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            client_id: "sven".into(),
            role: "agent".into(),
            scopes: Vec::new(),
            locale: "en-US".into(),
            token: None,
            handshake_timeout: Duration::from_secs(10),
            base_reconnect_interval: Duration::from_millis(500),
            max_reconnect_interval: Duration::from_secs(30),
        }
    }
}

/// A waiter for a `res` frame matching a request id, or a delivered chat
/// event for a registered `runId`.
struct Pending {
    waiters: HashMap<Uuid, oneshot::Sender<Frame>>,
    chat_listeners: HashMap<String, mpsc::Sender<ChatDelivery>>,
}

/// What the read loop hands to a registered chat listener: either a decoded
/// event, or a signal that the connection died mid-stream.
#[derive(Debug, Clone)]
pub enum ChatDelivery {
    Event(ChatEventPayload),
    Disconnected,
}

/// Outcome of a completed `chat.send` turn.
pub struct ChatSendOutcome {
    pub run_id: String,
    pub text: String,
}

/// The persistent gateway client (spec §4.8).
///
/// Holds two locks by design (spec §5): `pending` guards the waiter and
/// chat-listener maps together (both are "who do I wake up when a frame
/// arrives"), while `conn` separately guards the live socket so a reconnect
/// can swap the writer without contending with readers draining `pending`.
pub struct GatewayClient {
    config: GatewayClientConfig,
    device: Option<DeviceIdentity>,
    pending: Arc<Mutex<Pending>>,
    conn: Arc<Mutex<Option<WsSink>>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    closed: AtomicBool,
    reconnect_stop: CancellationToken,
    read_loop_stop: CancellationToken,
}

impl GatewayClient {
    pub fn new(config: GatewayClientConfig, device: Option<DeviceIdentity>) -> Arc<Self> {
        Arc::new(Self {
            config,
            device,
            pending: Arc::new(Mutex::new(Pending {
                waiters: HashMap::new(),
                chat_listeners: HashMap::new(),
            })),
            conn: Arc::new(Mutex::new(None)),
            connected: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reconnect_stop: CancellationToken::new(),
            read_loop_stop: CancellationToken::new(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the duplex channel, complete the challenge-response handshake,
    /// and start the read loop. On success, subsequent disconnects schedule
    /// reconnection on their own; this call only covers the first attempt.
    pub async fn connect(self: &Arc<Self>, cancellation: CancellationToken) -> Result<(), GatewayError> {
        let attempt = tokio::time::timeout(self.config.handshake_timeout, self.connect_once());
        let (sink, source) = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(GatewayError::Cancelled),
            result = attempt => result.map_err(|_| GatewayError::HandshakeTimeout)??,
        };

        *self.conn.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);

        let this = self.clone();
        let stop = self.read_loop_stop.clone();
        tokio::spawn(async move { this.read_loop(source, stop).await });
        Ok(())
    }

    async fn connect_once(self: &Arc<Self>) -> Result<(WsSink, WsSource), GatewayError> {
        let (ws, _resp) = connect_async(&self.config.url)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let (mut sink, mut source) = ws.split();

        let challenge = read_challenge(&mut source).await?;
        let connect_req = self.build_connect_request(&challenge);
        let id = Uuid::new_v4();
        send_frame(
            &mut sink,
            &Frame::Request {
                id,
                method: "connect".into(),
                params: connect_req,
            },
        )
        .await?;

        loop {
            let frame = read_frame(&mut source).await?;
            match frame {
                Frame::Response { id: res_id, ok, error, .. } if res_id == id => {
                    if ok {
                        return Ok((sink, source));
                    }
                    return Err(GatewayError::Handshake(
                        error.unwrap_or_else(|| "connect rejected".into()),
                    ));
                }
                Frame::Event { event, .. } => {
                    trace!(%event, "dropping event interleaved during handshake");
                }
                other => {
                    trace!(?other, "dropping unrelated frame during handshake");
                }
            }
        }
    }

    fn build_connect_request(&self, challenge: &ConnectChallenge) -> serde_json::Value {
        let signed_at_ms = chrono::Utc::now().timestamp_millis();
        let mut params = serde_json::json!({
            "protocol": {"min": 3, "max": 3},
            "client": {"id": self.config.client_id},
            "role": self.config.role,
            "scopes": self.config.scopes,
            "locale": self.config.locale,
        });

        if let Some(token) = &self.config.token {
            params["auth"] = serde_json::json!({"token": token});
        }

        if let Some(device) = &self.device {
            let sig = device.sign_connect(
                &self.config.client_id,
                &self.config.scopes,
                self.config.token.as_deref(),
                &challenge.nonce,
                signed_at_ms,
            );
            params["device"] = serde_json::to_value(sig).unwrap_or(serde_json::Value::Null);
        }

        params
    }

    /// Reads frames until the socket closes, then fails every waiter and
    /// chat listener before (unless shutdown was requested) scheduling a
    /// reconnect.
    async fn read_loop(self: Arc<Self>, mut source: WsSource, stop: CancellationToken) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                frame = read_frame(&mut source) => frame,
            };

            match frame {
                Ok(resp @ Frame::Response { id, .. }) => {
                    let mut pending = self.pending.lock().await;
                    if let Some(waiter) = pending.waiters.remove(&id) {
                        let _ = waiter.send(resp);
                    }
                }
                Ok(Frame::Event { event, payload }) if event == "chat" => {
                    match serde_json::from_value::<ChatEventPayload>(payload) {
                        Ok(chat_event) => self.deliver_chat_event(chat_event).await,
                        Err(e) => warn!(error = %e, "malformed chat event payload"),
                    }
                }
                Ok(Frame::Event { event, .. }) => {
                    trace!(%event, "unhandled gateway event");
                }
                Ok(Frame::Request { method, .. }) => {
                    trace!(%method, "ignoring inbound request frame (client has no handler)");
                }
                Err(e) => {
                    warn!(error = %e, "gateway read loop failed, tearing down connection");
                    self.teardown_connection().await;
                    if !self.closed.load(Ordering::SeqCst) {
                        let this = self.clone();
                        tokio::spawn(async move { this.reconnect_loop().await });
                    }
                    return;
                }
            }
        }
    }

    async fn deliver_chat_event(&self, event: ChatEventPayload) {
        let pending = self.pending.lock().await;
        match pending.chat_listeners.get(&event.run_id) {
            Some(listener) => {
                if listener.try_send(ChatDelivery::Event(event)).is_err() {
                    warn!("chat listener buffer full or closed, dropping event");
                }
            }
            None => debug!(run_id = %event.run_id, "no listener registered for chat event"),
        }
    }

    async fn teardown_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.conn.lock().await = None;

        let mut pending = self.pending.lock().await;
        for (_, waiter) in pending.waiters.drain() {
            let _ = waiter.send(Frame::Response {
                id: Uuid::nil(),
                ok: false,
                payload: None,
                error: Some("DISCONNECTED".into()),
            });
        }
        for (_, listener) in pending.chat_listeners.drain() {
            let _ = listener.try_send(ChatDelivery::Disconnected);
        }
    }

    /// Single-flight reconnect loop, guarded by a compare-and-swap on
    /// `reconnecting` so at most one loop runs concurrently.
    async fn reconnect_loop(self: Arc<Self>) {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            let delay = self.backoff_delay(attempt);
            tokio::select! {
                biased;
                _ = self.reconnect_stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if self.closed.load(Ordering::SeqCst) {
                break;
            }

            match self.connect_once().await {
                Ok((sink, source)) => {
                    *self.conn.lock().await = Some(sink);
                    self.connected.store(true, Ordering::SeqCst);
                    let this = self.clone();
                    let stop = self.read_loop_stop.clone();
                    tokio::spawn(async move { this.read_loop(source, stop).await });
                    break;
                }
                Err(e) => {
                    warn!(error = %e, attempt, "reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }

        self.reconnecting.store(false, Ordering::SeqCst);
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(4);
        let scaled = self.config.base_reconnect_interval * 2u32.pow(exp);
        scaled.min(self.config.max_reconnect_interval)
    }

    async fn send_request(&self, method: &str, params: serde_json::Value) -> Result<Frame, GatewayError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        // Register before sending so the response can never arrive first.
        self.pending.lock().await.waiters.insert(id, tx);

        if let Err(e) = self.send_frame_locked(&Frame::Request {
            id,
            method: method.into(),
            params,
        }).await {
            self.pending.lock().await.waiters.remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| GatewayError::Disconnected)
    }

    async fn send_frame_locked(&self, frame: &Frame) -> Result<(), GatewayError> {
        let mut conn = self.conn.lock().await;
        let sink = conn.as_mut().ok_or(GatewayError::Disconnected)?;
        send_frame(sink, frame).await
    }

    /// `chat.send`: send a request, register a chat listener on the
    /// returned `runId`, and stream deltas to `on_update` until `final` or
    /// `error`/`aborted`.
    pub async fn send_chat(
        &self,
        session_key: &str,
        message: &str,
        mut on_update: impl FnMut(&str, bool) + Send,
    ) -> Result<ChatSendOutcome, GatewayError> {
        let idempotency_key = Uuid::new_v4().to_string();
        let params = serde_json::json!({
            "sessionKey": session_key,
            "message": message,
            "deliver": false,
            "idempotencyKey": idempotency_key,
        });

        let (run_id, mut rx) = {
            // Register the listener before the request can possibly produce
            // events for it (spec §9 design note).
            let (tx, rx) = mpsc::channel(32);
            let placeholder = idempotency_key.clone();
            self.pending.lock().await.chat_listeners.insert(placeholder.clone(), tx);

            let response = self.send_request("chat.send", params).await;
            let run_id = match response {
                Ok(Frame::Response { ok: true, payload: Some(p), .. }) => p
                    .get("runId")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| GatewayError::Protocol("chat.send response missing runId".into())),
                Ok(Frame::Response { ok: false, error, .. }) => {
                    Err(GatewayError::Remote(error.unwrap_or_default()))
                }
                Ok(_) => Err(GatewayError::Protocol("unexpected frame for chat.send".into())),
                Err(e) => Err(e),
            };

            // Re-key the listener from the idempotency placeholder to the
            // real runId now that the server has told us what it is.
            let mut pending = self.pending.lock().await;
            let listener = pending.chat_listeners.remove(&placeholder);
            match (&run_id, listener) {
                (Ok(id), Some(listener)) => {
                    pending.chat_listeners.insert(id.clone(), listener);
                }
                _ => {}
            }
            drop(pending);

            let run_id = run_id?;
            (run_id, rx)
        };

        let result = self.wait_for_chat_final(&run_id, &mut rx, &mut on_update).await;
        self.pending.lock().await.chat_listeners.remove(&run_id);
        result.map(|text| ChatSendOutcome { run_id, text })
    }

    async fn wait_for_chat_final(
        &self,
        run_id: &str,
        rx: &mut mpsc::Receiver<ChatDelivery>,
        on_update: &mut impl FnMut(&str, bool),
    ) -> Result<String, GatewayError> {
        let mut cumulative = String::new();
        let mut last_delta = String::new();

        while let Some(delivery) = rx.recv().await {
            match delivery {
                ChatDelivery::Disconnected => return Err(GatewayError::Disconnected),
                ChatDelivery::Event(event) => {
                    if event.run_id != run_id {
                        continue;
                    }
                    match event.state {
                        ChatState::Delta => {
                            let text = event.message.as_ref().map(ChatMessageTextExt::text).unwrap_or_default();
                            cumulative.push_str(&text);
                            last_delta = text;
                            on_update(&cumulative, false);
                        }
                        ChatState::Final => {
                            let text = event
                                .message
                                .as_ref()
                                .map(ChatMessageTextExt::text)
                                .filter(|t| !t.is_empty())
                                .unwrap_or(last_delta.clone());
                            on_update(&text, true);
                            return Ok(text);
                        }
                        ChatState::Error => {
                            return Err(GatewayError::Remote(
                                event.error_message.unwrap_or_else(|| "chat turn failed".into()),
                            ));
                        }
                        ChatState::Aborted => {
                            if last_delta.is_empty() {
                                return Err(GatewayError::Aborted);
                            }
                            return Ok(last_delta);
                        }
                    }
                }
            }
        }

        Err(GatewayError::Disconnected)
    }

    /// Sets the closed flag and tears the connection down. Idempotent: a
    /// second call observes `closed` already true and is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reconnect_stop.cancel();
        self.read_loop_stop.cancel();

        let mut conn = self.conn.lock().await;
        if let Some(mut sink) = conn.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

trait ChatMessageTextExt {
    fn text(&self) -> String;
}

impl ChatMessageTextExt for crate::frame::ChatMessage {
    fn text(&self) -> String {
        crate::frame::ChatMessage::text(self)
    }
}

async fn read_challenge(source: &mut WsSource) -> Result<ConnectChallenge, GatewayError> {
    loop {
        match read_frame(source).await? {
            Frame::Event { event, payload } if event == "connect.challenge" => {
                return serde_json::from_value(payload)
                    .map_err(|e| GatewayError::Protocol(e.to_string()));
            }
            other => {
                return Err(GatewayError::Protocol(format!(
                    "expected connect.challenge, got {other:?}"
                )));
            }
        }
    }
}

async fn read_frame(source: &mut WsSource) -> Result<Frame, GatewayError> {
    loop {
        let msg = source
            .next()
            .await
            .ok_or(GatewayError::Disconnected)?
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_ref())
                    .map_err(|e| GatewayError::Protocol(e.to_string()));
            }
            Message::Close(_) => return Err(GatewayError::Disconnected),
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {
                continue;
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Frame) -> Result<(), GatewayError> {
    let text = serde_json::to_string(frame).map_err(|e| GatewayError::Protocol(e.to_string()))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let client = GatewayClient::new(
            GatewayClientConfig {
                base_reconnect_interval: Duration::from_secs(1),
                max_reconnect_interval: Duration::from_secs(30),
                ..GatewayClientConfig::default()
            },
            None,
        );
        assert_eq!(client.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(client.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(client.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(client.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(client.backoff_delay(4), Duration::from_secs(16));
        // exponent is capped at min(attempt, 4), so attempt 5 repeats attempt 4's delay.
        assert_eq!(client.backoff_delay(5), Duration::from_secs(16));
    }

    #[test]
    fn backoff_clamps_to_max_reconnect_interval() {
        let client = GatewayClient::new(
            GatewayClientConfig {
                base_reconnect_interval: Duration::from_secs(10),
                max_reconnect_interval: Duration::from_secs(30),
                ..GatewayClientConfig::default()
            },
            None,
        );
        // 10s * 2^4 = 160s uncapped; clamp to the 30s ceiling.
        assert_eq!(client.backoff_delay(4), Duration::from_secs(30));
    }

    #[test]
    fn not_connected_before_connect_is_called() {
        let client = GatewayClient::new(GatewayClientConfig::default(), None);
        assert!(!client.is_connected());
    }
}
