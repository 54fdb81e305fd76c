//! Reconnecting WebSocket bridge between the session and the backend
//! push channel.
//!
//! The bridge is bound 1:1 to the signed-in user: `connect` carries the
//! current token and tenant in the handshake, `disconnect` is always
//! called on sign-out. Losing the channel does not end the session;
//! only the 401 path in the request pipeline forces a sign-out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::auth::store::TokenStore;
use crate::config::{HEARTBEAT_INTERVAL_MS, RECONNECT_DELAY_MS};
use crate::error::{channel_send_failed, CoreResult};

const OUTBOUND_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One message on the channel, in either direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub topic: String,
    pub body: Value,
}

type TopicHandler = Arc<dyn Fn(Value) + Send + Sync>;

struct Subscription {
    id: Uuid,
    handler: TopicHandler,
}

/// Why a live connection ended
enum Closed {
    Shutdown,
    Lost,
}

/// Duplex channel bound to the authenticated user.
///
/// All state is shared behind Arcs so the bridge can be cloned into
/// the components that drive it.
pub struct ChannelBridge {
    channel_url: String,
    tokens: Arc<TokenStore>,
    subscriptions: Arc<DashMap<String, Subscription>>,
    status_tx: Arc<watch::Sender<bool>>,
    outbound: Mutex<Option<mpsc::Sender<ChannelFrame>>>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelBridge {
    pub fn new(channel_url: impl Into<String>, tokens: Arc<TokenStore>) -> Self {
        let (status_tx, _) = watch::channel(false);
        Self {
            channel_url: channel_url.into(),
            tokens,
            subscriptions: Arc::new(DashMap::new()),
            status_tx: Arc::new(status_tx),
            outbound: Mutex::new(None),
            shutdown: Mutex::new(None),
            runner: Mutex::new(None),
        }
    }

    /// Whether the channel is currently connected
    pub fn is_connected(&self) -> bool {
        *self.status_tx.borrow()
    }

    /// Observe the connected status
    pub fn status(&self) -> watch::Receiver<bool> {
        self.status_tx.subscribe()
    }

    /// Open the channel for the given user.
    ///
    /// A no-op while a connection task is already live, connected or
    /// mid-reconnect. The handshake carries the current token and
    /// tenant; reconnection runs forever at a fixed delay until
    /// `disconnect` is called.
    pub async fn connect(&self, user_id: &str) {
        let mut runner = self.runner.lock().await;
        if runner.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            debug!(user_id = %user_id, "Channel already connected, ignoring connect");
            return;
        }

        info!(user_id = %user_id, url = %self.channel_url, "Opening session channel");
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        *self.outbound.lock().await = Some(outbound_tx);
        *self.shutdown.lock().await = Some(shutdown_tx);

        let handle = tokio::spawn(run_channel(
            self.channel_url.clone(),
            user_id.to_string(),
            Arc::clone(&self.tokens),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.status_tx),
            outbound_rx,
            shutdown_rx,
        ));
        *runner = Some(handle);
    }

    /// Tear the channel down: drop every subscription, stop the
    /// connection task, and mark the status disconnected.
    pub async fn disconnect(&self) {
        self.subscriptions.clear();

        // Same lock order as connect: runner, then outbound, then
        // shutdown
        let handle = self.runner.lock().await.take();
        *self.outbound.lock().await = None;
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            let _ = shutdown.send(()).await;
        }

        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        self.status_tx.send_replace(false);
        info!("Session channel disconnected");
    }

    /// Register a handler for a topic.
    ///
    /// While disconnected this logs a warning and does nothing; the
    /// caller is expected to subscribe after the status stream reports
    /// connected.
    pub fn subscribe<F>(&self, topic: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if !self.is_connected() {
            warn!(topic = %topic, "Subscribe attempted while channel is disconnected, ignoring");
            return;
        }
        let id = Uuid::new_v4();
        self.subscriptions.insert(
            topic.to_string(),
            Subscription {
                id,
                handler: Arc::new(handler),
            },
        );
        debug!(topic = %topic, subscription_id = %id, "Subscribed to channel topic");
    }

    /// Remove the handler for a topic, if any
    pub fn unsubscribe(&self, topic: &str) {
        if let Some((_, subscription)) = self.subscriptions.remove(topic) {
            debug!(topic = %topic, subscription_id = %subscription.id, "Unsubscribed from channel topic");
        }
    }

    /// Publish a frame to a topic.
    ///
    /// While disconnected this logs a warning and performs no network
    /// action; only a send that should have worked surfaces an error.
    pub async fn send(&self, topic: &str, body: Value) -> CoreResult<()> {
        if !self.is_connected() {
            warn!(topic = %topic, "Send attempted while channel is disconnected, dropping");
            return Ok(());
        }

        let outbound = self.outbound.lock().await.clone();
        match outbound {
            Some(tx) => tx
                .send(ChannelFrame {
                    topic: topic.to_string(),
                    body,
                })
                .await
                .map_err(|e| channel_send_failed(topic, e)),
            None => {
                warn!(topic = %topic, "Send attempted while channel is disconnected, dropping");
                Ok(())
            }
        }
    }
}

/// Connection task: connect with retries, drive the socket, reconnect
/// on loss, exit on shutdown.
async fn run_channel(
    channel_url: String,
    user_id: String,
    tokens: Arc<TokenStore>,
    subscriptions: Arc<DashMap<String, Subscription>>,
    status: Arc<watch::Sender<bool>>,
    mut outbound_rx: mpsc::Receiver<ChannelFrame>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        let ws = tokio::select! {
            _ = shutdown_rx.recv() => return,
            result = Retry::spawn(
                FixedInterval::from_millis(RECONNECT_DELAY_MS),
                || connect_once(&channel_url, &user_id, &tokens),
            ) => match result {
                Ok(ws) => ws,
                Err(e) => {
                    // Unreachable with an unbounded retry strategy
                    error!(error = %e, "Channel connection retries exhausted");
                    return;
                }
            },
        };

        status.send_replace(true);
        info!(user_id = %user_id, "Session channel connected");

        let reason = drive(ws, &subscriptions, &mut outbound_rx, &mut shutdown_rx).await;
        status.send_replace(false);

        match reason {
            Closed::Shutdown => return,
            Closed::Lost => {
                warn!(
                    delay_ms = RECONNECT_DELAY_MS,
                    "Session channel lost, reconnecting"
                );
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = sleep(Duration::from_millis(RECONNECT_DELAY_MS)) => {}
                }
            }
        }
    }
}

/// One handshake attempt carrying the current identity metadata
async fn connect_once(url: &str, user_id: &str, tokens: &TokenStore) -> Result<WsStream> {
    let connect_url = format!("{}?userId={}", url, user_id);
    let mut request = connect_url.as_str().into_client_request()?;

    let headers = request.headers_mut();
    if let Some(token) = tokens.read() {
        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_str(&format!("Bearer {}", token))?,
        );
    }
    if let Some(tenant) = tokens.tenant_id() {
        headers.insert(
            http::HeaderName::from_static("x-tenant-id"),
            http::HeaderValue::from_str(&tenant)?,
        );
    }

    let (ws, _response) = connect_async(request).await?;
    Ok(ws)
}

/// Pump one live connection until it ends
async fn drive(
    ws: WsStream,
    subscriptions: &DashMap<String, Subscription>,
    outbound_rx: &mut mpsc::Receiver<ChannelFrame>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Closed {
    let (mut sink, mut stream) = ws.split();

    let mut heartbeat = tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // If neither data nor a pong arrives across two heartbeats, the
    // connection is considered dead even if the socket looks open.
    let liveness_window = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 2);
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                return Closed::Shutdown;
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { return Closed::Shutdown };
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            warn!(error = %e, topic = %frame.topic, "Channel write failed");
                            return Closed::Lost;
                        }
                    }
                    Err(e) => warn!(error = %e, topic = %frame.topic, "Failed to serialize channel frame"),
                }
            }
            _ = heartbeat.tick() => {
                if last_inbound.elapsed() > liveness_window {
                    warn!("No channel traffic inside the liveness window, recycling connection");
                    return Closed::Lost;
                }
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    warn!(error = %e, "Heartbeat write failed");
                    return Closed::Lost;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(message)) => {
                        last_inbound = Instant::now();
                        dispatch(message, subscriptions);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Channel read failed");
                        return Closed::Lost;
                    }
                    None => {
                        info!("Session channel closed by server");
                        return Closed::Lost;
                    }
                }
            }
        }
    }
}

/// Route an inbound message to its topic handler
fn dispatch(message: Message, subscriptions: &DashMap<String, Subscription>) {
    let text = match message {
        Message::Text(text) => text,
        Message::Ping(_) | Message::Pong(_) => return,
        other => {
            trace!(?other, "Ignoring non-text channel message");
            return;
        }
    };

    match serde_json::from_str::<ChannelFrame>(text.as_str()) {
        Ok(frame) => match subscriptions.get(&frame.topic) {
            Some(subscription) => (subscription.handler)(frame.body),
            None => trace!(topic = %frame.topic, "No subscriber for channel frame"),
        },
        Err(e) => warn!(error = %e, "Unparsable channel frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> ChannelBridge {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(TokenStore::new(dir.path()));
        ChannelBridge::new("ws://127.0.0.1:1/ws", tokens)
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_a_noop() {
        let bridge = bridge();
        assert!(!bridge.is_connected());
        bridge
            .send(crate::channel::PRESENCE_TOPIC, json!({"online": true}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_is_a_noop() {
        let bridge = bridge();
        bridge.subscribe("/topic/presence", |_| {});
        assert!(bridge.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_harmless() {
        let bridge = bridge();
        bridge.disconnect().await;
        assert!(!bridge.is_connected());
    }
}
