//! Connection handlers for Herald server.
//!
//! Each WebSocket connection gets its own task. Text frames carry JSON
//! events; binary frames carry length-prefixed MessagePack events. Outbound
//! events use whichever encoding the client last sent.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use herald_core::{Backends, ConnectionHandle, ConnectionId, Hub, Session};
use herald_protocol::{codec, ClientEvent, ProtocolError, ServerEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// Presence and routing.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    /// Open WebSocket connections.
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, backends: Backends) -> Self {
        Self {
            hub: Hub::new(backends),
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Encoding used for outbound events on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    MessagePack,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, backends: Backends) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config, backends));
    let listener = TcpListener::bind(addr).await?;

    info!("Herald server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connection_count(),
        "groups": stats.group_count,
        "registered_connections": stats.connection_count,
        "memberships": stats.total_memberships,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.connection_count() >= state.config.limits.max_connections {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached, rejecting upgrade"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    state.connections.fetch_add(1, Ordering::Relaxed);

    let connection_id = ConnectionId::generate();
    let (handle, mut events) = ConnectionHandle::channel(connection_id.clone());
    let mut session = state.hub.open_session(handle);

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut format = WireFormat::Json;

    let connected = ServerEvent::connected(connection_id.as_str());
    if let Err(e) = send_event(&mut sender, &connected, format).await {
        error!(connection = %connection_id, error = %e, "Failed to send connected event");
    } else {
        // Read buffer for partial binary frames
        let mut read_buffer = BytesMut::with_capacity(4096);

        loop {
            tokio::select! {
                biased;

                // Events queued for this connection by the hub
                Some(event) = events.recv() => {
                    if let Err(e) = send_event(&mut sender, &event, format).await {
                        debug!(connection = %connection_id, error = %e, "Send failed");
                        break;
                    }
                }

                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            metrics::record_frame(text.len(), "inbound");
                            format = WireFormat::Json;
                            match codec::decode_json::<ClientEvent>(&text) {
                                Ok(event) => handle_event(&state, &mut session, event).await,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Malformed text frame");
                                    metrics::record_error("decode");
                                }
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            metrics::record_frame(data.len(), "inbound");
                            format = WireFormat::MessagePack;
                            read_buffer.extend_from_slice(&data);

                            loop {
                                match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                    Ok(Some(event)) => handle_event(&state, &mut session, event).await,
                                    Ok(None) => break,
                                    Err(ProtocolError::FrameTooLarge(size)) => {
                                        warn!(connection = %connection_id, size, "Oversized frame, discarding buffer");
                                        metrics::record_error("frame_too_large");
                                        read_buffer.clear();
                                        break;
                                    }
                                    Err(e) => {
                                        warn!(connection = %connection_id, error = %e, "Malformed binary frame");
                                        metrics::record_error("decode");
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %connection_id, "Received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(connection = %connection_id, error = %e, "WebSocket error");
                            metrics::record_error("websocket");
                            break;
                        }
                        None => {
                            debug!(connection = %connection_id, "WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }

    // Cleanup: withdraw announced devices and leave every group
    let withdrawn = state.hub.close(session).await;
    metrics::set_registry_stats(state.hub.stats());
    state.connections.fetch_sub(1, Ordering::Relaxed);

    debug!(connection = %connection_id, devices = withdrawn, "WebSocket disconnected");
}

/// Dispatch one decoded event.
async fn handle_event(state: &AppState, session: &mut Session, event: ClientEvent) {
    let name = event.name();
    let start = Instant::now();

    let dispatched = state.hub.dispatch(session, event).await;

    metrics::record_dispatch(name, &dispatched, start.elapsed().as_secs_f64());
    metrics::set_registry_stats(state.hub.stats());
    trace!(connection = %session.id(), event = name, result = ?dispatched, "Event handled");
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<()> {
    let message = match format {
        WireFormat::Json => Message::Text(codec::encode_json(event)?),
        WireFormat::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
    };
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_frame(len, "outbound");
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_protocol::{AnnouncePresence, SendMessage};
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn spawn_server(config: Config) -> std::net::SocketAddr {
        let state = Arc::new(AppState::new(config, Backends::in_memory()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });
        addr
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .unwrap();
            match msg {
                WsMessage::Text(text) => return codec::decode_json(&text).unwrap(),
                WsMessage::Binary(data) => return codec::decode(&data).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(client: &mut Client, event: &ClientEvent) {
        let text = codec::encode_json(event).unwrap();
        client.send(WsMessage::Text(text)).await.unwrap();
    }

    #[tokio::test]
    async fn test_connected_then_live_message() {
        let addr = spawn_server(Config::default()).await;
        let url = format!("ws://{addr}/ws");

        let (mut mona, _) = connect_async(&url).await.unwrap();
        assert!(matches!(next_event(&mut mona).await, ServerEvent::Connected { .. }));
        send_json(
            &mut mona,
            &ClientEvent::AnnouncePresence(AnnouncePresence::new("mona", "phone", "online")),
        )
        .await;
        assert_eq!(
            next_event(&mut mona).await,
            ServerEvent::status_changed("mona", "phone", "online")
        );

        let (mut ahmed, _) = connect_async(&url).await.unwrap();
        next_event(&mut ahmed).await;
        send_json(
            &mut ahmed,
            &ClientEvent::SendMessage(SendMessage::new("ahmed", "mona", "phone", "hi")),
        )
        .await;

        assert_eq!(
            next_event(&mut mona).await,
            ServerEvent::receive_message("ahmed", "mona", "hi", "phone")
        );
    }

    #[tokio::test]
    async fn test_binary_client_gets_binary_replies() {
        let addr = spawn_server(Config::default()).await;
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        next_event(&mut client).await;

        // Queue a message first so the drain has something to deliver.
        let (mut sender, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        next_event(&mut sender).await;
        send_json(
            &mut sender,
            &ClientEvent::SendMessage(SendMessage::new("ahmed", "mona", "tablet", "queued")),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frame = codec::encode(&ClientEvent::AnnouncePresence(AnnouncePresence::new(
            "mona", "tablet", "online",
        )))
        .unwrap();
        client.send(WsMessage::Binary(frame.to_vec())).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let WsMessage::Binary(data) = msg else {
            panic!("expected binary reply, got {msg:?}");
        };
        assert_eq!(
            codec::decode::<ServerEvent>(&data).unwrap(),
            ServerEvent::status_changed("mona", "tablet", "online")
        );
        assert_eq!(
            next_event(&mut client).await,
            ServerEvent::receive_message("ahmed", "mona", "queued", "tablet")
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let addr = spawn_server(Config::default()).await;
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        next_event(&mut client).await;

        client
            .send(WsMessage::Text("{\"event\":\"nope\"}".to_string()))
            .await
            .unwrap();
        send_json(
            &mut client,
            &ClientEvent::AnnouncePresence(AnnouncePresence::new("mona", "desktop", "away")),
        )
        .await;

        assert_eq!(
            next_event(&mut client).await,
            ServerEvent::status_changed("mona", "desktop", "away")
        );
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let mut config = Config::default();
        config.limits.max_connections = 0;
        let addr = spawn_server(config).await;

        assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
    }
}
