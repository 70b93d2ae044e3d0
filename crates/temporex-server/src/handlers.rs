//! Connection handlers for the temporex server.
//!
//! This module handles the connection lifecycle, frame processing, and the
//! small admin HTTP surface.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use temporex_core::{
    ConnectionDirectory, ConnectionError, ConnectionHandle, PlayerConnection,
    Router as MatchRouter, RouterError, SessionError, SessionRegistry,
};
use temporex_protocol::{codec, error_codes, Frame, PROTOCOL_VERSION};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Live match sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Current connection of every connected player.
    pub directory: Arc<ConnectionDirectory>,
    /// Group fan-out over `sessions` and `directory`.
    pub router: MatchRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let directory = Arc::new(ConnectionDirectory::new());
        Self {
            router: MatchRouter::new(Arc::clone(&sessions), Arc::clone(&directory)),
            sessions,
            directory,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("temporex listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve the app on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/sessions/:id", delete(close_session_handler))
        .route("/sessions/:id/clear", post(clear_session_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.sessions.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": stats.session_count,
        "players": stats.player_count,
        "connections": state.directory.len(),
    }))
}

/// Remove a session and disconnect its members.
async fn close_session_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if !state.sessions.contains(&session_id) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let closed = state.router.close_session(&session_id).await;
    metrics::set_active_sessions(state.sessions.len());
    info!(session = %session_id, closed, "Session closed by admin");

    Json(serde_json::json!({ "session": session_id, "closed": closed })).into_response()
}

/// Empty a session in place.
async fn clear_session_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    match state.sessions.get(&session_id) {
        Some(session) => {
            state.sessions.clear_session(&session);
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Write half of a WebSocket, shared by replies and fan-out.
#[derive(Clone)]
struct WsOutbound {
    sink: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

impl WsOutbound {
    fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

#[async_trait]
impl ConnectionHandle for WsOutbound {
    async fn send(&mut self, payload: Bytes) -> Result<(), ConnectionError> {
        metrics::record_message(payload.len(), "outbound");
        self.sink
            .lock()
            .await
            .send(Message::Binary(payload.to_vec()))
            .await
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))
    }
}

/// Per-socket state.
struct Client {
    outbound: WsOutbound,
    connection: Option<Arc<PlayerConnection>>,
}

impl Client {
    /// The bound player, while this socket is still its current connection.
    fn player_id(&self) -> Option<String> {
        self.connection
            .as_ref()
            .filter(|c| c.is_current())
            .map(|c| c.player_id().to_string())
    }

    async fn reply(&mut self, frame: &Frame) -> Result<()> {
        let data = codec::encode(frame)?;
        self.outbound.send(data).await?;
        Ok(())
    }

    async fn reply_error(&mut self, id: u64, code: u16, message: impl Into<String>) -> Result<()> {
        self.reply(&Frame::error(id, code, message)).await
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sink, mut receiver) = socket.split();
    let mut client = Client {
        outbound: WsOutbound::new(sink),
        connection: None,
    };

    debug!("WebSocket connected");

    let max_message_size = state.config.limits.max_message_size;
    let mut read_buffer = BytesMut::with_capacity(4096);

    'socket: while let Some(msg) = receiver.next().await {
        let data = match msg {
            Ok(Message::Binary(data)) => data,
            // Treat text as binary
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Close(_)) => {
                debug!(player = ?client.player_id(), "Received close frame");
                break;
            }
            // Pings are answered by axum.
            Ok(_) => continue,
            Err(e) => {
                warn!(player = ?client.player_id(), error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
        };

        metrics::record_message(data.len(), "inbound");
        read_buffer.extend_from_slice(&data);

        if read_buffer.len() > max_message_size {
            warn!(
                player = ?client.player_id(),
                bytes = read_buffer.len(),
                max = max_message_size,
                "Message too large"
            );
            metrics::record_error("message_too_large");
            read_buffer.clear();
            let message = format!("Message exceeds {max_message_size} bytes");
            if client
                .reply_error(0, error_codes::MESSAGE_TOO_LARGE, message)
                .await
                .is_err()
            {
                break;
            }
            continue;
        }

        loop {
            match codec::decode_from(&mut read_buffer) {
                Ok(Some(frame)) => {
                    if let Err(e) = handle_frame(frame, &mut client, &state).await {
                        error!(player = ?client.player_id(), error = %e, "Frame handling error");
                        break 'socket;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(player = ?client.player_id(), error = %e, "Undecodable frame");
                    metrics::record_error("decode");
                    read_buffer.clear();
                    if client
                        .reply_error(0, error_codes::INVALID_FRAME, e.to_string())
                        .await
                        .is_err()
                    {
                        break 'socket;
                    }
                    break;
                }
            }
        }
    }

    disconnect(&client, &state);
}

/// Release everything a closed socket held.
fn disconnect(client: &Client, state: &AppState) {
    let Some(connection) = &client.connection else {
        debug!("WebSocket disconnected before connect");
        return;
    };
    let player = connection.player_id();

    // A newer socket for the same player keeps the directory entry and
    // the session memberships. A connection evicted by `close_session` was
    // already unbound, so an empty entry also means the player is gone.
    let unbound = state
        .directory
        .unbind_if_current(player, connection.connection_id());
    if unbound || !state.directory.contains(player) {
        let left = state.sessions.remove_player_everywhere(player);
        info!(player = %player, sessions = left.len(), "Player disconnected");
    } else {
        debug!(player = %player, "Superseded connection closed");
    }
}

fn saturating_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn session_error_code(error: &SessionError) -> u16 {
    match error {
        SessionError::NotAMember { .. } => error_codes::NOT_A_MEMBER,
        SessionError::SessionFull { .. } => error_codes::SESSION_FULL,
    }
}

/// Handle a decoded frame.
async fn handle_frame(frame: Frame, client: &mut Client, state: &AppState) -> Result<()> {
    match frame {
        Frame::Connect { version, player } => {
            if version != PROTOCOL_VERSION {
                let message = format!("Unsupported protocol version {version}");
                return client
                    .reply_error(0, error_codes::INVALID_FRAME, message)
                    .await;
            }
            // A socket binds once; a superseded one may not take the player back.
            if let Some(current) = &client.connection {
                let message = format!("Already connected as {}", current.player_id());
                return client
                    .reply_error(0, error_codes::INVALID_FRAME, message)
                    .await;
            }
            if player.is_empty() {
                return client
                    .reply_error(0, error_codes::INVALID_FRAME, "Player id cannot be empty")
                    .await;
            }

            let connection = state
                .directory
                .bind(&player, Box::new(client.outbound.clone()));
            client.connection = Some(connection);
            info!(player = %player, "Player connected");

            let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
            client
                .reply(&Frame::connected(player, PROTOCOL_VERSION, heartbeat))
                .await?;
        }

        Frame::Join { id, session } => {
            let Some(player) = client.player_id() else {
                return client
                    .reply_error(id, error_codes::NOT_CONNECTED, "Connect first")
                    .await;
            };

            let match_session = state.sessions.join_or_create(&session);
            let response = match match_session.try_add_player(&player, state.config.players_per_match()) {
                Ok(_) => Frame::ack(id),
                Err(e) => {
                    warn!(player = %player, session = %session, error = %e, "Join rejected");
                    Frame::error(id, session_error_code(&e), e.to_string())
                }
            };
            metrics::set_active_sessions(state.sessions.len());

            client.reply(&response).await?;
        }

        Frame::Leave { id, session } => {
            let Some(player) = client.player_id() else {
                return client
                    .reply_error(id, error_codes::NOT_CONNECTED, "Connect first")
                    .await;
            };

            let response = match state.sessions.get(&session) {
                Some(match_session) => {
                    match_session.remove_player(&player);
                    Frame::ack(id)
                }
                None => Frame::error(
                    id,
                    error_codes::SESSION_NOT_FOUND,
                    format!("Session not found: {session}"),
                ),
            };

            client.reply(&response).await?;
        }

        Frame::Assign { id, session, group } => {
            let Some(player) = client.player_id() else {
                return client
                    .reply_error(id, error_codes::NOT_CONNECTED, "Connect first")
                    .await;
            };

            let response = match state.sessions.get(&session) {
                Some(match_session) => match match_session.assign_player_to_group(&player, &group) {
                    Ok(_) => Frame::ack(id),
                    Err(e) => {
                        debug!(player = %player, session = %session, group = %group, error = %e, "Assign rejected");
                        Frame::error(id, session_error_code(&e), e.to_string())
                    }
                },
                None => Frame::error(
                    id,
                    error_codes::SESSION_NOT_FOUND,
                    format!("Session not found: {session}"),
                ),
            };

            client.reply(&response).await?;
        }

        Frame::Publish {
            id,
            session,
            group,
            payload,
        } => {
            let request_id = id.unwrap_or(0);
            let Some(player) = client.player_id() else {
                return client
                    .reply_error(request_id, error_codes::NOT_CONNECTED, "Connect first")
                    .await;
            };

            let deliver = match codec::encode(&Frame::deliver(&session, &group, &player, payload)) {
                Ok(data) => data,
                Err(e) => {
                    return client
                        .reply_error(request_id, error_codes::INVALID_FRAME, e.to_string())
                        .await;
                }
            };

            let start = Instant::now();
            match state.router.route(&session, &group, deliver).await {
                Ok(report) => {
                    metrics::record_delivery(&report, start.elapsed().as_secs_f64());
                    debug!(
                        player = %player,
                        session = %session,
                        group = %group,
                        delivered = report.delivered_count(),
                        skipped = report.skipped_count(),
                        failed = report.failed_count(),
                        "Published"
                    );

                    if let Some(id) = id {
                        client
                            .reply(&Frame::Report {
                                id,
                                delivered: saturating_u32(report.delivered_count()),
                                skipped: saturating_u32(report.skipped_count()),
                                failed: saturating_u32(report.failed_count()),
                            })
                            .await?;
                    }
                }
                Err(RouterError::SessionNotFound(session)) => {
                    client
                        .reply_error(
                            request_id,
                            error_codes::SESSION_NOT_FOUND,
                            format!("Session not found: {session}"),
                        )
                        .await?;
                }
            }
        }

        Frame::Ping { timestamp } => {
            client.reply(&Frame::pong(timestamp)).await?;
        }

        other => {
            warn!(player = ?client.player_id(), frame_type = ?other.frame_type(), "Unexpected frame type");
            client
                .reply_error(0, error_codes::INVALID_FRAME, "Unexpected frame type")
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::clone(&state)));
        (addr, state)
    }

    struct TestClient {
        ws: Ws,
        buf: BytesMut,
    }

    impl TestClient {
        async fn open(addr: SocketAddr) -> Self {
            let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
            Self {
                ws,
                buf: BytesMut::new(),
            }
        }

        async fn connect(addr: SocketAddr, player: &str) -> Self {
            let mut client = Self::open(addr).await;
            client.send(Frame::connect(PROTOCOL_VERSION, player)).await;
            match client.recv().await {
                Frame::Connected { player: bound, .. } => assert_eq!(bound, player),
                other => panic!("Expected Connected, got {:?}", other),
            }
            client
        }

        async fn send(&mut self, frame: Frame) {
            let data = codec::encode(&frame).unwrap();
            self.ws.send(WsMessage::Binary(data.to_vec())).await.unwrap();
        }

        async fn next_message(&mut self) -> Option<WsMessage> {
            timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timed out waiting for server")
                .and_then(Result::ok)
        }

        async fn recv(&mut self) -> Frame {
            loop {
                if let Some(frame) = codec::decode_from(&mut self.buf).unwrap() {
                    return frame;
                }
                match self.next_message().await {
                    Some(WsMessage::Binary(data)) => self.buf.extend_from_slice(&data),
                    Some(WsMessage::Ping(_)) | Some(WsMessage::Pong(_)) => {}
                    other => panic!("Expected a frame, got {:?}", other),
                }
            }
        }

        async fn expect_closed(&mut self) {
            loop {
                match self.next_message().await {
                    None | Some(WsMessage::Close(_)) => return,
                    Some(WsMessage::Ping(_)) | Some(WsMessage::Pong(_)) => {}
                    other => panic!("Expected close, got {:?}", other),
                }
            }
        }

        async fn request(&mut self, frame: Frame) -> Frame {
            self.send(frame).await;
            self.recv().await
        }
    }

    fn expect_error(frame: Frame, expected: u16) {
        match frame {
            Frame::Error { code, .. } => assert_eq!(code, expected),
            other => panic!("Expected error {expected}, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_group_publish_reaches_all_members() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = TestClient::connect(addr, "a").await;
        let mut b = TestClient::connect(addr, "b").await;

        assert_eq!(a.request(Frame::join(1, "s1")).await, Frame::ack(1));
        assert_eq!(b.request(Frame::join(1, "s1")).await, Frame::ack(1));
        assert_eq!(a.request(Frame::assign(2, "s1", "g1")).await, Frame::ack(2));
        assert_eq!(b.request(Frame::assign(2, "s1", "g1")).await, Frame::ack(2));

        a.send(Frame::publish_with_report(3, "s1", "g1", b"hello".to_vec()))
            .await;

        assert_eq!(a.recv().await, Frame::deliver("s1", "g1", "a", b"hello".to_vec()));
        assert_eq!(
            a.recv().await,
            Frame::Report {
                id: 3,
                delivered: 2,
                skipped: 0,
                failed: 0,
            }
        );
        assert_eq!(b.recv().await, Frame::deliver("s1", "g1", "a", b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_frames_before_connect_are_rejected() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut client = TestClient::open(addr).await;

        expect_error(client.request(Frame::join(1, "s1")).await, error_codes::NOT_CONNECTED);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut client = TestClient::open(addr).await;

        expect_error(
            client.request(Frame::connect(PROTOCOL_VERSION + 1, "a")).await,
            error_codes::INVALID_FRAME,
        );
    }

    #[tokio::test]
    async fn test_assign_requires_session_and_membership() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = TestClient::connect(addr, "a").await;
        let mut b = TestClient::connect(addr, "b").await;

        expect_error(
            a.request(Frame::assign(1, "nowhere", "g")).await,
            error_codes::SESSION_NOT_FOUND,
        );

        assert_eq!(b.request(Frame::join(1, "s1")).await, Frame::ack(1));
        expect_error(
            a.request(Frame::assign(2, "s1", "g")).await,
            error_codes::NOT_A_MEMBER,
        );
    }

    #[tokio::test]
    async fn test_publish_to_unknown_session() {
        let (addr, _state) = spawn_server(Config::default()).await;
        let mut a = TestClient::connect(addr, "a").await;

        expect_error(
            a.request(Frame::publish_with_report(5, "nowhere", "g", b"x".to_vec()))
                .await,
            error_codes::SESSION_NOT_FOUND,
        );
    }

    #[tokio::test]
    async fn test_session_capacity_enforced() {
        let mut config = Config::default();
        config.matchmaking.players_per_match = 1;
        let (addr, _state) = spawn_server(config).await;
        let mut a = TestClient::connect(addr, "a").await;
        let mut b = TestClient::connect(addr, "b").await;

        assert_eq!(a.request(Frame::join(1, "duel")).await, Frame::ack(1));
        expect_error(b.request(Frame::join(1, "duel")).await, error_codes::SESSION_FULL);
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let mut config = Config::default();
        config.limits.max_message_size = 64;
        let (addr, _state) = spawn_server(config).await;
        let mut a = TestClient::connect(addr, "a").await;

        expect_error(
            a.request(Frame::publish("s1", "g", vec![0u8; 128])).await,
            error_codes::MESSAGE_TOO_LARGE,
        );
        // The connection stays usable.
        assert_eq!(a.request(Frame::ping()).await, Frame::pong(None));
    }

    #[tokio::test]
    async fn test_reconnect_supersedes_old_socket() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut first = TestClient::connect(addr, "p").await;
        assert_eq!(first.request(Frame::join(1, "s1")).await, Frame::ack(1));
        assert_eq!(first.request(Frame::assign(2, "s1", "g")).await, Frame::ack(2));

        let mut second = TestClient::connect(addr, "p").await;
        first.expect_closed().await;

        // Membership survives the reconnect.
        let mut publisher = TestClient::connect(addr, "q").await;
        assert_eq!(
            publisher
                .request(Frame::publish_with_report(1, "s1", "g", b"ping".to_vec()))
                .await,
            Frame::Report {
                id: 1,
                delivered: 1,
                skipped: 0,
                failed: 0,
            }
        );
        assert_eq!(
            second.recv().await,
            Frame::deliver("s1", "g", "q", b"ping".to_vec())
        );
        assert!(state.sessions.get("s1").unwrap().is_member("p"));
    }

    #[tokio::test]
    async fn test_disconnect_leaves_sessions() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut a = TestClient::connect(addr, "a").await;
        assert_eq!(a.request(Frame::join(1, "s1")).await, Frame::ack(1));
        assert!(state.directory.contains("a"));

        a.ws.close(None).await.unwrap();
        drop(a);

        let session = state.sessions.get("s1").unwrap();
        for _ in 0..100 {
            if !session.is_member("a") && !state.directory.contains("a") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!session.is_member("a"));
        assert!(!state.directory.contains("a"));
    }

    #[tokio::test]
    async fn test_leave_stops_group_delivery() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut a = TestClient::connect(addr, "a").await;
        let mut b = TestClient::connect(addr, "b").await;

        assert_eq!(a.request(Frame::join(1, "s1")).await, Frame::ack(1));
        assert_eq!(a.request(Frame::assign(2, "s1", "g")).await, Frame::ack(2));
        assert_eq!(a.request(Frame::leave(3, "s1")).await, Frame::ack(3));
        assert!(!state.sessions.get("s1").unwrap().is_member("a"));

        assert_eq!(
            b.request(Frame::publish_with_report(1, "s1", "g", b"x".to_vec()))
                .await,
            Frame::Report {
                id: 1,
                delivered: 0,
                skipped: 0,
                failed: 0,
            }
        );

        // No deliver is queued ahead of this reply.
        expect_error(
            a.request(Frame::leave(4, "nowhere")).await,
            error_codes::SESSION_NOT_FOUND,
        );
    }

    #[tokio::test]
    async fn test_superseded_socket_cannot_act_as_player() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut first = TestClient::connect(addr, "p").await;
        let mut second = TestClient::connect(addr, "p").await;

        let join = codec::encode(&Frame::join(9, "stolen")).unwrap();
        let _ = first.ws.send(WsMessage::Binary(join.to_vec())).await;

        // Either the server answers before its close lands, or the socket is gone.
        loop {
            match first.next_message().await {
                Some(WsMessage::Binary(data)) => {
                    first.buf.extend_from_slice(&data);
                    if let Some(frame) = codec::decode_from(&mut first.buf).unwrap() {
                        expect_error(frame, error_codes::NOT_CONNECTED);
                        break;
                    }
                }
                Some(WsMessage::Ping(_)) | Some(WsMessage::Pong(_)) => {}
                None | Some(WsMessage::Close(_)) => break,
                other => panic!("Unexpected message {:?}", other),
            }
        }

        assert_eq!(second.request(Frame::join(1, "s1")).await, Frame::ack(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!state.sessions.contains("stolen"));
        assert!(state.sessions.get("s1").unwrap().is_member("p"));
    }

    #[tokio::test]
    async fn test_closing_a_session_drops_member_from_other_sessions() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut a = TestClient::connect(addr, "a").await;
        assert_eq!(a.request(Frame::join(1, "s1")).await, Frame::ack(1));
        assert_eq!(a.request(Frame::join(2, "s2")).await, Frame::ack(2));

        let response = close_session_handler(Path("s1".to_string()), State(Arc::clone(&state)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        a.expect_closed().await;
        drop(a);

        let s2 = state.sessions.get("s2").unwrap();
        for _ in 0..100 {
            if !s2.is_member("a") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!s2.is_member("a"));
        assert!(!state.directory.contains("a"));
    }

    #[test]
    fn test_report_counts_saturate() {
        assert_eq!(saturating_u32(3), 3);
        assert_eq!(saturating_u32(usize::MAX), u32::MAX);
    }

    #[tokio::test]
    async fn test_admin_close_session() {
        let (addr, state) = spawn_server(Config::default()).await;
        let mut a = TestClient::connect(addr, "a").await;
        assert_eq!(a.request(Frame::join(1, "s1")).await, Frame::ack(1));

        let response = close_session_handler(Path("s1".to_string()), State(Arc::clone(&state)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.sessions.contains("s1"));
        a.expect_closed().await;

        let response = close_session_handler(Path("s1".to_string()), State(Arc::clone(&state)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_clear_session() {
        let state = Arc::new(AppState::new(Config::default()));
        let session = state.sessions.join_or_create("s1");
        session.add_player("a");

        assert_eq!(
            clear_session_handler(Path("s1".to_string()), State(Arc::clone(&state))).await,
            StatusCode::NO_CONTENT
        );
        assert!(session.is_empty());
        assert!(state.sessions.contains("s1"));
        assert_eq!(
            clear_session_handler(Path("s2".to_string()), State(state)).await,
            StatusCode::NOT_FOUND
        );
    }
}
