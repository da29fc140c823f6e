//! WebSocket front end for the [`BoardHub`].
//!
//! ```text
//! TcpListener ── accept ── handshake (path check) ── spawn per connection
//!                                                        │
//!                         ┌──────────────────────────────┤
//!                         ▼                              ▼
//!              inbound text → hub.submit      broadcast rx → socket
//!              (malformed → resync sender)    (skip own frames,
//!                                              lagged → resync)
//! ```
//!
//! Every connection runs in its own task with its own broadcast receiver,
//! so a stalled socket only delays itself.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::hub::{BoardHub, HubError, Joined};
use crate::protocol::{BoardMessage, PeerInfo};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// The one WebSocket path that serves the board
    pub board_path: String,
    /// Frames a peer may fall behind before it is resynced
    pub broadcast_capacity: usize,
    /// Connections beyond this are refused
    pub max_peers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            board_path: "/ws/board".to_string(),
            broadcast_capacity: 256,
            max_peers: 100,
        }
    }
}

#[derive(Error, Debug)]
#[error("Invalid value for {key}: {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

impl ServerConfig {
    /// Defaults overridden by `SYNCBOARD_BIND`, `SYNCBOARD_PATH`,
    /// `SYNCBOARD_BROADCAST_CAPACITY` and `SYNCBOARD_MAX_PEERS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(bind) = lookup("SYNCBOARD_BIND") {
            config.bind_addr = bind;
        }
        if let Some(path) = lookup("SYNCBOARD_PATH") {
            if !path.starts_with('/') {
                return Err(ConfigError {
                    key: "SYNCBOARD_PATH",
                    value: path,
                });
            }
            config.board_path = path;
        }
        if let Some(cap) = lookup("SYNCBOARD_BROADCAST_CAPACITY") {
            config.broadcast_capacity = parse_positive("SYNCBOARD_BROADCAST_CAPACITY", cap)?;
        }
        if let Some(max) = lookup("SYNCBOARD_MAX_PEERS") {
            config.max_peers = parse_positive("SYNCBOARD_MAX_PEERS", max)?;
        }
        Ok(config)
    }
}

fn parse_positive(key: &'static str, value: String) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError { key, value }),
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_snapshots: u64,
}

/// Which broadcast frames one connection writes to its peer.
///
/// The hub does not send a peer's own state back to it, with one exception.
/// If another peer's frame was written to this peer after its previous
/// submission, this peer may have built its next submission before seeing
/// that frame, so its local board could now be the older foreign state. The
/// own frame is then written back as a confirmation. Frames no newer than
/// the peer's latest accepted submission, or than the last resync written
/// to it, are stale and skipped.
#[derive(Debug, Default)]
struct Delivery {
    /// Hub version of this peer's latest accepted submission
    last_submitted: u64,
    /// Hub version of the last canonical board written after a lag
    resynced: u64,
    delivered_since_submit: bool,
    confirm: Option<u64>,
}

impl Delivery {
    fn on_delivered(&mut self) {
        self.delivered_since_submit = true;
    }

    fn on_resynced(&mut self, version: u64) {
        self.resynced = self.resynced.max(version);
        self.on_delivered();
    }

    fn on_accepted(&mut self, version: u64) {
        self.last_submitted = version;
        self.confirm = self.delivered_since_submit.then_some(version);
        self.delivered_since_submit = false;
    }

    fn should_forward(&mut self, own: bool, version: u64) -> bool {
        if own {
            if self.confirm == Some(version) {
                self.confirm = None;
                return version > self.resynced;
            }
            return false;
        }
        version > self.last_submitted.max(self.resynced)
    }
}

/// The sync server: one board, many connections.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<BoardHub>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server holding a fresh, empty board.
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(BoardHub::new(
            Default::default(),
            config.broadcast_capacity,
            config.max_peers,
        ));
        Self::with_hub(config, hub)
    }

    /// Create a server around an existing hub.
    pub fn with_hub(config: ServerConfig, hub: Arc<BoardHub>) -> Self {
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Board server listening on ws://{}{}",
            listener.local_addr()?,
            self.config.board_path
        );
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            let board_path = self.config.board_path.clone();

            tokio::spawn(async move {
                let result = Self::handle_connection(stream, addr, hub, stats, board_path).await;
                if let Err(e) = result {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<BoardHub>,
        stats: Arc<RwLock<ServerStats>>,
        board_path: String,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if req.uri().path() == board_path {
                Ok(resp)
            } else {
                let mut err = ErrorResponse::new(Some(format!("no board at {}", req.uri().path())));
                *err.status_mut() = StatusCode::NOT_FOUND;
                Err(err)
            }
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_path).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let peer = PeerInfo::new(addr.to_string());
        let peer_id = peer.peer_id;
        let Joined {
            snapshot,
            mut receiver,
            ..
        } = match hub.join(peer).await {
            Ok(joined) => joined,
            Err(e) => {
                log::warn!("Refusing {addr}: {e}");
                ws_sender.send(Message::Close(None)).await?;
                return Ok(());
            }
        };

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut delivery = Delivery::default();
        let result = async {
            // Initial snapshot
            let initial = BoardMessage::update_board(snapshot).encode()?;
            ws_sender.send(Message::Text(initial.into())).await?;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += text.as_str().len() as u64;
                                }
                                match hub.submit(peer_id, text.as_str()).await {
                                    Ok(accepted) => {
                                        let version = accepted.version;
                                        log::debug!("Board v{version} accepted from {addr}");
                                        delivery.on_accepted(accepted.version);
                                    }
                                    Err(HubError::Malformed { canonical, .. }) => {
                                        stats.write().await.rejected_snapshots += 1;
                                        let resync =
                                            BoardMessage::update_board(canonical).encode()?;
                                        ws_sender.send(Message::Text(resync.into())).await?;
                                        delivery.on_delivered();
                                    }
                                    Err(e) => {
                                        log::error!("Failed to adopt board from {addr}: {e}");
                                    }
                                }
                            }

                            Some(Ok(Message::Binary(_))) => {
                                log::warn!("Ignoring binary frame from {addr}");
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    frame = receiver.recv() => {
                        match frame {
                            Ok(frame) => {
                                let own = frame.origin == peer_id;
                                if !delivery.should_forward(own, frame.version) {
                                    continue;
                                }
                                let text = frame.payload.to_string();
                                ws_sender.send(Message::Text(text.into())).await?;
                                if !own {
                                    delivery.on_delivered();
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                hub.record_lag(&peer_id, n);
                                let (resync, version) = hub.snapshot_message().await?;
                                ws_sender.send(Message::Text(resync.into())).await?;
                                delivery.on_resynced(version);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        hub.leave(&peer_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }
        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn board_path(&self) -> &str {
        &self.config.board_path
    }

    pub fn hub(&self) -> &Arc<BoardHub> {
        &self.hub
    }
}
