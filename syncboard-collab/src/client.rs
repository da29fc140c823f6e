//! Client side of board synchronization.
//!
//! - [`BoardReplica`]: transport-free state machine with optimistic apply and
//!   unconditional adoption of hub snapshots
//! - [`SyncClient`]: owns the WebSocket, reconnects, and feeds the replica
//!
//! ```text
//! submit_intent ── Intent::apply ── replica (Pending) ── outgoing queue ── writer
//!                                        ▲
//! reader ── update_board ────────────────┘ (Synced)
//! ```
//!
//! A local edit never waits for the network. When a snapshot arrives from
//! the hub it replaces the local board outright, even while Pending: the hub
//! is the only arbiter, so concurrent writers all converge on whatever it
//! accepted last.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use syncboard_core::{BoardError, BoardState, Intent};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{BoardMessage, ProtocolError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport connection state. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Whether the local board is known to match the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Local board equals the last snapshot received
    Synced,
    /// A local mutation was sent and nothing has superseded it yet
    Pending,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Not connected to the board hub")]
    ConnectionLost,
}

/// Events for the rendering layer.
///
/// Delivered on a bounded queue. When the queue is full new events are
/// dropped; `SyncClient::current_board` always has the latest board.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    /// The hub sent a snapshot; it is now the local board
    BoardUpdated(BoardState),
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Connected => "connected",
            SyncEvent::Disconnected => "disconnected",
            SyncEvent::BoardUpdated(_) => "board_updated",
        }
    }
}

/// Local copy of the board plus sync bookkeeping.
#[derive(Debug, Clone)]
pub struct BoardReplica {
    board: BoardState,
    sync: SyncState,
    connection: ConnectionState,
    /// Set once the current connection has delivered a snapshot
    has_canonical: bool,
}

impl BoardReplica {
    pub fn new() -> Self {
        Self {
            board: BoardState::new(),
            sync: SyncState::Synced,
            connection: ConnectionState::Disconnected,
            has_canonical: false,
        }
    }

    pub fn board(&self) -> &BoardState {
        &self.board
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Apply an intent locally and return the snapshot to send.
    ///
    /// Refused until the current connection has delivered a canonical
    /// snapshot. A failed intent leaves the board untouched.
    pub fn apply_intent(&mut self, intent: &Intent) -> Result<BoardState, ClientError> {
        if self.connection != ConnectionState::Connected || !self.has_canonical {
            return Err(ClientError::ConnectionLost);
        }
        let next = intent.apply(&self.board)?;
        self.board = next.clone();
        self.sync = SyncState::Pending;
        Ok(next)
    }

    /// Adopt a hub snapshot unconditionally.
    pub fn on_snapshot(&mut self, board: BoardState) {
        self.board = board;
        self.sync = SyncState::Synced;
        self.has_canonical = true;
    }

    pub fn on_connecting(&mut self) {
        self.connection = ConnectionState::Connecting;
        self.has_canonical = false;
    }

    pub fn on_connected(&mut self) {
        self.connection = ConnectionState::Connected;
        self.has_canonical = false;
    }

    /// Unconfirmed local edits are dropped when the next connection
    /// delivers its snapshot.
    pub fn on_connection_lost(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.has_canonical = false;
    }
}

impl Default for BoardReplica {
    fn default() -> Self {
        Self::new()
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    /// Pause between reconnect attempts
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/ws/board".to_string(),
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

/// The sync client.
///
/// Holds the replica, a queue of encoded snapshots for the writer, and the
/// background task that drives the connection and reconnects after drops.
pub struct SyncClient {
    config: ClientConfig,
    replica: Arc<RwLock<BoardReplica>>,
    outgoing_tx: mpsc::UnboundedSender<String>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    driver: Option<JoinHandle<()>>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        // No driver yet, so nothing reads the queue
        let (outgoing_tx, _) = mpsc::unbounded_channel();
        Self {
            config,
            replica: Arc::new(RwLock::new(BoardReplica::new())),
            outgoing_tx,
            event_tx,
            event_rx: Some(event_rx),
            driver: None,
        }
    }

    pub fn with_url(server_url: impl Into<String>) -> Self {
        Self::new(ClientConfig {
            server_url: server_url.into(),
            ..ClientConfig::default()
        })
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Open the connection and start the background driver.
    ///
    /// Only the first attempt is reported to the caller; after that the
    /// driver reconnects on its own.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.driver.is_some() {
            return Ok(());
        }
        self.replica.write().await.on_connecting();
        let ws = match open(&self.config).await {
            Ok(ws) => ws,
            Err(e) => {
                self.replica.write().await.on_connection_lost();
                return Err(e.into());
            }
        };
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.outgoing_tx = outgoing_tx;

        let driver = Driver {
            config: self.config.clone(),
            replica: self.replica.clone(),
            outgoing_rx,
            event_tx: self.event_tx.clone(),
        };
        self.driver = Some(tokio::spawn(driver.run(ws)));
        Ok(())
    }

    /// Stop the driver and drop the connection.
    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.replica.write().await.on_connection_lost();
    }

    /// Apply an intent optimistically and queue the new board for the hub.
    ///
    /// Returns the new local board. Validation and not-found errors leave
    /// the board unchanged and send nothing.
    pub async fn submit_intent(&self, intent: Intent) -> Result<BoardState, ClientError> {
        let snapshot = {
            let mut replica = self.replica.write().await;
            match replica.apply_intent(&intent) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::debug!("Dropped {} intent: {e}", intent.name());
                    return Err(e);
                }
            }
        };
        let encoded = BoardMessage::update_board(snapshot.clone()).encode()?;
        self.outgoing_tx
            .send(encoded)
            .map_err(|_| ClientError::ConnectionLost)?;
        Ok(snapshot)
    }

    /// Read-only copy of the local board.
    pub async fn current_board(&self) -> BoardState {
        self.replica.read().await.board().clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.replica.read().await.connection_state()
    }

    pub async fn sync_state(&self) -> SyncState {
        self.replica.read().await.sync_state()
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
    }
}

async fn open(config: &ClientConfig) -> Result<WsStream, ProtocolError> {
    let attempt = tokio_tungstenite::connect_async(config.server_url.as_str());
    match tokio::time::timeout(config.connect_timeout, attempt).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => {
            log::debug!("Connect to {} failed: {e}", config.server_url);
            Err(ProtocolError::ConnectionClosed)
        }
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Background task: one session per connection, reconnecting forever.
struct Driver {
    config: ClientConfig,
    replica: Arc<RwLock<BoardReplica>>,
    outgoing_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl Driver {
    async fn run(mut self, mut ws: WsStream) {
        loop {
            self.session(ws).await;

            self.replica.write().await.on_connection_lost();
            self.emit(SyncEvent::Disconnected);
            log::info!("Lost connection to {}, reconnecting", self.config.server_url);

            ws = loop {
                tokio::time::sleep(self.config.reconnect_delay).await;
                self.replica.write().await.on_connecting();
                match open(&self.config).await {
                    Ok(ws) => break ws,
                    Err(e) => {
                        self.replica.write().await.on_connection_lost();
                        log::debug!("Reconnect failed: {e}");
                    }
                }
            };
        }
    }

    /// Never waits on the renderer. The replica already holds the board, so
    /// a full event queue only loses the notification.
    fn emit(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("Event queue full, dropping {}", event.kind());
            }
        }
    }

    async fn session(&mut self, ws: WsStream) {
        let (mut writer, mut reader) = ws.split();

        // Snapshots queued for a dead connection are stale
        while self.outgoing_rx.try_recv().is_ok() {}

        self.replica.write().await.on_connected();
        self.emit(SyncEvent::Connected);
        log::info!("Connected to {}", self.config.server_url);

        loop {
            tokio::select! {
                msg = reader.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match BoardMessage::decode(text.as_str()) {
                            Ok(msg) => {
                                self.replica.write().await.on_snapshot(msg.data.clone());
                                self.emit(SyncEvent::BoardUpdated(msg.data));
                            }
                            Err(e) => log::warn!("Ignoring bad message from hub: {e}"),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                out = self.outgoing_rx.recv() => {
                    match out {
                        Some(encoded) => {
                            if let Err(e) = writer.send(Message::Text(encoded.into())).await {
                                log::warn!("Send failed: {e}");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }
}
