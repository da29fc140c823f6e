//! The authoritative board holder.
//!
//! ```text
//! Client A ──submit──┐
//!                    ├── Mutex<Canonical> ── adopt ── BroadcastGroup
//! Client B ──submit──┘                                   │
//!                                           ┌────────────┼────────────┐
//!                                           ▼            ▼            ▼
//!                                        Client A     Client B     Client C
//!                                       (skipped)
//! ```
//!
//! Adoption is last-write-wins at whole-board granularity. Replacing the
//! canonical board and publishing it to the broadcast channel happen under
//! one lock, so the order peers observe is the order the hub accepted.

use std::sync::atomic::{AtomicU64, Ordering};
use syncboard_core::BoardState;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, Frame};
use crate::protocol::{BoardMessage, PeerInfo, ProtocolError};

#[derive(Error, Debug)]
pub enum HubError {
    /// The snapshot was rejected; `canonical` is what the sender must resync to.
    #[error("Rejected snapshot from {peer_id}: {reason}")]
    Malformed {
        peer_id: Uuid,
        reason: ProtocolError,
        canonical: BoardState,
    },
    #[error("Board is full ({max_peers} peers)")]
    Full { max_peers: usize },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// What a joining peer needs: the board as of joining and a receiver that
/// sees every state accepted afterwards.
pub struct Joined {
    pub snapshot: BoardState,
    pub version: u64,
    pub receiver: broadcast::Receiver<Frame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub version: u64,
    /// Receivers the frame was queued for, sender included
    pub receivers: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub version: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub peers: usize,
    pub lagged_frames: u64,
}

struct Canonical {
    board: BoardState,
    version: u64,
}

pub struct BoardHub {
    canonical: Mutex<Canonical>,
    group: BroadcastGroup,
    max_peers: usize,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl BoardHub {
    pub fn new(initial: BoardState, broadcast_capacity: usize, max_peers: usize) -> Self {
        Self {
            canonical: Mutex::new(Canonical {
                board: initial,
                version: 0,
            }),
            group: BroadcastGroup::new(broadcast_capacity),
            max_peers,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Register a peer. The snapshot and the subscription are taken under
    /// the same lock so no accepted state falls between them.
    pub async fn join(&self, peer: PeerInfo) -> Result<Joined, HubError> {
        let canonical = self.canonical.lock().await;
        if self.group.peer_count().await >= self.max_peers {
            return Err(HubError::Full {
                max_peers: self.max_peers,
            });
        }
        log::info!(
            "Peer {} ({}) joined at version {}",
            peer.name,
            peer.peer_id,
            canonical.version
        );
        let receiver = self.group.add_peer(peer).await;
        Ok(Joined {
            snapshot: canonical.board.clone(),
            version: canonical.version,
            receiver,
        })
    }

    pub async fn leave(&self, peer_id: &Uuid) {
        if let Some(info) = self.group.remove_peer(peer_id).await {
            log::info!("Peer {} ({}) left", info.name, info.peer_id);
        }
    }

    /// Decode a snapshot received from `peer_id` and adopt it.
    pub async fn submit(&self, peer_id: Uuid, text: &str) -> Result<Accepted, HubError> {
        match BoardMessage::decode_snapshot(text) {
            Ok(board) => self.adopt(peer_id, board).await,
            Err(reason) => Err(self.reject(peer_id, reason).await),
        }
    }

    /// Replace the canonical board and publish it to every peer.
    pub async fn adopt(&self, peer_id: Uuid, board: BoardState) -> Result<Accepted, HubError> {
        if let Err(e) = board.validate() {
            return Err(self.reject(peer_id, e.into()).await);
        }
        let payload = BoardMessage::update_board(board.clone()).encode()?;

        let mut canonical = self.canonical.lock().await;
        canonical.board = board;
        canonical.version += 1;
        let version = canonical.version;
        let receivers = self.group.broadcast_raw(Frame {
            origin: peer_id,
            version,
            payload: payload.into(),
        });
        drop(canonical);

        self.accepted.fetch_add(1, Ordering::Relaxed);
        log::debug!("Adopted board v{version} from {peer_id}, queued for {receivers} receivers");
        Ok(Accepted { version, receivers })
    }

    async fn reject(&self, peer_id: Uuid, reason: ProtocolError) -> HubError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        log::warn!("Rejected snapshot from {peer_id}: {reason}");
        HubError::Malformed {
            peer_id,
            reason,
            canonical: self.canonical().await,
        }
    }

    /// Current canonical board.
    pub async fn canonical(&self) -> BoardState {
        self.canonical.lock().await.board.clone()
    }

    /// Encoded `update_board` message for the current canonical board,
    /// paired with its version.
    pub async fn snapshot_message(&self) -> Result<(String, u64), ProtocolError> {
        let (board, version) = {
            let canonical = self.canonical.lock().await;
            (canonical.board.clone(), canonical.version)
        };
        Ok((BoardMessage::update_board(board).encode()?, version))
    }

    pub async fn version(&self) -> u64 {
        self.canonical.lock().await.version
    }

    pub async fn peer_count(&self) -> usize {
        self.group.peer_count().await
    }

    pub fn record_lag(&self, peer_id: &Uuid, skipped: u64) {
        log::warn!("Peer {peer_id} lagged by {skipped} frames, resyncing");
        self.group.record_dropped(skipped);
    }

    pub async fn stats(&self) -> HubStats {
        let group = self.group.stats().await;
        HubStats {
            version: self.version().await,
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            peers: group.active_peers,
            lagged_frames: group.messages_dropped,
        }
    }
}

impl Default for BoardHub {
    fn default() -> Self {
        Self::new(BoardState::new(), 256, 100)
    }
}
