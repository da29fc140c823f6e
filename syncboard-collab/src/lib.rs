//! # syncboard-collab: real-time board synchronization
//!
//! Whole-board snapshots over WebSocket, last-write-wins at the hub.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   update_board (JSON)  ┌─────────────┐
//! │ SyncClient  │ ◄────────────────────► │ SyncServer  │
//! │ (per user)  │                        │ (one board) │
//! └──────┬──────┘                        └──────┬──────┘
//!        │                                      │
//!        ▼                                      ▼
//! ┌─────────────┐                        ┌─────────────┐
//! │BoardReplica │                        │  BoardHub   │
//! │ (optimistic)│                        │ (canonical) │
//! └─────────────┘                        └──────┬──────┘
//!                                               │
//!                                       ┌───────┴───────┐
//!                                       │BroadcastGroup │
//!                                       │  (fan-out)    │
//!                                       └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: `update_board` message encoding and snapshot validation
//! - [`broadcast`]: fan-out with per-peer buffering
//! - [`hub`]: canonical board, serialized adoption and rebroadcast
//! - [`server`]: WebSocket server in front of the hub
//! - [`client`]: replica state machine and reconnecting WebSocket client

pub mod broadcast;
pub mod client;
pub mod hub;
pub mod protocol;
pub mod server;

pub use broadcast::{BroadcastGroup, BroadcastStats, Frame};
pub use client::{
    BoardReplica, ClientConfig, ClientError, ConnectionState, SyncClient, SyncEvent, SyncState,
};
pub use hub::{Accepted, BoardHub, HubError, HubStats, Joined};
pub use protocol::{Action, BoardMessage, PeerInfo, ProtocolError};
pub use server::{ConfigError, ServerConfig, ServerStats, SyncServer};
