//! JSON wire protocol for whole-board synchronization.
//!
//! One message type in each direction, sent as a WebSocket text frame:
//! ```text
//! { "action": "update_board", "data": { "todo": [...], "doing": [...], "done": [...] } }
//! ```
//!
//! Clients → hub after every local mutation; hub → client on connect and on
//! every accepted mutation. There are no correlation ids. The hub also takes
//! a bare board object without the envelope from older clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use syncboard_core::{BoardError, BoardState};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    UpdateBoard,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::UpdateBoard => "update_board",
        }
    }
}

/// Peer identity, assigned by the hub when a connection joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    /// Display label, usually the remote socket address
    pub name: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            peer_id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// A full board snapshot on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMessage {
    pub action: Action,
    pub data: BoardState,
}

impl BoardMessage {
    pub fn update_board(board: BoardState) -> Self {
        Self {
            action: Action::UpdateBoard,
            data: board,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decode an enveloped message and validate the board it carries.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if value.get("action").is_none() {
            return Err(ProtocolError::InvalidAction("<missing>".into()));
        }
        Self::from_envelope(value)
    }

    /// Decode a snapshot sent by a client, enveloped or bare.
    pub fn decode_snapshot(text: &str) -> Result<BoardState, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if value.get("action").is_some() {
            return Self::from_envelope(value).map(|msg| msg.data);
        }
        board_from_value(value)
    }

    fn from_envelope(mut value: Value) -> Result<Self, ProtocolError> {
        let action = match value.get("action").and_then(Value::as_str) {
            Some(name) if name == Action::UpdateBoard.as_str() => Action::UpdateBoard,
            Some(name) => return Err(ProtocolError::InvalidAction(name.to_string())),
            None => return Err(ProtocolError::InvalidAction("<non-string>".into())),
        };
        let data = value
            .get_mut("data")
            .map(Value::take)
            .ok_or_else(|| BoardError::MalformedState("missing data".into()))?;
        Ok(Self {
            action,
            data: board_from_value(data)?,
        })
    }
}

fn board_from_value(value: Value) -> Result<BoardState, ProtocolError> {
    let board: BoardState =
        serde_json::from_value(value).map_err(|e| BoardError::MalformedState(e.to_string()))?;
    board.validate()?;
    Ok(board)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid action: {0}")]
    InvalidAction(String),
    #[error("Malformed snapshot: {0}")]
    Malformed(#[from] BoardError),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncboard_core::{add_card, ColumnId, Priority};

    fn sample_board() -> BoardState {
        add_card(&BoardState::new(), ColumnId::Todo, "Write spec", Some(Priority::High)).unwrap()
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = BoardMessage::update_board(sample_board());
        let encoded = msg.encode().unwrap();
        let decoded = BoardMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_envelope_shape() {
        let encoded = BoardMessage::update_board(BoardState::new()).encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["action"], "update_board");
        assert_eq!(value["data"]["todo"], serde_json::json!([]));
    }

    #[test]
    fn test_decode_snapshot_accepts_bare_board() {
        let bare = r#"{"todo":[{"id":17,"text":"legacy","priority":"medium"}],"doing":[],"done":[]}"#;
        let board = BoardMessage::decode_snapshot(bare).unwrap();
        assert_eq!(board.column(ColumnId::Todo)[0].text, "legacy");
    }

    #[test]
    fn test_decode_requires_envelope() {
        let bare = r#"{"todo":[],"doing":[],"done":[]}"#;
        assert!(matches!(
            BoardMessage::decode(bare),
            Err(ProtocolError::InvalidAction(_))
        ));
    }

    #[test]
    fn test_unknown_action() {
        let text = r#"{"action":"delete_board","data":{"todo":[],"doing":[],"done":[]}}"#;
        assert_eq!(
            BoardMessage::decode_snapshot(text),
            Err(ProtocolError::InvalidAction("delete_board".into()))
        );
    }

    #[test]
    fn test_missing_data_is_malformed() {
        let text = r#"{"action":"update_board"}"#;
        assert!(matches!(
            BoardMessage::decode_snapshot(text),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_are_malformed() {
        let text = r#"{"action":"update_board","data":{"todo":[{"id":1,"text":"a"}],"doing":[{"id":1,"text":"b"}],"done":[]}}"#;
        assert!(matches!(
            BoardMessage::decode_snapshot(text),
            Err(ProtocolError::Malformed(BoardError::MalformedState(_)))
        ));
    }

    #[test]
    fn test_garbage_is_deserialization_error() {
        assert!(matches!(
            BoardMessage::decode_snapshot("not json"),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_peer_info_gets_fresh_id() {
        let info = PeerInfo::new("127.0.0.1:5000");
        assert_eq!(info.name, "127.0.0.1:5000");
        assert!(!info.peer_id.is_nil());
        assert_ne!(PeerInfo::new("a").peer_id, PeerInfo::new("a").peer_id);
    }
}
