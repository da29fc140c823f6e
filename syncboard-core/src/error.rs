use thiserror::Error;

use crate::board::CardId;

pub type Result<T> = std::result::Result<T, BoardError>;

/// Errors produced by board mutations and snapshot validation.
///
/// None of these are fatal: validation and not-found errors drop the intent,
/// malformed snapshots are answered with a resync.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Card not found: {0}")]
    NotFound(CardId),
    #[error("Malformed board state: {0}")]
    MalformedState(String),
}
