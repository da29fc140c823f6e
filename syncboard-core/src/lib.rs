//! # syncboard-core: board model and mutations
//!
//! - [`board`]: `BoardState`, the whole-board snapshot that is replicated
//! - [`ops`]: pure mutations (old board + intent → new board)
//! - [`error`]: `BoardError`

pub mod board;
pub mod error;
pub mod ops;

pub use board::{BoardState, Card, CardId, ColumnId, Priority};
pub use error::{BoardError, Result};
pub use ops::{add_card, clear_column, delete_card, edit_card, move_card, Intent};
