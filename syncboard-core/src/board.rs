//! Board data model: cards, the three fixed columns, and the whole-board
//! snapshot that is replicated between clients and the hub.
//!
//! Wire shape (JSON):
//! ```text
//! {
//!   "todo":  [ { "id": 1718000000000, "text": "Write spec", "priority": "high" } ],
//!   "doing": [],
//!   "done":  []
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};

/// Card identifier: creation time in milliseconds, bumped past any id
/// already on the board so it stays unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub u64);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    /// Loose parse of free-text user input ("h", "High", "med"...).
    /// Anything unrecognized is `Low`.
    pub fn from_input(input: &str) -> Self {
        let lowered = input.trim().to_lowercase();
        if lowered.starts_with('h') {
            Priority::High
        } else if lowered.starts_with('m') {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// The closed set of board columns, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnId {
    Todo,
    Doing,
    Done,
}

impl ColumnId {
    pub const ALL: [ColumnId; 3] = [ColumnId::Todo, ColumnId::Doing, ColumnId::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnId::Todo => "todo",
            ColumnId::Doing => "doing",
            ColumnId::Done => "done",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
}

impl Card {
    pub fn new(id: CardId, text: impl Into<String>, priority: Priority) -> Self {
        Self {
            id,
            text: text.into(),
            priority,
        }
    }
}

/// Whole-board snapshot. This is the unit of replication: it is never
/// patched field by field across components, only replaced.
///
/// The three columns are fields rather than map entries so a board can
/// never gain or lose a column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardState {
    todo: Vec<Card>,
    doing: Vec<Card>,
    done: Vec<Card>,
}

impl BoardState {
    /// Empty board, all three columns empty.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(&self, column: ColumnId) -> &[Card] {
        match column {
            ColumnId::Todo => &self.todo,
            ColumnId::Doing => &self.doing,
            ColumnId::Done => &self.done,
        }
    }

    pub(crate) fn column_mut(&mut self, column: ColumnId) -> &mut Vec<Card> {
        match column {
            ColumnId::Todo => &mut self.todo,
            ColumnId::Doing => &mut self.doing,
            ColumnId::Done => &mut self.done,
        }
    }

    /// All cards in column order, paired with the column holding them.
    pub fn iter(&self) -> impl Iterator<Item = (ColumnId, &Card)> {
        ColumnId::ALL
            .into_iter()
            .flat_map(move |col| self.column(col).iter().map(move |card| (col, card)))
    }

    pub fn find_card(&self, id: CardId) -> Option<(ColumnId, &Card)> {
        self.iter().find(|(_, card)| card.id == id)
    }

    pub fn card_count(&self) -> usize {
        self.todo.len() + self.doing.len() + self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.card_count() == 0
    }

    /// Check the structural invariants a snapshot must satisfy before a hub
    /// adopts it: ids unique board-wide, no empty card text.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.card_count());
        for (column, card) in self.iter() {
            if card.text.trim().is_empty() {
                return Err(BoardError::MalformedState(format!(
                    "card {} in {column} has empty text",
                    card.id
                )));
            }
            if !seen.insert(card.id) {
                return Err(BoardError::MalformedState(format!(
                    "duplicate card id {}",
                    card.id
                )));
            }
        }
        Ok(())
    }

    /// Fresh identifier for a new card on this board.
    ///
    /// Normally the current time in milliseconds, bumped past the largest id
    /// in use. If that largest id is `u64::MAX` the first free id from the
    /// current time onwards is taken instead.
    pub fn next_card_id(&self) -> CardId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let max = self.iter().map(|(_, card)| card.id.0).max();
        match max.map_or(Some(0), |max| max.checked_add(1)) {
            Some(after_max) => CardId(now_ms.max(after_max)),
            None => {
                let taken: HashSet<u64> = self.iter().map(|(_, card)| card.id.0).collect();
                (now_ms..=u64::MAX)
                    .chain(0..now_ms)
                    .find(|id| !taken.contains(id))
                    .map_or(CardId(now_ms), CardId)
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| BoardError::MalformedState(e.to_string()))
    }

    /// Parse and validate a snapshot.
    pub fn from_json(json: &str) -> Result<Self> {
        let board: BoardState =
            serde_json::from_str(json).map_err(|e| BoardError::MalformedState(e.to_string()))?;
        board.validate()?;
        Ok(board)
    }
}
