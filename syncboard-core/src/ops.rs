//! Board mutations.
//!
//! Every operation takes the current board by reference and returns a new
//! one; the input is never modified. User input is validated here and only
//! here.

use serde::{Deserialize, Deserializer, Serialize};

use crate::board::{BoardState, Card, CardId, ColumnId, Priority};
use crate::error::{BoardError, Result};

/// Append a new card to `column`. `None` priority means low.
pub fn add_card(
    state: &BoardState,
    column: ColumnId,
    text: &str,
    priority: Option<Priority>,
) -> Result<BoardState> {
    let text = non_empty(text)?;
    let mut next = state.clone();
    let card = Card::new(state.next_card_id(), text, priority.unwrap_or_default());
    next.column_mut(column).push(card);
    Ok(next)
}

/// Replace a card's text, keeping its column position and priority.
pub fn edit_card(state: &BoardState, card_id: CardId, new_text: &str) -> Result<BoardState> {
    let (column, _) = state
        .find_card(card_id)
        .ok_or(BoardError::NotFound(card_id))?;
    let text = non_empty(new_text)?;

    let mut next = state.clone();
    if let Some(card) = next.column_mut(column).iter_mut().find(|c| c.id == card_id) {
        card.text = text.to_string();
    }
    Ok(next)
}

/// Remove a card from whichever column holds it. An absent id is not an
/// error: a concurrent delete may already have removed it.
pub fn delete_card(state: &BoardState, card_id: CardId) -> BoardState {
    let mut next = state.clone();
    if let Some((column, _)) = state.find_card(card_id) {
        next.column_mut(column).retain(|c| c.id != card_id);
    }
    next
}

/// Move a card from `from` to the end of `to`.
pub fn move_card(
    state: &BoardState,
    card_id: CardId,
    from: ColumnId,
    to: ColumnId,
) -> Result<BoardState> {
    let index = state
        .column(from)
        .iter()
        .position(|c| c.id == card_id)
        .ok_or(BoardError::NotFound(card_id))?;

    let mut next = state.clone();
    if from == to {
        return Ok(next);
    }
    let card = next.column_mut(from).remove(index);
    next.column_mut(to).push(card);
    Ok(next)
}

/// Empty one column. Other columns are untouched.
pub fn clear_column(state: &BoardState, column: ColumnId) -> BoardState {
    let mut next = state.clone();
    next.column_mut(column).clear();
    next
}

fn non_empty(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(BoardError::Validation("card text must not be empty".into()));
    }
    Ok(trimmed)
}

/// Priority as typed by a user: "h", "Medium", "urgent"... Unrecognized
/// text is low, same as `Priority::from_input`.
fn loose_priority<'de, D>(deserializer: D) -> std::result::Result<Option<Priority>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(|input| Priority::from_input(&input)))
}

/// A user intent captured by the presentation layer, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Intent {
    AddCard {
        column: ColumnId,
        text: String,
        #[serde(default, deserialize_with = "loose_priority")]
        priority: Option<Priority>,
    },
    EditCard {
        card_id: CardId,
        text: String,
    },
    DeleteCard {
        card_id: CardId,
    },
    MoveCard {
        card_id: CardId,
        from: ColumnId,
        to: ColumnId,
    },
    ClearColumn {
        column: ColumnId,
    },
}

impl Intent {
    /// Compute the board that results from this intent.
    pub fn apply(&self, state: &BoardState) -> Result<BoardState> {
        match self {
            Intent::AddCard {
                column,
                text,
                priority,
            } => add_card(state, *column, text, *priority),
            Intent::EditCard { card_id, text } => edit_card(state, *card_id, text),
            Intent::DeleteCard { card_id } => Ok(delete_card(state, *card_id)),
            Intent::MoveCard { card_id, from, to } => move_card(state, *card_id, *from, *to),
            Intent::ClearColumn { column } => Ok(clear_column(state, *column)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Intent::AddCard { .. } => "add_card",
            Intent::EditCard { .. } => "edit_card",
            Intent::DeleteCard { .. } => "delete_card",
            Intent::MoveCard { .. } => "move_card",
            Intent::ClearColumn { .. } => "clear_column",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with(cards: &[(ColumnId, u64, &str)]) -> BoardState {
        let mut board = BoardState::new();
        for (col, id, text) in cards {
            board
                .column_mut(*col)
                .push(Card::new(CardId(*id), *text, Priority::Medium));
        }
        board
    }

    #[test]
    fn test_add_card_to_empty_board() {
        let board = BoardState::new();
        let next = add_card(&board, ColumnId::Todo, "Write spec", Some(Priority::High)).unwrap();

        assert_eq!(next.column(ColumnId::Todo).len(), 1);
        let card = &next.column(ColumnId::Todo)[0];
        assert_eq!(card.text, "Write spec");
        assert_eq!(card.priority, Priority::High);
        assert!(next.column(ColumnId::Doing).is_empty());
        assert!(next.column(ColumnId::Done).is_empty());
        // Input untouched
        assert!(board.is_empty());
    }

    #[test]
    fn test_add_card_defaults_low() {
        let next = add_card(&BoardState::new(), ColumnId::Done, "x", None).unwrap();
        assert_eq!(next.column(ColumnId::Done)[0].priority, Priority::Low);
    }

    #[test]
    fn test_add_card_appends_with_unique_id() {
        let board = board_with(&[(ColumnId::Todo, 1, "a"), (ColumnId::Done, 2, "b")]);
        let next = add_card(&board, ColumnId::Todo, "c", None).unwrap();

        let todo = next.column(ColumnId::Todo);
        assert_eq!(todo.len(), 2);
        assert_eq!(todo[1].text, "c");
        assert!(todo[1].id > CardId(2));
        assert!(next.validate().is_ok());
    }

    #[test]
    fn test_add_card_rejects_empty_text() {
        let board = BoardState::new();
        assert!(matches!(
            add_card(&board, ColumnId::Todo, "", None),
            Err(BoardError::Validation(_))
        ));
        assert!(matches!(
            add_card(&board, ColumnId::Todo, "   ", None),
            Err(BoardError::Validation(_))
        ));
    }

    #[test]
    fn test_edit_card_keeps_position_and_priority() {
        let board = board_with(&[
            (ColumnId::Doing, 1, "a"),
            (ColumnId::Doing, 2, "b"),
            (ColumnId::Doing, 3, "c"),
        ]);
        let next = edit_card(&board, CardId(2), "bee").unwrap();

        let doing = next.column(ColumnId::Doing);
        assert_eq!(doing[1].id, CardId(2));
        assert_eq!(doing[1].text, "bee");
        assert_eq!(doing[1].priority, Priority::Medium);
        assert_eq!(doing[0].text, "a");
        assert_eq!(doing[2].text, "c");
    }

    #[test]
    fn test_edit_card_errors() {
        let board = board_with(&[(ColumnId::Todo, 1, "a")]);
        assert_eq!(
            edit_card(&board, CardId(9), "z"),
            Err(BoardError::NotFound(CardId(9)))
        );
        assert!(matches!(
            edit_card(&board, CardId(1), ""),
            Err(BoardError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_card() {
        let board = board_with(&[(ColumnId::Todo, 1, "a"), (ColumnId::Done, 2, "b")]);
        let next = delete_card(&board, CardId(2));
        assert!(next.column(ColumnId::Done).is_empty());
        assert_eq!(next.column(ColumnId::Todo).len(), 1);
    }

    #[test]
    fn test_delete_absent_card_is_noop() {
        let board = board_with(&[(ColumnId::Todo, 1, "a")]);
        assert_eq!(delete_card(&board, CardId(42)), board);
    }

    #[test]
    fn test_move_card_appends_to_target() {
        let board = board_with(&[(ColumnId::Todo, 1, "x"), (ColumnId::Doing, 2, "y")]);
        let next = move_card(&board, CardId(1), ColumnId::Todo, ColumnId::Doing).unwrap();

        assert!(next.column(ColumnId::Todo).is_empty());
        let doing = next.column(ColumnId::Doing);
        assert_eq!(doing.len(), 2);
        assert_eq!(doing[1].id, CardId(1));
        assert_eq!(doing[1].text, "x");
        assert_eq!(doing[1].priority, Priority::Medium);
        assert!(next.validate().is_ok());
    }

    #[test]
    fn test_move_card_wrong_source_column() {
        let board = board_with(&[(ColumnId::Todo, 1, "x")]);
        assert_eq!(
            move_card(&board, CardId(1), ColumnId::Doing, ColumnId::Done),
            Err(BoardError::NotFound(CardId(1)))
        );
    }

    #[test]
    fn test_move_card_same_column_is_noop() {
        let board = board_with(&[(ColumnId::Todo, 1, "x"), (ColumnId::Todo, 2, "y")]);
        let next = move_card(&board, CardId(1), ColumnId::Todo, ColumnId::Todo).unwrap();
        assert_eq!(next, board);
    }

    #[test]
    fn test_clear_column_idempotent() {
        let board = board_with(&[(ColumnId::Todo, 1, "a"), (ColumnId::Done, 2, "b")]);
        let once = clear_column(&board, ColumnId::Todo);
        let twice = clear_column(&once, ColumnId::Todo);
        assert_eq!(once, twice);
        assert!(once.column(ColumnId::Todo).is_empty());
        assert_eq!(once.column(ColumnId::Done).len(), 1);
    }

    #[test]
    fn test_invariants_hold_across_sequence() {
        let mut board = BoardState::new();
        let intents = [
            Intent::AddCard {
                column: ColumnId::Todo,
                text: "a".into(),
                priority: None,
            },
            Intent::AddCard {
                column: ColumnId::Todo,
                text: "b".into(),
                priority: Some(Priority::High),
            },
            Intent::AddCard {
                column: ColumnId::Doing,
                text: "c".into(),
                priority: None,
            },
        ];
        for intent in &intents {
            board = intent.apply(&board).unwrap();
        }
        let first = board.column(ColumnId::Todo)[0].id;
        board = Intent::MoveCard {
            card_id: first,
            from: ColumnId::Todo,
            to: ColumnId::Done,
        }
        .apply(&board)
        .unwrap();
        board = Intent::DeleteCard { card_id: first }.apply(&board).unwrap();
        board = Intent::ClearColumn {
            column: ColumnId::Doing,
        }
        .apply(&board)
        .unwrap();

        assert!(board.validate().is_ok());
        assert_eq!(board.card_count(), 1);
        assert_eq!(board.column(ColumnId::Todo)[0].text, "b");
    }

    #[test]
    fn test_add_card_after_max_id() {
        let board = board_with(&[(ColumnId::Todo, u64::MAX, "x")]);
        let next = add_card(&board, ColumnId::Todo, "y", None).unwrap();
        assert_eq!(next.card_count(), 2);
        assert!(next.validate().is_ok());
    }

    #[test]
    fn test_intent_json_shape() {
        let intent: Intent =
            serde_json::from_str(r#"{"op":"move_card","card_id":5,"from":"todo","to":"doing"}"#)
                .unwrap();
        assert_eq!(
            intent,
            Intent::MoveCard {
                card_id: CardId(5),
                from: ColumnId::Todo,
                to: ColumnId::Doing,
            }
        );
        assert_eq!(intent.name(), "move_card");
    }

    #[test]
    fn test_add_intent_loose_priority() {
        let parse = |json: &str| match serde_json::from_str::<Intent>(json).unwrap() {
            Intent::AddCard { priority, .. } => priority,
            other => panic!("Expected AddCard, got {other:?}"),
        };
        assert_eq!(
            parse(r#"{"op":"add_card","column":"todo","text":"a","priority":"urgent"}"#),
            Some(Priority::Low)
        );
        assert_eq!(
            parse(r#"{"op":"add_card","column":"todo","text":"a","priority":"H"}"#),
            Some(Priority::High)
        );
        assert_eq!(
            parse(r#"{"op":"add_card","column":"todo","text":"a","priority":"medium"}"#),
            Some(Priority::Medium)
        );
        assert_eq!(parse(r#"{"op":"add_card","column":"todo","text":"a"}"#), None);

        let intent = Intent::AddCard {
            column: ColumnId::Done,
            text: "b".into(),
            priority: Some(Priority::High),
        };
        let back: Intent = serde_json::from_str(&serde_json::to_string(&intent).unwrap()).unwrap();
        assert_eq!(back, intent);
    }
}
