//! List-splice reordering with dense positions.
//!
//! A move removes the entity at its source index and inserts it at the
//! destination index, where the destination is read against the list after
//! removal. Every sibling is then renumbered `0..n`. Each function validates
//! its indices before touching the board, so an `Err` leaves it unchanged.

use super::models::{Board, Card, CardId, Column, ColumnId};
use crate::errors::BoardError;

/// What a successful local move did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedMove {
    pub entity_id: i64,
    pub from_position: i64,
    pub to_position: i64,
    pub source_parent_id: Option<ColumnId>,
    pub target_parent_id: Option<ColumnId>,
}

/// Remove the item at `from` and insert it at `to`.
pub fn splice<T>(items: &mut Vec<T>, from: usize, to: usize) -> Result<(), BoardError> {
    let len = items.len();
    if from >= len {
        return Err(BoardError::IndexOutOfRange { index: from, len });
    }
    if to >= len {
        return Err(BoardError::IndexOutOfRange { index: to, len });
    }
    let item = items.remove(from);
    items.insert(to, item);
    Ok(())
}

pub fn renumber_columns(columns: &mut [Column]) {
    for (i, column) in columns.iter_mut().enumerate() {
        column.position = i as i64;
    }
}

pub fn renumber_cards(cards: &mut [Card]) {
    for (i, card) in cards.iter_mut().enumerate() {
        card.position = i as i64;
    }
}

pub fn move_column(board: &mut Board, from: usize, to: usize) -> Result<AppliedMove, BoardError> {
    splice(&mut board.columns, from, to)?;
    renumber_columns(&mut board.columns);
    Ok(AppliedMove {
        entity_id: board.columns[to].id,
        from_position: from as i64,
        to_position: to as i64,
        source_parent_id: None,
        target_parent_id: None,
    })
}

/// Move a card within one column or across columns as one state change.
pub fn move_card(
    board: &mut Board,
    source_column: ColumnId,
    from: usize,
    target_column: ColumnId,
    to: usize,
) -> Result<AppliedMove, BoardError> {
    let src = board
        .column_index(source_column)
        .ok_or(BoardError::ColumnNotFound { id: source_column })?;
    let dst = board
        .column_index(target_column)
        .ok_or(BoardError::ColumnNotFound { id: target_column })?;

    if src == dst {
        let cards = &mut board.columns[src].cards;
        splice(cards, from, to)?;
        renumber_cards(cards);
        return Ok(AppliedMove {
            entity_id: cards[to].id,
            from_position: from as i64,
            to_position: to as i64,
            source_parent_id: Some(source_column),
            target_parent_id: Some(target_column),
        });
    }

    let src_len = board.columns[src].cards.len();
    if from >= src_len {
        return Err(BoardError::IndexOutOfRange {
            index: from,
            len: src_len,
        });
    }
    let dst_len = board.columns[dst].cards.len();
    if to > dst_len {
        return Err(BoardError::IndexOutOfRange {
            index: to,
            len: dst_len,
        });
    }

    let mut card = board.columns[src].cards.remove(from);
    let entity_id = card.id;
    card.column_id = target_column;
    board.columns[dst].cards.insert(to, card);
    renumber_cards(&mut board.columns[src].cards);
    renumber_cards(&mut board.columns[dst].cards);

    Ok(AppliedMove {
        entity_id,
        from_position: from as i64,
        to_position: to as i64,
        source_parent_id: Some(source_column),
        target_parent_id: Some(target_column),
    })
}

/// Sort fetched columns and cards by their stored position and renumber
/// densely. The sort is stable, so ties keep their fetched order.
pub fn normalize(board: &mut Board) {
    board.columns.sort_by_key(|c| c.position);
    renumber_columns(&mut board.columns);
    for column in &mut board.columns {
        let column_id = column.id;
        column.board_id = board.id;
        column.cards.sort_by_key(|c| c.position);
        for card in &mut column.cards {
            card.column_id = column_id;
        }
        renumber_cards(&mut column.cards);
    }
}

/// Index of a card within its column, if present.
pub fn card_index(board: &Board, column: ColumnId, card: CardId) -> Option<usize> {
    board
        .column(column)?
        .cards
        .iter()
        .position(|c| c.id == card)
}
