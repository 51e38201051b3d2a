//! Board, column and card records.
//!
//! Field aliases accept both the web client's names (`id`, `title`,
//! `position`) and the service's persistence names (`kanbanId`,
//! `columnTitle`, `orderInColumn`).

use serde::{Deserialize, Deserializer, Serialize};

pub type BoardId = i64;
pub type ColumnId = i64;
pub type CardId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(alias = "cardId")]
    pub id: CardId,
    pub column_id: ColumnId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(
        default,
        alias = "orderInColumn",
        deserialize_with = "position_from_number"
    )]
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    #[serde(alias = "columnId")]
    pub id: ColumnId,
    #[serde(default, alias = "kanbanId")]
    pub board_id: BoardId,
    #[serde(default, alias = "columnTitle")]
    pub title: String,
    #[serde(
        default,
        alias = "columnOrder",
        deserialize_with = "position_from_number"
    )]
    pub position: i64,
    /// Cards in render order.
    #[serde(default)]
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    #[serde(alias = "kanbanId")]
    pub id: BoardId,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "color")]
    pub color_tag: String,
    #[serde(default, alias = "collected")]
    pub is_starred: bool,
    /// Columns in render order.
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Board {
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_index(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    /// Find a card anywhere on the board.
    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.columns
            .iter()
            .flat_map(|c| c.cards.iter())
            .find(|card| card.id == id)
    }

    pub fn card_count(&self) -> usize {
        self.columns.iter().map(|c| c.cards.len()).sum()
    }
}

/// Entry in the board list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSummary {
    #[serde(alias = "kanbanId")]
    pub id: BoardId,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "color")]
    pub color_tag: String,
    #[serde(default, alias = "collected")]
    pub is_starred: bool,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

/// Fields for creating or editing a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardDraft {
    pub title: String,
    pub color: String,
}

/// Fields for creating or editing a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDraft {
    pub column_id: ColumnId,
    pub title: String,
    pub content: String,
}

// ── Collaboration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Where an invitation stands. The service encodes it as 1, 2 or 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum InvitationState {
    Pending,
    Accepted,
    Declined,
    Other(i32),
}

impl From<i32> for InvitationState {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::Pending,
            2 => Self::Accepted,
            3 => Self::Declined,
            other => Self::Other(other),
        }
    }
}

impl From<InvitationState> for i32 {
    fn from(state: InvitationState) -> Self {
        match state {
            InvitationState::Pending => 1,
            InvitationState::Accepted => 2,
            InvitationState::Declined => 3,
            InvitationState::Other(code) => code,
        }
    }
}

/// An invitation to collaborate on a board, sent or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub invitation_id: i64,
    #[serde(default)]
    pub invited_user_info: Option<UserInfo>,
    #[serde(default)]
    pub send_user_info: Option<UserInfo>,
    #[serde(default)]
    pub kanban_title: String,
    /// Epoch milliseconds.
    #[serde(default)]
    pub invitation_time: Option<i64>,
    pub state: InvitationState,
}

/// One full-text search match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(default)]
    pub content: String,
    /// What matched, e.g. a board title or a card.
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(alias = "kanbanId")]
    pub board_id: BoardId,
}

// The service persists positions as doubles.
fn position_from_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Number::deserialize(deserializer)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
        .ok_or_else(|| serde::de::Error::custom("position out of range"))
}
