//! Typed board, column and card calls over the request pipeline.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::pipeline::{Outcome, RequestPipeline, RequestSpec};
use crate::board::engine::BoardRemote;
use crate::board::models::{
    Board, BoardDraft, BoardId, BoardSummary, CardDraft, CardId, Column, ColumnId, Invitation,
    SearchHit,
};

pub const BOARDS_PATH: &str = "/kanban";
pub const BOARD_CONTENT_PATH: &str = "/kanban/content";
pub const BOARD_STAR_PATH: &str = "/kanban/collect";
pub const COLUMN_PATH: &str = "/kanban/column";
pub const COLUMN_ORDER_PATH: &str = "/kanban/column/order";
pub const CARD_PATH: &str = "/kanban/card";
pub const CARD_ORDER_PATH: &str = "/kanban/card/order";
pub const INVITATION_PATH: &str = "/invitation";
pub const SEARCH_PATH: &str = "/search";

/// Board content arrives either flat or split into `baseInfo` + `columns`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BoardPayload {
    Split {
        #[serde(rename = "baseInfo")]
        base_info: BoardSummary,
        #[serde(default)]
        columns: Vec<Column>,
    },
    Flat(Board),
}

impl BoardPayload {
    fn into_board(self) -> Board {
        match self {
            BoardPayload::Flat(board) => board,
            BoardPayload::Split { base_info, columns } => Board {
                id: base_info.id,
                title: base_info.title,
                color_tag: base_info.color_tag,
                is_starred: base_info.is_starred,
                columns,
            },
        }
    }
}

/// Remote board operations. Cheap to clone.
#[derive(Clone)]
pub struct BoardApi {
    pipeline: RequestPipeline,
}

impl BoardApi {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    // ── boards ───────────────────────────────────────────────────────

    pub async fn list_boards(&self) -> Outcome<Vec<BoardSummary>> {
        self.pipeline.execute(&RequestSpec::get(BOARDS_PATH)).await
    }

    /// Fetch a board with its columns and cards, as stored remotely.
    pub async fn board_content(&self, board_id: BoardId) -> Outcome<Board> {
        let spec = RequestSpec::get(BOARD_CONTENT_PATH).query("kanbanId", board_id);
        self.pipeline
            .execute::<BoardPayload>(&spec)
            .await
            .map(BoardPayload::into_board)
    }

    /// Returns the new board's id when the service reports one.
    pub async fn create_board(&self, draft: &BoardDraft) -> Outcome<Option<BoardId>> {
        let spec = RequestSpec::post(BOARDS_PATH).json(json!({
            "title": draft.title,
            "color": draft.color,
        }));
        self.pipeline.execute(&spec).await
    }

    pub async fn update_board(&self, board_id: BoardId, draft: &BoardDraft) -> Outcome<()> {
        let spec = RequestSpec::put(BOARDS_PATH).json(json!({
            "kanbanId": board_id,
            "title": draft.title,
            "color": draft.color,
        }));
        self.pipeline.execute_unit(&spec).await
    }

    pub async fn delete_board(&self, board_id: BoardId) -> Outcome<()> {
        let spec = RequestSpec::delete(BOARDS_PATH).query("kanbanId", board_id);
        self.pipeline.execute_unit(&spec).await
    }

    pub async fn set_starred(&self, board_id: BoardId, starred: bool) -> Outcome<()> {
        let spec = RequestSpec::post(BOARD_STAR_PATH)
            .query("kanbanId", board_id)
            .query("isCollected", starred);
        self.pipeline.execute_unit(&spec).await
    }

    // ── columns ──────────────────────────────────────────────────────

    pub async fn create_column(&self, board_id: BoardId, title: &str) -> Outcome<Option<ColumnId>> {
        let spec = RequestSpec::post(COLUMN_PATH).json(json!({
            "kanbanId": board_id,
            "columnTitle": title,
        }));
        self.pipeline.execute(&spec).await
    }

    pub async fn rename_column(
        &self,
        board_id: BoardId,
        column_id: ColumnId,
        title: &str,
    ) -> Outcome<()> {
        let spec = RequestSpec::put(COLUMN_PATH).json(json!({
            "columnId": column_id,
            "kanbanId": board_id,
            "columnTitle": title,
        }));
        self.pipeline.execute_unit(&spec).await
    }

    pub async fn delete_column(&self, column_id: ColumnId) -> Outcome<()> {
        let spec = RequestSpec::delete(COLUMN_PATH).query("columnId", column_id);
        self.pipeline.execute_unit(&spec).await
    }

    /// Persist a column's new dense position.
    pub async fn move_column(&self, column_id: ColumnId, new_position: i64) -> Outcome<()> {
        let spec = RequestSpec::put(COLUMN_ORDER_PATH).json(json!({
            "entityId": column_id,
            "newPosition": new_position,
        }));
        self.pipeline.execute_unit(&spec).await
    }

    // ── cards ────────────────────────────────────────────────────────

    pub async fn create_card(&self, draft: &CardDraft) -> Outcome<Option<CardId>> {
        let spec = RequestSpec::post(CARD_PATH).json(json!({
            "columnId": draft.column_id,
            "title": draft.title,
            "content": draft.content,
        }));
        self.pipeline.execute(&spec).await
    }

    pub async fn update_card(&self, card_id: CardId, draft: &CardDraft) -> Outcome<()> {
        let spec = RequestSpec::put(CARD_PATH).json(json!({
            "cardId": card_id,
            "columnId": draft.column_id,
            "title": draft.title,
            "content": draft.content,
        }));
        self.pipeline.execute_unit(&spec).await
    }

    pub async fn delete_card(&self, card_id: CardId) -> Outcome<()> {
        let spec = RequestSpec::delete(CARD_PATH).query("cardId", card_id);
        self.pipeline.execute_unit(&spec).await
    }

    /// Persist a card's new column and dense position within it.
    pub async fn move_card(
        &self,
        card_id: CardId,
        new_column_id: ColumnId,
        new_position: i64,
    ) -> Outcome<()> {
        let spec = RequestSpec::put(CARD_ORDER_PATH).json(json!({
            "entityId": card_id,
            "newPosition": new_position,
            "newParentId": new_column_id,
        }));
        self.pipeline.execute_unit(&spec).await
    }

    // ── invitations ──────────────────────────────────────────────────

    /// Invitations sent and received by the current user.
    pub async fn list_invitations(&self) -> Outcome<Vec<Invitation>> {
        self.pipeline.execute(&RequestSpec::get(INVITATION_PATH)).await
    }

    /// Invite someone, by account email, to collaborate on a board.
    pub async fn send_invitation(&self, board_id: BoardId, invited_email: &str) -> Outcome<()> {
        let spec = RequestSpec::post(INVITATION_PATH)
            .query("kanbanId", board_id)
            .query("invitedUser", invited_email);
        self.pipeline.execute_unit(&spec).await
    }

    pub async fn respond_to_invitation(&self, invitation_id: i64, accept: bool) -> Outcome<()> {
        let spec = RequestSpec::put(INVITATION_PATH)
            .query("invitationId", invitation_id)
            .query("accept", accept);
        self.pipeline.execute_unit(&spec).await
    }

    // ── search ───────────────────────────────────────────────────────

    /// Full-text search over the boards and cards the user can see.
    pub async fn search(&self, text: &str) -> Outcome<Vec<SearchHit>> {
        let spec = RequestSpec::get(SEARCH_PATH).query("key", text);
        self.pipeline.execute(&spec).await
    }
}

#[async_trait]
impl BoardRemote for BoardApi {
    async fn fetch_board(&self, board_id: BoardId) -> Outcome<Board> {
        self.board_content(board_id).await
    }

    async fn move_column(&self, column_id: ColumnId, new_position: i64) -> Outcome<()> {
        BoardApi::move_column(self, column_id, new_position).await
    }

    async fn move_card(
        &self,
        card_id: CardId,
        new_column_id: ColumnId,
        new_position: i64,
    ) -> Outcome<()> {
        BoardApi::move_card(self, card_id, new_column_id, new_position).await
    }
}
