//! Board state and the optimistic mutation engine.

pub mod engine;
pub mod models;
pub mod reorder;

pub use engine::{
    BoardEngine, BoardEvent, BoardRemote, Collection, CollectionPhase, DragEndEvent, DragOutcome,
    MutationKind, Notice, NoticeKind, PendingMutation,
};
pub use models::{
    Board, BoardDraft, BoardId, BoardSummary, Card, CardDraft, CardId, Column, ColumnId,
    Invitation, InvitationState, SearchHit, UserInfo,
};
pub use reorder::AppliedMove;
