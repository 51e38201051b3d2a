//! Optimistic board mutations reconciled against the remote service.
//!
//! A drag-end is applied to local state immediately, recorded as a
//! [`PendingMutation`] and sent to the service. Success clears the pending
//! entry and leaves local state alone. Any failure refetches the whole board
//! and replaces local state with it; if that fetch fails too, local state is
//! dropped until the next load. A second drag of the same entity
//! supersedes the first: the first call still completes, but its response is
//! discarded by token comparison.
//!
//! Per collection: `Idle -> Dragging -> Reconciling -> Idle`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::models::{Board, BoardId, CardId, ColumnId};
use super::reorder::{self, AppliedMove};
use crate::client::Outcome;
use crate::errors::BoardError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Remote operations the engine depends on.
#[async_trait]
pub trait BoardRemote: Send + Sync {
    async fn fetch_board(&self, board_id: BoardId) -> Outcome<Board>;
    async fn move_column(&self, column_id: ColumnId, new_position: i64) -> Outcome<()>;
    async fn move_card(
        &self,
        card_id: CardId,
        new_column_id: ColumnId,
        new_position: i64,
    ) -> Outcome<()>;
}

// ── Types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MutationKind {
    ColumnMove,
    CardMove,
}

/// A draggable list: the board's columns, or the cards of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Columns,
    Cards(ColumnId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionPhase {
    Idle,
    Dragging,
    Reconciling,
}

/// What the gesture layer reports when a drag ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragEndEvent {
    pub kind: MutationKind,
    pub source_index: usize,
    /// `None` when the item was dropped outside any list.
    pub destination_index: Option<usize>,
    pub source_parent_id: Option<ColumnId>,
    pub destination_parent_id: Option<ColumnId>,
}

impl DragEndEvent {
    pub fn column(source_index: usize, destination_index: usize) -> Self {
        Self {
            kind: MutationKind::ColumnMove,
            source_index,
            destination_index: Some(destination_index),
            source_parent_id: None,
            destination_parent_id: None,
        }
    }

    pub fn card(
        source_column: ColumnId,
        source_index: usize,
        destination_column: ColumnId,
        destination_index: usize,
    ) -> Self {
        Self {
            kind: MutationKind::CardMove,
            source_index,
            destination_index: Some(destination_index),
            source_parent_id: Some(source_column),
            destination_parent_id: Some(destination_column),
        }
    }

    fn source_collection(&self) -> Collection {
        match (self.kind, self.source_parent_id) {
            (MutationKind::CardMove, Some(column)) => Collection::Cards(column),
            _ => Collection::Columns,
        }
    }

    fn destination_collection(&self) -> Collection {
        match (self.kind, self.destination_parent_id) {
            (MutationKind::CardMove, Some(column)) => Collection::Cards(column),
            _ => Collection::Columns,
        }
    }
}

/// A local move awaiting the service's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub kind: MutationKind,
    pub entity_id: i64,
    pub from_position: i64,
    pub to_position: i64,
    pub source_parent_id: Option<ColumnId>,
    pub target_parent_id: Option<ColumnId>,
    /// Monotonic across the engine; the newest token per entity wins.
    pub token: u64,
}

impl PendingMutation {
    fn key(&self) -> (MutationKind, i64) {
        (self.kind, self.entity_id)
    }

    fn touches(&self, collection: Collection) -> bool {
        match (self.kind, collection) {
            (MutationKind::ColumnMove, Collection::Columns) => true,
            (MutationKind::CardMove, Collection::Cards(column)) => {
                self.source_parent_id == Some(column) || self.target_parent_id == Some(column)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    Connectivity,
    Rejected,
    SessionExpired,
}

/// User-visible explanation of a rolled-back move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn for_failure<T>(outcome: &Outcome<T>) -> Option<Self> {
        match outcome {
            Outcome::Success(_) => None,
            Outcome::BusinessError { message, .. } => Some(Self {
                kind: NoticeKind::Rejected,
                message: message.clone(),
            }),
            Outcome::AuthFailure(reason) => Some(Self {
                kind: NoticeKind::SessionExpired,
                message: format!("Your session has ended ({}). Please log in again.", reason),
            }),
            Outcome::TransportError(failure) => Some(Self {
                kind: NoticeKind::Connectivity,
                message: format!("Could not reach the service: {}", failure),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
    /// Dropped in place or outside any list.
    NoChange,
    Committed,
    /// A newer drag of the same entity took over; this response was ignored.
    Superseded,
    RolledBack(Notice),
}

/// Broadcast to the presentation layer on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    StateReplaced { board_id: BoardId },
    /// A reload after a failed move did not succeed; nothing is rendered
    /// until the board is loaded again.
    StateInvalidated { board_id: BoardId },
    MoveApplied(PendingMutation),
    MoveConfirmed(PendingMutation),
    MoveRolledBack {
        mutation: PendingMutation,
        notice: Notice,
    },
}

// ── Engine ────────────────────────────────────────────────────────────

#[derive(Default)]
struct EngineState {
    board_id: Option<BoardId>,
    board: Option<Board>,
    pending: HashMap<(MutationKind, i64), PendingMutation>,
    next_token: u64,
    dragging: HashSet<Collection>,
    /// A reload was skipped because newer moves were still in flight.
    reload_deferred: bool,
}

/// Holds the render-ready board. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BoardEngine {
    remote: Arc<dyn BoardRemote>,
    state: Arc<Mutex<EngineState>>,
    events: broadcast::Sender<BoardEvent>,
}

impl BoardEngine {
    pub fn new(remote: Arc<dyn BoardRemote>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            remote,
            state: Arc::new(Mutex::new(EngineState::default())),
            events,
        }
    }

    /// Start from an already fetched board.
    pub fn with_board(remote: Arc<dyn BoardRemote>, mut board: Board) -> Self {
        let engine = Self::new(remote);
        reorder::normalize(&mut board);
        let mut state = engine.lock();
        state.board_id = Some(board.id);
        state.board = Some(board);
        drop(state);
        engine
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: BoardEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    /// The board as it should be rendered right now.
    pub fn current_state(&self) -> Option<Board> {
        self.lock().board.clone()
    }

    pub fn pending(&self) -> Vec<PendingMutation> {
        let mut pending: Vec<_> = self.lock().pending.values().cloned().collect();
        pending.sort_by_key(|p| p.token);
        pending
    }

    pub fn phase(&self, collection: Collection) -> CollectionPhase {
        let state = self.lock();
        if state.dragging.contains(&collection) {
            CollectionPhase::Dragging
        } else if state.pending.values().any(|p| p.touches(collection)) {
            CollectionPhase::Reconciling
        } else {
            CollectionPhase::Idle
        }
    }

    pub fn on_drag_start(&self, collection: Collection) {
        self.lock().dragging.insert(collection);
    }

    /// Fetch a board and replace local state with it.
    pub async fn load(&self, board_id: BoardId) -> Outcome<()> {
        let outcome = self.remote.fetch_board(board_id).await;
        outcome.map(|board| self.replace(board))
    }

    fn replace(&self, mut board: Board) {
        reorder::normalize(&mut board);
        let board_id = board.id;
        let mut state = self.lock();
        state.board_id = Some(board_id);
        state.board = Some(board);
        drop(state);
        debug!(board_id, "board state replaced");
        self.emit(BoardEvent::StateReplaced { board_id });
    }

    /// Apply a drag-end optimistically and reconcile it with the service.
    ///
    /// `Err` means the event does not fit the local board; nothing was
    /// changed or sent in that case.
    pub async fn on_drag_end(&self, event: DragEndEvent) -> Result<DragOutcome, BoardError> {
        let Some(mutation) = self.apply_locally(&event)? else {
            return Ok(DragOutcome::NoChange);
        };
        self.emit(BoardEvent::MoveApplied(mutation.clone()));

        let outcome = match (mutation.kind, mutation.target_parent_id) {
            (MutationKind::CardMove, Some(column)) => {
                self.remote
                    .move_card(mutation.entity_id, column, mutation.to_position)
                    .await
            }
            _ => {
                self.remote
                    .move_column(mutation.entity_id, mutation.to_position)
                    .await
            }
        };

        Ok(self.settle(mutation, outcome).await)
    }

    fn apply_locally(&self, event: &DragEndEvent) -> Result<Option<PendingMutation>, BoardError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.dragging.remove(&event.source_collection());
        state.dragging.remove(&event.destination_collection());

        let Some(destination_index) = event.destination_index else {
            debug!("dropped outside any list");
            return Ok(None);
        };
        if event.source_parent_id == event.destination_parent_id
            && event.source_index == destination_index
        {
            return Ok(None);
        }

        let board = state.board.as_mut().ok_or(BoardError::NoBoard)?;
        let applied: AppliedMove = match event.kind {
            MutationKind::ColumnMove => {
                reorder::move_column(board, event.source_index, destination_index)?
            }
            MutationKind::CardMove => {
                let source = event
                    .source_parent_id
                    .ok_or(BoardError::MissingParent { side: "source" })?;
                let destination = event
                    .destination_parent_id
                    .ok_or(BoardError::MissingParent {
                        side: "destination",
                    })?;
                reorder::move_card(
                    board,
                    source,
                    event.source_index,
                    destination,
                    destination_index,
                )?
            }
        };

        state.next_token += 1;
        let mutation = PendingMutation {
            kind: event.kind,
            entity_id: applied.entity_id,
            from_position: applied.from_position,
            to_position: applied.to_position,
            source_parent_id: applied.source_parent_id,
            target_parent_id: applied.target_parent_id,
            token: state.next_token,
        };
        if let Some(previous) = state.pending.insert(mutation.key(), mutation.clone()) {
            debug!(
                entity_id = mutation.entity_id,
                superseded_token = previous.token,
                token = mutation.token,
                "superseding in-flight move"
            );
        }
        Ok(Some(mutation))
    }

    fn is_current(&self, mutation: &PendingMutation) -> bool {
        self.lock()
            .pending
            .get(&mutation.key())
            .is_some_and(|p| p.token == mutation.token)
    }

    async fn settle(&self, mutation: PendingMutation, outcome: Outcome<()>) -> DragOutcome {
        if !self.is_current(&mutation) {
            debug!(
                entity_id = mutation.entity_id,
                token = mutation.token,
                "discarding response for superseded move"
            );
            return DragOutcome::Superseded;
        }

        let Some(notice) = Notice::for_failure(&outcome) else {
            let (_, reload_deferred) = finish(&mut self.lock(), &mutation);
            debug!(entity_id = mutation.entity_id, "move confirmed");
            self.emit(BoardEvent::MoveConfirmed(mutation));
            if reload_deferred {
                self.reconcile(None).await;
            }
            return DragOutcome::Committed;
        };

        warn!(
            entity_id = mutation.entity_id,
            notice = %notice.message,
            "move failed; reloading board"
        );
        self.reconcile(Some(&mutation)).await;
        let (current, reload_deferred) = finish(&mut self.lock(), &mutation);
        if reload_deferred {
            self.reconcile(None).await;
        }
        if !current {
            debug!(
                entity_id = mutation.entity_id,
                token = mutation.token,
                "move superseded while reloading"
            );
            return DragOutcome::Superseded;
        }
        self.emit(BoardEvent::MoveRolledBack {
            mutation,
            notice: notice.clone(),
        });
        DragOutcome::RolledBack(notice)
    }

    /// Replace local state with a fresh fetch. Never patches.
    ///
    /// A fetch that overlapped a newer local move is discarded, since its
    /// snapshot may predate that move. It is retried at once when nothing is
    /// in flight, otherwise after the last in-flight move settles. When the
    /// fetch itself fails the local board is dropped rather than left
    /// showing an order the service refused.
    async fn reconcile(&self, settling: Option<&PendingMutation>) {
        loop {
            let (board_id, watermark) = {
                let state = self.lock();
                let Some(board_id) = state.board_id else {
                    return;
                };
                (board_id, state.next_token)
            };
            let outcome = self.remote.fetch_board(board_id).await;

            let event = {
                let mut state = self.lock();
                if state.next_token != watermark {
                    let others_in_flight = state
                        .pending
                        .values()
                        .any(|p| settling.is_none_or(|s| p.token != s.token));
                    if !others_in_flight {
                        debug!(board_id, "reload overlapped a newer move; fetching again");
                        None
                    } else {
                        debug!(board_id, "reload overlapped a newer move; deferring");
                        state.reload_deferred = true;
                        return;
                    }
                } else {
                    state.reload_deferred = false;
                    Some(match outcome {
                        Outcome::Success(mut board) => {
                            reorder::normalize(&mut board);
                            state.board = Some(board);
                            info!(board_id, "board reloaded after failed move");
                            BoardEvent::StateReplaced { board_id }
                        }
                        other => {
                            state.board = None;
                            let reason = Notice::for_failure(&other).map(|n| n.message);
                            warn!(
                                board_id,
                                reason = ?reason,
                                "could not reload board after failed move; local state dropped"
                            );
                            BoardEvent::StateInvalidated { board_id }
                        }
                    })
                }
            };
            if let Some(event) = event {
                self.emit(event);
                return;
            }
        }
    }
}

/// Settles `mutation` out of the pending set. Returns whether it was still
/// current, and whether a deferred reload is now due.
fn finish(state: &mut EngineState, mutation: &PendingMutation) -> (bool, bool) {
    let current = remove_if_current(state, mutation);
    let reload_due = state.pending.is_empty() && std::mem::take(&mut state.reload_deferred);
    (current, reload_due)
}

/// Drops the pending entry if it still belongs to `mutation`.
fn remove_if_current(state: &mut EngineState, mutation: &PendingMutation) -> bool {
    let current = state
        .pending
        .get(&mutation.key())
        .is_some_and(|p| p.token == mutation.token);
    if current {
        state.pending.remove(&mutation.key());
    }
    current
}
