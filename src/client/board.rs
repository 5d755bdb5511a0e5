//! Client-side board session: a `BoardStore` kept in step with the server.
//!
//! Card moves are applied locally first and rolled back from a clone of the
//! store if the server rejects them. Realtime messages from `/ws` are folded
//! into the same store.

use reqwest::Method;
use serde_json::json;

use super::cache::{DataClient, QueryKey};
use super::{ClientError, decode};
use crate::board::{BoardStore, ColumnCards, TaskFilter};
use crate::store::models::{Board, Task};
use crate::ws::WsMessage;

/// Largest page the API serves; boards are loaded in one request.
const TASK_PAGE: &str = "200";

pub struct BoardSession {
    client: DataClient,
    board_id: String,
    store: BoardStore,
}

impl BoardSession {
    /// Fetch the board and its tasks.
    pub async fn load(client: DataClient, board_id: &str) -> Result<Self, ClientError> {
        let remote = client.remote();
        let board: Board = decode(
            remote
                .request(Method::GET, &format!("/api/boards/{}", board_id), &[], None)
                .await?,
        )?;
        let query = [
            ("board_id".to_string(), board_id.to_string()),
            ("limit".to_string(), TASK_PAGE.to_string()),
        ];
        let tasks: Vec<Task> = client.list(&Self::tasks_key(board_id), &query).await?;
        Ok(Self {
            client,
            board_id: board_id.to_string(),
            store: BoardStore::from_parts(board, tasks),
        })
    }

    pub fn tasks_key(board_id: &str) -> QueryKey {
        QueryKey::scoped("tasks", board_id)
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    pub fn columns(&self) -> &[ColumnCards] {
        self.store.columns()
    }

    pub fn view(&self, filter: &TaskFilter) -> Vec<ColumnCards> {
        self.store.filter(filter)
    }

    /// Move a card optimistically. On failure the store is restored to its
    /// state before the move and the error is returned.
    pub async fn move_card(
        &mut self,
        card_id: &str,
        to_column: &str,
        position: usize,
    ) -> Result<Task, ClientError> {
        let from_column = self
            .store
            .task(card_id)
            .map(|t| t.column_id.clone())
            .ok_or_else(|| crate::errors::BoardError::CardNotFound {
                card_id: card_id.to_string(),
                column_id: to_column.to_string(),
            })?;

        let snapshot = self.store.clone();
        self.store
            .move_card(card_id, &from_column, to_column, position)?;

        let result = self
            .client
            .remote()
            .request(
                Method::POST,
                &format!("/api/tasks/{}/move", card_id),
                &[],
                Some(json!({ "column_id": to_column, "position": position })),
            )
            .await
            .and_then(decode::<Task>);

        match &result {
            Ok(task) => {
                // Pick up server-side fields such as completed_at.
                let stored = task.clone();
                if let Err(e) = self.store.update_card(card_id, |card| *card = stored) {
                    tracing::warn!(card_id, error = %e, "Moved card missing from board store");
                }
            }
            Err(e) => {
                self.store = snapshot;
                tracing::error!(card_id, to_column, error = %e, "Card move failed, reverted");
            }
        }
        self.client
            .cache()
            .invalidate(&Self::tasks_key(&self.board_id));
        result
    }

    /// Fold a realtime message into the store. Messages for other boards
    /// are ignored. Returns whether the store changed.
    pub fn apply(&mut self, message: &WsMessage) -> bool {
        let changed = match message {
            WsMessage::TaskCreated { task } | WsMessage::TaskUpdated { task } => {
                if task.board_id != self.board_id {
                    return false;
                }
                self.upsert(task.clone())
            }
            WsMessage::TaskMoved {
                task_id,
                board_id,
                to_column,
                position,
                ..
            } => {
                if *board_id != self.board_id {
                    return false;
                }
                let Some(current) = self.store.task(task_id).map(|t| t.column_id.clone()) else {
                    return false;
                };
                let at = usize::try_from(*position).unwrap_or(0);
                self.store.move_card(task_id, &current, to_column, at).is_ok()
            }
            WsMessage::TaskDeleted { task_id, board_id } => {
                *board_id == self.board_id && self.store.remove_card(task_id).is_ok()
            }
            WsMessage::BoardUpdated { board } => {
                if board.id != self.board_id {
                    return false;
                }
                let tasks = self.store.tasks().to_vec();
                self.store = BoardStore::from_parts(board.clone(), tasks);
                true
            }
            WsMessage::PrdUpdated { .. } | WsMessage::EntityChanged { .. } => false,
        };
        if changed {
            self.client
                .cache()
                .invalidate(&Self::tasks_key(&self.board_id));
        }
        changed
    }

    fn upsert(&mut self, task: Task) -> bool {
        let same_column = self
            .store
            .task(&task.id)
            .is_some_and(|t| t.column_id == task.column_id);
        let result = if same_column {
            let id = task.id.clone();
            self.store.update_card(&id, |card| *card = task)
        } else {
            self.store.add_card(task)
        };
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring realtime task for unknown column");
                false
            }
        }
    }
}
