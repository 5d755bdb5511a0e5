//! Board reconciliation store.
//!
//! `BoardStore` keeps an in-memory projection of one board: its ordered
//! columns, the cards bucketed into each column, and the flat task list the
//! cards came from. Every mutation keeps three views in lockstep:
//!
//! - `columns[i].cards`: cards of one column, positions dense `0..n-1`
//! - `tasks`: the shared task list (`column_id` / `position` mirror the cards)
//! - `board.columns`: the board's stored column configuration
//!
//! The store is synchronous and owns no I/O. The API layer runs task moves
//! and column edits through it before persisting the resulting layout, and
//! the client runs the same operations optimistically before the server
//! call returns.

mod filter;

pub use filter::TaskFilter;

use serde::{Deserialize, Serialize};

use crate::errors::BoardError;
use crate::store::models::{Board, BoardColumn, Task};
use crate::store::now;

/// One column of the projection with its cards in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCards {
    pub column: BoardColumn,
    pub cards: Vec<Task>,
}

#[derive(Debug, Clone, Default)]
pub struct BoardStore {
    board: Option<Board>,
    columns: Vec<ColumnCards>,
    tasks: Vec<Task>,
}

impl BoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store and load both the board and its tasks.
    pub fn from_parts(board: Board, tasks: Vec<Task>) -> Self {
        let mut store = Self::new();
        store.load_board(board);
        store.load_tasks(tasks);
        store
    }

    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    pub fn columns(&self) -> &[ColumnCards] {
        &self.columns
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn cards(&self, column_id: &str) -> Option<&[Task]> {
        self.columns
            .iter()
            .find(|c| c.column.id == column_id)
            .map(|c| c.cards.as_slice())
    }

    /// Replace the column list from the board's configuration, sorted by
    /// position. Card lists start empty until `load_tasks` is called.
    pub fn load_board(&mut self, mut board: Board) {
        board.columns.sort_by_key(|c| c.position);
        self.columns = board
            .columns
            .iter()
            .cloned()
            .map(|column| ColumnCards {
                column,
                cards: Vec::new(),
            })
            .collect();
        self.tasks.clear();
        self.board = Some(board);
    }

    /// Partition `tasks` into columns by `column_id`, each sorted by position.
    pub fn load_tasks(&mut self, tasks: Vec<Task>) {
        for col in &mut self.columns {
            col.cards = tasks
                .iter()
                .filter(|t| t.column_id == col.column.id)
                .cloned()
                .collect();
            col.cards.sort_by_key(|t| t.position);
        }
        let orphans = tasks
            .iter()
            .filter(|t| self.column_index(&t.column_id).is_err())
            .count();
        if orphans > 0 {
            tracing::warn!(orphans, "tasks reference columns missing from the board");
        }
        self.tasks = tasks;
    }

    /// Move a card between (or within) columns.
    ///
    /// The card is removed from `from_column` first, so a same-column move
    /// never duplicates it. `new_position` is clamped to the destination
    /// length. Both touched columns are renumbered from zero and the shared
    /// task list is updated for every renumbered card.
    pub fn move_card(
        &mut self,
        card_id: &str,
        from_column: &str,
        to_column: &str,
        new_position: usize,
    ) -> Result<Task, BoardError> {
        let from_idx = self.column_index(from_column)?;
        let to_idx = self.column_index(to_column)?;
        let card_idx = self.columns[from_idx]
            .cards
            .iter()
            .position(|t| t.id == card_id)
            .ok_or_else(|| BoardError::CardNotFound {
                card_id: card_id.to_string(),
                column_id: from_column.to_string(),
            })?;

        let mut card = self.columns[from_idx].cards.remove(card_idx);
        reindex(&mut self.columns[from_idx].cards);

        place_in_column(&mut card, to_column);
        let dest = &mut self.columns[to_idx].cards;
        let at = new_position.min(dest.len());
        dest.insert(at, card);
        reindex(dest);

        self.sync_tasks(from_idx);
        if to_idx != from_idx {
            self.sync_tasks(to_idx);
        }
        Ok(self.columns[to_idx].cards[at].clone())
    }

    /// Append a card to the end of its column. A card with the same id is
    /// replaced, including one whose column is missing from the board.
    pub fn add_card(&mut self, mut task: Task) -> Result<Task, BoardError> {
        let col_idx = self.column_index(&task.column_id)?;
        if self.locate_card(&task.id).is_ok() {
            self.remove_card(&task.id)?;
        } else {
            self.tasks.retain(|t| t.id != task.id);
        }
        let column_id = task.column_id.clone();
        place_in_column(&mut task, &column_id);
        task.position = self.columns[col_idx].cards.len() as i32;
        self.columns[col_idx].cards.push(task.clone());
        self.tasks.push(task.clone());
        Ok(task)
    }

    /// Apply field edits to a card. Layout fields (`column_id`, `status`,
    /// `position`) are owned by the store and survive `apply` unchanged.
    pub fn update_card(
        &mut self,
        card_id: &str,
        apply: impl FnOnce(&mut Task),
    ) -> Result<Task, BoardError> {
        let (col_idx, card_idx) = self.locate_card(card_id)?;
        let card = &mut self.columns[col_idx].cards[card_idx];
        let (column_id, status, position) =
            (card.column_id.clone(), card.status.clone(), card.position);
        apply(card);
        card.id = card_id.to_string();
        card.column_id = column_id;
        card.status = status;
        card.position = position;
        let updated = card.clone();

        match self.tasks.iter_mut().find(|t| t.id == card_id) {
            Some(entry) => *entry = updated.clone(),
            None => self.tasks.push(updated.clone()),
        }
        Ok(updated)
    }

    /// Remove a card from its column and from the task list.
    pub fn remove_card(&mut self, card_id: &str) -> Result<Task, BoardError> {
        let (col_idx, card_idx) = self.locate_card(card_id)?;
        let removed = self.columns[col_idx].cards.remove(card_idx);
        reindex(&mut self.columns[col_idx].cards);
        self.tasks.retain(|t| t.id != card_id);
        self.sync_tasks(col_idx);
        Ok(removed)
    }

    /// Append a column to the board.
    pub fn add_column(&mut self, id: &str, name: &str) -> Result<BoardColumn, BoardError> {
        if self.board.is_none() {
            return Err(BoardError::BoardNotLoaded);
        }
        if self.column_index(id).is_ok() {
            return Err(BoardError::DuplicateColumn(id.to_string()));
        }
        let column = BoardColumn::new(id, name, self.columns.len() as i32);
        self.columns.push(ColumnCards {
            column: column.clone(),
            cards: Vec::new(),
        });
        self.sync_board_columns();
        Ok(column)
    }

    /// Rename a column.
    pub fn update_column(&mut self, id: &str, name: &str) -> Result<BoardColumn, BoardError> {
        let idx = self.column_index(id)?;
        self.columns[idx].column.name = name.to_string();
        self.sync_board_columns();
        Ok(self.columns[idx].column.clone())
    }

    /// Remove a column together with every task that references it.
    /// Returns the removed tasks.
    pub fn remove_column(&mut self, id: &str) -> Result<Vec<Task>, BoardError> {
        let idx = self.column_index(id)?;
        self.columns.remove(idx);
        for (i, col) in self.columns.iter_mut().enumerate() {
            col.column.position = i as i32;
        }
        let (removed, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| t.column_id == id);
        self.tasks = kept;
        self.sync_board_columns();
        Ok(removed)
    }

    /// Reorder columns. `ordered_ids` must name every column exactly once.
    pub fn reorder_columns(&mut self, ordered_ids: &[String]) -> Result<(), BoardError> {
        if ordered_ids.len() != self.columns.len() {
            return Err(BoardError::InvalidColumnOrder);
        }
        let mut remaining = std::mem::take(&mut self.columns);
        let mut reordered = Vec::with_capacity(remaining.len());
        for id in ordered_ids {
            match remaining.iter().position(|c| &c.column.id == id) {
                Some(i) => reordered.push(remaining.swap_remove(i)),
                None => {
                    // Put back what was taken so a rejected order changes nothing.
                    reordered.append(&mut remaining);
                    reordered.sort_by_key(|c| c.column.position);
                    self.columns = reordered;
                    return Err(BoardError::InvalidColumnOrder);
                }
            }
        }
        for (i, col) in reordered.iter_mut().enumerate() {
            col.column.position = i as i32;
        }
        self.columns = reordered;
        self.sync_board_columns();
        Ok(())
    }

    /// Filtered view of the columns. Does not touch stored state.
    pub fn filter(&self, filter: &TaskFilter) -> Vec<ColumnCards> {
        self.columns
            .iter()
            .map(|col| ColumnCards {
                column: col.column.clone(),
                cards: col
                    .cards
                    .iter()
                    .filter(|t| filter.matches(t))
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    fn column_index(&self, column_id: &str) -> Result<usize, BoardError> {
        self.columns
            .iter()
            .position(|c| c.column.id == column_id)
            .ok_or_else(|| BoardError::ColumnNotFound(column_id.to_string()))
    }

    fn locate_card(&self, card_id: &str) -> Result<(usize, usize), BoardError> {
        for (col_idx, col) in self.columns.iter().enumerate() {
            if let Some(card_idx) = col.cards.iter().position(|t| t.id == card_id) {
                return Ok((col_idx, card_idx));
            }
        }
        let column_id = self
            .task(card_id)
            .map(|t| t.column_id.clone())
            .unwrap_or_default();
        Err(BoardError::CardNotFound {
            card_id: card_id.to_string(),
            column_id,
        })
    }

    /// Copy layout fields of every card in a column into the task list.
    fn sync_tasks(&mut self, col_idx: usize) {
        for card in &self.columns[col_idx].cards {
            match self.tasks.iter_mut().find(|t| t.id == card.id) {
                Some(entry) => {
                    entry.column_id = card.column_id.clone();
                    entry.status = card.status.clone();
                    entry.position = card.position;
                    entry.completed_at = card.completed_at.clone();
                    entry.updated_at = card.updated_at.clone();
                }
                None => self.tasks.push(card.clone()),
            }
        }
    }

    fn sync_board_columns(&mut self) {
        if let Some(board) = self.board.as_mut() {
            board.columns = self.columns.iter().map(|c| c.column.clone()).collect();
        }
    }
}

fn reindex(cards: &mut [Task]) {
    for (i, card) in cards.iter_mut().enumerate() {
        card.position = i as i32;
    }
}

/// Point a card at a column, keeping `status` and `completed_at` in step.
fn place_in_column(card: &mut Task, column_id: &str) {
    let was_done = card.is_done();
    if card.column_id != column_id {
        card.updated_at = now();
    }
    card.column_id = column_id.to_string();
    card.status = column_id.to_string();
    if card.is_done() {
        if !was_done || card.completed_at.is_none() {
            card.completed_at = Some(now());
        }
    } else {
        card.completed_at = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::models::{DONE_COLUMN, Priority};

    pub(crate) fn make_board(columns: &[&str]) -> Board {
        Board {
            id: "board-1".into(),
            project_id: "project-1".into(),
            name: "Main".into(),
            columns: columns
                .iter()
                .enumerate()
                .map(|(i, id)| BoardColumn::new(id, id, i as i32))
                .collect(),
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    pub(crate) fn make_task(id: &str, column: &str, position: i32) -> Task {
        Task {
            id: id.into(),
            board_id: "board-1".into(),
            milestone_id: None,
            prd_id: None,
            agent_id: None,
            assignee: None,
            title: format!("Task {}", id),
            description: String::new(),
            status: column.into(),
            column_id: column.into(),
            priority: Priority::Medium,
            story_points: None,
            due_date: None,
            completed_at: None,
            position,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn ids(store: &BoardStore, column: &str) -> Vec<String> {
        store
            .cards(column)
            .unwrap()
            .iter()
            .map(|t| t.id.clone())
            .collect()
    }

    fn assert_dense(store: &BoardStore) {
        for col in store.columns() {
            for (i, card) in col.cards.iter().enumerate() {
                assert_eq!(card.position, i as i32, "column {}", col.column.id);
                assert_eq!(card.column_id, col.column.id);
                let shared = store.task(&card.id).expect("card missing from task list");
                assert_eq!(shared.position, card.position);
                assert_eq!(shared.column_id, card.column_id);
                assert_eq!(shared.status, card.column_id);
            }
        }
        let card_count: usize = store.columns().iter().map(|c| c.cards.len()).sum();
        assert_eq!(card_count, store.tasks().len());
    }

    fn todo_board() -> BoardStore {
        BoardStore::from_parts(
            make_board(&["backlog", "todo", "done"]),
            vec![
                make_task("t0", "todo", 0),
                make_task("t1", "todo", 1),
                make_task("t2", "todo", 2),
                make_task("t3", "todo", 3),
            ],
        )
    }

    #[test]
    fn test_load_board_sorts_columns_and_starts_empty() {
        let mut board = make_board(&["a", "b", "c"]);
        board.columns.reverse();
        let mut store = BoardStore::new();
        store.load_board(board);
        let order: Vec<&str> = store.columns().iter().map(|c| c.column.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(store.columns().iter().all(|c| c.cards.is_empty()));
    }

    #[test]
    fn test_load_tasks_partitions_and_sorts() {
        let store = BoardStore::from_parts(
            make_board(&["todo", "done"]),
            vec![
                make_task("b", "todo", 1),
                make_task("x", "done", 0),
                make_task("a", "todo", 0),
            ],
        );
        assert_eq!(ids(&store, "todo"), vec!["a", "b"]);
        assert_eq!(ids(&store, "done"), vec!["x"]);
    }

    #[test]
    fn test_move_to_other_column_renumbers_both() {
        let mut store = todo_board();
        let moved = store.move_card("t2", "todo", "done", 0).unwrap();

        assert_eq!(moved.column_id, "done");
        assert_eq!(moved.position, 0);
        assert_eq!(ids(&store, "todo"), vec!["t0", "t1", "t3"]);
        assert_eq!(ids(&store, "done"), vec!["t2"]);
        let positions: Vec<i32> = store.cards("todo").unwrap().iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);

        let shared = store.task("t2").unwrap();
        assert_eq!(shared.column_id, "done");
        assert_eq!(shared.status, "done");
        assert_eq!(shared.position, 0);
        assert_eq!(store.task("t3").unwrap().position, 2);
        assert_dense(&store);
    }

    #[test]
    fn test_same_column_move_does_not_duplicate() {
        let mut store = todo_board();
        store.move_card("t0", "todo", "todo", 2).unwrap();
        assert_eq!(ids(&store, "todo"), vec!["t1", "t2", "t0", "t3"]);

        store.move_card("t3", "todo", "todo", 0).unwrap();
        assert_eq!(ids(&store, "todo"), vec!["t3", "t1", "t2", "t0"]);
        assert_eq!(store.tasks().len(), 4);
        assert_dense(&store);
    }

    #[test]
    fn test_move_position_is_clamped() {
        let mut store = todo_board();
        let moved = store.move_card("t0", "todo", "todo", 99).unwrap();
        assert_eq!(moved.position, 3);
        assert_eq!(ids(&store, "todo"), vec!["t1", "t2", "t3", "t0"]);
    }

    #[test]
    fn test_move_unknown_card_or_column_is_rejected() {
        let mut store = todo_board();
        assert_eq!(
            store.move_card("t0", "todo", "qa", 0),
            Err(BoardError::ColumnNotFound("qa".into()))
        );
        assert!(matches!(
            store.move_card("t0", "backlog", "done", 0),
            Err(BoardError::CardNotFound { .. })
        ));
        // Nothing changed after the rejected moves.
        assert_eq!(ids(&store, "todo"), vec!["t0", "t1", "t2", "t3"]);
    }

    #[test]
    fn test_done_column_stamps_and_clears_completion() {
        let mut store = todo_board();
        let done = store.move_card("t1", "todo", DONE_COLUMN, 0).unwrap();
        assert!(done.completed_at.is_some());
        assert!(store.task("t1").unwrap().completed_at.is_some());

        let back = store.move_card("t1", DONE_COLUMN, "backlog", 0).unwrap();
        assert!(back.completed_at.is_none());
        assert!(store.task("t1").unwrap().completed_at.is_none());
    }

    #[test]
    fn test_add_and_remove_card() {
        let mut store = todo_board();
        let added = store.add_card(make_task("new", "todo", 42)).unwrap();
        assert_eq!(added.position, 4);
        assert_eq!(store.tasks().len(), 5);

        let removed = store.remove_card("t1").unwrap();
        assert_eq!(removed.id, "t1");
        assert_eq!(ids(&store, "todo"), vec!["t0", "t2", "t3", "new"]);
        assert!(store.task("t1").is_none());
        assert_dense(&store);
    }

    #[test]
    fn test_add_card_replaces_existing_id() {
        let mut store = todo_board();
        store.add_card(make_task("t0", "backlog", 0)).unwrap();
        assert_eq!(ids(&store, "todo"), vec!["t1", "t2", "t3"]);
        assert_eq!(ids(&store, "backlog"), vec!["t0"]);
        assert_dense(&store);
    }

    #[test]
    fn test_add_card_rehomes_orphaned_task() {
        let mut store = BoardStore::from_parts(
            make_board(&["todo", "done"]),
            vec![make_task("t0", "todo", 0), make_task("lost", "archived", 0)],
        );
        assert!(store.task("lost").is_some());

        let added = store.add_card(make_task("lost", "done", 7)).unwrap();
        assert_eq!(added.column_id, "done");
        assert_eq!(added.position, 0);
        assert_eq!(ids(&store, "done"), vec!["lost"]);
        assert_eq!(store.tasks().iter().filter(|t| t.id == "lost").count(), 1);
        assert_dense(&store);
    }

    #[test]
    fn test_update_card_keeps_layout() {
        let mut store = todo_board();
        let updated = store
            .update_card("t2", |t| {
                t.title = "Renamed".into();
                t.position = 99;
                t.column_id = "done".into();
            })
            .unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.position, 2);
        assert_eq!(updated.column_id, "todo");
        assert_eq!(store.task("t2").unwrap().title, "Renamed");
        assert_dense(&store);
    }

    #[test]
    fn test_remove_column_drops_exactly_its_tasks() {
        let mut store = BoardStore::from_parts(
            make_board(&["backlog", "todo", "done"]),
            vec![
                make_task("a", "backlog", 0),
                make_task("b", "todo", 0),
                make_task("c", "todo", 1),
                make_task("d", "done", 0),
            ],
        );
        let removed = store.remove_column("todo").unwrap();
        let mut removed_ids: Vec<String> = removed.into_iter().map(|t| t.id).collect();
        removed_ids.sort();
        assert_eq!(removed_ids, vec!["b", "c"]);

        let remaining: Vec<&str> = store.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(remaining, vec!["a", "d"]);
        let board = store.board().unwrap();
        assert_eq!(board.columns.len(), 2);
        assert_eq!(board.columns[1].id, "done");
        assert_eq!(board.columns[1].position, 1);
        assert_dense(&store);
    }

    #[test]
    fn test_add_and_rename_column_updates_board_config() {
        let mut store = todo_board();
        let col = store.add_column("review", "Review").unwrap();
        assert_eq!(col.position, 3);
        assert_eq!(store.board().unwrap().columns.len(), 4);
        assert_eq!(
            store.add_column("review", "Again"),
            Err(BoardError::DuplicateColumn("review".into()))
        );

        store.update_column("review", "QA").unwrap();
        assert_eq!(store.board().unwrap().columns[3].name, "QA");
    }

    #[test]
    fn test_add_column_requires_loaded_board() {
        let mut store = BoardStore::new();
        assert_eq!(store.add_column("x", "X"), Err(BoardError::BoardNotLoaded));
    }

    #[test]
    fn test_reorder_columns() {
        let mut store = todo_board();
        let order = vec!["done".to_string(), "backlog".to_string(), "todo".to_string()];
        store.reorder_columns(&order).unwrap();
        let board_order: Vec<(String, i32)> = store
            .board()
            .unwrap()
            .columns
            .iter()
            .map(|c| (c.id.clone(), c.position))
            .collect();
        assert_eq!(
            board_order,
            vec![("done".into(), 0), ("backlog".into(), 1), ("todo".into(), 2)]
        );
        assert_eq!(ids(&store, "todo").len(), 4);
    }

    #[test]
    fn test_reorder_columns_rejects_partial_order() {
        let mut store = todo_board();
        let bad = vec!["done".to_string(), "nope".to_string(), "todo".to_string()];
        assert_eq!(store.reorder_columns(&bad), Err(BoardError::InvalidColumnOrder));
        let short = vec!["done".to_string()];
        assert_eq!(store.reorder_columns(&short), Err(BoardError::InvalidColumnOrder));
        let order: Vec<&str> = store.columns().iter().map(|c| c.column.id.as_str()).collect();
        assert_eq!(order, vec!["backlog", "todo", "done"]);
    }

    #[test]
    fn test_positions_stay_dense_over_mixed_operations() {
        let columns = ["backlog", "todo", "in_progress", "done"];
        let mut store = BoardStore::from_parts(make_board(&columns), Vec::new());
        // Deterministic pseudo-random walk over moves, adds and removals.
        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: usize| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) as usize) % bound.max(1)
        };
        for step in 0..400 {
            match next(5) {
                0 | 1 => {
                    let col = columns[next(columns.len())];
                    store.add_card(make_task(&format!("c{}", step), col, 0)).unwrap();
                }
                2 | 3 if !store.tasks().is_empty() => {
                    let card = store.tasks()[next(store.tasks().len())].clone();
                    let to = columns[next(columns.len())];
                    let pos = next(8);
                    store.move_card(&card.id, &card.column_id, to, pos).unwrap();
                }
                _ if !store.tasks().is_empty() => {
                    let id = store.tasks()[next(store.tasks().len())].id.clone();
                    store.remove_card(&id).unwrap();
                }
                _ => {}
            }
            assert_dense(&store);
        }
    }

    #[test]
    fn test_filter_is_side_effect_free() {
        let mut store = todo_board();
        store
            .update_card("t1", |t| {
                t.priority = Priority::High;
                t.description = "Fix the LOGIN flow".into();
            })
            .unwrap();
        let filter = TaskFilter {
            search: Some("login".into()),
            ..Default::default()
        };
        let view = store.filter(&filter);
        let todo = view.iter().find(|c| c.column.id == "todo").unwrap();
        assert_eq!(todo.cards.len(), 1);
        assert_eq!(todo.cards[0].id, "t1");
        assert_eq!(ids(&store, "todo").len(), 4);
    }
}
