use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::boards::save_layout;
use super::db::{
    BenDb, Filters, check_date, new_id, next_position, now, parse_field, renumber, require_text,
};
use super::models::{Board, DONE_COLUMN, Priority, Task, TaskQuery, nullable};
use crate::errors::BenError;

const TASK_COLUMNS: &str = "id, board_id, milestone_id, prd_id, agent_id, assignee, title, description, status,
     column_id, priority, story_points, due_date, completed_at, position, created_at, updated_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub board_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Defaults to `backlog` when the board has it, else the first column.
    pub column_id: Option<String>,
    pub priority: Option<Priority>,
    pub milestone_id: Option<String>,
    pub prd_id: Option<String>,
    pub agent_id: Option<String>,
    pub assignee: Option<String>,
    pub story_points: Option<i32>,
    pub due_date: Option<String>,
}

/// Field edits for a task. Nullable fields use `Some(None)` to clear.
/// A changed `column_id` moves the task to the end of that column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub prd_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub story_points: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<String>>,
}

struct TaskRow {
    id: String,
    board_id: String,
    milestone_id: Option<String>,
    prd_id: Option<String>,
    agent_id: Option<String>,
    assignee: Option<String>,
    title: String,
    description: String,
    status: String,
    column_id: String,
    priority: String,
    story_points: Option<i32>,
    due_date: Option<String>,
    completed_at: Option<String>,
    position: i32,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            board_id: row.get(1)?,
            milestone_id: row.get(2)?,
            prd_id: row.get(3)?,
            agent_id: row.get(4)?,
            assignee: row.get(5)?,
            title: row.get(6)?,
            description: row.get(7)?,
            status: row.get(8)?,
            column_id: row.get(9)?,
            priority: row.get(10)?,
            story_points: row.get(11)?,
            due_date: row.get(12)?,
            completed_at: row.get(13)?,
            position: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            priority: parse_field(&self.priority)?,
            id: self.id,
            board_id: self.board_id,
            milestone_id: self.milestone_id,
            prd_id: self.prd_id,
            agent_id: self.agent_id,
            assignee: self.assignee,
            title: self.title,
            description: self.description,
            status: self.status,
            column_id: self.column_id,
            story_points: self.story_points,
            due_date: self.due_date,
            completed_at: self.completed_at,
            position: self.position,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn default_column(board: &Board) -> Result<String> {
    if board.columns.iter().any(|c| c.id == "backlog") {
        return Ok("backlog".to_string());
    }
    board
        .columns
        .first()
        .map(|c| c.id.clone())
        .ok_or_else(|| BenError::validation(format!("board {} has no columns", board.id)).into())
}

fn ensure_column(board: &Board, column_id: &str) -> Result<()> {
    if !board.columns.iter().any(|c| c.id == column_id) {
        return Err(BenError::validation(format!(
            "column '{}' does not exist on board {}",
            column_id, board.id
        ))
        .into());
    }
    Ok(())
}

fn check_story_points(points: Option<i32>) -> Result<()> {
    if let Some(p) = points
        && p < 0
    {
        return Err(BenError::validation("story_points must not be negative").into());
    }
    Ok(())
}

impl BenDb {
    /// Create a task at the end of its column.
    pub fn create_task(&self, input: &NewTask) -> Result<Task> {
        let title = require_text("title", &input.title)?;
        check_date("due_date", input.due_date.as_deref())?;
        check_story_points(input.story_points)?;
        let board = self
            .get_board(&input.board_id)?
            .ok_or_else(|| BenError::validation(format!("board_id '{}' does not exist", input.board_id)))?;
        let column_id = match &input.column_id {
            Some(col) => {
                ensure_column(&board, col)?;
                col.clone()
            }
            None => default_column(&board)?,
        };
        if let Some(milestone_id) = &input.milestone_id {
            self.ensure_exists("milestones", "milestone_id", milestone_id)?;
        }
        if let Some(prd_id) = &input.prd_id {
            self.ensure_exists("prds", "prd_id", prd_id)?;
        }

        let position = next_position(
            &self.conn,
            "tasks",
            &[("board_id", &board.id), ("column_id", &column_id)],
        )?;
        let id = new_id();
        let ts = now();
        let completed_at = (column_id == DONE_COLUMN).then(|| ts.clone());
        let priority = input.priority.unwrap_or(Priority::Medium);
        self.conn
            .execute(
                "INSERT INTO tasks (id, board_id, milestone_id, prd_id, agent_id, assignee, title, description,
                                    status, column_id, priority, story_points, due_date, completed_at, position,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
                params![
                    id,
                    board.id,
                    input.milestone_id,
                    input.prd_id,
                    input.agent_id,
                    input.assignee,
                    title,
                    input.description,
                    column_id,
                    priority.as_str(),
                    input.story_points,
                    input.due_date,
                    completed_at,
                    position,
                    ts
                ],
            )
            .context("Failed to insert task")?;
        self.get_task(&id)?.context("Task not found after insert")
    }

    /// Create several tasks in one transaction. Any invalid input leaves
    /// nothing behind.
    pub fn create_tasks(&self, inputs: &[NewTask]) -> Result<Vec<Task>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let tasks = inputs
            .iter()
            .map(|input| self.create_task(input))
            .collect::<Result<Vec<_>>>()?;
        tx.commit().context("Failed to commit task batch")?;
        Ok(tasks)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                TaskRow::from_row,
            )
            .optional()
            .context("Failed to query task")?
            .map(TaskRow::into_task)
            .transpose()
    }

    pub fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let mut filters = Filters::default();
        filters
            .eq("board_id", query.board_id.clone())
            .eq("column_id", query.column_id.clone())
            .eq("priority", query.priority.map(|p| p.as_str().to_string()))
            .eq("milestone_id", query.milestone_id.clone())
            .eq("prd_id", query.prd_id.clone())
            .eq("assignee", query.assignee.clone())
            .search(&["title", "description"], query.search.as_deref());
        let (sql, params) = filters.build(
            &format!("SELECT {} FROM tasks", TASK_COLUMNS),
            "board_id, column_id, position",
            query.page,
        );
        self.query_all(&sql, params, TaskRow::from_row)?
            .into_iter()
            .map(TaskRow::into_task)
            .collect()
    }

    pub fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        let existing = self
            .get_task(id)?
            .ok_or_else(|| BenError::not_found("Task", id))?;

        if let Some(Some(milestone_id)) = &patch.milestone_id {
            self.ensure_exists("milestones", "milestone_id", milestone_id)?;
        }
        if let Some(Some(prd_id)) = &patch.prd_id {
            self.ensure_exists("prds", "prd_id", prd_id)?;
        }
        if let Some(due_date) = &patch.due_date {
            check_date("due_date", due_date.as_deref())?;
        }
        if let Some(points) = patch.story_points {
            check_story_points(points)?;
        }
        let title = match &patch.title {
            Some(title) => Some(require_text("title", title)?),
            None => None,
        };

        // Column changes go through the board store so both columns stay dense.
        if let Some(column_id) = &patch.column_id
            && column_id != &existing.column_id
        {
            self.move_task(id, column_id, usize::MAX)?;
        }

        let mut store = self.board_store(&existing.board_id)?;
        let updated = store
            .update_card(id, |task| {
                if let Some(title) = title {
                    task.title = title;
                }
                if let Some(description) = &patch.description {
                    task.description = description.clone();
                }
                if let Some(priority) = patch.priority {
                    task.priority = priority;
                }
                if let Some(milestone_id) = &patch.milestone_id {
                    task.milestone_id = milestone_id.clone();
                }
                if let Some(prd_id) = &patch.prd_id {
                    task.prd_id = prd_id.clone();
                }
                if let Some(agent_id) = &patch.agent_id {
                    task.agent_id = agent_id.clone();
                }
                if let Some(assignee) = &patch.assignee {
                    task.assignee = assignee.clone();
                }
                if let Some(points) = patch.story_points {
                    task.story_points = points;
                }
                if let Some(due_date) = &patch.due_date {
                    task.due_date = due_date.clone();
                }
            })
            .map_err(BenError::from)?;

        self.conn
            .execute(
                "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, milestone_id = ?4, prd_id = ?5,
                 agent_id = ?6, assignee = ?7, story_points = ?8, due_date = ?9, updated_at = ?10
                 WHERE id = ?11",
                params![
                    updated.title,
                    updated.description,
                    updated.priority.as_str(),
                    updated.milestone_id,
                    updated.prd_id,
                    updated.agent_id,
                    updated.assignee,
                    updated.story_points,
                    updated.due_date,
                    now(),
                    id
                ],
            )
            .context("Failed to update task")?;
        self.get_task(id)?.context("Task not found after update")
    }

    /// Move a task to `position` in `to_column` (clamped to the column
    /// length) and persist the renumbered layout of both columns.
    pub fn move_task(&self, id: &str, to_column: &str, position: usize) -> Result<Task> {
        let task = self
            .get_task(id)?
            .ok_or_else(|| BenError::not_found("Task", id))?;
        let mut store = self.board_store(&task.board_id)?;
        store
            .move_card(id, &task.column_id, to_column, position)
            .map_err(BenError::from)?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        save_layout(&tx, &store, &[task.column_id.as_str(), to_column])?;
        tx.commit().context("Failed to commit task move")?;
        self.get_task(id)?.context("Task not found after move")
    }

    /// Delete a task and close the gap in its column.
    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let Some(task) = self.get_task(id)? else {
            return Ok(false);
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        renumber(
            &tx,
            "tasks",
            &[("board_id", &task.board_id), ("column_id", &task.column_id)],
        )?;
        tx.commit().context("Failed to commit task delete")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BoardError;
    use crate::store::fixtures;

    fn new_task(board_id: &str, title: &str, column: &str) -> NewTask {
        NewTask {
            board_id: board_id.into(),
            title: title.into(),
            column_id: Some(column.into()),
            ..Default::default()
        }
    }

    fn column_titles(db: &BenDb, board_id: &str, column: &str) -> Vec<String> {
        db.list_tasks(&TaskQuery {
            board_id: Some(board_id.into()),
            column_id: Some(column.into()),
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect()
    }

    fn column_positions(db: &BenDb, board_id: &str, column: &str) -> Vec<i32> {
        db.list_tasks(&TaskQuery {
            board_id: Some(board_id.into()),
            column_id: Some(column.into()),
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|t| t.position)
        .collect()
    }

    #[test]
    fn test_create_task_appends_to_column() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        let a = db.create_task(&new_task(&board.id, "a", "todo"))?;
        let b = db.create_task(&new_task(&board.id, "b", "todo"))?;
        let c = db.create_task(&NewTask {
            board_id: board.id.clone(),
            title: "c".into(),
            ..Default::default()
        })?;
        assert_eq!((a.position, b.position), (0, 1));
        assert_eq!(c.column_id, "backlog");
        assert_eq!(c.status, "backlog");
        assert_eq!(c.position, 0);
        assert_eq!(c.priority, Priority::Medium);
        Ok(())
    }

    #[test]
    fn test_create_tasks_is_all_or_nothing() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);

        let err = db
            .create_tasks(&[
                new_task(&board.id, "one", "todo"),
                new_task(&board.id, "two", "todo"),
                new_task(&board.id, "  ", "todo"),
            ])
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BenError>(), Some(BenError::Validation(_))));
        assert!(column_titles(&db, &board.id, "todo").is_empty());

        let created = db.create_tasks(&[
            new_task(&board.id, "one", "todo"),
            new_task(&board.id, "two", "todo"),
        ])?;
        assert_eq!(created.len(), 2);
        assert_eq!(column_positions(&db, &board.id, "todo"), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_create_task_validates_references() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        for input in [
            new_task(&board.id, "x", "qa"),
            new_task("missing-board", "x", "todo"),
            NewTask {
                milestone_id: Some("missing".into()),
                ..new_task(&board.id, "x", "todo")
            },
            NewTask {
                story_points: Some(-1),
                ..new_task(&board.id, "x", "todo")
            },
            new_task(&board.id, "  ", "todo"),
        ] {
            let err = db.create_task(&input).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<BenError>(), Some(BenError::Validation(_))),
                "expected validation error, got {err:#}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_create_in_done_stamps_completion() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        let task = db.create_task(&new_task(&board.id, "shipped", DONE_COLUMN))?;
        assert!(task.completed_at.is_some());
        Ok(())
    }

    #[test]
    fn test_move_task_between_columns_persists_dense_layout() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        let mut ids = Vec::new();
        for title in ["t0", "t1", "t2", "t3"] {
            ids.push(db.create_task(&new_task(&board.id, title, "todo"))?.id);
        }

        let moved = db.move_task(&ids[2], DONE_COLUMN, 0)?;
        assert_eq!(moved.column_id, DONE_COLUMN);
        assert_eq!(moved.status, DONE_COLUMN);
        assert_eq!(moved.position, 0);
        assert!(moved.completed_at.is_some());

        assert_eq!(column_titles(&db, &board.id, "todo"), vec!["t0", "t1", "t3"]);
        assert_eq!(column_positions(&db, &board.id, "todo"), vec![0, 1, 2]);
        assert_eq!(column_titles(&db, &board.id, DONE_COLUMN), vec!["t2"]);

        let back = db.move_task(&ids[2], "todo", 1)?;
        assert!(back.completed_at.is_none());
        assert_eq!(column_titles(&db, &board.id, "todo"), vec!["t0", "t2", "t1", "t3"]);
        Ok(())
    }

    #[test]
    fn test_move_task_within_column() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            ids.push(db.create_task(&new_task(&board.id, title, "todo"))?.id);
        }
        db.move_task(&ids[0], "todo", 10)?;
        assert_eq!(column_titles(&db, &board.id, "todo"), vec!["b", "c", "a"]);
        assert_eq!(column_positions(&db, &board.id, "todo"), vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_move_task_to_unknown_column() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        let task = db.create_task(&new_task(&board.id, "a", "todo"))?;
        let err = db.move_task(&task.id, "qa", 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BenError>(),
            Some(BenError::Board(BoardError::ColumnNotFound(_)))
        ));
        let err = db.move_task("missing", "todo", 0).unwrap_err();
        assert!(matches!(err.downcast_ref::<BenError>(), Some(BenError::NotFound { .. })));
        Ok(())
    }

    #[test]
    fn test_update_task_fields_and_column() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        let a = db.create_task(&new_task(&board.id, "a", "todo"))?;
        db.create_task(&new_task(&board.id, "b", "todo"))?;
        db.create_task(&new_task(&board.id, "c", "in_progress"))?;

        let patch: TaskPatch = serde_json::from_str(
            r#"{"title": "A!", "priority": "urgent", "assignee": "ben", "column_id": "in_progress"}"#,
        )?;
        let updated = db.update_task(&a.id, &patch)?;
        assert_eq!(updated.title, "A!");
        assert_eq!(updated.priority, Priority::Urgent);
        assert_eq!(updated.assignee.as_deref(), Some("ben"));
        assert_eq!(updated.column_id, "in_progress");
        assert_eq!(updated.position, 1);
        assert_eq!(column_positions(&db, &board.id, "todo"), vec![0]);

        let clear: TaskPatch = serde_json::from_str(r#"{"assignee": null}"#)?;
        let cleared = db.update_task(&a.id, &clear)?;
        assert_eq!(cleared.assignee, None);
        assert_eq!(cleared.priority, Priority::Urgent);
        Ok(())
    }

    #[test]
    fn test_delete_task_renumbers_column() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        let a = db.create_task(&new_task(&board.id, "a", "todo"))?;
        db.create_task(&new_task(&board.id, "b", "todo"))?;
        db.create_task(&new_task(&board.id, "c", "todo"))?;
        assert!(db.delete_task(&a.id)?);
        assert!(!db.delete_task(&a.id)?);
        assert_eq!(column_titles(&db, &board.id, "todo"), vec!["b", "c"]);
        assert_eq!(column_positions(&db, &board.id, "todo"), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_list_tasks_filters() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, board) = fixtures::board(&db);
        db.create_task(&NewTask {
            priority: Some(Priority::High),
            assignee: Some("ben".into()),
            description: "touches the billing API".into(),
            ..new_task(&board.id, "Invoices", "todo")
        })?;
        db.create_task(&new_task(&board.id, "Landing page", "todo"))?;

        let high = db.list_tasks(&TaskQuery {
            priority: Some(Priority::High),
            ..Default::default()
        })?;
        assert_eq!(high.len(), 1);
        let bens = db.list_tasks(&TaskQuery {
            assignee: Some("ben".into()),
            ..Default::default()
        })?;
        assert_eq!(bens.len(), 1);
        let billing = db.list_tasks(&TaskQuery {
            search: Some("BILLING".into()),
            ..Default::default()
        })?;
        assert_eq!(billing[0].title, "Invoices");
        Ok(())
    }
}
