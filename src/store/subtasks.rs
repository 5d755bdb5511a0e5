use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::db::{
    BenDb, Filters, apply_order, new_id, next_position, now, renumber, require_text,
};
use super::models::{Page, Subtask, SubtaskQuery};
use crate::errors::BenError;

const SUBTASK_COLUMNS: &str = "id, task_id, title, completed, completed_at, position, created_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSubtask {
    pub task_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

fn subtask_from_row(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get(0)?,
        task_id: row.get(1)?,
        title: row.get(2)?,
        completed: row.get(3)?,
        completed_at: row.get(4)?,
        position: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl BenDb {
    pub fn create_subtask(&self, input: &NewSubtask) -> Result<Subtask> {
        let title = require_text("title", &input.title)?;
        self.ensure_exists("tasks", "task_id", &input.task_id)?;
        let position = next_position(&self.conn, "subtasks", &[("task_id", &input.task_id)])?;
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO subtasks (id, task_id, title, completed, position, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![id, input.task_id, title, position, now()],
            )
            .context("Failed to insert subtask")?;
        self.get_subtask(&id)?.context("Subtask not found after insert")
    }

    pub fn get_subtask(&self, id: &str) -> Result<Option<Subtask>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM subtasks WHERE id = ?1", SUBTASK_COLUMNS),
                params![id],
                subtask_from_row,
            )
            .optional()
            .context("Failed to query subtask")
    }

    pub fn list_subtasks(&self, task_id: &str, query: &SubtaskQuery) -> Result<Vec<Subtask>> {
        let mut filters = Filters::default();
        filters
            .eq("task_id", Some(task_id.to_string()))
            .search(&["title"], query.search.as_deref());
        let (sql, params) = filters.build(
            &format!("SELECT {} FROM subtasks", SUBTASK_COLUMNS),
            "position",
            query.page,
        );
        self.query_all(&sql, params, subtask_from_row)
    }

    /// Rename or toggle a subtask. Completing stamps `completed_at`,
    /// un-completing clears it.
    pub fn update_subtask(&self, id: &str, patch: &SubtaskPatch) -> Result<Subtask> {
        let mut subtask = self
            .get_subtask(id)?
            .ok_or_else(|| BenError::not_found("Subtask", id))?;
        if let Some(title) = &patch.title {
            subtask.title = require_text("title", title)?;
        }
        if let Some(completed) = patch.completed
            && completed != subtask.completed
        {
            subtask.completed = completed;
            subtask.completed_at = completed.then(now);
        }
        self.conn
            .execute(
                "UPDATE subtasks SET title = ?1, completed = ?2, completed_at = ?3 WHERE id = ?4",
                params![subtask.title, subtask.completed, subtask.completed_at, id],
            )
            .context("Failed to update subtask")?;
        self.get_subtask(id)?.context("Subtask not found after update")
    }

    pub fn delete_subtask(&self, id: &str) -> Result<bool> {
        let Some(subtask) = self.get_subtask(id)? else {
            return Ok(false);
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM subtasks WHERE id = ?1", params![id])
            .context("Failed to delete subtask")?;
        renumber(&tx, "subtasks", &[("task_id", &subtask.task_id)])?;
        tx.commit().context("Failed to commit subtask delete")?;
        Ok(true)
    }

    pub fn reorder_subtasks(&self, task_id: &str, ordered_ids: &[String]) -> Result<Vec<Subtask>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        apply_order(&tx, "subtasks", &[("task_id", task_id)], ordered_ids)?;
        tx.commit().context("Failed to commit subtask reorder")?;
        self.list_subtasks(
            task_id,
            &SubtaskQuery {
                page: Page::unbounded(),
                search: None,
            },
        )
    }
}
