use std::collections::HashSet;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::db::{BenDb, Filters, new_id, now, require_text};
use super::models::{Board, BoardColumn, BoardQuery, Page, TaskQuery, default_columns};
use crate::board::{BoardStore, ColumnCards, TaskFilter};
use crate::errors::BenError;

const BOARD_COLUMNS: &str = "id, project_id, name, columns, created_at, updated_at";

/// A column supplied when creating a board. Positions follow list order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBoard {
    pub project_id: String,
    pub name: String,
    /// Defaults to backlog / todo / in_progress / done.
    pub columns: Option<Vec<ColumnSpec>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A board with its columns filled with (optionally filtered) cards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub board: Board,
    pub columns: Vec<ColumnCards>,
}

struct BoardRow {
    id: String,
    project_id: String,
    name: String,
    columns: String,
    created_at: String,
    updated_at: String,
}

impl BoardRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            columns: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_board(self) -> Result<Board> {
        let mut columns: Vec<BoardColumn> =
            serde_json::from_str(&self.columns).context("Failed to parse board columns")?;
        columns.sort_by_key(|c| c.position);
        Ok(Board {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            columns,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Column id derived from a display name: `"In Review"` becomes `in_review`.
pub fn column_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() { "column".to_string() } else { slug }
}

fn unique_column_id(existing: &[BoardColumn], wanted: &str) -> String {
    if !existing.iter().any(|c| c.id == wanted) {
        return wanted.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", wanted, n))
        .find(|candidate| !existing.iter().any(|c| &c.id == candidate))
        .unwrap_or_else(|| format!("{}_{}", wanted, new_id()))
}

fn columns_from_specs(specs: &[ColumnSpec]) -> Result<Vec<BoardColumn>> {
    if specs.is_empty() {
        return Err(BenError::validation("a board needs at least one column").into());
    }
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let name = require_text("column name", &spec.name)?;
        let id = match spec.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => unique_column_id(&columns, &column_slug(&name)),
        };
        if !seen.insert(id.clone()) {
            return Err(BenError::validation(format!("duplicate column id '{}'", id)).into());
        }
        columns.push(BoardColumn::new(&id, &name, i as i32));
    }
    Ok(columns)
}

/// Write the card layout of the given columns back to the tasks table.
pub(super) fn save_layout(conn: &Connection, store: &BoardStore, column_ids: &[&str]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "UPDATE tasks SET column_id = ?1, status = ?2, position = ?3, completed_at = ?4, updated_at = ?5
             WHERE id = ?6",
        )
        .context("Failed to prepare layout update")?;
    for column_id in column_ids {
        for card in store.cards(column_id).unwrap_or_default() {
            stmt.execute(params![
                card.column_id,
                card.status,
                card.position,
                card.completed_at,
                card.updated_at,
                card.id
            ])
            .context("Failed to write task layout")?;
        }
    }
    Ok(())
}

fn save_columns(conn: &Connection, board_id: &str, columns: &[BoardColumn]) -> Result<()> {
    let json = serde_json::to_string(columns).context("Failed to serialize columns")?;
    conn.execute(
        "UPDATE boards SET columns = ?1, updated_at = ?2 WHERE id = ?3",
        params![json, now(), board_id],
    )
    .context("Failed to save board columns")?;
    Ok(())
}

impl BenDb {
    pub fn create_board(&self, input: &NewBoard) -> Result<Board> {
        let name = require_text("name", &input.name)?;
        self.ensure_exists("projects", "project_id", &input.project_id)?;
        let columns = match &input.columns {
            Some(specs) => columns_from_specs(specs)?,
            None => default_columns(),
        };
        let id = new_id();
        let ts = now();
        self.conn
            .execute(
                "INSERT INTO boards (id, project_id, name, columns, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id,
                    input.project_id,
                    name,
                    serde_json::to_string(&columns).context("Failed to serialize columns")?,
                    ts
                ],
            )
            .context("Failed to insert board")?;
        self.get_board(&id)?.context("Board not found after insert")
    }

    pub fn get_board(&self, id: &str) -> Result<Option<Board>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM boards WHERE id = ?1", BOARD_COLUMNS),
                params![id],
                BoardRow::from_row,
            )
            .optional()
            .context("Failed to query board")?
            .map(BoardRow::into_board)
            .transpose()
    }

    pub fn list_boards(&self, query: &BoardQuery) -> Result<Vec<Board>> {
        let mut filters = Filters::default();
        filters
            .eq("project_id", query.project_id.clone())
            .search(&["name"], query.search.as_deref());
        let (sql, params) = filters.build(
            &format!("SELECT {} FROM boards", BOARD_COLUMNS),
            "created_at, id",
            query.page,
        );
        self.query_all(&sql, params, BoardRow::from_row)?
            .into_iter()
            .map(BoardRow::into_board)
            .collect()
    }

    pub fn update_board(&self, id: &str, patch: &BoardPatch) -> Result<Board> {
        let board = self
            .get_board(id)?
            .ok_or_else(|| BenError::not_found("Board", id))?;
        let name = match &patch.name {
            Some(name) => require_text("name", name)?,
            None => board.name,
        };
        self.conn
            .execute(
                "UPDATE boards SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now(), id],
            )
            .context("Failed to update board")?;
        self.get_board(id)?.context("Board not found after update")
    }

    /// Delete a board and, through the cascade, all of its tasks.
    pub fn delete_board(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM boards WHERE id = ?1", params![id])
            .context("Failed to delete board")?;
        Ok(count > 0)
    }

    /// Load a board and all of its tasks into a `BoardStore`.
    pub fn board_store(&self, board_id: &str) -> Result<BoardStore> {
        let board = self
            .get_board(board_id)?
            .ok_or_else(|| BenError::not_found("Board", board_id))?;
        let tasks = self.list_tasks(&TaskQuery {
            page: Page::unbounded(),
            board_id: Some(board_id.to_string()),
            ..Default::default()
        })?;
        Ok(BoardStore::from_parts(board, tasks))
    }

    /// Board with its cards bucketed by column, optionally filtered.
    pub fn board_view(&self, board_id: &str, filter: &TaskFilter) -> Result<BoardView> {
        let store = self.board_store(board_id)?;
        let columns = store.filter(filter);
        let board = store
            .board()
            .cloned()
            .context("Board missing from loaded store")?;
        Ok(BoardView { board, columns })
    }

    /// Append a column. The id defaults to a slug of the name.
    pub fn add_column(&self, board_id: &str, id: Option<&str>, name: &str) -> Result<Board> {
        let name = require_text("column name", name)?;
        let mut store = self.board_store(board_id)?;
        let board = store.board().context("Board missing from loaded store")?;
        let id = match id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => unique_column_id(&board.columns, &column_slug(&name)),
        };
        store.add_column(&id, &name).map_err(BenError::from)?;
        self.persist_columns(board_id, &store)
    }

    pub fn rename_column(&self, board_id: &str, column_id: &str, name: &str) -> Result<Board> {
        let name = require_text("column name", name)?;
        let mut store = self.board_store(board_id)?;
        store.update_column(column_id, &name).map_err(BenError::from)?;
        self.persist_columns(board_id, &store)
    }

    /// Remove a column and every task that references it. Returns the
    /// updated board and the ids of the deleted tasks.
    pub fn delete_column(&self, board_id: &str, column_id: &str) -> Result<(Board, Vec<String>)> {
        let mut store = self.board_store(board_id)?;
        let removed = store.remove_column(column_id).map_err(BenError::from)?;
        let columns = store
            .board()
            .map(|b| b.columns.clone())
            .context("Board missing from loaded store")?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "DELETE FROM tasks WHERE board_id = ?1 AND column_id = ?2",
            params![board_id, column_id],
        )
        .context("Failed to delete column tasks")?;
        save_columns(&tx, board_id, &columns)?;
        tx.commit().context("Failed to commit column delete")?;

        let board = self.get_board(board_id)?.context("Board not found after update")?;
        Ok((board, removed.into_iter().map(|t| t.id).collect()))
    }

    pub fn reorder_columns(&self, board_id: &str, ordered_ids: &[String]) -> Result<Board> {
        let mut store = self.board_store(board_id)?;
        store.reorder_columns(ordered_ids).map_err(BenError::from)?;
        self.persist_columns(board_id, &store)
    }

    fn persist_columns(&self, board_id: &str, store: &BoardStore) -> Result<Board> {
        let columns = store
            .board()
            .map(|b| b.columns.clone())
            .context("Board missing from loaded store")?;
        save_columns(&self.conn, board_id, &columns)?;
        self.get_board(board_id)?.context("Board not found after update")
    }
}
