use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};

use super::models::Page;
use crate::errors::BenError;

/// Async-safe handle to the Ben OS database.
///
/// Wraps `BenDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BenDb>>,
}

impl DbHandle {
    pub fn new(db: BenDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BenDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BenError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and
    /// tests, never from a request path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BenDb>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::Error::from(BenError::LockPoisoned))
    }
}

pub struct BenDb {
    pub(super) conn: Connection,
}

impl BenDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS areas (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    color TEXT NOT NULL DEFAULT '#6366f1',
                    icon TEXT NOT NULL DEFAULT 'folder',
                    area_type TEXT NOT NULL DEFAULT 'personal',
                    position INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    area_id TEXT NOT NULL REFERENCES areas(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'active',
                    target_date TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS milestones (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending',
                    target_date TEXT,
                    position INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS boards (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    columns TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS prds (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    content TEXT,
                    sections TEXT,
                    status TEXT NOT NULL DEFAULT 'draft',
                    version INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS prd_versions (
                    id TEXT PRIMARY KEY,
                    prd_id TEXT NOT NULL REFERENCES prds(id) ON DELETE CASCADE,
                    version INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    content TEXT,
                    sections TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE(prd_id, version)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    milestone_id TEXT REFERENCES milestones(id) ON DELETE SET NULL,
                    prd_id TEXT REFERENCES prds(id) ON DELETE SET NULL,
                    agent_id TEXT,
                    assignee TEXT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL,
                    column_id TEXT NOT NULL,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    story_points INTEGER,
                    due_date TEXT,
                    completed_at TEXT,
                    position INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS subtasks (
                    id TEXT PRIMARY KEY,
                    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    completed INTEGER NOT NULL DEFAULT 0,
                    completed_at TEXT,
                    position INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS activity_log (
                    id TEXT PRIMARY KEY,
                    entity_type TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    action TEXT NOT NULL,
                    actor_type TEXT NOT NULL,
                    actor_id TEXT NOT NULL,
                    changes TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS reports (
                    id TEXT PRIMARY KEY,
                    report_type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    period_start TEXT NOT NULL,
                    period_end TEXT NOT NULL,
                    content TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_projects_area ON projects(area_id);
                CREATE INDEX IF NOT EXISTS idx_milestones_project ON milestones(project_id, position);
                CREATE INDEX IF NOT EXISTS idx_boards_project ON boards(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_column ON tasks(board_id, column_id, position);
                CREATE INDEX IF NOT EXISTS idx_tasks_milestone ON tasks(milestone_id);
                CREATE INDEX IF NOT EXISTS idx_subtasks_task ON subtasks(task_id, position);
                CREATE INDEX IF NOT EXISTS idx_prds_project ON prds(project_id);
                CREATE INDEX IF NOT EXISTS idx_activity_entity ON activity_log(entity_type, entity_id);
                CREATE INDEX IF NOT EXISTS idx_reports_type ON reports(report_type, period_start);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Run `sql` with `params` and collect every row through `map`.
    pub(super) fn query_all<T, F>(&self, sql: &str, params: Vec<Value>, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare: {}", sql))?;
        let rows = stmt
            .query_map(params_from_iter(params), map)
            .context("Failed to run query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read row")?);
        }
        Ok(out)
    }
}

/// Current time as an RFC 3339 UTC timestamp with millisecond precision.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parse a stored enum column, surfacing bad data as an error.
pub(super) fn parse_field<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(|e: String| anyhow::anyhow!(e))
}

/// Reject blank required text fields.
pub(super) fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BenError::validation(format!("{} is required", field)).into());
    }
    Ok(trimmed.to_string())
}

/// Reject malformed `YYYY-MM-DD` dates.
pub(super) fn check_date(field: &str, value: Option<&str>) -> Result<()> {
    if let Some(v) = value
        && chrono::NaiveDate::parse_from_str(v, "%Y-%m-%d").is_err()
    {
        return Err(BenError::validation(format!("{} must be YYYY-MM-DD, got '{}'", field, v)).into());
    }
    Ok(())
}

/// `%term%` with LIKE wildcards in the term escaped (use with `ESCAPE '\'`).
pub(super) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Incremental `WHERE` clause builder for list queries.
#[derive(Default)]
pub(super) struct Filters {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filters {
    pub(super) fn eq<V: Into<Value>>(&mut self, column: &str, value: Option<V>) -> &mut Self {
        if let Some(v) = value {
            self.clauses.push(format!("{} = ?", column));
            self.params.push(v.into());
        }
        self
    }

    /// Case-insensitive substring match across any of `columns`.
    pub(super) fn search(&mut self, columns: &[&str], term: Option<&str>) -> &mut Self {
        let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
            return self;
        };
        let pattern = like_pattern(term);
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("{} LIKE ? ESCAPE '\\'", c))
            .collect();
        self.clauses.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            self.params.push(Value::Text(pattern.clone()));
        }
        self
    }

    /// Finish into `select ... WHERE ... ORDER BY ... LIMIT ? OFFSET ?`.
    pub(super) fn build(self, select: &str, order_by: &str, page: Page) -> (String, Vec<Value>) {
        let mut sql = select.to_string();
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {} LIMIT ? OFFSET ?", order_by));
        let mut params = self.params;
        params.push(Value::Integer(page.limit));
        params.push(Value::Integer(page.offset));
        (sql, params)
    }
}

/// Ids of `table` rows in `scope`, in position order.
fn scoped_ids(conn: &Connection, table: &str, scope: &[(&str, &str)]) -> Result<Vec<String>> {
    let mut sql = format!("SELECT id FROM {}", table);
    if !scope.is_empty() {
        let conds: Vec<String> = scope.iter().map(|(col, _)| format!("{} = ?", col)).collect();
        sql.push_str(" WHERE ");
        sql.push_str(&conds.join(" AND "));
    }
    sql.push_str(" ORDER BY position, created_at");
    let mut stmt = conn.prepare(&sql).context("Failed to prepare scoped id query")?;
    let rows = stmt
        .query_map(params_from_iter(scope.iter().map(|(_, v)| *v)), |row| {
            row.get::<_, String>(0)
        })
        .context("Failed to query scoped ids")?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row.context("Failed to read id")?);
    }
    Ok(ids)
}

fn write_positions(conn: &Connection, table: &str, ids: &[String]) -> Result<()> {
    let sql = format!("UPDATE {} SET position = ?1 WHERE id = ?2", table);
    let mut stmt = conn.prepare(&sql).context("Failed to prepare position update")?;
    for (i, id) in ids.iter().enumerate() {
        stmt.execute(rusqlite::params![i as i64, id])
            .context("Failed to write position")?;
    }
    Ok(())
}

/// Renumber the rows of `table` in `scope` densely from zero.
pub(super) fn renumber(conn: &Connection, table: &str, scope: &[(&str, &str)]) -> Result<()> {
    let ids = scoped_ids(conn, table, scope)?;
    write_positions(conn, table, &ids)
}

/// Apply a caller-supplied order. `ordered_ids` must be a permutation of the
/// ids currently in `scope`.
pub(super) fn apply_order(
    conn: &Connection,
    table: &str,
    scope: &[(&str, &str)],
    ordered_ids: &[String],
) -> Result<()> {
    let current: HashSet<String> = scoped_ids(conn, table, scope)?.into_iter().collect();
    let requested: HashSet<String> = ordered_ids.iter().cloned().collect();
    if requested.len() != ordered_ids.len() || current != requested {
        return Err(BenError::validation(
            "order must list every item in the collection exactly once",
        )
        .into());
    }
    write_positions(conn, table, ordered_ids)
}

/// Next append position in `scope`.
pub(super) fn next_position(conn: &Connection, table: &str, scope: &[(&str, &str)]) -> Result<i32> {
    let mut sql = format!("SELECT COALESCE(MAX(position), -1) FROM {}", table);
    if !scope.is_empty() {
        let conds: Vec<String> = scope.iter().map(|(col, _)| format!("{} = ?", col)).collect();
        sql.push_str(" WHERE ");
        sql.push_str(&conds.join(" AND "));
    }
    let max: i32 = conn
        .query_row(&sql, params_from_iter(scope.iter().map(|(_, v)| *v)), |row| {
            row.get(0)
        })
        .context("Failed to get max position")?;
    Ok(max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('areas', 'projects', 'milestones', 'boards', 'tasks', 'subtasks',
              'prds', 'prd_versions', 'activity_log', 'reports')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 10);
        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("benos.db");
        drop(BenDb::new(&path)?);
        let db = BenDb::new(&path)?;
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }

    #[test]
    fn test_require_text_trims_and_rejects_blank() {
        assert_eq!(require_text("name", "  Work ").unwrap(), "Work");
        let err = require_text("name", "   ").unwrap_err();
        assert!(matches!(err.downcast_ref::<BenError>(), Some(BenError::Validation(_))));
    }

    #[test]
    fn test_check_date() {
        assert!(check_date("due_date", Some("2025-03-01")).is_ok());
        assert!(check_date("due_date", None).is_ok());
        assert!(check_date("due_date", Some("03/01/2025")).is_err());
    }

    #[test]
    fn test_filters_build_sql_and_params() {
        let mut filters = Filters::default();
        filters
            .eq("area_id", Some("a1".to_string()))
            .eq::<String>("status", None)
            .search(&["title", "description"], Some("Launch"));
        let (sql, params) = filters.build("SELECT id FROM projects", "created_at", Page::default());
        assert_eq!(
            sql,
            "SELECT id FROM projects WHERE area_id = ? AND (title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\') ORDER BY created_at LIMIT ? OFFSET ?"
        );
        assert_eq!(params.len(), 5);
        assert_eq!(params[3], Value::Integer(50));
    }

    #[tokio::test]
    async fn test_db_handle_call_runs_closure() -> Result<()> {
        let handle = DbHandle::new(BenDb::new_in_memory()?);
        let count = handle
            .call(|db| {
                let n: i64 = db
                    .conn
                    .query_row("SELECT COUNT(*) FROM areas", [], |row| row.get(0))?;
                Ok(n)
            })
            .await?;
        assert_eq!(count, 0);
        Ok(())
    }
}
