use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::db::{BenDb, Filters, check_date, new_id, now, parse_field, require_text};
use super::models::{Project, ProjectQuery, ProjectStatus, nullable};
use crate::errors::BenError;

const PROJECT_COLUMNS: &str =
    "id, area_id, title, description, status, target_date, created_at, updated_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProject {
    pub area_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: Option<ProjectStatus>,
    pub target_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub target_date: Option<Option<String>>,
}

struct ProjectRow {
    id: String,
    area_id: String,
    title: String,
    description: String,
    status: String,
    target_date: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            area_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            target_date: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_project(self) -> Result<Project> {
        Ok(Project {
            status: parse_field(&self.status)?,
            id: self.id,
            area_id: self.area_id,
            title: self.title,
            description: self.description,
            target_date: self.target_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl BenDb {
    pub fn create_project(&self, input: &NewProject) -> Result<Project> {
        let title = require_text("title", &input.title)?;
        check_date("target_date", input.target_date.as_deref())?;
        self.ensure_exists("areas", "area_id", &input.area_id)?;
        let id = new_id();
        let ts = now();
        let status = input.status.unwrap_or(ProjectStatus::Active);
        self.conn
            .execute(
                "INSERT INTO projects (id, area_id, title, description, status, target_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id,
                    input.area_id,
                    title,
                    input.description,
                    status.as_str(),
                    input.target_date,
                    ts
                ],
            )
            .context("Failed to insert project")?;
        self.get_project(&id)?.context("Project not found after insert")
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![id],
                ProjectRow::from_row,
            )
            .optional()
            .context("Failed to query project")?
            .map(ProjectRow::into_project)
            .transpose()
    }

    pub fn list_projects(&self, query: &ProjectQuery) -> Result<Vec<Project>> {
        let mut filters = Filters::default();
        filters
            .eq("area_id", query.area_id.clone())
            .eq("status", query.status.map(|s| s.as_str().to_string()))
            .search(&["title", "description"], query.search.as_deref());
        let (sql, params) = filters.build(
            &format!("SELECT {} FROM projects", PROJECT_COLUMNS),
            "created_at, id",
            query.page,
        );
        self.query_all(&sql, params, ProjectRow::from_row)?
            .into_iter()
            .map(ProjectRow::into_project)
            .collect()
    }

    pub fn update_project(&self, id: &str, patch: &ProjectPatch) -> Result<Project> {
        let mut project = self
            .get_project(id)?
            .ok_or_else(|| BenError::not_found("Project", id))?;
        if let Some(area_id) = &patch.area_id {
            self.ensure_exists("areas", "area_id", area_id)?;
            project.area_id = area_id.clone();
        }
        if let Some(title) = &patch.title {
            project.title = require_text("title", title)?;
        }
        if let Some(description) = &patch.description {
            project.description = description.clone();
        }
        if let Some(status) = patch.status {
            project.status = status;
        }
        if let Some(target_date) = &patch.target_date {
            check_date("target_date", target_date.as_deref())?;
            project.target_date = target_date.clone();
        }
        self.conn
            .execute(
                "UPDATE projects SET area_id = ?1, title = ?2, description = ?3, status = ?4,
                 target_date = ?5, updated_at = ?6 WHERE id = ?7",
                params![
                    project.area_id,
                    project.title,
                    project.description,
                    project.status.as_str(),
                    project.target_date,
                    now(),
                    id
                ],
            )
            .context("Failed to update project")?;
        self.get_project(id)?.context("Project not found after update")
    }

    /// Delete a project; milestones, boards, tasks and PRDs cascade.
    pub fn delete_project(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    /// Validation error when a referenced parent row does not exist.
    pub(super) fn ensure_exists(&self, table: &str, field: &str, id: &str) -> Result<()> {
        let exists: bool = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) > 0 FROM {} WHERE id = ?1", table),
                params![id],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to look up {}", field))?;
        if !exists {
            return Err(BenError::validation(format!("{} '{}' does not exist", field, id)).into());
        }
        Ok(())
    }
}
