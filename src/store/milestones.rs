use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::db::{
    BenDb, Filters, apply_order, check_date, new_id, next_position, now, parse_field, renumber,
    require_text,
};
use super::models::{
    DONE_COLUMN, Milestone, MilestoneQuery, MilestoneStatus, MilestoneWithProgress, Page,
    nullable, progress_percent,
};
use crate::errors::BenError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMilestone {
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: Option<MilestoneStatus>,
    pub target_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MilestonePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MilestoneStatus>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub target_date: Option<Option<String>>,
}

/// Milestone columns plus task totals for the progress ratio.
fn select_sql() -> String {
    format!(
        "SELECT id, project_id, title, description, status, target_date, position, created_at, updated_at,
                (SELECT COUNT(*) FROM tasks t WHERE t.milestone_id = milestones.id),
                (SELECT COUNT(*) FROM tasks t WHERE t.milestone_id = milestones.id AND t.column_id = '{}')
         FROM milestones",
        DONE_COLUMN
    )
}

struct MilestoneRow {
    id: String,
    project_id: String,
    title: String,
    description: String,
    status: String,
    target_date: Option<String>,
    position: i32,
    created_at: String,
    updated_at: String,
    total_tasks: u32,
    done_tasks: u32,
}

impl MilestoneRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            target_date: row.get(5)?,
            position: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            total_tasks: row.get(9)?,
            done_tasks: row.get(10)?,
        })
    }

    fn into_milestone(self) -> Result<MilestoneWithProgress> {
        Ok(MilestoneWithProgress {
            progress: progress_percent(self.done_tasks, self.total_tasks),
            total_tasks: self.total_tasks,
            done_tasks: self.done_tasks,
            milestone: Milestone {
                status: parse_field(&self.status)?,
                id: self.id,
                project_id: self.project_id,
                title: self.title,
                description: self.description,
                target_date: self.target_date,
                position: self.position,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
        })
    }
}

impl BenDb {
    /// Create a milestone appended to the end of its project.
    pub fn create_milestone(&self, input: &NewMilestone) -> Result<MilestoneWithProgress> {
        let title = require_text("title", &input.title)?;
        check_date("target_date", input.target_date.as_deref())?;
        self.ensure_exists("projects", "project_id", &input.project_id)?;
        let position = next_position(&self.conn, "milestones", &[("project_id", &input.project_id)])?;
        let id = new_id();
        let ts = now();
        let status = input.status.unwrap_or(MilestoneStatus::Pending);
        self.conn
            .execute(
                "INSERT INTO milestones (id, project_id, title, description, status, target_date, position, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    input.project_id,
                    title,
                    input.description,
                    status.as_str(),
                    input.target_date,
                    position,
                    ts
                ],
            )
            .context("Failed to insert milestone")?;
        self.get_milestone(&id)?.context("Milestone not found after insert")
    }

    pub fn get_milestone(&self, id: &str) -> Result<Option<MilestoneWithProgress>> {
        self.conn
            .query_row(
                &format!("{} WHERE id = ?1", select_sql()),
                params![id],
                MilestoneRow::from_row,
            )
            .optional()
            .context("Failed to query milestone")?
            .map(MilestoneRow::into_milestone)
            .transpose()
    }

    pub fn list_milestones(&self, query: &MilestoneQuery) -> Result<Vec<MilestoneWithProgress>> {
        let mut filters = Filters::default();
        filters
            .eq("project_id", query.project_id.clone())
            .eq("status", query.status.map(|s| s.as_str().to_string()))
            .search(&["title", "description"], query.search.as_deref());
        let (sql, params) = filters.build(&select_sql(), "project_id, position", query.page);
        self.query_all(&sql, params, MilestoneRow::from_row)?
            .into_iter()
            .map(MilestoneRow::into_milestone)
            .collect()
    }

    pub fn update_milestone(&self, id: &str, patch: &MilestonePatch) -> Result<MilestoneWithProgress> {
        let mut m = self
            .get_milestone(id)?
            .ok_or_else(|| BenError::not_found("Milestone", id))?
            .milestone;
        if let Some(title) = &patch.title {
            m.title = require_text("title", title)?;
        }
        if let Some(description) = &patch.description {
            m.description = description.clone();
        }
        if let Some(status) = patch.status {
            m.status = status;
        }
        if let Some(target_date) = &patch.target_date {
            check_date("target_date", target_date.as_deref())?;
            m.target_date = target_date.clone();
        }
        self.conn
            .execute(
                "UPDATE milestones SET title = ?1, description = ?2, status = ?3, target_date = ?4,
                 updated_at = ?5 WHERE id = ?6",
                params![m.title, m.description, m.status.as_str(), m.target_date, now(), id],
            )
            .context("Failed to update milestone")?;
        self.get_milestone(id)?.context("Milestone not found after update")
    }

    /// Delete a milestone. Linked tasks keep existing with `milestone_id`
    /// cleared; the project's milestones are renumbered.
    pub fn delete_milestone(&self, id: &str) -> Result<bool> {
        let Some(existing) = self.get_milestone(id)? else {
            return Ok(false);
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM milestones WHERE id = ?1", params![id])
            .context("Failed to delete milestone")?;
        renumber(
            &tx,
            "milestones",
            &[("project_id", &existing.milestone.project_id)],
        )?;
        tx.commit().context("Failed to commit milestone delete")?;
        Ok(true)
    }

    /// Reorder a project's milestones.
    pub fn reorder_milestones(
        &self,
        project_id: &str,
        ordered_ids: &[String],
    ) -> Result<Vec<MilestoneWithProgress>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        apply_order(&tx, "milestones", &[("project_id", project_id)], ordered_ids)?;
        tx.commit().context("Failed to commit milestone reorder")?;
        self.list_milestones(&MilestoneQuery {
            page: Page::unbounded(),
            project_id: Some(project_id.to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures;
    use crate::store::{NewTask, TaskPatch};

    #[test]
    fn test_milestones_append_per_project() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, project) = fixtures::project_in_new_area(&db);
        let (_, other) = fixtures::project_in_new_area(&db);
        let m1 = fixtures::milestone(&db, &project.id, "Alpha");
        let m2 = fixtures::milestone(&db, &project.id, "Beta");
        let o1 = fixtures::milestone(&db, &other.id, "Other");
        assert_eq!(m1.milestone.position, 0);
        assert_eq!(m2.milestone.position, 1);
        assert_eq!(o1.milestone.position, 0);
        assert_eq!(m1.milestone.status, MilestoneStatus::Pending);
        Ok(())
    }

    #[test]
    fn test_progress_counts_done_tasks() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (project, board) = fixtures::board(&db);
        let m = fixtures::milestone(&db, &project.id, "Alpha");
        assert_eq!(m.progress, 0);
        assert_eq!(m.total_tasks, 0);

        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            let task = db.create_task(&NewTask {
                board_id: board.id.clone(),
                title: title.into(),
                milestone_id: Some(m.milestone.id.clone()),
                ..Default::default()
            })?;
            ids.push(task.id);
        }
        db.move_task(&ids[0], DONE_COLUMN, 0)?;

        let m = db.get_milestone(&m.milestone.id)?.unwrap();
        assert_eq!(m.total_tasks, 3);
        assert_eq!(m.done_tasks, 1);
        assert_eq!(m.progress, 33);

        db.move_task(&ids[1], DONE_COLUMN, 0)?;
        let m = db.get_milestone(&m.milestone.id)?.unwrap();
        assert_eq!(m.progress, 67);
        Ok(())
    }

    #[test]
    fn test_delete_milestone_unlinks_tasks_and_renumbers() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (project, board) = fixtures::board(&db);
        let m1 = fixtures::milestone(&db, &project.id, "Alpha");
        let m2 = fixtures::milestone(&db, &project.id, "Beta");
        let task = db.create_task(&NewTask {
            board_id: board.id.clone(),
            title: "Linked".into(),
            milestone_id: Some(m1.milestone.id.clone()),
            ..Default::default()
        })?;

        assert!(db.delete_milestone(&m1.milestone.id)?);
        assert!(!db.delete_milestone(&m1.milestone.id)?);
        let task = db.get_task(&task.id)?.unwrap();
        assert_eq!(task.milestone_id, None);
        let m2 = db.get_milestone(&m2.milestone.id)?.unwrap();
        assert_eq!(m2.milestone.position, 0);

        // Linking to a deleted milestone is rejected.
        let err = db
            .update_task(
                &task.id,
                &TaskPatch {
                    milestone_id: Some(Some(m1.milestone.id.clone())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BenError>(), Some(BenError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_reorder_milestones() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, project) = fixtures::project_in_new_area(&db);
        let a = fixtures::milestone(&db, &project.id, "A");
        let b = fixtures::milestone(&db, &project.id, "B");
        let reordered = db.reorder_milestones(
            &project.id,
            &[b.milestone.id.clone(), a.milestone.id.clone()],
        )?;
        let titles: Vec<&str> = reordered.iter().map(|m| m.milestone.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
        Ok(())
    }

    #[test]
    fn test_update_milestone_status() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (_, project) = fixtures::project_in_new_area(&db);
        let m = fixtures::milestone(&db, &project.id, "A");
        let updated = db.update_milestone(
            &m.milestone.id,
            &MilestonePatch {
                status: Some(MilestoneStatus::Completed),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.milestone.status, MilestoneStatus::Completed);

        let filtered = db.list_milestones(&MilestoneQuery {
            status: Some(MilestoneStatus::Completed),
            ..Default::default()
        })?;
        assert_eq!(filtered.len(), 1);
        Ok(())
    }
}
