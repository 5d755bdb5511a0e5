use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::db::{BenDb, Filters, new_id, now, parse_field, require_text};
use super::models::{Prd, PrdQuery, PrdSection, PrdStatus, PrdVersion, nullable};
use crate::errors::BenError;
use crate::prd::check_transition;

const PRD_COLUMNS: &str =
    "id, project_id, title, content, sections, status, version, created_at, updated_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPrd {
    pub project_id: String,
    pub title: String,
    pub content: Option<String>,
    pub sections: Option<Vec<PrdSection>>,
}

/// Content edits. Status changes go through `set_prd_status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrdPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub content: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub sections: Option<Option<Vec<PrdSection>>>,
}

impl PrdPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.sections.is_none()
    }
}

struct PrdRow {
    id: String,
    project_id: String,
    title: String,
    content: Option<String>,
    sections: Option<String>,
    status: String,
    version: i32,
    created_at: String,
    updated_at: String,
}

impl PrdRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            sections: row.get(4)?,
            status: row.get(5)?,
            version: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_prd(self) -> Result<Prd> {
        Ok(Prd {
            status: parse_field(&self.status)?,
            sections: parse_sections(self.sections.as_deref())?,
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            content: self.content,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_sections(raw: Option<&str>) -> Result<Option<Vec<PrdSection>>> {
    raw.map(|s| serde_json::from_str(s).context("Failed to parse PRD sections"))
        .transpose()
}

fn sections_json(sections: Option<&Vec<PrdSection>>) -> Result<Option<String>> {
    sections
        .map(|s| serde_json::to_string(s).context("Failed to serialize PRD sections"))
        .transpose()
}

struct VersionRow {
    id: String,
    prd_id: String,
    version: i32,
    title: String,
    content: Option<String>,
    sections: Option<String>,
    created_at: String,
}

impl VersionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            prd_id: row.get(1)?,
            version: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            sections: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_version(self) -> Result<PrdVersion> {
        Ok(PrdVersion {
            sections: parse_sections(self.sections.as_deref())?,
            id: self.id,
            prd_id: self.prd_id,
            version: self.version,
            title: self.title,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

/// Store an immutable snapshot of the PRD's current content.
fn snapshot(conn: &Connection, prd: &Prd) -> Result<()> {
    conn.execute(
        "INSERT INTO prd_versions (id, prd_id, version, title, content, sections, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new_id(),
            prd.id,
            prd.version,
            prd.title,
            prd.content,
            sections_json(prd.sections.as_ref())?,
            prd.updated_at
        ],
    )
    .context("Failed to insert PRD version")?;
    Ok(())
}

impl BenDb {
    /// Create a PRD in `draft` at version 1 and snapshot it.
    pub fn create_prd(&self, input: &NewPrd) -> Result<Prd> {
        let title = require_text("title", &input.title)?;
        self.ensure_exists("projects", "project_id", &input.project_id)?;
        let id = new_id();
        let ts = now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO prds (id, project_id, title, content, sections, status, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'draft', 1, ?6, ?6)",
            params![
                id,
                input.project_id,
                title,
                input.content,
                sections_json(input.sections.as_ref())?,
                ts
            ],
        )
        .context("Failed to insert PRD")?;
        let prd = Prd {
            id: id.clone(),
            project_id: input.project_id.clone(),
            title,
            content: input.content.clone(),
            sections: input.sections.clone(),
            status: PrdStatus::Draft,
            version: 1,
            created_at: ts.clone(),
            updated_at: ts,
        };
        snapshot(&tx, &prd)?;
        tx.commit().context("Failed to commit PRD create")?;
        self.get_prd(&id)?.context("PRD not found after insert")
    }

    pub fn get_prd(&self, id: &str) -> Result<Option<Prd>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM prds WHERE id = ?1", PRD_COLUMNS),
                params![id],
                PrdRow::from_row,
            )
            .optional()
            .context("Failed to query PRD")?
            .map(PrdRow::into_prd)
            .transpose()
    }

    pub fn list_prds(&self, query: &PrdQuery) -> Result<Vec<Prd>> {
        let mut filters = Filters::default();
        filters
            .eq("project_id", query.project_id.clone())
            .eq("status", query.status.map(|s| s.as_str().to_string()))
            .search(&["title", "content", "sections"], query.search.as_deref());
        let (sql, params) = filters.build(
            &format!("SELECT {} FROM prds", PRD_COLUMNS),
            "updated_at DESC, id",
            query.page,
        );
        self.query_all(&sql, params, PrdRow::from_row)?
            .into_iter()
            .map(PrdRow::into_prd)
            .collect()
    }

    /// Apply content edits. Any change bumps `version` and stores a snapshot;
    /// a patch that changes nothing leaves the PRD untouched.
    pub fn update_prd(&self, id: &str, patch: &PrdPatch) -> Result<Prd> {
        let mut prd = self
            .get_prd(id)?
            .ok_or_else(|| BenError::not_found("PRD", id))?;
        let before = (prd.title.clone(), prd.content.clone(), prd.sections.clone());
        if let Some(title) = &patch.title {
            prd.title = require_text("title", title)?;
        }
        if let Some(content) = &patch.content {
            prd.content = content.clone();
        }
        if let Some(sections) = &patch.sections {
            prd.sections = sections.clone();
        }
        if before == (prd.title.clone(), prd.content.clone(), prd.sections.clone()) {
            return Ok(prd);
        }
        self.write_new_version(prd)
    }

    /// Move a PRD along the status lattice. Status changes do not create a
    /// new version.
    pub fn set_prd_status(&self, id: &str, status: PrdStatus) -> Result<Prd> {
        let prd = self
            .get_prd(id)?
            .ok_or_else(|| BenError::not_found("PRD", id))?;
        check_transition(prd.status, status)?;
        self.conn
            .execute(
                "UPDATE prds SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
            )
            .context("Failed to update PRD status")?;
        self.get_prd(id)?.context("PRD not found after status change")
    }

    pub fn list_prd_versions(&self, prd_id: &str) -> Result<Vec<PrdVersion>> {
        self.query_all(
            "SELECT id, prd_id, version, title, content, sections, created_at
             FROM prd_versions WHERE prd_id = ? ORDER BY version DESC",
            vec![prd_id.to_string().into()],
            VersionRow::from_row,
        )?
        .into_iter()
        .map(VersionRow::into_version)
        .collect()
    }

    pub fn get_prd_version(&self, prd_id: &str, version: i32) -> Result<Option<PrdVersion>> {
        self.conn
            .query_row(
                "SELECT id, prd_id, version, title, content, sections, created_at
                 FROM prd_versions WHERE prd_id = ?1 AND version = ?2",
                params![prd_id, version],
                VersionRow::from_row,
            )
            .optional()
            .context("Failed to query PRD version")?
            .map(VersionRow::into_version)
            .transpose()
    }

    /// Copy an old snapshot forward as a new version.
    pub fn restore_prd_version(&self, prd_id: &str, version: i32) -> Result<Prd> {
        let mut prd = self
            .get_prd(prd_id)?
            .ok_or_else(|| BenError::not_found("PRD", prd_id))?;
        let old = self
            .get_prd_version(prd_id, version)?
            .ok_or_else(|| BenError::not_found("PRD version", format!("{}@{}", prd_id, version)))?;
        prd.title = old.title;
        prd.content = old.content;
        prd.sections = old.sections;
        self.write_new_version(prd)
    }

    pub fn delete_prd(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM prds WHERE id = ?1", params![id])
            .context("Failed to delete PRD")?;
        Ok(count > 0)
    }

    fn write_new_version(&self, mut prd: Prd) -> Result<Prd> {
        prd.version += 1;
        prd.updated_at = now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE prds SET title = ?1, content = ?2, sections = ?3, version = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                prd.title,
                prd.content,
                sections_json(prd.sections.as_ref())?,
                prd.version,
                prd.updated_at,
                prd.id
            ],
        )
        .context("Failed to update PRD")?;
        snapshot(&tx, &prd)?;
        tx.commit().context("Failed to commit PRD update")?;
        self.get_prd(&prd.id)?.context("PRD not found after update")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures;

    fn new_prd(db: &BenDb) -> Prd {
        let (_, project) = fixtures::project_in_new_area(db);
        db.create_prd(&NewPrd {
            project_id: project.id,
            title: "Checkout".into(),
            content: Some("- Pay by card".into()),
            sections: None,
        })
        .unwrap()
    }

    #[test]
    fn test_create_prd_starts_at_version_one() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let prd = new_prd(&db);
        assert_eq!(prd.status, PrdStatus::Draft);
        assert_eq!(prd.version, 1);
        let versions = db.list_prd_versions(&prd.id)?;
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].content.as_deref(), Some("- Pay by card"));
        Ok(())
    }

    #[test]
    fn test_edit_bumps_version_and_snapshots() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let prd = new_prd(&db);
        let updated = db.update_prd(
            &prd.id,
            &PrdPatch {
                sections: Some(Some(vec![PrdSection {
                    title: "Scope".into(),
                    content: "- Refunds".into(),
                }])),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.version, 2);
        assert_eq!(updated.sections.as_ref().map(Vec::len), Some(1));
        assert_eq!(updated.content.as_deref(), Some("- Pay by card"));

        let versions = db.list_prd_versions(&prd.id)?;
        let numbers: Vec<i32> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![2, 1]);
        Ok(())
    }

    #[test]
    fn test_noop_edit_keeps_version() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let prd = new_prd(&db);
        let same = db.update_prd(
            &prd.id,
            &PrdPatch {
                title: Some("Checkout".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(same.version, 1);
        assert_eq!(db.list_prd_versions(&prd.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_restore_creates_new_version() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let prd = new_prd(&db);
        db.update_prd(
            &prd.id,
            &PrdPatch {
                content: Some(Some("- Rewritten".into())),
                ..Default::default()
            },
        )?;
        let restored = db.restore_prd_version(&prd.id, 1)?;
        assert_eq!(restored.version, 3);
        assert_eq!(restored.content.as_deref(), Some("- Pay by card"));

        let err = db.restore_prd_version(&prd.id, 42).unwrap_err();
        assert!(matches!(err.downcast_ref::<BenError>(), Some(BenError::NotFound { .. })));
        Ok(())
    }

    #[test]
    fn test_status_follows_lattice() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let prd = new_prd(&db);

        let err = db.set_prd_status(&prd.id, PrdStatus::Completed).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BenError>(),
            Some(BenError::InvalidTransition { .. })
        ));

        for status in [
            PrdStatus::Approved,
            PrdStatus::InProgress,
            PrdStatus::Completed,
            PrdStatus::InProgress,
        ] {
            let prd = db.set_prd_status(&prd.id, status)?;
            assert_eq!(prd.status, status);
            assert_eq!(prd.version, 1);
        }
        Ok(())
    }

    #[test]
    fn test_list_prds_filters() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let prd = new_prd(&db);
        db.set_prd_status(&prd.id, PrdStatus::Approved)?;
        let approved = db.list_prds(&PrdQuery {
            status: Some(PrdStatus::Approved),
            ..Default::default()
        })?;
        assert_eq!(approved.len(), 1);
        let by_content = db.list_prds(&PrdQuery {
            search: Some("card".into()),
            ..Default::default()
        })?;
        assert_eq!(by_content.len(), 1);
        let none = db.list_prds(&PrdQuery {
            status: Some(PrdStatus::Draft),
            ..Default::default()
        })?;
        assert!(none.is_empty());
        Ok(())
    }
}
