use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::db::{BenDb, Filters, apply_order, new_id, next_position, now, renumber, require_text};
use super::models::{Area, AreaQuery, Page};
use crate::errors::BenError;

const AREA_COLUMNS: &str =
    "id, name, color, icon, area_type, position, created_at, updated_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewArea {
    pub name: String,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub area_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AreaPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_type: Option<String>,
}

fn area_from_row(row: &Row<'_>) -> rusqlite::Result<Area> {
    Ok(Area {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        icon: row.get(3)?,
        area_type: row.get(4)?,
        position: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl BenDb {
    /// Create an area appended after every existing area.
    pub fn create_area(&self, input: &NewArea) -> Result<Area> {
        let name = require_text("name", &input.name)?;
        let position = next_position(&self.conn, "areas", &[])?;
        let id = new_id();
        let ts = now();
        self.conn
            .execute(
                "INSERT INTO areas (id, name, color, icon, area_type, position, created_at, updated_at)
                 VALUES (?1, ?2, COALESCE(?3, '#6366f1'), COALESCE(?4, 'folder'), COALESCE(?5, 'personal'), ?6, ?7, ?7)",
                params![id, name, input.color, input.icon, input.area_type, position, ts],
            )
            .context("Failed to insert area")?;
        self.get_area(&id)?.context("Area not found after insert")
    }

    pub fn get_area(&self, id: &str) -> Result<Option<Area>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM areas WHERE id = ?1", AREA_COLUMNS),
                params![id],
                area_from_row,
            )
            .optional()
            .context("Failed to query area")
    }

    pub fn list_areas(&self, query: &AreaQuery) -> Result<Vec<Area>> {
        let mut filters = Filters::default();
        filters.search(&["name", "area_type"], query.search.as_deref());
        let (sql, params) = filters.build(
            &format!("SELECT {} FROM areas", AREA_COLUMNS),
            "position",
            query.page,
        );
        self.query_all(&sql, params, area_from_row)
    }

    pub fn update_area(&self, id: &str, patch: &AreaPatch) -> Result<Area> {
        let mut area = self
            .get_area(id)?
            .ok_or_else(|| BenError::not_found("Area", id))?;
        if let Some(name) = &patch.name {
            area.name = require_text("name", name)?;
        }
        if let Some(color) = &patch.color {
            area.color = color.clone();
        }
        if let Some(icon) = &patch.icon {
            area.icon = icon.clone();
        }
        if let Some(area_type) = &patch.area_type {
            area.area_type = area_type.clone();
        }
        self.conn
            .execute(
                "UPDATE areas SET name = ?1, color = ?2, icon = ?3, area_type = ?4, updated_at = ?5 WHERE id = ?6",
                params![area.name, area.color, area.icon, area.area_type, now(), id],
            )
            .context("Failed to update area")?;
        self.get_area(id)?.context("Area not found after update")
    }

    /// Delete an area (cascading to its projects) and close the gap it left.
    pub fn delete_area(&self, id: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let count = tx
            .execute("DELETE FROM areas WHERE id = ?1", params![id])
            .context("Failed to delete area")?;
        if count > 0 {
            renumber(&tx, "areas", &[])?;
        }
        tx.commit().context("Failed to commit area delete")?;
        Ok(count > 0)
    }

    /// Reorder all areas. `ordered_ids` must list every area exactly once.
    pub fn reorder_areas(&self, ordered_ids: &[String]) -> Result<Vec<Area>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        apply_order(&tx, "areas", &[], ordered_ids)?;
        tx.commit().context("Failed to commit area reorder")?;
        self.list_areas(&AreaQuery {
            page: Page::unbounded(),
            search: None,
        })
    }
}
