use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::db::{BenDb, Filters, check_date, new_id, now, parse_field, require_text};
use super::models::{Report, ReportQuery, ReportType};
use crate::errors::BenError;

const REPORT_COLUMNS: &str =
    "id, report_type, title, period_start, period_end, content, created_at";

/// A report produced elsewhere and handed to the store as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub report_type: ReportType,
    pub title: String,
    pub period_start: String,
    pub period_end: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

struct ReportRow {
    id: String,
    report_type: String,
    title: String,
    period_start: String,
    period_end: String,
    content: String,
    created_at: String,
}

impl ReportRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            report_type: row.get(1)?,
            title: row.get(2)?,
            period_start: row.get(3)?,
            period_end: row.get(4)?,
            content: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_report(self) -> Result<Report> {
        Ok(Report {
            report_type: parse_field(&self.report_type)?,
            content: serde_json::from_str(&self.content).context("Failed to parse report content")?,
            id: self.id,
            title: self.title,
            period_start: self.period_start,
            period_end: self.period_end,
            created_at: self.created_at,
        })
    }
}

impl BenDb {
    pub fn create_report(&self, input: &NewReport) -> Result<Report> {
        let title = require_text("title", &input.title)?;
        check_date("period_start", Some(&input.period_start))?;
        check_date("period_end", Some(&input.period_end))?;
        if input.period_end < input.period_start {
            return Err(BenError::validation("period_end must not be before period_start").into());
        }
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO reports (id, report_type, title, period_start, period_end, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    input.report_type.as_str(),
                    title,
                    input.period_start,
                    input.period_end,
                    serde_json::to_string(&input.content).context("Failed to serialize report")?,
                    now()
                ],
            )
            .context("Failed to insert report")?;
        self.get_report(&id)?.context("Report not found after insert")
    }

    pub fn get_report(&self, id: &str) -> Result<Option<Report>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLUMNS),
                params![id],
                ReportRow::from_row,
            )
            .optional()
            .context("Failed to query report")?
            .map(ReportRow::into_report)
            .transpose()
    }

    /// Most recent period first.
    pub fn list_reports(&self, query: &ReportQuery) -> Result<Vec<Report>> {
        let mut filters = Filters::default();
        filters
            .eq("report_type", query.report_type.map(|t| t.as_str().to_string()))
            .search(&["title"], query.search.as_deref());
        let (sql, params) = filters.build(
            &format!("SELECT {} FROM reports", REPORT_COLUMNS),
            "period_start DESC, created_at DESC",
            query.page,
        );
        self.query_all(&sql, params, ReportRow::from_row)?
            .into_iter()
            .map(ReportRow::into_report)
            .collect()
    }

    pub fn delete_report(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM reports WHERE id = ?1", params![id])
            .context("Failed to delete report")?;
        Ok(count > 0)
    }
}
