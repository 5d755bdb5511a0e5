use anyhow::Result;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use super::db::{BenDb, like_pattern};

/// A row that matched a free-text lookup, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub entity_type: String,
    pub id: String,
    pub title: String,
    /// Secondary text (description or content) that may also have matched.
    pub body: String,
}

/// Entity type, table, title column and body expression for each
/// searchable collection.
const SOURCES: &[(&str, &str, &str, &str)] = &[
    ("area", "areas", "name", "area_type"),
    ("project", "projects", "title", "description"),
    ("milestone", "milestones", "title", "description"),
    ("board", "boards", "name", "''"),
    ("task", "tasks", "title", "description"),
    ("prd", "prds", "title", "COALESCE(content, sections, '')"),
    ("report", "reports", "title", "''"),
];

impl BenDb {
    /// Case-insensitive substring lookup across every entity type, at most
    /// `per_type` rows from each.
    pub fn search_candidates(&self, term: &str, per_type: i64) -> Result<Vec<SearchCandidate>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = like_pattern(term);
        let mut out = Vec::new();
        for (entity_type, table, title, body) in SOURCES {
            let sql = format!(
                "SELECT id, {title}, {body} FROM {table}
                 WHERE {title} LIKE ?1 ESCAPE '\\' OR {body} LIKE ?1 ESCAPE '\\'
                 LIMIT ?2"
            );
            let rows = self.query_all(
                &sql,
                vec![Value::Text(pattern.clone()), Value::Integer(per_type)],
                |row| {
                    Ok(SearchCandidate {
                        entity_type: entity_type.to_string(),
                        id: row.get(0)?,
                        title: row.get(1)?,
                        body: row.get(2)?,
                    })
                },
            )?;
            out.extend(rows);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures;
    use crate::store::{NewPrd, NewTask};

    #[test]
    fn test_candidates_span_entity_types() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let (project, board) = fixtures::board(&db);
        db.create_task(&NewTask {
            board_id: board.id.clone(),
            title: "Billing page".into(),
            ..Default::default()
        })?;
        db.create_task(&NewTask {
            board_id: board.id.clone(),
            title: "Unrelated".into(),
            description: "mentions billing in passing".into(),
            ..Default::default()
        })?;
        db.create_prd(&NewPrd {
            project_id: project.id,
            title: "Billing v2".into(),
            content: None,
            sections: None,
        })?;

        let hits = db.search_candidates("BILLING", 20)?;
        let mut kinds: Vec<&str> = hits.iter().map(|h| h.entity_type.as_str()).collect();
        kinds.sort();
        assert_eq!(kinds, vec!["prd", "task", "task"]);
        assert!(db.search_candidates("   ", 20)?.is_empty());
        Ok(())
    }
}
