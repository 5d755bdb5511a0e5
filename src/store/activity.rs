use anyhow::{Context, Result};
use rusqlite::{Row, params};

use super::db::{BenDb, Filters, new_id, now, parse_field};
use super::models::{ActivityLog, ActivityQuery, Actor};

struct ActivityRow {
    id: String,
    entity_type: String,
    entity_id: String,
    action: String,
    actor_type: String,
    actor_id: String,
    changes: String,
    created_at: String,
}

impl ActivityRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            action: row.get(3)?,
            actor_type: row.get(4)?,
            actor_id: row.get(5)?,
            changes: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_activity(self) -> Result<ActivityLog> {
        Ok(ActivityLog {
            actor_type: parse_field(&self.actor_type)?,
            changes: serde_json::from_str(&self.changes)
                .context("Failed to parse activity changes")?,
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            action: self.action,
            actor_id: self.actor_id,
            created_at: self.created_at,
        })
    }
}

impl BenDb {
    /// Append one row to the activity log.
    pub fn record_activity(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        actor: &Actor,
        changes: &serde_json::Value,
    ) -> Result<ActivityLog> {
        let entry = ActivityLog {
            id: new_id(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            actor_type: actor.kind,
            actor_id: actor.id.clone(),
            changes: changes.clone(),
            created_at: now(),
        };
        self.conn
            .execute(
                "INSERT INTO activity_log (id, entity_type, entity_id, action, actor_type, actor_id, changes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.id,
                    entry.entity_type,
                    entry.entity_id,
                    entry.action,
                    entry.actor_type.as_str(),
                    entry.actor_id,
                    serde_json::to_string(&entry.changes).context("Failed to serialize changes")?,
                    entry.created_at
                ],
            )
            .context("Failed to insert activity")?;
        Ok(entry)
    }

    /// Newest first.
    pub fn list_activity(&self, query: &ActivityQuery) -> Result<Vec<ActivityLog>> {
        let mut filters = Filters::default();
        filters
            .eq("entity_type", query.entity_type.clone())
            .eq("entity_id", query.entity_id.clone());
        let (sql, params) = filters.build(
            "SELECT id, entity_type, entity_id, action, actor_type, actor_id, changes, created_at FROM activity_log",
            "created_at DESC, rowid DESC",
            query.page,
        );
        self.query_all(&sql, params, ActivityRow::from_row)?
            .into_iter()
            .map(ActivityRow::into_activity)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::ActorType;
    use serde_json::json;

    #[test]
    fn test_record_and_list_activity() -> Result<()> {
        let db = BenDb::new_in_memory()?;
        let agent: Actor = "agent:planner".parse().map_err(|e: String| anyhow::anyhow!(e))?;
        db.record_activity("task", "t1", "created", &Actor::local_user(), &json!({"title": "A"}))?;
        db.record_activity("task", "t1", "moved", &agent, &json!({"to": "done"}))?;
        db.record_activity("prd", "p1", "created", &Actor::local_user(), &json!({}))?;

        let for_task = db.list_activity(&ActivityQuery {
            entity_type: Some("task".into()),
            entity_id: Some("t1".into()),
            ..Default::default()
        })?;
        assert_eq!(for_task.len(), 2);
        assert_eq!(for_task[0].action, "moved");
        assert_eq!(for_task[0].actor_type, ActorType::Agent);
        assert_eq!(for_task[0].actor_id, "planner");
        assert_eq!(for_task[0].changes["to"], "done");

        let all = db.list_activity(&ActivityQuery::default())?;
        assert_eq!(all.len(), 3);
        Ok(())
    }
}
