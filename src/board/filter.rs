use serde::{Deserialize, Serialize};

use crate::store::models::{Priority, Task};

/// Criteria for a filtered board view. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub milestone_id: Option<String>,
    /// Case-insensitive substring over title and description.
    pub search: Option<String>,
}

impl TaskFilter {
    pub fn is_empty(&self) -> bool {
        self.priority.is_none()
            && self.assignee.is_none()
            && self.milestone_id.is_none()
            && self.search.as_deref().is_none_or(|s| s.trim().is_empty())
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(priority) = self.priority
            && task.priority != priority
        {
            return false;
        }
        if let Some(assignee) = &self.assignee
            && task.assignee.as_ref() != Some(assignee)
        {
            return false;
        }
        if let Some(milestone_id) = &self.milestone_id
            && task.milestone_id.as_ref() != Some(milestone_id)
        {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                task.title.to_lowercase().contains(&term)
                    || task.description.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::tests::make_task;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = TaskFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&make_task("a", "todo", 0)));

        let blank = TaskFilter {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert!(blank.is_empty());
        assert!(blank.matches(&make_task("a", "todo", 0)));
    }

    #[test]
    fn test_filters_combine() {
        let mut task = make_task("a", "todo", 0);
        task.priority = Priority::Urgent;
        task.assignee = Some("ben".into());
        task.milestone_id = Some("m1".into());

        let filter = TaskFilter {
            priority: Some(Priority::Urgent),
            assignee: Some("ben".into()),
            milestone_id: Some("m1".into()),
            search: Some("TASK A".into()),
        };
        assert!(filter.matches(&task));

        let wrong_assignee = TaskFilter {
            assignee: Some("someone".into()),
            ..filter.clone()
        };
        assert!(!wrong_assignee.matches(&task));

        let wrong_priority = TaskFilter {
            priority: Some(Priority::Low),
            ..filter
        };
        assert!(!wrong_priority.matches(&task));
    }

    #[test]
    fn test_search_covers_description() {
        let mut task = make_task("a", "todo", 0);
        task.description = "Rotate the API keys".into();
        let filter = TaskFilter {
            search: Some("api key".into()),
            ..Default::default()
        };
        assert!(filter.matches(&task));
    }
}
