use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Column id that marks a task as done.
pub const DONE_COLUMN: &str = "done";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Area {
    pub id: String,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub area_type: String,
    pub position: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid project status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub area_id: String,
    pub title: String,
    pub description: String,
    pub status: ProjectStatus,
    pub target_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for MilestoneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid milestone status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: MilestoneStatus,
    pub target_date: Option<String>,
    pub position: i32,
    pub created_at: String,
    pub updated_at: String,
}

/// Milestone plus the completion ratio of the tasks linked to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneWithProgress {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub total_tasks: u32,
    pub done_tasks: u32,
    pub progress: u8,
}

/// `round(100 * done / total)`, or 0 when there are no tasks.
pub fn progress_percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (100.0 * f64::from(done) / f64::from(total)).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardColumn {
    pub id: String,
    pub name: String,
    pub position: i32,
}

impl BoardColumn {
    pub fn new(id: &str, name: &str, position: i32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            position,
        }
    }
}

/// Columns every new board starts with.
pub fn default_columns() -> Vec<BoardColumn> {
    vec![
        BoardColumn::new("backlog", "Backlog", 0),
        BoardColumn::new("todo", "To Do", 1),
        BoardColumn::new("in_progress", "In Progress", 2),
        BoardColumn::new(DONE_COLUMN, "Done", 3),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub columns: Vec<BoardColumn>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// A card on a board. `status` always mirrors `column_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub board_id: String,
    pub milestone_id: Option<String>,
    pub prd_id: Option<String>,
    pub agent_id: Option<String>,
    pub assignee: Option<String>,
    pub title: String,
    pub description: String,
    pub status: String,
    pub column_id: String,
    pub priority: Priority,
    pub story_points: Option<i32>,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub position: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.column_id == DONE_COLUMN
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub completed: bool,
    pub completed_at: Option<String>,
    pub position: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrdStatus {
    Draft,
    Approved,
    InProgress,
    Completed,
}

impl PrdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for PrdStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrdStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "approved" => Ok(Self::Approved),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid PRD status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrdSection {
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// A product requirements document. Editors use either raw `content` or
/// structured `sections`; both are stored as given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prd {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub content: Option<String>,
    pub sections: Option<Vec<PrdSection>>,
    pub status: PrdStatus,
    pub version: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrdVersion {
    pub id: String,
    pub prd_id: String,
    pub version: i32,
    pub title: String,
    pub content: Option<String>,
    pub sections: Option<Vec<PrdSection>>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Agent,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

impl FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            _ => Err(format!("Invalid actor type: {}", s)),
        }
    }
}

/// Who performed a mutation, parsed from `user:<id>` / `agent:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub kind: ActorType,
    pub id: String,
}

impl Actor {
    pub fn local_user() -> Self {
        Self {
            kind: ActorType::User,
            id: "local".to_string(),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid actor '{}': expected <user|agent>:<id>", s))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(format!("Invalid actor '{}': empty id", s));
        }
        Ok(Self {
            kind: kind.trim().parse()?,
            id: id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityLog {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub changes: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Daily,
    Weekly,
    Monthly,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(format!("Invalid report type: {}", s)),
        }
    }
}

/// A stored report snapshot. `content` is opaque JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: String,
    pub report_type: ReportType,
    pub title: String,
    pub period_start: String,
    pub period_end: String,
    pub content: serde_json::Value,
    pub created_at: String,
}

/// Deserialize a patch field so that an absent key stays `None` while an
/// explicit `null` becomes `Some(None)` (clear the value).
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// Store-level query types

/// Pagination window shared by every list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    /// Every row. Used internally, never from request parameters.
    pub fn unbounded() -> Self {
        Self {
            limit: i64::MAX,
            offset: 0,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AreaQuery {
    pub page: Page,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectQuery {
    pub page: Page,
    pub search: Option<String>,
    pub area_id: Option<String>,
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct MilestoneQuery {
    pub page: Page,
    pub search: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<MilestoneStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct BoardQuery {
    pub page: Page,
    pub search: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub page: Page,
    pub search: Option<String>,
    pub board_id: Option<String>,
    pub column_id: Option<String>,
    pub priority: Option<Priority>,
    pub milestone_id: Option<String>,
    pub prd_id: Option<String>,
    pub assignee: Option<String>,
}

/// Subtasks of one task; `task_id` comes from the route.
#[derive(Debug, Clone, Default)]
pub struct SubtaskQuery {
    pub page: Page,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PrdQuery {
    pub page: Page,
    pub search: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<PrdStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityQuery {
    pub page: Page,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReportQuery {
    pub page: Page,
    pub search: Option<String>,
    pub report_type: Option<ReportType>,
}
