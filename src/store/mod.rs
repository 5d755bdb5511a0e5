//! SQLite persistence for Ben OS.
//!
//! `BenDb` owns the connection; each entity file adds its queries as an
//! `impl BenDb` block. Async callers go through `DbHandle::call`, which runs
//! the closure on tokio's blocking pool.

mod activity;
mod areas;
mod boards;
mod db;
mod milestones;
pub mod models;
mod prds;
mod projects;
mod reports;
mod search;
mod subtasks;
mod tasks;

#[cfg(test)]
pub(crate) mod fixtures;

pub use areas::{AreaPatch, NewArea};
pub use boards::{BoardPatch, BoardView, ColumnSpec, NewBoard, column_slug};
pub use db::{BenDb, DbHandle, new_id, now};
pub use milestones::{MilestonePatch, NewMilestone};
pub use prds::{NewPrd, PrdPatch};
pub use projects::{NewProject, ProjectPatch};
pub use reports::NewReport;
pub use search::SearchCandidate;
pub use subtasks::{NewSubtask, SubtaskPatch};
pub use tasks::{NewTask, TaskPatch};
