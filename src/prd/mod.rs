//! PRD workflow rules.
//!
//! - `workflow`: the status lattice a PRD moves along
//! - `extract`: requirement lines pulled out of bullet and numbered lists

pub mod extract;
pub mod workflow;

pub use extract::{Requirement, extract_requirements};
pub use workflow::{allowed_transitions, can_transition, check_transition};
