//! Typed error hierarchy for Ben OS.
//!
//! - `BenError`: domain and store failures that map onto HTTP statuses
//! - `BoardError`: board reconciliation failures (unknown column or card)
//!
//! Store code returns `anyhow::Result` with contexts; domain failures are
//! raised as `BenError` inside the `anyhow::Error` so the API layer can
//! downcast them into the right status code.

use thiserror::Error;

/// Errors from the store and domain rules.
#[derive(Debug, Error)]
pub enum BenError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("PRD cannot move from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Board(#[from] BoardError),
}

impl BenError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Errors from the in-memory board store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("No board loaded")]
    BoardNotLoaded,

    #[error("Column '{0}' not found on board")]
    ColumnNotFound(String),

    #[error("Column '{0}' already exists on board")]
    DuplicateColumn(String),

    #[error("Card {card_id} not found in column '{column_id}'")]
    CardNotFound { card_id: String, column_id: String },

    #[error("Column order must list every column exactly once")]
    InvalidColumnOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = BenError::not_found("Task", "abc");
        assert_eq!(err.to_string(), "Task abc not found");
    }

    #[test]
    fn board_error_converts_into_ben_error() {
        let err: BenError = BoardError::ColumnNotFound("qa".into()).into();
        match &err {
            BenError::Board(BoardError::ColumnNotFound(col)) => assert_eq!(col, "qa"),
            _ => panic!("Expected BenError::Board(ColumnNotFound)"),
        }
        assert!(err.to_string().contains("qa"));
    }

    #[test]
    fn ben_error_survives_anyhow_round_trip() {
        let err = anyhow::Error::from(BenError::validation("title is required"));
        let inner = err.downcast_ref::<BenError>().expect("downcast");
        assert!(matches!(inner, BenError::Validation(_)));
    }

    #[test]
    fn invalid_transition_message() {
        let err = BenError::InvalidTransition {
            from: "draft".into(),
            to: "completed".into(),
        };
        assert_eq!(err.to_string(), "PRD cannot move from 'draft' to 'completed'");
    }
}
