use crate::errors::BenError;
use crate::store::models::PrdStatus;

/// Statuses reachable from `from` in one step.
///
/// ```text
/// draft <-> approved <-> in_progress <-> completed
/// ```
pub fn allowed_transitions(from: PrdStatus) -> &'static [PrdStatus] {
    match from {
        PrdStatus::Draft => &[PrdStatus::Approved],
        PrdStatus::Approved => &[PrdStatus::Draft, PrdStatus::InProgress],
        PrdStatus::InProgress => &[PrdStatus::Approved, PrdStatus::Completed],
        PrdStatus::Completed => &[PrdStatus::InProgress],
    }
}

pub fn can_transition(from: PrdStatus, to: PrdStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// `Ok` when `from -> to` is an edge of the lattice.
pub fn check_transition(from: PrdStatus, to: PrdStatus) -> Result<(), BenError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(BenError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PrdStatus; 4] = [
        PrdStatus::Draft,
        PrdStatus::Approved,
        PrdStatus::InProgress,
        PrdStatus::Completed,
    ];

    #[test]
    fn test_lattice_edges() {
        let allowed: Vec<(PrdStatus, PrdStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| can_transition(*from, *to))
            .collect();
        assert_eq!(
            allowed,
            vec![
                (PrdStatus::Draft, PrdStatus::Approved),
                (PrdStatus::Approved, PrdStatus::Draft),
                (PrdStatus::Approved, PrdStatus::InProgress),
                (PrdStatus::InProgress, PrdStatus::Approved),
                (PrdStatus::InProgress, PrdStatus::Completed),
                (PrdStatus::Completed, PrdStatus::InProgress),
            ]
        );
    }

    #[test]
    fn test_self_transition_is_rejected() {
        for status in ALL {
            assert!(!can_transition(status, status));
        }
    }

    #[test]
    fn test_draft_cannot_jump_to_completed() {
        let err = check_transition(PrdStatus::Draft, PrdStatus::Completed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "PRD cannot move from 'draft' to 'completed'"
        );
        assert!(check_transition(PrdStatus::Completed, PrdStatus::InProgress).is_ok());
    }
}
