//! Pure transition rules for sessions and TDD phases
//!
//! No I/O and no engine state: each function takes the current value and the
//! requested one and either accepts the move or explains why it is illegal.

use conductor_core::{ConductorError, Result, SessionStatus, TaskPhase};

/// How a requested phase relates to the strict TDD order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseMove {
    /// The requested phase is the next one in order
    InOrder,
    /// Accepted only because TDD enforcement is off
    OutOfOrder,
}

/// Validate a phase change for a task currently in `current`
///
/// With `enforced`, the only legal moves are NotStarted→Red, Red→Green,
/// Green→Refactor and Refactor→Done. Without it any move to a different phase
/// is accepted, except that Done is final and NotStarted is never a target.
pub fn phase_transition(
    current: TaskPhase,
    requested: TaskPhase,
    enforced: bool,
) -> Result<PhaseMove> {
    if current == TaskPhase::Done {
        return Err(ConductorError::InvalidTransition(format!(
            "task is already done; reopen it before moving to {}",
            requested
        )));
    }

    if requested == TaskPhase::NotStarted {
        return Err(ConductorError::InvalidTransition(format!(
            "cannot move from {} back to not_started",
            current
        )));
    }

    if requested == current {
        return Err(ConductorError::InvalidTransition(format!(
            "task is already in {}",
            current
        )));
    }

    if current.next() == Some(requested) {
        return Ok(PhaseMove::InOrder);
    }

    if enforced {
        // next() is Some for every phase except Done, which returned above
        let expected = current
            .next()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string());
        return Err(ConductorError::InvalidTransition(format!(
            "cannot move from {} to {}; next phase is {}",
            current, requested, expected
        )));
    }

    Ok(PhaseMove::OutOfOrder)
}

/// Validate ending a session currently in `current` with `requested`
pub fn session_transition(current: SessionStatus, requested: SessionStatus) -> Result<()> {
    if current.is_terminal() {
        return Err(ConductorError::InvalidTransition(format!(
            "session is already {}",
            current
        )));
    }

    if !requested.is_terminal() {
        return Err(ConductorError::InvalidTransition(format!(
            "cannot end a session as {}; use completed, failed or cancelled",
            requested
        )));
    }

    Ok(())
}
