//! Process exit codes per error kind

use conductor_core::{ConductorError, ErrorKind};

/// Exit code for errors that are not engine errors
pub const UNEXPECTED: u8 = 1;

pub fn code_for(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::NotFound => 2,
        ErrorKind::Conflict => 3,
        ErrorKind::InvalidTransition => 4,
        ErrorKind::DependencyNotSatisfied => 5,
        ErrorKind::Cycle => 6,
        ErrorKind::ResourceExhausted => 7,
        ErrorKind::AlreadyReported => 8,
        ErrorKind::InconsistentScore => 9,
        ErrorKind::Storage => 10,
        ErrorKind::InvalidArgument | ErrorKind::Config => 11,
    }
}

/// The engine error behind `err`, if there is one anywhere in its chain
pub fn engine_error(err: &anyhow::Error) -> Option<&ConductorError> {
    err.chain().find_map(|e| e.downcast_ref::<ConductorError>())
}

pub fn code_of(err: &anyhow::Error) -> u8 {
    engine_error(err)
        .map(|e| code_for(e.kind()))
        .unwrap_or(UNEXPECTED)
}
