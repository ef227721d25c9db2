//! Unified error types for Conductor

use thiserror::Error;

/// Unified error type for all Conductor operations
///
/// Every variant carries a human-readable reason. Callers that need a stable
/// machine-readable code should use [`ConductorError::kind`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConductorError {
    // Lookup errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // Lifecycle errors
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    // Task graph errors
    #[error("Dependency not satisfied: task {task} is blocked by {blocked_by}")]
    DependencyNotSatisfied { task: String, blocked_by: String },

    #[error("Dependency cycle: {0}")]
    Cycle(String),

    // Worker coordination errors
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{entity} {id} already reported")]
    AlreadyReported { entity: &'static str, id: String },

    #[error("Inconsistent score: {0}")]
    InconsistentScore(String),

    // Input errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Storage errors (fatal for the triggering operation)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ConductorError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn already_reported(entity: &'static str, id: impl ToString) -> Self {
        Self::AlreadyReported {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::DependencyNotSatisfied { .. } => ErrorKind::DependencyNotSatisfied,
            Self::Cycle(_) => ErrorKind::Cycle,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::AlreadyReported { .. } => ErrorKind::AlreadyReported,
            Self::InconsistentScore(_) => ErrorKind::InconsistentScore,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Config(_) => ErrorKind::Config,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<std::io::Error> for ConductorError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("serialization failed: {}", e))
    }
}

/// Stable, machine-readable error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidTransition,
    DependencyNotSatisfied,
    Cycle,
    ResourceExhausted,
    AlreadyReported,
    InconsistentScore,
    InvalidArgument,
    Config,
    Storage,
}

impl ErrorKind {
    /// Wire code used by the CLI and JSON output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidTransition => "invalid_transition",
            Self::DependencyNotSatisfied => "dependency_not_satisfied",
            Self::Cycle => "cycle",
            Self::ResourceExhausted => "resource_exhausted",
            Self::AlreadyReported => "already_reported",
            Self::InconsistentScore => "inconsistent_score",
            Self::InvalidArgument => "invalid_argument",
            Self::Config => "config",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias using ConductorError
pub type Result<T> = std::result::Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(ConductorError::not_found("Task", "task-3").kind().as_str(), "not_found");
        assert_eq!(
            ConductorError::Cycle("task-1 -> task-2 -> task-1".into()).kind(),
            ErrorKind::Cycle
        );
        assert_eq!(
            ConductorError::already_reported("Critic", "critic-1").kind().as_str(),
            "already_reported"
        );
    }

    #[test]
    fn test_messages_are_human_readable() {
        let err = ConductorError::DependencyNotSatisfied {
            task: "task-2".into(),
            blocked_by: "task-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Dependency not satisfied: task task-2 is blocked by task-1"
        );
        assert_eq!(
            ConductorError::not_found("Session", "abc").to_string(),
            "Session not found: abc"
        );
    }

    #[test]
    fn test_io_errors_map_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(ConductorError::from(io).kind(), ErrorKind::Storage);
    }
}
