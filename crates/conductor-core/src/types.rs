//! Core type definitions for Conductor sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ConductorError;

/// Session identifier
///
/// Format: `{YYYYMMDD}-{HHMMSS}-{8 hex}` (e.g. `20261017-142233-9f1c04ab`).
/// The timestamp keeps ids sortable, the suffix keeps them unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh id for a session starting at `at`
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", at.format("%Y%m%d-%H%M%S"), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(ConductorError::InvalidArgument(format!(
                "Invalid session id: {:?}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }
}

/// Session-scoped sequence identifiers (`critic-1`, `task-2`, `qa-1`)
macro_rules! sequence_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Id following this one in the session sequence
            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ConductorError;

            /// Accepts both `task-3` and a bare `3`
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                let digits = s
                    .strip_prefix(concat!($prefix, "-"))
                    .unwrap_or(s);
                digits.parse::<u32>().map(Self).map_err(|_| {
                    ConductorError::InvalidArgument(format!(
                        "Invalid {} id: {:?}",
                        $prefix, s
                    ))
                })
            }
        }
    };
}

sequence_id!(
    /// Critic identifier, unique within a session
    CriticId,
    "critic"
);
sequence_id!(
    /// Task identifier, unique within a session
    TaskId,
    "task"
);
sequence_id!(
    /// QA review identifier, unique within a session
    QaId,
    "qa"
);

/// Session lifecycle status
///
/// `Active` is the only non-terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "completed" | "complete" | "done" => Ok(Self::Completed),
            "failed" | "fail" => Ok(Self::Failed),
            "cancelled" | "canceled" | "cancel" => Ok(Self::Cancelled),
            _ => Err(ConductorError::InvalidArgument(format!(
                "Invalid session status: {}",
                s
            ))),
        }
    }
}

/// Per-session strictness and admission settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of unreported critics at any time
    pub critic_concurrency: usize,
    /// Reject out-of-order TDD phase transitions
    pub tdd_enforced: bool,
    /// QA must be spawned without an explicit override
    pub qa_required: bool,
    /// Minimum score that counts as a QA pass
    pub qa_pass_threshold: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            critic_concurrency: 3,
            tdd_enforced: true,
            qa_required: true,
            qa_pass_threshold: 7,
        }
    }
}

impl SessionConfig {
    pub fn with_critic_concurrency(mut self, limit: usize) -> Self {
        self.critic_concurrency = limit;
        self
    }

    pub fn with_tdd_enforced(mut self, enforced: bool) -> Self {
        self.tdd_enforced = enforced;
        self
    }

    pub fn with_qa_required(mut self, required: bool) -> Self {
        self.qa_required = required;
        self
    }

    pub fn with_qa_pass_threshold(mut self, threshold: u8) -> Self {
        self.qa_pass_threshold = threshold;
        self
    }
}

/// A development session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Originating request text
    pub request: String,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Optional closing note supplied with `end`
    pub summary: Option<String>,
}

impl Session {
    pub fn new(request: impl Into<String>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(now),
            request: request.into(),
            config,
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            summary: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Kind of change a plan expects for a file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Create,
    #[default]
    Modify,
    Delete,
}

impl std::fmt::Display for FileChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A planned file change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: FileChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FileChange {
    pub fn new(kind: FileChangeKind, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl std::str::FromStr for FileChange {
    type Err = ConductorError;

    /// Parses `create:src/new.rs`, `delete:old.rs`, or a bare path (modify)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, path) = match s.split_once(':') {
            Some(("create" | "add" | "new", path)) => (FileChangeKind::Create, path),
            Some(("modify" | "edit" | "change", path)) => (FileChangeKind::Modify, path),
            Some(("delete" | "remove" | "rm", path)) => (FileChangeKind::Delete, path),
            _ => (FileChangeKind::Modify, s),
        };

        let path = path.trim();
        if path.is_empty() {
            return Err(ConductorError::InvalidArgument(format!(
                "Invalid file change: {:?}",
                s
            )));
        }
        Ok(Self::new(kind, path))
    }
}

/// One version of the implementation plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// 1-based version within the session
    pub version: u32,
    pub overview: String,
    pub components: Vec<String>,
    pub file_changes: Vec<FileChange>,
    pub created_at: DateTime<Utc>,
}

/// Review discipline of a critic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticKind {
    StructuralDesign,
    TestDiscipline,
    DependencyHygiene,
    Security,
    Performance,
    /// Any discipline outside the built-in set
    Custom(String),
}

impl std::fmt::Display for CriticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StructuralDesign => write!(f, "structural-design"),
            Self::TestDiscipline => write!(f, "test-discipline"),
            Self::DependencyHygiene => write!(f, "dependency-hygiene"),
            Self::Security => write!(f, "security"),
            Self::Performance => write!(f, "performance"),
            Self::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

impl std::str::FromStr for CriticKind {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "structural-design" | "structural" | "design" | "architecture" => {
                Ok(Self::StructuralDesign)
            }
            "test-discipline" | "tests" | "testing" | "tdd" => Ok(Self::TestDiscipline),
            "dependency-hygiene" | "dependencies" | "deps" => Ok(Self::DependencyHygiene),
            "security" => Ok(Self::Security),
            "performance" | "perf" => Ok(Self::Performance),
            "" | "custom:" => Err(ConductorError::InvalidArgument(
                "Critic kind must not be empty".to_string(),
            )),
            other => {
                let name = other.strip_prefix("custom:").unwrap_or(other);
                Ok(Self::Custom(name.to_string()))
            }
        }
    }
}

/// Lifecycle of an external review worker (critic or QA reviewer)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Spawned,
    Reported,
    /// Session ended before the worker reported
    Abandoned,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawned => write!(f, "spawned"),
            Self::Reported => write!(f, "reported"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Severity-bucketed issue count from a review
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    pub critical: u32,
    pub major: u32,
    pub minor: u32,
}

impl IssueCounts {
    pub fn new(critical: u32, major: u32, minor: u32) -> Self {
        Self {
            critical,
            major,
            minor,
        }
    }

    pub fn total(&self) -> u32 {
        self.critical + self.major + self.minor
    }
}

impl std::fmt::Display for IssueCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} critical, {} major, {} minor",
            self.critical, self.major, self.minor
        )
    }
}

/// Result payload delivered by a critic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticResult {
    pub findings: String,
    pub issues: IssueCounts,
    /// Worker gave up or the caller's deadline expired
    #[serde(default)]
    pub timed_out: bool,
}

impl CriticResult {
    pub fn new(findings: impl Into<String>, issues: IssueCounts) -> Self {
        Self {
            findings: findings.into(),
            issues,
            timed_out: false,
        }
    }

    /// Result recorded when the caller's deadline for the critic expired
    pub fn timed_out(findings: impl Into<String>) -> Self {
        Self {
            findings: findings.into(),
            issues: IssueCounts::default(),
            timed_out: true,
        }
    }
}

/// An independent review worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critic {
    pub id: CriticId,
    pub kind: CriticKind,
    pub name: String,
    pub state: WorkerState,
    pub result: Option<CriticResult>,
    pub spawned_at: DateTime<Utc>,
    pub reported_at: Option<DateTime<Utc>>,
    /// Result arrived after the critic was abandoned
    #[serde(default)]
    pub late: bool,
}

impl Critic {
    pub fn new(id: CriticId, kind: CriticKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            state: WorkerState::Spawned,
            result: None,
            spawned_at: Utc::now(),
            reported_at: None,
            late: false,
        }
    }

    /// Still occupying an admission slot
    pub fn is_outstanding(&self) -> bool {
        self.state == WorkerState::Spawned
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

/// Aggregated narrative over critic results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesis {
    pub narrative: String,
    /// Critics that had reported when the synthesis was logged
    pub critics: Vec<CriticId>,
    pub created_at: DateTime<Utc>,
}

/// TDD phase of a task
///
/// Phases are strictly ordered; `next()` gives the only legal successor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    #[default]
    NotStarted,
    Red,
    Green,
    Refactor,
    Done,
}

impl TaskPhase {
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Red),
            Self::Red => Some(Self::Green),
            Self::Green => Some(Self::Refactor),
            Self::Refactor => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Red => write!(f, "red"),
            Self::Green => write!(f, "green"),
            Self::Refactor => write!(f, "refactor"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for TaskPhase {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_started" | "notstarted" | "not-started" => Ok(Self::NotStarted),
            "red" => Ok(Self::Red),
            "green" => Ok(Self::Green),
            "refactor" => Ok(Self::Refactor),
            "done" => Ok(Self::Done),
            _ => Err(ConductorError::InvalidArgument(format!(
                "Invalid task phase: {}",
                s
            ))),
        }
    }
}

/// Task status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A recorded phase transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub phase: TaskPhase,
    pub at: DateTime<Utc>,
}

/// A unit of work driven through the TDD phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub depends_on: Vec<TaskId>,
    pub phase: TaskPhase,
    pub status: TaskStatus,
    /// Every phase the task has entered, oldest first
    pub phase_history: Vec<PhaseChange>,
    pub reopen_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: description.into(),
            depends_on: Vec::new(),
            phase: TaskPhase::NotStarted,
            status: TaskStatus::Pending,
            phase_history: Vec::new(),
            reopen_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<TaskId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Move to `phase`, recording it in the history
    pub fn enter_phase(&mut self, phase: TaskPhase) {
        let now = Utc::now();
        self.phase = phase;
        self.status = match phase {
            TaskPhase::NotStarted => TaskStatus::Pending,
            TaskPhase::Done => TaskStatus::Done,
            _ => TaskStatus::InProgress,
        };
        self.phase_history.push(PhaseChange { phase, at: now });
        self.updated_at = now;
    }
}

/// Outcome recorded by a QA reviewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaResult {
    pub score: u8,
    pub passed: bool,
    #[serde(default)]
    pub notes: String,
}

/// A final quality-assurance review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaReview {
    pub id: QaId,
    /// Reviewer name
    pub name: String,
    pub state: WorkerState,
    pub result: Option<QaResult>,
    pub spawned_at: DateTime<Utc>,
    pub reported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub late: bool,
}

impl QaReview {
    pub fn new(id: QaId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: WorkerState::Spawned,
            result: None,
            spawned_at: Utc::now(),
            reported_at: None,
            late: false,
        }
    }
}

/// Event severity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for EventLevel {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(ConductorError::InvalidArgument(format!(
                "Invalid event level: {}",
                s
            ))),
        }
    }
}

/// Entity that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EventSource {
    Session,
    Plan { version: u32 },
    Critic { id: CriticId },
    Synthesis,
    Task { id: TaskId },
    Qa { id: QaId },
    /// Free-form note logged by the caller
    Caller,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Plan { version } => write!(f, "plan-v{}", version),
            Self::Critic { id } => write!(f, "{}", id),
            Self::Synthesis => write!(f, "synthesis"),
            Self::Task { id } => write!(f, "{}", id),
            Self::Qa { id } => write!(f, "{}", id),
            Self::Caller => write!(f, "caller"),
        }
    }
}

/// Flag attached to events that record unusual-but-accepted input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventMarker {
    /// A worker reported after its session abandoned it
    AbandonedLate,
}

impl std::fmt::Display for EventMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AbandonedLate => write!(f, "abandoned-late"),
        }
    }
}

/// An immutable entry in a session's event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 1-based position in the session's log
    pub seq: u64,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<EventMarker>,
}
