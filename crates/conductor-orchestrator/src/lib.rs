//! # conductor-orchestrator
//!
//! Session orchestration engine for Conductor.
//!
//! This crate provides:
//! - The `Engine`: one workspace, one active session, single-writer mutations
//! - Plan versioning and critic admission control
//! - The task dependency graph and TDD phase state machine
//! - The QA gate with score/verdict consistency checks
//! - The append-only event log and a markdown timeline of it

mod critics;
mod engine;
mod event_log;
mod plans;
mod qa;
mod session;
mod state_machine;
mod task_graph;
mod timeline;

pub use critics::{CriticCoordinator, ReportOutcome};
pub use engine::{Engine, EngineOptions};
pub use event_log::{EventLog, StagedCommit};
pub use plans::PlanStore;
pub use qa::{check_score, QaGate};
pub use session::{SessionState, SessionSummary};
pub use state_machine::{phase_transition, session_transition, PhaseMove};
pub use task_graph::{PhaseUpdate, TaskGraph, TaskNode};
pub use timeline::Timeline;
