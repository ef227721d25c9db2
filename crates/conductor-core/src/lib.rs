//! # conductor-core
//!
//! Core types for the Conductor development-session orchestrator.
//!
//! A session moves a software change through a fixed workflow:
//!
//! - a plan is logged (and may be re-versioned)
//! - independent critics review it concurrently, under an admission limit
//! - tasks are driven through red/green/refactor, respecting dependencies
//! - a QA reviewer scores the result against a pass threshold
//!
//! Every step is recorded in an append-only event log.

mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    ConductorConfig, EventsConfig, QaConfig, SessionDefaults, StorageConfig, CONDUCTOR_DIR,
};
pub use error::{ConductorError, ErrorKind, Result};
pub use types::*;
