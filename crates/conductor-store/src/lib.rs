//! # conductor-store
//!
//! Persistence for Conductor workspaces.
//!
//! This crate provides:
//! - The `Store` contract: one all-or-nothing commit per engine mutation
//! - An in-memory store for tests and embedding
//! - A checksummed JSON-lines journal for on-disk workspaces, shared between
//!   processes through an advisory writer lock

mod commit;
mod storage;

pub use commit::{Commit, Record};
pub use storage::{JournalStore, MemoryStore, StorageMode, Store, StoreLock};
