//! Append-only event log for a session
//!
//! Events are never written directly. A mutation stages them on a
//! [`StagedCommit`] together with the entity snapshots it changes; the log
//! only grows when that commit has been stored and applied.

use chrono::Utc;
use conductor_core::{Event, EventLevel, EventMarker, EventSource, Session};
use conductor_store::{Commit, Record};

/// Ordered events of one session
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sequence number the next event will receive
    pub fn next_seq(&self) -> u64 {
        self.events.last().map(|e| e.seq + 1).unwrap_or(1)
    }

    /// Begin a commit whose events continue this log
    pub fn stage(&self, session: Session) -> StagedCommit {
        StagedCommit {
            next_seq: self.next_seq(),
            commit: Commit::new(session),
        }
    }

    /// Append a committed event
    pub fn apply(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Newest-first view of the last `count` events at or above `min_level`
    pub fn recent(&self, count: usize, min_level: Option<EventLevel>) -> Vec<Event> {
        let min_level = min_level.unwrap_or(EventLevel::Debug);
        self.events
            .iter()
            .rev()
            .filter(|e| e.level >= min_level)
            .take(count)
            .cloned()
            .collect()
    }
}

/// A commit being assembled by a mutation
#[derive(Debug)]
pub struct StagedCommit {
    commit: Commit,
    next_seq: u64,
}

impl StagedCommit {
    /// Add an entity snapshot
    pub fn record(mut self, record: Record) -> Self {
        self.commit.push(record);
        self
    }

    /// Add an event produced by `source`
    pub fn event(self, level: EventLevel, source: EventSource, message: impl Into<String>) -> Self {
        self.push_event(level, source, message.into(), None)
    }

    /// Add an event carrying a marker
    pub fn marked_event(
        self,
        level: EventLevel,
        source: EventSource,
        marker: EventMarker,
        message: impl Into<String>,
    ) -> Self {
        self.push_event(level, source, message.into(), Some(marker))
    }

    fn push_event(
        mut self,
        level: EventLevel,
        source: EventSource,
        message: String,
        marker: Option<EventMarker>,
    ) -> Self {
        let event = Event {
            seq: self.next_seq,
            session_id: self.commit.session.id.clone(),
            timestamp: Utc::now(),
            level,
            message,
            source,
            marker,
        };
        self.next_seq += 1;
        self.commit.push(Record::Event(event));
        self
    }

    pub fn into_commit(self) -> Commit {
        self.commit
    }
}
