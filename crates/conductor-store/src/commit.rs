//! Units of persistence
//!
//! A [`Commit`] is everything one engine mutation writes: the session
//! snapshot after the change plus the entity records and events it produced.
//! Stores persist a commit whole or not at all.

use chrono::{DateTime, Utc};
use conductor_core::{Critic, Event, Plan, QaReview, Session, SessionId, Synthesis, Task};
use serde::{Deserialize, Serialize};

/// A single entity record written by a mutation
///
/// Entity records are full snapshots; replay keeps the last snapshot per id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", content = "data", rename_all = "snake_case")]
pub enum Record {
    Plan(Plan),
    Critic(Critic),
    Synthesis(Synthesis),
    Task(Task),
    Qa(QaReview),
    Event(Event),
}

/// All records produced by one mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Session snapshot after the mutation
    pub session: Session,
    pub records: Vec<Record>,
    pub committed_at: DateTime<Utc>,
}

impl Commit {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            records: Vec::new(),
            committed_at: Utc::now(),
        }
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session.id
    }

    /// Events carried by this commit, in order
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.records.iter().filter_map(|r| match r {
            Record::Event(event) => Some(event),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::{EventLevel, EventSource, SessionConfig, TaskId};

    #[test]
    fn test_record_serialization_is_tagged() {
        let task = Task::new(TaskId(1), "lexer", "tokenize input");
        let json = serde_json::to_value(Record::Task(task)).unwrap();
        assert_eq!(json["record"], "task");
        assert_eq!(json["data"]["name"], "lexer");
    }

    #[test]
    fn test_events_iterator_skips_entities() {
        let session = Session::new("add caching", SessionConfig::default());
        let event = Event {
            seq: 1,
            session_id: session.id.clone(),
            timestamp: Utc::now(),
            level: EventLevel::Info,
            message: "Task task-1 created".to_string(),
            source: EventSource::Task { id: TaskId(1) },
            marker: None,
        };
        let commit = Commit::new(session)
            .with_record(Record::Task(Task::new(TaskId(1), "lexer", "")))
            .with_record(Record::Event(event.clone()));

        let events: Vec<_> = commit.events().collect();
        assert_eq!(events, vec![&event]);
    }
}
