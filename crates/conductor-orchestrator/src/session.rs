//! Per-session projection
//!
//! A [`SessionState`] is rebuilt purely from commits: the engine applies each
//! commit after it has been stored, and replays the whole journal on open.

use conductor_core::{Event, QaResult, Session, SessionId, SessionStatus};
use conductor_store::{Commit, Record};
use serde::{Deserialize, Serialize};

use crate::critics::CriticCoordinator;
use crate::event_log::{EventLog, StagedCommit};
use crate::plans::PlanStore;
use crate::qa::QaGate;
use crate::task_graph::TaskGraph;

/// Everything known about one session
#[derive(Debug)]
pub struct SessionState {
    pub session: Session,
    pub plans: PlanStore,
    pub critics: CriticCoordinator,
    pub tasks: TaskGraph,
    pub qa: QaGate,
    pub events: EventLog,
}

impl SessionState {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            plans: PlanStore::new(),
            critics: CriticCoordinator::new(),
            tasks: TaskGraph::new(),
            qa: QaGate::new(),
            events: EventLog::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.session.id
    }

    /// Begin a commit carrying the current session snapshot
    pub fn stage(&self) -> StagedCommit {
        self.events.stage(self.session.clone())
    }

    /// Fold a committed mutation into the projection
    ///
    /// Returns the events the commit added, in order.
    pub fn apply(&mut self, commit: &Commit) -> Vec<Event> {
        self.session = commit.session.clone();
        let mut added = Vec::new();

        for record in &commit.records {
            match record {
                Record::Plan(plan) => self.plans.apply(plan.clone()),
                Record::Critic(critic) => self.critics.apply_critic(critic.clone()),
                Record::Synthesis(synthesis) => self.critics.apply_synthesis(synthesis.clone()),
                Record::Task(task) => self.tasks.apply(task.clone()),
                Record::Qa(review) => self.qa.apply(review.clone()),
                Record::Event(event) => {
                    self.events.apply(event.clone());
                    added.push(event.clone());
                }
            }
        }

        added
    }

    pub fn summary(&self) -> SessionSummary {
        let (critics_spawned, critics_reported, critics_abandoned) = self.critics.state_counts();
        let (tasks_pending, tasks_in_progress, tasks_done) = self.tasks.status_counts();

        SessionSummary {
            session_id: self.session.id.clone(),
            request: self.session.request.clone(),
            status: self.session.status,
            plan_version: self.plans.current().map(|p| p.version),
            critics_spawned,
            critics_reported,
            critics_abandoned,
            available_critic_slots: self
                .critics
                .available_slots(self.session.config.critic_concurrency),
            syntheses: self.critics.syntheses().len(),
            tasks_pending,
            tasks_in_progress,
            tasks_done,
            tasks_ready: self.tasks.ready().len(),
            qa_verdict: self.qa.latest_verdict().cloned(),
            event_count: self.events.len(),
        }
    }
}

/// Counts describing a session at a glance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub request: String,
    pub status: SessionStatus,
    pub plan_version: Option<u32>,
    pub critics_spawned: usize,
    pub critics_reported: usize,
    pub critics_abandoned: usize,
    pub available_critic_slots: usize,
    pub syntheses: usize,
    pub tasks_pending: usize,
    pub tasks_in_progress: usize,
    pub tasks_done: usize,
    pub tasks_ready: usize,
    pub qa_verdict: Option<QaResult>,
    pub event_count: usize,
}
