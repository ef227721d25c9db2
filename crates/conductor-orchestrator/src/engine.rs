//! The orchestration engine
//!
//! [`Engine`] is the single authority over one workspace. Every mutation
//! takes the workspace lock and the store's writer lock, catches up on
//! commits written by other handles, validates against the projection,
//! writes one [`Commit`] to the store and only then applies that commit.
//! A failed store write leaves the projection untouched.

use chrono::Utc;
use conductor_core::{
    ConductorConfig, ConductorError, Critic, CriticId, CriticKind, CriticResult, Event,
    EventLevel, EventMarker, EventSource, FileChange, Plan, QaConfig, QaId, QaResult, QaReview,
    Result, Session, SessionConfig, SessionId, SessionStatus, Synthesis, Task, TaskId, TaskPhase,
};
use conductor_store::{Commit, MemoryStore, Record, Store, StoreLock};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::critics::ReportOutcome;
use crate::session::{SessionState, SessionSummary};
use crate::state_machine::{session_transition, PhaseMove};
use crate::task_graph::TaskNode;

/// Engine-wide settings that are not per session
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Accepted QA score range
    pub qa: QaConfig,
    /// Buffer size of the event broadcast channel
    pub channel_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            qa: QaConfig::default(),
            channel_capacity: 256,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &ConductorConfig) -> Self {
        Self {
            qa: config.qa,
            ..Self::default()
        }
    }
}

/// All sessions, in start order
#[derive(Default)]
struct Workspace {
    sessions: Vec<SessionState>,
    /// Commits folded in so far
    seen: usize,
}

impl Workspace {
    fn get(&self, id: &SessionId) -> Result<&SessionState> {
        self.sessions
            .iter()
            .find(|s| s.id() == id)
            .ok_or_else(|| ConductorError::not_found("Session", id))
    }

    /// Session that must still be active for the requested operation
    fn active(&self, id: &SessionId, operation: &str) -> Result<&SessionState> {
        let state = self.get(id)?;
        if !state.session.is_active() {
            return Err(ConductorError::InvalidTransition(format!(
                "cannot {}: session {} is {}",
                operation, id, state.session.status
            )));
        }
        Ok(state)
    }

    fn active_session(&self) -> Option<&SessionState> {
        self.sessions.iter().find(|s| s.session.is_active())
    }

    fn apply(&mut self, commit: &Commit) -> Vec<Event> {
        self.seen += 1;
        match self
            .sessions
            .iter_mut()
            .find(|s| s.id() == commit.session_id())
        {
            Some(state) => state.apply(commit),
            None => {
                let mut state = SessionState::new(commit.session.clone());
                let added = state.apply(commit);
                self.sessions.push(state);
                added
            }
        }
    }
}

/// Workspace held for a mutation together with the store's writer lock
struct WriteGuard<'a> {
    workspace: MutexGuard<'a, Workspace>,
    _store: StoreLock,
}

impl Deref for WriteGuard<'_> {
    type Target = Workspace;

    fn deref(&self) -> &Workspace {
        &self.workspace
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }
}

struct EngineInner {
    store: Arc<dyn Store>,
    workspace: Mutex<Workspace>,
    events: broadcast::Sender<Event>,
    options: EngineOptions,
}

/// Handle to an orchestration engine
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Open an engine over `store`, replaying everything it holds
    pub async fn open(store: Arc<dyn Store>, options: EngineOptions) -> Result<Self> {
        let commits = {
            let _lock = store.lock().await?;
            store.load().await?
        };
        let mut workspace = Workspace::default();
        for commit in &commits {
            workspace.apply(commit);
        }

        info!(
            "Opened {} ({} commits, {} sessions)",
            store.describe(),
            commits.len(),
            workspace.sessions.len()
        );

        let (events, _) = broadcast::channel(options.channel_capacity.max(1));
        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                workspace: Mutex::new(workspace),
                events,
                options,
            }),
        })
    }

    /// Engine backed by a fresh in-memory store
    pub fn in_memory() -> Self {
        let options = EngineOptions::default();
        let (events, _) = broadcast::channel(options.channel_capacity);
        Self {
            inner: Arc::new(EngineInner {
                store: Arc::new(MemoryStore::new()),
                workspace: Mutex::new(Workspace::default()),
                events,
                options,
            }),
        }
    }

    /// Where the engine persists its commits
    pub fn store_description(&self) -> String {
        self.inner.store.describe()
    }

    /// Receive every event after it has been durably committed
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Lock the workspace for a mutation
    ///
    /// Commits other handles wrote since this one last looked are folded in
    /// first, so validation never runs against a stale projection.
    async fn write(&self) -> Result<WriteGuard<'_>> {
        let mut workspace = self.inner.workspace.lock().await;
        let store = self.inner.store.lock().await?;

        let newer = self.inner.store.load_since(workspace.seen).await?;
        if !newer.is_empty() {
            debug!("Catching up on {} commits from other writers", newer.len());
        }
        for commit in &newer {
            for event in workspace.apply(commit) {
                let _ = self.inner.events.send(event);
            }
        }

        Ok(WriteGuard {
            workspace,
            _store: store,
        })
    }

    /// Store `commit`, then fold it into the projection
    async fn persist(&self, workspace: &mut Workspace, commit: Commit) -> Result<()> {
        if let Err(e) = self.inner.store.commit(&commit).await {
            warn!("Commit for session {} rejected: {}", commit.session_id(), e);
            return Err(e);
        }

        for event in workspace.apply(&commit) {
            // No subscribers is fine
            let _ = self.inner.events.send(event);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Session manager
    // ---------------------------------------------------------------

    /// Start a session; only one may be active at a time
    #[instrument(skip(self, config))]
    pub async fn start_session(&self, request: &str, config: SessionConfig) -> Result<SessionId> {
        let request = request.trim();
        if request.is_empty() {
            return Err(ConductorError::InvalidArgument(
                "session request must not be empty".to_string(),
            ));
        }
        if config.critic_concurrency == 0 {
            return Err(ConductorError::InvalidArgument(
                "critic concurrency must be at least 1".to_string(),
            ));
        }
        let range = &self.inner.options.qa;
        if !range.contains(config.qa_pass_threshold) {
            return Err(ConductorError::InvalidArgument(format!(
                "QA pass threshold {} is outside {}..={}",
                config.qa_pass_threshold, range.min_score, range.max_score
            )));
        }

        let mut workspace = self.write().await?;
        if let Some(active) = workspace.active_session() {
            return Err(ConductorError::Conflict(format!(
                "session {} is still active; end it before starting another",
                active.id()
            )));
        }

        let session = Session::new(request, config);
        let id = session.id.clone();
        let commit = SessionState::new(session)
            .stage()
            .event(
                EventLevel::Info,
                EventSource::Session,
                format!("Session started: {}", request),
            )
            .into_commit();

        self.persist(&mut workspace, commit).await?;
        info!("Started session {}", id);
        Ok(id)
    }

    /// Snapshot of a session
    pub async fn status(&self, session_id: &SessionId) -> Result<Session> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.session.clone())
    }

    pub async fn summary(&self, session_id: &SessionId) -> Result<SessionSummary> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.summary())
    }

    /// Most recently started session, whatever its status
    pub async fn current_session(&self) -> Option<SessionId> {
        let workspace = self.inner.workspace.lock().await;
        workspace.sessions.last().map(|s| s.id().clone())
    }

    pub async fn active_session(&self) -> Option<SessionId> {
        let workspace = self.inner.workspace.lock().await;
        workspace.active_session().map(|s| s.id().clone())
    }

    /// Up to `count` sessions, newest first
    pub async fn list_sessions(&self, count: usize) -> Vec<Session> {
        let workspace = self.inner.workspace.lock().await;
        workspace
            .sessions
            .iter()
            .rev()
            .take(count)
            .map(|s| s.session.clone())
            .collect()
    }

    /// End a session
    ///
    /// Critics and QA reviews that have not reported are abandoned; each
    /// gets its own warning event before the terminal event.
    #[instrument(skip(self, summary))]
    pub async fn end_session(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
        summary: Option<String>,
    ) -> Result<()> {
        let mut workspace = self.write().await?;
        let state = workspace.get(session_id)?;
        session_transition(state.session.status, status)?;

        let mut session = state.session.clone();
        session.status = status;
        session.ended_at = Some(Utc::now());
        session.summary = summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut staged = state.events.stage(session.clone());

        for critic in state.critics.prepare_abandon() {
            let message = format!(
                "{} ({}) abandoned: session {} before it reported",
                critic.id, critic.name, status
            );
            staged = staged
                .event(EventLevel::Warning, EventSource::Critic { id: critic.id }, message)
                .record(Record::Critic(critic));
        }
        for review in state.qa.prepare_abandon() {
            let message = format!(
                "{} ({}) abandoned: session {} before it reported",
                review.id, review.name, status
            );
            staged = staged
                .event(EventLevel::Warning, EventSource::Qa { id: review.id }, message)
                .record(Record::Qa(review));
        }

        let level = match status {
            SessionStatus::Completed => EventLevel::Info,
            SessionStatus::Failed => EventLevel::Error,
            _ => EventLevel::Warning,
        };
        let message = match &session.summary {
            Some(summary) => format!("Session {}: {}", status, summary),
            None => format!("Session {}", status),
        };
        let commit = staged
            .event(level, EventSource::Session, message)
            .into_commit();

        let abandoned = commit.records.len() - commit.events().count();
        self.persist(&mut workspace, commit).await?;

        if abandoned > 0 {
            warn!("Session {} ended with {} abandoned workers", session_id, abandoned);
        }
        info!("Session {} {}", session_id, status);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Plan store
    // ---------------------------------------------------------------

    /// Log a new plan version; returns the version number
    pub async fn log_plan(
        &self,
        session_id: &SessionId,
        overview: &str,
        components: Vec<String>,
        file_changes: Vec<FileChange>,
    ) -> Result<u32> {
        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "log a plan")?;

        let plan = state.plans.draft(overview, components, file_changes)?;
        let version = plan.version;
        let message = format!(
            "Plan v{} logged ({} components, {} file changes)",
            version,
            plan.components.len(),
            plan.file_changes.len()
        );
        let commit = state
            .stage()
            .record(Record::Plan(plan))
            .event(EventLevel::Info, EventSource::Plan { version }, message)
            .into_commit();

        self.persist(&mut workspace, commit).await?;
        info!("Session {} plan v{}", session_id, version);
        Ok(version)
    }

    /// Current plan
    pub async fn get_plan(&self, session_id: &SessionId) -> Result<Plan> {
        let workspace = self.inner.workspace.lock().await;
        workspace
            .get(session_id)?
            .plans
            .current()
            .cloned()
            .ok_or_else(|| ConductorError::not_found("Plan", session_id))
    }

    /// Every plan version, oldest first
    pub async fn plan_history(&self, session_id: &SessionId) -> Result<Vec<Plan>> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.plans.history().to_vec())
    }

    // ---------------------------------------------------------------
    // Critic coordinator
    // ---------------------------------------------------------------

    /// Register a critic; fails when every admission slot is taken
    pub async fn spawn_critic(
        &self,
        session_id: &SessionId,
        kind: CriticKind,
        name: &str,
    ) -> Result<CriticId> {
        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "spawn a critic")?;

        let critic = state.critics.prepare_spawn(
            kind,
            name,
            state.session.config.critic_concurrency,
        )?;
        let id = critic.id;
        let message = format!("{} spawned: {} ({})", id, critic.name, critic.kind);
        let commit = state
            .stage()
            .record(Record::Critic(critic))
            .event(EventLevel::Info, EventSource::Critic { id }, message)
            .into_commit();

        self.persist(&mut workspace, commit).await?;
        debug!("Session {} spawned {}", session_id, id);
        Ok(id)
    }

    /// Deliver a critic's result
    ///
    /// Accepted on ended sessions too, so abandoned critics can still land
    /// their result.
    pub async fn report_critic(
        &self,
        session_id: &SessionId,
        critic_id: CriticId,
        result: CriticResult,
    ) -> Result<ReportOutcome> {
        let mut workspace = self.write().await?;
        let state = workspace.get(session_id)?;

        let (critic, outcome) = state.critics.prepare_report(critic_id, result)?;
        let source = EventSource::Critic { id: critic_id };
        let timed_out = critic.result.as_ref().map(|r| r.timed_out).unwrap_or(false);
        let issues = critic
            .result
            .as_ref()
            .map(|r| r.issues.to_string())
            .unwrap_or_default();

        let staged = state.stage().record(Record::Critic(critic));
        let staged = match outcome {
            ReportOutcome::AcceptedLate => staged.marked_event(
                EventLevel::Warning,
                source,
                EventMarker::AbandonedLate,
                format!("{} reported after being abandoned ({})", critic_id, issues),
            ),
            ReportOutcome::Accepted if timed_out => staged.event(
                EventLevel::Warning,
                source,
                format!("{} timed out", critic_id),
            ),
            ReportOutcome::Accepted => staged.event(
                EventLevel::Info,
                source,
                format!("{} reported ({})", critic_id, issues),
            ),
        };

        self.persist(&mut workspace, staged.into_commit()).await?;
        if outcome == ReportOutcome::AcceptedLate {
            warn!("Late report from abandoned {} in {}", critic_id, session_id);
        }
        Ok(outcome)
    }

    /// Record a synthesis over the critics reported so far
    pub async fn log_synthesis(&self, session_id: &SessionId, narrative: &str) -> Result<()> {
        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "log a synthesis")?;

        let synthesis = state.critics.prepare_synthesis(narrative)?;
        let message = format!("Synthesis logged over {} critics", synthesis.critics.len());
        let commit = state
            .stage()
            .record(Record::Synthesis(synthesis))
            .event(EventLevel::Info, EventSource::Synthesis, message)
            .into_commit();

        self.persist(&mut workspace, commit).await
    }

    pub async fn critics(&self, session_id: &SessionId) -> Result<Vec<Critic>> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.critics.critics().cloned().collect())
    }

    /// Latest synthesis, if any
    pub async fn synthesis(&self, session_id: &SessionId) -> Result<Option<Synthesis>> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.critics.synthesis().cloned())
    }

    pub async fn available_critic_slots(&self, session_id: &SessionId) -> Result<usize> {
        let workspace = self.inner.workspace.lock().await;
        let state = workspace.get(session_id)?;
        Ok(state
            .critics
            .available_slots(state.session.config.critic_concurrency))
    }

    // ---------------------------------------------------------------
    // Task graph
    // ---------------------------------------------------------------

    pub async fn create_task(
        &self,
        session_id: &SessionId,
        name: &str,
        description: &str,
        depends_on: Vec<TaskId>,
    ) -> Result<TaskId> {
        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "create a task")?;

        let task = state.tasks.prepare_create(name, description, depends_on)?;
        let id = task.id;
        let message = if task.depends_on.is_empty() {
            format!("{} created: {}", id, task.name)
        } else {
            format!(
                "{} created: {} (depends on {})",
                id,
                task.name,
                join_ids(&task.depends_on)
            )
        };
        let commit = state
            .stage()
            .record(Record::Task(task))
            .event(EventLevel::Info, EventSource::Task { id }, message)
            .into_commit();

        self.persist(&mut workspace, commit).await?;
        Ok(id)
    }

    /// Make `task_id` depend on `depends_on`
    pub async fn add_dependency(
        &self,
        session_id: &SessionId,
        task_id: TaskId,
        depends_on: TaskId,
    ) -> Result<()> {
        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "add a dependency")?;

        let task = state.tasks.prepare_add_dependency(task_id, depends_on)?;
        let commit = state
            .stage()
            .record(Record::Task(task))
            .event(
                EventLevel::Info,
                EventSource::Task { id: task_id },
                format!("{} now depends on {}", task_id, depends_on),
            )
            .into_commit();

        self.persist(&mut workspace, commit).await
    }

    /// Start a pending task whose dependencies are done
    pub async fn start_task(&self, session_id: &SessionId, task_id: TaskId) -> Result<()> {
        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "start a task")?;

        let task = state.tasks.prepare_start(task_id)?;
        let commit = state
            .stage()
            .record(Record::Task(task))
            .event(
                EventLevel::Info,
                EventSource::Task { id: task_id },
                format!("{} started (red)", task_id),
            )
            .into_commit();

        self.persist(&mut workspace, commit).await?;
        debug!("Session {} started {}", session_id, task_id);
        Ok(())
    }

    /// Move a task to another TDD phase
    pub async fn set_task_phase(
        &self,
        session_id: &SessionId,
        task_id: TaskId,
        phase: TaskPhase,
    ) -> Result<()> {
        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "change a task phase")?;

        let update = state
            .tasks
            .prepare_phase(task_id, phase, state.session.config.tdd_enforced)?;
        let (level, message) = match update.kind {
            PhaseMove::InOrder => (
                EventLevel::Info,
                format!("{} moved from {} to {}", task_id, update.from, phase),
            ),
            PhaseMove::OutOfOrder => (
                EventLevel::Warning,
                format!(
                    "{} moved out of order from {} to {}",
                    task_id, update.from, phase
                ),
            ),
        };
        let commit = state
            .stage()
            .record(Record::Task(update.task))
            .event(level, EventSource::Task { id: task_id }, message)
            .into_commit();

        self.persist(&mut workspace, commit).await
    }

    /// Send a task back to red
    pub async fn reopen_task(
        &self,
        session_id: &SessionId,
        task_id: TaskId,
        reason: &str,
    ) -> Result<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ConductorError::InvalidArgument(
                "reopening a task needs a reason".to_string(),
            ));
        }

        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "reopen a task")?;

        let task = state.tasks.prepare_reopen(task_id)?;
        let message = format!(
            "{} reopened from {} (reopen #{}): {}",
            task_id,
            state.tasks.get(task_id)?.phase,
            task.reopen_count,
            reason
        );
        let commit = state
            .stage()
            .record(Record::Task(task))
            .event(EventLevel::Warning, EventSource::Task { id: task_id }, message)
            .into_commit();

        self.persist(&mut workspace, commit).await
    }

    pub async fn get_task(&self, session_id: &SessionId, task_id: TaskId) -> Result<Task> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.tasks.get(task_id)?.clone())
    }

    /// Every task with readiness and unfinished dependencies
    pub async fn graph(&self, session_id: &SessionId) -> Result<Vec<TaskNode>> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.tasks.graph())
    }

    pub async fn ready_tasks(&self, session_id: &SessionId) -> Result<Vec<Task>> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.tasks.ready())
    }

    // ---------------------------------------------------------------
    // QA gate
    // ---------------------------------------------------------------

    pub async fn spawn_qa(
        &self,
        session_id: &SessionId,
        name: &str,
        override_not_required: bool,
    ) -> Result<QaId> {
        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "spawn QA")?;

        let review = state
            .qa
            .prepare_spawn(name, &state.session.config, override_not_required)?;
        let id = review.id;
        let message = if state.session.config.qa_required {
            format!("{} spawned: {}", id, review.name)
        } else {
            format!("{} spawned: {} (not required, overridden)", id, review.name)
        };
        let commit = state
            .stage()
            .record(Record::Qa(review))
            .event(EventLevel::Info, EventSource::Qa { id }, message)
            .into_commit();

        self.persist(&mut workspace, commit).await?;
        Ok(id)
    }

    /// Deliver a QA verdict
    pub async fn report_qa(
        &self,
        session_id: &SessionId,
        qa_id: QaId,
        score: u8,
        passed: bool,
        notes: &str,
    ) -> Result<ReportOutcome> {
        let mut workspace = self.write().await?;
        let state = workspace.get(session_id)?;

        let result = QaResult {
            score,
            passed,
            notes: notes.trim().to_string(),
        };
        let (review, outcome) = state.qa.prepare_report(
            qa_id,
            result,
            state.session.config.qa_pass_threshold,
            &self.inner.options.qa,
        )?;

        let source = EventSource::Qa { id: qa_id };
        let verdict = if passed { "passed" } else { "failed" };
        let staged = state.stage().record(Record::Qa(review));
        let staged = match outcome {
            ReportOutcome::AcceptedLate => staged.marked_event(
                EventLevel::Warning,
                source,
                EventMarker::AbandonedLate,
                format!(
                    "{} {} with score {} after being abandoned",
                    qa_id, verdict, score
                ),
            ),
            ReportOutcome::Accepted => staged.event(
                if passed {
                    EventLevel::Info
                } else {
                    EventLevel::Warning
                },
                source,
                format!("{} {} with score {}", qa_id, verdict, score),
            ),
        };

        self.persist(&mut workspace, staged.into_commit()).await?;
        info!("Session {} {} {} ({})", session_id, qa_id, verdict, score);
        Ok(outcome)
    }

    pub async fn qa_reviews(&self, session_id: &SessionId) -> Result<Vec<QaReview>> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.qa.reviews().cloned().collect())
    }

    // ---------------------------------------------------------------
    // Event log
    // ---------------------------------------------------------------

    /// Append a caller-authored note; returns its sequence number
    pub async fn log_event(
        &self,
        session_id: &SessionId,
        message: &str,
        level: EventLevel,
    ) -> Result<u64> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ConductorError::InvalidArgument(
                "event message must not be empty".to_string(),
            ));
        }

        let mut workspace = self.write().await?;
        let state = workspace.active(session_id, "log an event")?;

        let seq = state.events.next_seq();
        let commit = state
            .stage()
            .event(level, EventSource::Caller, message)
            .into_commit();

        self.persist(&mut workspace, commit).await?;
        Ok(seq)
    }

    /// Up to `count` events at or above `min_level`, newest first
    pub async fn get_events(
        &self,
        session_id: &SessionId,
        count: usize,
        min_level: Option<EventLevel>,
    ) -> Result<Vec<Event>> {
        let workspace = self.inner.workspace.lock().await;
        Ok(workspace.get(session_id)?.events.recent(count, min_level))
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
