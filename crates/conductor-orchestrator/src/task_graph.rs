//! Task dependency graph and the per-task TDD state machine
//!
//! Every mutation is prepared against a snapshot and returns the updated
//! [`Task`]; nothing here changes until the engine applies a committed record.

use conductor_core::{ConductorError, Result, Task, TaskId, TaskPhase, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::state_machine::{phase_transition, PhaseMove};

/// A task with its readiness in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub task: Task,
    /// Pending with every dependency done
    pub ready: bool,
    /// Dependencies that are not done yet
    pub waiting_on: Vec<TaskId>,
}

/// A validated phase change
#[derive(Debug, Clone)]
pub struct PhaseUpdate {
    pub task: Task,
    pub from: TaskPhase,
    pub kind: PhaseMove,
}

/// Tasks of one session keyed by id
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TaskId) -> Result<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| ConductorError::not_found("Task", id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn next_id(&self) -> TaskId {
        self.tasks
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(TaskId(1))
    }

    /// Dependencies of `task` that are not done
    fn unfinished_dependencies(&self, task: &Task) -> Vec<TaskId> {
        task.depends_on
            .iter()
            .copied()
            .filter(|dep| {
                self.tasks
                    .get(dep)
                    .map(|t| t.status != TaskStatus::Done)
                    .unwrap_or(true)
            })
            .collect()
    }

    fn require_dependencies_done(&self, task: &Task) -> Result<()> {
        let blocked_by = self.unfinished_dependencies(task);
        if blocked_by.is_empty() {
            return Ok(());
        }
        Err(ConductorError::DependencyNotSatisfied {
            task: task.id.to_string(),
            blocked_by: blocked_by
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Started or finished tasks that depend directly on `task_id`
    fn started_dependents(&self, task_id: TaskId) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status != TaskStatus::Pending && t.depends_on.contains(&task_id))
            .map(|t| t.id)
            .collect()
    }

    /// Whether `to` is reachable from `from` along dependency edges
    pub fn reaches(&self, from: TaskId, to: TaskId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(task) = self.tasks.get(&current) {
                stack.extend(task.depends_on.iter().copied());
            }
        }

        false
    }

    /// Build a new task
    ///
    /// Every dependency must already exist; repeated ids collapse to one edge.
    pub fn prepare_create(
        &self,
        name: &str,
        description: &str,
        depends_on: Vec<TaskId>,
    ) -> Result<Task> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConductorError::InvalidArgument(
                "task name must not be empty".to_string(),
            ));
        }

        let mut deps = Vec::with_capacity(depends_on.len());
        for dep in depends_on {
            self.get(dep)?;
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        let id = self.next_id();
        if let Some(dep) = deps.iter().find(|dep| self.reaches(**dep, id)) {
            return Err(ConductorError::Cycle(format!(
                "{} would depend on itself through {}",
                id, dep
            )));
        }

        Ok(Task::new(id, name, description.trim()).with_dependencies(deps))
    }

    /// Add an edge `task_id -> depends_on`
    pub fn prepare_add_dependency(&self, task_id: TaskId, depends_on: TaskId) -> Result<Task> {
        let task = self.get(task_id)?;
        self.get(depends_on)?;

        if task.status != TaskStatus::Pending {
            return Err(ConductorError::InvalidTransition(format!(
                "{} is {}; dependencies can only be added to pending tasks",
                task_id, task.status
            )));
        }

        if self.reaches(depends_on, task_id) {
            return Err(ConductorError::Cycle(format!(
                "{} already depends on {}",
                depends_on, task_id
            )));
        }

        if task.depends_on.contains(&depends_on) {
            return Err(ConductorError::Conflict(format!(
                "{} already depends on {}",
                task_id, depends_on
            )));
        }

        let mut task = task.clone();
        task.depends_on.push(depends_on);
        task.updated_at = chrono::Utc::now();
        Ok(task)
    }

    /// Begin work on a pending task: status InProgress, phase Red
    pub fn prepare_start(&self, task_id: TaskId) -> Result<Task> {
        let task = self.get(task_id)?;
        if task.status != TaskStatus::Pending {
            return Err(ConductorError::InvalidTransition(format!(
                "{} is already {}",
                task_id, task.status
            )));
        }
        self.require_dependencies_done(task)?;

        let mut task = task.clone();
        task.enter_phase(TaskPhase::Red);
        Ok(task)
    }

    /// Move a task to `phase`
    pub fn prepare_phase(
        &self,
        task_id: TaskId,
        phase: TaskPhase,
        tdd_enforced: bool,
    ) -> Result<PhaseUpdate> {
        let task = self.get(task_id)?;
        let kind = phase_transition(task.phase, phase, tdd_enforced)?;

        if task.phase == TaskPhase::NotStarted {
            self.require_dependencies_done(task)?;
        }

        let from = task.phase;
        let mut task = task.clone();
        task.enter_phase(phase);
        Ok(PhaseUpdate { task, from, kind })
    }

    /// Send an in-progress or done task back to Red
    ///
    /// Refused while any task depending on it has started, since that task
    /// could then finish ahead of its dependency.
    pub fn prepare_reopen(&self, task_id: TaskId) -> Result<Task> {
        let task = self.get(task_id)?;
        if task.status == TaskStatus::Pending {
            return Err(ConductorError::InvalidTransition(format!(
                "{} has not started; nothing to reopen",
                task_id
            )));
        }
        self.require_dependencies_done(task)?;

        let started = self.started_dependents(task_id);
        if !started.is_empty() {
            return Err(ConductorError::InvalidTransition(format!(
                "cannot reopen {}: {} already started on top of it",
                task_id,
                started
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let mut task = task.clone();
        task.reopen_count += 1;
        task.enter_phase(TaskPhase::Red);
        Ok(task)
    }

    pub fn apply(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    /// Every task with readiness, in id order
    pub fn graph(&self) -> Vec<TaskNode> {
        self.tasks
            .values()
            .map(|task| {
                let waiting_on = self.unfinished_dependencies(task);
                TaskNode {
                    ready: task.status == TaskStatus::Pending && waiting_on.is_empty(),
                    waiting_on,
                    task: task.clone(),
                }
            })
            .collect()
    }

    /// Pending tasks whose dependencies are all done
    pub fn ready(&self) -> Vec<Task> {
        self.graph()
            .into_iter()
            .filter(|node| node.ready)
            .map(|node| node.task)
            .collect()
    }

    /// Count of tasks in each status: (pending, in progress, done)
    pub fn status_counts(&self) -> (usize, usize, usize) {
        self.tasks
            .values()
            .fold((0, 0, 0), |(p, i, d), t| match t.status {
                TaskStatus::Pending => (p + 1, i, d),
                TaskStatus::InProgress => (p, i + 1, d),
                TaskStatus::Done => (p, i, d + 1),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(graph: &mut TaskGraph, name: &str, deps: Vec<TaskId>) -> TaskId {
        let task = graph.prepare_create(name, "", deps).unwrap();
        let id = task.id;
        graph.apply(task);
        id
    }

    fn advance(graph: &mut TaskGraph, id: TaskId, phase: TaskPhase) {
        let update = graph.prepare_phase(id, phase, true).unwrap();
        graph.apply(update.task);
    }

    fn finish(graph: &mut TaskGraph, id: TaskId) {
        for phase in [
            TaskPhase::Red,
            TaskPhase::Green,
            TaskPhase::Refactor,
            TaskPhase::Done,
        ] {
            advance(graph, id, phase);
        }
    }

    fn finish_from_red(graph: &mut TaskGraph, id: TaskId) {
        for phase in [TaskPhase::Green, TaskPhase::Refactor, TaskPhase::Done] {
            advance(graph, id, phase);
        }
    }

    #[test]
    fn test_dependency_blocks_start() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let b = create(&mut graph, "b", vec![a]);

        let err = graph.prepare_start(b).unwrap_err();
        assert!(matches!(err, ConductorError::DependencyNotSatisfied { .. }));
        assert!(err.to_string().contains("task-1"));

        finish(&mut graph, a);
        let started = graph.prepare_start(b).unwrap();
        assert_eq!(started.phase, TaskPhase::Red);
        assert_eq!(started.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_leaving_not_started_checks_dependencies() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let b = create(&mut graph, "b", vec![a]);

        assert!(matches!(
            graph.prepare_phase(b, TaskPhase::Red, true),
            Err(ConductorError::DependencyNotSatisfied { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let graph = TaskGraph::new();
        let err = graph.prepare_create("a", "", vec![TaskId(4)]).unwrap_err();
        assert!(matches!(err, ConductorError::NotFound { .. }));
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let task = graph.prepare_create("b", "", vec![a, a]).unwrap();
        assert_eq!(task.depends_on, vec![a]);
    }

    #[test]
    fn test_add_dependency_detects_cycles() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let b = create(&mut graph, "b", vec![a]);
        let c = create(&mut graph, "c", vec![b]);

        assert!(matches!(
            graph.prepare_add_dependency(a, c),
            Err(ConductorError::Cycle(_))
        ));
        assert!(matches!(
            graph.prepare_add_dependency(a, a),
            Err(ConductorError::Cycle(_))
        ));

        let d = create(&mut graph, "d", vec![]);
        let updated = graph.prepare_add_dependency(d, c).unwrap();
        assert_eq!(updated.depends_on, vec![c]);
    }

    #[test]
    fn test_add_dependency_requires_pending() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let b = create(&mut graph, "b", vec![]);
        let started = graph.prepare_start(a).unwrap();
        graph.apply(started);

        assert!(matches!(
            graph.prepare_add_dependency(a, b),
            Err(ConductorError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let started = graph.prepare_start(a).unwrap();
        graph.apply(started);
        assert!(matches!(
            graph.prepare_start(a),
            Err(ConductorError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_reopen_returns_to_red() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        assert!(graph.prepare_reopen(a).is_err());

        finish(&mut graph, a);
        let reopened = graph.prepare_reopen(a).unwrap();
        assert_eq!(reopened.phase, TaskPhase::Red);
        assert_eq!(reopened.status, TaskStatus::InProgress);
        assert_eq!(reopened.reopen_count, 1);
        assert_eq!(reopened.phase_history.len(), 5);
    }

    #[test]
    fn test_reopen_refused_while_dependent_started() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let b = create(&mut graph, "b", vec![a]);
        finish(&mut graph, a);
        advance(&mut graph, b, TaskPhase::Red);

        let err = graph.prepare_reopen(a).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidTransition(_)));
        assert!(err.to_string().contains("task-2"));

        finish_from_red(&mut graph, b);
        assert!(graph.prepare_reopen(a).is_err());
        assert_eq!(graph.get(a).unwrap().phase, TaskPhase::Done);
    }

    #[test]
    fn test_reopen_blocks_pending_dependents() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let b = create(&mut graph, "b", vec![a]);
        finish(&mut graph, a);
        assert_eq!(graph.ready().len(), 1);

        let reopened = graph.prepare_reopen(a).unwrap();
        graph.apply(reopened);

        assert!(graph.ready().is_empty());
        assert!(matches!(
            graph.prepare_start(b),
            Err(ConductorError::DependencyNotSatisfied { .. })
        ));
    }

    #[test]
    fn test_graph_readiness() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let b = create(&mut graph, "b", vec![a]);

        let nodes = graph.graph();
        assert!(nodes[0].ready);
        assert!(!nodes[1].ready);
        assert_eq!(nodes[1].waiting_on, vec![a]);

        finish(&mut graph, a);
        let ready: Vec<TaskId> = graph.ready().iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![b]);
        assert_eq!(graph.status_counts(), (1, 0, 1));
    }

    #[test]
    fn test_relaxed_phase_reports_out_of_order() {
        let mut graph = TaskGraph::new();
        let a = create(&mut graph, "a", vec![]);
        let update = graph.prepare_phase(a, TaskPhase::Green, false).unwrap();
        assert_eq!(update.kind, PhaseMove::OutOfOrder);
        assert_eq!(update.from, TaskPhase::NotStarted);
        assert_eq!(update.task.status, TaskStatus::InProgress);
    }
}
