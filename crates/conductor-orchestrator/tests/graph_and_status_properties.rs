//! Table-driven checks of task readiness and terminal session statuses

use conductor_core::{
    ConductorError, CriticKind, CriticResult, EventLevel, EventSource, IssueCounts,
    SessionConfig, SessionId, SessionStatus, TaskId, TaskPhase, WorkerState,
};
use conductor_orchestrator::{Engine, ReportOutcome};
use std::collections::HashSet;

/// A dependency graph: `(task, depends_on)` edges over `tasks` indices
struct Shape {
    name: &'static str,
    tasks: usize,
    edges: &'static [(usize, usize)],
}

const SHAPES: &[Shape] = &[
    Shape {
        name: "chain",
        tasks: 4,
        edges: &[(1, 0), (2, 1), (3, 2)],
    },
    Shape {
        name: "diamond",
        tasks: 4,
        edges: &[(1, 0), (2, 0), (3, 1), (3, 2)],
    },
    Shape {
        name: "fan-in",
        tasks: 4,
        edges: &[(3, 0), (3, 1), (3, 2)],
    },
    Shape {
        name: "fan-out",
        tasks: 4,
        edges: &[(1, 0), (2, 0), (3, 0)],
    },
    Shape {
        name: "reversed chain",
        tasks: 3,
        edges: &[(0, 1), (1, 2)],
    },
    Shape {
        name: "two roots",
        tasks: 5,
        edges: &[(2, 0), (3, 1), (4, 2), (4, 3)],
    },
    Shape {
        name: "independent",
        tasks: 3,
        edges: &[],
    },
];

#[derive(Debug, Clone, Copy)]
enum Build {
    /// Dependencies passed to `create_task`; only for edges pointing backwards
    AtCreation,
    /// Every task created bare, then edges added in reverse order
    AddedLater,
}

async fn build(engine: &Engine, id: &SessionId, shape: &Shape, how: Build) -> Vec<TaskId> {
    let mut ids = Vec::with_capacity(shape.tasks);
    for i in 0..shape.tasks {
        let deps = match how {
            Build::AtCreation => shape
                .edges
                .iter()
                .filter(|(task, _)| *task == i)
                .map(|(_, dep)| ids[*dep])
                .collect(),
            Build::AddedLater => vec![],
        };
        let task = engine
            .create_task(id, &format!("{} {}", shape.name, i), "", deps)
            .await
            .unwrap();
        ids.push(task);
    }

    if let Build::AddedLater = how {
        for (task, dep) in shape.edges.iter().rev() {
            engine
                .add_dependency(id, ids[*task], ids[*dep])
                .await
                .unwrap();
        }
    }
    ids
}

async fn finish(engine: &Engine, id: &SessionId, task: TaskId) {
    for phase in [TaskPhase::Green, TaskPhase::Refactor, TaskPhase::Done] {
        engine.set_task_phase(id, task, phase).await.unwrap();
    }
}

/// Try to start every unfinished task, last first, until all are done
///
/// A start must succeed exactly when every dependency is Done.
async fn drive(engine: &Engine, id: &SessionId, shape: &Shape, how: Build, ids: &[TaskId]) {
    let mut done: HashSet<usize> = HashSet::new();

    for _ in 0..=shape.tasks {
        for i in (0..shape.tasks).rev() {
            if done.contains(&i) {
                continue;
            }
            let deps_done = shape
                .edges
                .iter()
                .filter(|(task, _)| *task == i)
                .all(|(_, dep)| done.contains(dep));

            let ready: HashSet<TaskId> = engine
                .ready_tasks(id)
                .await
                .unwrap()
                .iter()
                .map(|t| t.id)
                .collect();
            assert_eq!(
                ready.contains(&ids[i]),
                deps_done,
                "{} ({:?}): readiness of task {}",
                shape.name,
                how,
                i
            );

            match engine.start_task(id, ids[i]).await {
                Ok(()) => {
                    assert!(deps_done, "{} ({:?}): task {} started early", shape.name, how, i);
                    finish(engine, id, ids[i]).await;
                    done.insert(i);
                }
                Err(ConductorError::DependencyNotSatisfied { .. }) => {
                    assert!(!deps_done, "{} ({:?}): task {} refused", shape.name, how, i);
                }
                Err(other) => panic!("{} ({:?}): unexpected {}", shape.name, how, other),
            }
        }
    }

    assert_eq!(done.len(), shape.tasks, "{} ({:?}) never finished", shape.name, how);
}

#[tokio::test]
async fn start_succeeds_exactly_when_dependencies_are_done() {
    for shape in SHAPES {
        for how in [Build::AtCreation, Build::AddedLater] {
            let forward_edge = shape.edges.iter().any(|(task, dep)| dep > task);
            if forward_edge && matches!(how, Build::AtCreation) {
                continue;
            }

            let engine = Engine::in_memory();
            let id = engine
                .start_session(shape.name, SessionConfig::default())
                .await
                .unwrap();
            let ids = build(&engine, &id, shape, how).await;
            drive(&engine, &id, shape, how, &ids).await;
        }
    }
}

#[tokio::test]
async fn phase_moves_out_of_not_started_respect_dependencies() {
    for shape in SHAPES {
        let engine = Engine::in_memory();
        let id = engine
            .start_session(shape.name, SessionConfig::default().with_tdd_enforced(false))
            .await
            .unwrap();
        let ids = build(&engine, &id, shape, Build::AddedLater).await;

        for (task, _) in shape.edges {
            assert!(
                matches!(
                    engine.set_task_phase(&id, ids[*task], TaskPhase::Green).await,
                    Err(ConductorError::DependencyNotSatisfied { .. })
                ),
                "{}: task {} skipped its dependencies",
                shape.name,
                task
            );
        }
    }
}

const TERMINAL: [SessionStatus; 3] = [
    SessionStatus::Completed,
    SessionStatus::Failed,
    SessionStatus::Cancelled,
];

fn findings() -> CriticResult {
    CriticResult::new("one nit", IssueCounts::new(0, 0, 1))
}

#[tokio::test]
async fn every_terminal_status_abandons_outstanding_workers() {
    for status in TERMINAL {
        let engine = Engine::in_memory();
        let id = engine
            .start_session("ship it", SessionConfig::default())
            .await
            .unwrap();
        let reported = engine
            .spawn_critic(&id, CriticKind::StructuralDesign, "design")
            .await
            .unwrap();
        engine.report_critic(&id, reported, findings()).await.unwrap();
        let pending = engine
            .spawn_critic(&id, CriticKind::Performance, "perf")
            .await
            .unwrap();
        let qa = engine.spawn_qa(&id, "final", false).await.unwrap();

        engine.end_session(&id, status, None).await.unwrap();

        let critics = engine.critics(&id).await.unwrap();
        assert_eq!(critics[0].state, WorkerState::Reported, "{}", status);
        assert_eq!(critics[1].state, WorkerState::Abandoned, "{}", status);
        let reviews = engine.qa_reviews(&id).await.unwrap();
        assert_eq!(reviews[0].state, WorkerState::Abandoned, "{}", status);

        let latest = engine.get_events(&id, 3, None).await.unwrap();
        assert_eq!(latest[0].source, EventSource::Session, "{}", status);
        assert_eq!(latest[1].level, EventLevel::Warning, "{}", status);
        assert_eq!(latest[2].level, EventLevel::Warning, "{}", status);

        assert_eq!(
            engine.report_critic(&id, pending, findings()).await.unwrap(),
            ReportOutcome::AcceptedLate,
            "{}",
            status
        );
        assert_eq!(
            engine.report_qa(&id, qa, 9, true, "late").await.unwrap(),
            ReportOutcome::AcceptedLate,
            "{}",
            status
        );
        assert!(matches!(
            engine.report_critic(&id, pending, findings()).await,
            Err(ConductorError::AlreadyReported { .. })
        ));
        assert!(matches!(
            engine.report_critic(&id, reported, findings()).await,
            Err(ConductorError::AlreadyReported { .. })
        ));

        let critics = engine.critics(&id).await.unwrap();
        assert!(critics[1].late);
        assert_eq!(critics[1].state, WorkerState::Abandoned);
        assert_eq!(engine.status(&id).await.unwrap().status, status);
        assert_eq!(engine.summary(&id).await.unwrap().available_critic_slots, 3);
    }
}

#[tokio::test]
async fn active_never_reappears() {
    for status in TERMINAL {
        let engine = Engine::in_memory();
        let id = engine
            .start_session("wrap up", SessionConfig::default())
            .await
            .unwrap();
        let started = engine.create_task(&id, "started", "", vec![]).await.unwrap();
        engine.start_task(&id, started).await.unwrap();
        let pending = engine.create_task(&id, "pending", "", vec![]).await.unwrap();
        let critic = engine
            .spawn_critic(&id, CriticKind::Security, "sec")
            .await
            .unwrap();
        engine.report_critic(&id, critic, findings()).await.unwrap();

        engine.end_session(&id, status, None).await.unwrap();

        let mut attempts: Vec<(&str, Result<(), ConductorError>)> = vec![
            (
                "log_plan",
                engine.log_plan(&id, "late", vec![], vec![]).await.map(drop),
            ),
            (
                "spawn_critic",
                engine
                    .spawn_critic(&id, CriticKind::Performance, "perf")
                    .await
                    .map(drop),
            ),
            ("log_synthesis", engine.log_synthesis(&id, "late").await),
            (
                "create_task",
                engine.create_task(&id, "late", "", vec![]).await.map(drop),
            ),
            (
                "add_dependency",
                engine.add_dependency(&id, pending, started).await,
            ),
            ("start_task", engine.start_task(&id, pending).await),
            (
                "set_task_phase",
                engine.set_task_phase(&id, started, TaskPhase::Green).await,
            ),
            (
                "reopen_task",
                engine.reopen_task(&id, started, "again").await,
            ),
            (
                "spawn_qa",
                engine.spawn_qa(&id, "late", true).await.map(drop),
            ),
            (
                "log_event",
                engine
                    .log_event(&id, "late", EventLevel::Info)
                    .await
                    .map(drop),
            ),
            (
                "end_session(active)",
                engine.end_session(&id, SessionStatus::Active, None).await,
            ),
        ];
        for again in TERMINAL {
            attempts.push((
                "end_session(terminal)",
                engine.end_session(&id, again, None).await,
            ));
        }

        for (operation, result) in attempts {
            assert!(
                matches!(result, Err(ConductorError::InvalidTransition(_))),
                "{} after {}: {:?}",
                operation,
                status,
                result
            );
            assert_eq!(engine.status(&id).await.unwrap().status, status);
        }
        assert_eq!(engine.active_session().await, None);

        let next = engine
            .start_session("next", SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(engine.active_session().await, Some(next));
        assert_eq!(engine.status(&id).await.unwrap().status, status);
    }
}
