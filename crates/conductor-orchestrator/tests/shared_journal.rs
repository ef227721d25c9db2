//! Several engine handles writing one journal, as separate CLI processes do

use conductor_core::{ConductorError, CriticKind, EventLevel, SessionConfig, SessionStatus};
use conductor_orchestrator::{Engine, EngineOptions};
use conductor_store::{JournalStore, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn journal_path(dir: &TempDir) -> PathBuf {
    dir.path().join(".conductor").join("journal.jsonl")
}

async fn open(path: &Path) -> Engine {
    let store: Arc<dyn Store> = Arc::new(JournalStore::new(path));
    Engine::open(store, EngineOptions::default()).await.unwrap()
}

#[tokio::test]
async fn second_handle_sees_the_active_session() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);
    let first = open(&path).await;
    let second = open(&path).await;

    let id = first
        .start_session("feature a", SessionConfig::default())
        .await
        .unwrap();
    let err = second
        .start_session("feature b", SessionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Conflict(_)));

    second
        .end_session(&id, SessionStatus::Completed, None)
        .await
        .unwrap();
    assert!(matches!(
        first.end_session(&id, SessionStatus::Cancelled, None).await,
        Err(ConductorError::InvalidTransition(_))
    ));

    let replayed = open(&path).await;
    let sessions = replayed.list_sessions(10).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Completed);
}

#[tokio::test]
async fn critic_cap_holds_across_handles() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);
    let first = open(&path).await;
    let id = first
        .start_session(
            "tighten auth",
            SessionConfig::default().with_critic_concurrency(1),
        )
        .await
        .unwrap();
    let second = open(&path).await;

    let perf = first
        .spawn_critic(&id, CriticKind::Performance, "perf")
        .await
        .unwrap();
    let err = second
        .spawn_critic(&id, CriticKind::Security, "sec")
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::ResourceExhausted(_)));

    let replayed = open(&path).await;
    let critics = replayed.critics(&id).await.unwrap();
    assert_eq!(critics.len(), 1);
    assert_eq!(critics[0].id, perf);
    assert_eq!(critics[0].name, "perf");
}

#[tokio::test]
async fn ids_and_sequences_stay_unique() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);
    let first = open(&path).await;
    let second = open(&path).await;

    let id = first
        .start_session("split the parser", SessionConfig::default())
        .await
        .unwrap();
    let lexer = first.create_task(&id, "lexer", "", vec![]).await.unwrap();
    let parser = second.create_task(&id, "parser", "", vec![]).await.unwrap();
    assert_eq!(lexer.to_string(), "task-1");
    assert_eq!(parser.to_string(), "task-2");

    let seq = first
        .log_event(&id, "both tasks filed", EventLevel::Info)
        .await
        .unwrap();
    assert_eq!(seq, 4);

    let replayed = open(&path).await;
    let seqs: Vec<u64> = replayed
        .get_events(&id, 100, None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(seqs, vec![4, 3, 2, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_writers_produce_contiguous_sequences() {
    let dir = TempDir::new().unwrap();
    let path = journal_path(&dir);
    let first = open(&path).await;
    let id = first
        .start_session("load test", SessionConfig::default())
        .await
        .unwrap();
    let second = open(&path).await;

    let mut handles = Vec::new();
    for (n, engine) in [first, second].into_iter().enumerate() {
        for i in 0..10 {
            let engine = engine.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .log_event(&id, &format!("writer {} note {}", n, i), EventLevel::Info)
                    .await
            }));
        }
    }

    let mut seqs = Vec::new();
    for handle in handles {
        seqs.push(handle.await.unwrap().unwrap());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (2..=21).collect::<Vec<_>>());

    let replayed = open(&path).await;
    let mut logged: Vec<u64> = replayed
        .get_events(&id, 100, None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.seq)
        .collect();
    logged.reverse();
    assert_eq!(logged, (1..=21).collect::<Vec<_>>());
}
