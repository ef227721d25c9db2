//! Storage backends

use async_trait::async_trait;
use conductor_core::{ConductorError, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, instrument, warn};

use crate::commit::Commit;

/// Persistence contract for the engine
///
/// `commit` must be all-or-nothing: when it returns an error, a later `load`
/// must not observe any part of that commit.
#[async_trait]
pub trait Store: Send + Sync {
    /// Durably record one mutation
    async fn commit(&self, commit: &Commit) -> Result<()>;

    /// Every commit ever recorded, oldest first
    async fn load(&self) -> Result<Vec<Commit>>;

    /// Commits recorded after the first `seen`
    async fn load_since(&self, seen: usize) -> Result<Vec<Commit>> {
        Ok(self.load().await?.into_iter().skip(seen).collect())
    }

    /// Exclusive hold on the store for a load, validate, commit cycle
    ///
    /// Every writer sharing the store, in this process or another, waits
    /// here until the returned lock is dropped.
    async fn lock(&self) -> Result<StoreLock>;

    /// Human-readable description of where data lives
    fn describe(&self) -> String;
}

/// Held writer lock on a store; released on drop
pub struct StoreLock {
    _guard: Option<OwnedMutexGuard<()>>,
    file: Option<std::fs::File>,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            if let Err(e) = FileExt::unlock(file) {
                warn!("Failed to release journal lock: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("file", &self.file.is_some())
            .finish()
    }
}

/// Storage mode for a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// Keep commits in process memory
    Memory,
    /// Append commits to a JSON-lines journal
    Journal(PathBuf),
}

impl StorageMode {
    /// Open a store for this mode
    pub fn open(&self) -> Arc<dyn Store> {
        match self {
            Self::Memory => Arc::new(MemoryStore::new()),
            Self::Journal(path) => Arc::new(JournalStore::new(path)),
        }
    }
}

/// In-memory store
///
/// Write outages can be simulated with [`MemoryStore::set_writable`].
#[derive(Default)]
pub struct MemoryStore {
    commits: RwLock<Vec<Commit>>,
    read_only: AtomicBool,
    writer: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a simulated write outage; reads keep working
    pub fn set_writable(&self, writable: bool) {
        self.read_only.store(!writable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.commits.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.commits.read().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn commit(&self, commit: &Commit) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            warn!("Rejecting commit for {}: store not writable", commit.session_id());
            return Err(ConductorError::Storage(
                "memory store is not writable".to_string(),
            ));
        }

        self.commits.write().await.push(commit.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Commit>> {
        Ok(self.commits.read().await.clone())
    }

    async fn load_since(&self, seen: usize) -> Result<Vec<Commit>> {
        let commits = self.commits.read().await;
        Ok(commits.get(seen..).map(<[Commit]>::to_vec).unwrap_or_default())
    }

    async fn lock(&self) -> Result<StoreLock> {
        Ok(StoreLock {
            _guard: Some(self.writer.clone().lock_owned().await),
            file: None,
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Append-only JSON-lines journal
///
/// Line format: `<sha256 hex of payload> <commit json>`. A commit that fails
/// to write completely is truncated away so the journal never holds a
/// partial line. Writers serialize on an advisory lock on a sibling
/// `<journal>.lock` file.
pub struct JournalStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JournalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn checksum(payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn encode(commit: &Commit) -> Result<String> {
        let payload = serde_json::to_string(commit)?;
        Ok(format!("{} {}\n", Self::checksum(&payload), payload))
    }

    fn decode(line_no: usize, line: &str) -> Result<Commit> {
        let (checksum, payload) = line.split_once(' ').ok_or_else(|| {
            ConductorError::Storage(format!("journal line {} is malformed", line_no))
        })?;

        if Self::checksum(payload) != checksum {
            return Err(ConductorError::Storage(format!(
                "journal line {} failed checksum verification",
                line_no
            )));
        }

        serde_json::from_str(payload).map_err(|e| {
            ConductorError::Storage(format!("journal line {} is unreadable: {}", line_no, e))
        })
    }
}

#[async_trait]
impl Store for JournalStore {
    #[instrument(skip(self, commit), fields(journal = %self.path.display(), session = %commit.session_id()))]
    async fn commit(&self, commit: &Commit) -> Result<()> {
        let line = Self::encode(commit)?;
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let previous_len = file.metadata().await?.len();

        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;

        if let Err(e) = written {
            warn!("Journal write failed, truncating to {} bytes: {}", previous_len, e);
            if let Err(truncate_err) = file.set_len(previous_len).await {
                warn!("Journal truncate failed: {}", truncate_err);
            }
            return Err(ConductorError::Storage(format!(
                "failed to append to {}: {}",
                self.path.display(),
                e
            )));
        }

        debug!(records = commit.records.len(), "Committed to journal");
        Ok(())
    }

    #[instrument(skip(self), fields(journal = %self.path.display()))]
    async fn load(&self) -> Result<Vec<Commit>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let mut commits = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            commits.push(Self::decode(idx + 1, line)?);
        }

        debug!("Loaded {} commits", commits.len());
        Ok(commits)
    }

    #[instrument(skip(self), fields(journal = %self.path.display()))]
    async fn lock(&self) -> Result<StoreLock> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let lock_path = self.lock_path();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| ConductorError::Storage(format!("journal lock task failed: {}", e)))??;

        debug!("Acquired journal lock");
        Ok(StoreLock {
            _guard: None,
            file: Some(file),
        })
    }

    fn describe(&self) -> String {
        format!("journal at {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::{Session, SessionConfig, Task, TaskId};
    use tempfile::tempdir;

    use crate::commit::Record;

    fn sample_commit(request: &str) -> Commit {
        Commit::new(Session::new(request, SessionConfig::default()))
            .with_record(Record::Task(Task::new(TaskId(1), "parser", "parse input")))
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.commit(&sample_commit("first")).await.unwrap();
        store.commit(&sample_commit("second")).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].session.request, "second");
    }

    #[tokio::test]
    async fn test_memory_store_outage_rejects_commit() {
        let store = MemoryStore::new();
        store.set_writable(false);
        let err = store.commit(&sample_commit("lost")).await.unwrap_err();
        assert!(matches!(err, ConductorError::Storage(_)));

        store.set_writable(true);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_journal_store_appends_and_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".conductor").join("journal.jsonl");
        let store = JournalStore::new(&path);

        let first = sample_commit("first");
        let second = sample_commit("second");
        store.commit(&first).await.unwrap();
        store.commit(&second).await.unwrap();

        let reopened = JournalStore::new(&path);
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[tokio::test]
    async fn test_journal_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JournalStore::new(dir.path().join("nothing.jsonl"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_journal_detects_tampering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let store = JournalStore::new(&path);
        store.commit(&sample_commit("original")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("original", "rewritten")).unwrap();

        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(err.to_string().contains("checksum"));
    }

    #[tokio::test]
    async fn test_load_since_skips_seen_commits() {
        let dir = tempdir().unwrap();
        let store = JournalStore::new(dir.path().join("journal.jsonl"));
        store.commit(&sample_commit("first")).await.unwrap();
        store.commit(&sample_commit("second")).await.unwrap();

        let newer = store.load_since(1).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].session.request, "second");
        assert!(store.load_since(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_journal_lock_excludes_other_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".conductor").join("journal.jsonl");
        let first = JournalStore::new(&path);
        let second = Arc::new(JournalStore::new(&path));

        let held = first.lock().await.unwrap();
        assert!(dir.path().join(".conductor").join("journal.jsonl.lock").exists());

        let waiter = {
            let second = second.clone();
            tokio::spawn(async move { second.lock().await.map(|_| ()) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_memory_lock_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let held = store.lock().await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.lock().await.map(|_| ()) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_storage_mode_open() {
        let store = StorageMode::Memory.open();
        assert_eq!(store.describe(), "memory");

        let dir = tempdir().unwrap();
        let store = StorageMode::Journal(dir.path().join("j.jsonl")).open();
        assert!(store.describe().starts_with("journal at"));
    }
}
