//! Human-readable session timeline in `.conductor/timeline-<session>.md`
//!
//! The timeline is a markdown rendering of the event log for people reading
//! along. It is written fail-open: a write error is logged and dropped, the
//! journal stays the source of truth.

use conductor_core::fail_open::fail_open;
use conductor_core::{Event, EventLevel, Result, Session, SessionId};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maximum characters of an event message shown per line
const TIMELINE_MESSAGE_CHARS: usize = 200;

/// Writes session timelines into a directory
#[derive(Debug, Clone)]
pub struct Timeline {
    dir: PathBuf,
}

impl Timeline {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Timeline file for `session_id`
    pub fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("timeline-{}.md", session_id))
    }

    /// Render a full timeline, oldest event first
    pub fn render(session: &Session, events: &[Event]) -> String {
        let mut content = header(session);
        for event in events {
            content.push_str(&line(event));
        }
        if let Some(ended_at) = session.ended_at {
            content.push_str(&format!(
                "\n---\n\n**Ended**: {} ({})\n",
                ended_at.format("%Y-%m-%d %H:%M:%S UTC"),
                session.status
            ));
            if let Some(summary) = &session.summary {
                content.push_str(&format!("**Summary**: {}\n", summary));
            }
        }
        content
    }

    /// Replace the timeline file for `session` with a fresh rendering
    pub async fn write(&self, session: &Session, events: &[Event]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&session.id);
        fs::write(&path, Self::render(session, events)).await?;
        debug!("Wrote timeline {}", path.display());
        Ok(path)
    }

    /// Append one event to its session's timeline
    ///
    /// This operation is fail-open.
    pub async fn append(&self, event: &Event) {
        fail_open("timeline::append", || async {
            fs::create_dir_all(&self.dir).await?;
            append_to(&self.path_for(&event.session_id), &line(event)).await
        })
        .await;
    }

    /// Follow committed events until the engine goes away
    pub fn follow(self, mut events: broadcast::Receiver<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.append(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Timeline fell behind, {} events not written", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn header(session: &Session) -> String {
    format!(
        "# Conductor Session {}\n\n## Request: {}\n**Started**: {}\n**Critic concurrency**: {}\n**TDD enforced**: {}\n\n---\n\n",
        session.id,
        session.request.lines().next().unwrap_or(&session.request),
        session.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        session.config.critic_concurrency,
        if session.config.tdd_enforced { "yes" } else { "no" },
    )
}

fn line(event: &Event) -> String {
    let icon = match event.level {
        EventLevel::Debug => "·",
        EventLevel::Info => "✓",
        EventLevel::Warning => "⚠",
        EventLevel::Error => "✗",
    };

    let message = if event.message.chars().count() > TIMELINE_MESSAGE_CHARS {
        let truncated: String = event.message.chars().take(TIMELINE_MESSAGE_CHARS).collect();
        format!("{truncated}...")
    } else {
        event.message.clone()
    };

    let marker = event
        .marker
        .map(|m| format!(" `{}`", m))
        .unwrap_or_default();

    format!(
        "- {} **#{}** {} [{}] {}{}\n",
        icon,
        event.seq,
        event.timestamp.format("%H:%M:%S"),
        event.source,
        message.replace('\n', " "),
        marker
    )
}

async fn append_to(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
