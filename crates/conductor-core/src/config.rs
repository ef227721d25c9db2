//! Configuration management for Conductor
//!
//! Workspace-level settings: defaults applied to new sessions, the QA score
//! range, where the journal lives, and event listing defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ConductorError, Result, SessionConfig};

/// Directory holding Conductor state inside a workspace
pub const CONDUCTOR_DIR: &str = ".conductor";

/// Workspace-level Conductor configuration
///
/// Loaded from `.conductor/config.toml` in the workspace root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Defaults for new sessions
    #[serde(default)]
    pub session: SessionDefaults,

    /// QA scoring policy
    #[serde(default)]
    pub qa: QaConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Event listing settings
    #[serde(default)]
    pub events: EventsConfig,
}

/// Defaults applied to `start_session` when the caller does not override them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_critic_concurrency")]
    pub critic_concurrency: usize,

    #[serde(default = "default_true")]
    pub tdd_enforced: bool,

    #[serde(default = "default_true")]
    pub qa_required: bool,

    #[serde(default = "default_pass_threshold")]
    pub qa_pass_threshold: u8,
}

/// Range of valid QA scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaConfig {
    #[serde(default = "default_min_score")]
    pub min_score: u8,

    #[serde(default = "default_max_score")]
    pub max_score: u8,
}

/// Journal location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Journal file, relative to the workspace root
    #[serde(default = "default_journal_path")]
    pub journal: PathBuf,
}

/// Event listing defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Number of events returned when the caller gives no count
    #[serde(default = "default_recent_events")]
    pub default_count: usize,
}

// Default value providers
fn default_critic_concurrency() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_pass_threshold() -> u8 {
    7
}

fn default_min_score() -> u8 {
    1
}

fn default_max_score() -> u8 {
    10
}

fn default_journal_path() -> PathBuf {
    PathBuf::from(CONDUCTOR_DIR).join("journal.jsonl")
}

fn default_recent_events() -> usize {
    20
}

impl ConductorConfig {
    /// Load configuration from `.conductor/config.toml` or use defaults
    pub fn load_or_default(workspace_root: &Path) -> Result<Self> {
        let config_path = Self::path(workspace_root);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).map_err(|e| {
                ConductorError::Config(format!("Failed to read {}: {}", config_path.display(), e))
            })?;
            toml::from_str(&content).map_err(|e| {
                ConductorError::Config(format!("Failed to parse config file: {}", e))
            })?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.conductor/config.toml`
    pub fn write_default(workspace_root: &Path) -> Result<PathBuf> {
        let config_dir = workspace_root.join(CONDUCTOR_DIR);
        std::fs::create_dir_all(&config_dir)
            .map_err(|e| ConductorError::Config(format!("Failed to create config dir: {}", e)))?;

        let config_path = Self::path(workspace_root);
        let content = toml::to_string_pretty(&Self::default()).map_err(|e| {
            ConductorError::Config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(&config_path, content)
            .map_err(|e| ConductorError::Config(format!("Failed to write config: {}", e)))?;
        Ok(config_path)
    }

    /// Location of the config file for a workspace
    pub fn path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(CONDUCTOR_DIR).join("config.toml")
    }

    /// Absolute journal path for a workspace
    pub fn journal_path(&self, workspace_root: &Path) -> PathBuf {
        if self.storage.journal.is_absolute() {
            self.storage.journal.clone()
        } else {
            workspace_root.join(&self.storage.journal)
        }
    }

    /// Session config built from the workspace defaults
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            critic_concurrency: self.session.critic_concurrency,
            tdd_enforced: self.session.tdd_enforced,
            qa_required: self.session.qa_required,
            qa_pass_threshold: self.session.qa_pass_threshold,
        }
    }

    /// Reject settings no session could run with
    pub fn validate(&self) -> Result<()> {
        if self.qa.min_score > self.qa.max_score {
            return Err(ConductorError::Config(format!(
                "qa.min_score ({}) exceeds qa.max_score ({})",
                self.qa.min_score, self.qa.max_score
            )));
        }
        if self.session.critic_concurrency == 0 {
            return Err(ConductorError::Config(
                "session.critic_concurrency must be at least 1".to_string(),
            ));
        }
        if !self.qa.contains(self.session.qa_pass_threshold) {
            return Err(ConductorError::Config(format!(
                "session.qa_pass_threshold ({}) is outside {}..={}",
                self.session.qa_pass_threshold, self.qa.min_score, self.qa.max_score
            )));
        }
        Ok(())
    }
}

impl QaConfig {
    pub fn contains(&self, score: u8) -> bool {
        (self.min_score..=self.max_score).contains(&score)
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            session: SessionDefaults::default(),
            qa: QaConfig::default(),
            storage: StorageConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            critic_concurrency: default_critic_concurrency(),
            tdd_enforced: true,
            qa_required: true,
            qa_pass_threshold: default_pass_threshold(),
        }
    }
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            max_score: default_max_score(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal: default_journal_path(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            default_count: default_recent_events(),
        }
    }
}
