//! Versioned plan storage for a session

use chrono::Utc;
use conductor_core::{ConductorError, FileChange, Plan, Result};

/// Every plan version logged in a session, oldest first
#[derive(Debug, Default)]
pub struct PlanStore {
    versions: Vec<Plan>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the next plan version without storing it
    pub fn draft(
        &self,
        overview: &str,
        components: Vec<String>,
        file_changes: Vec<FileChange>,
    ) -> Result<Plan> {
        let overview = overview.trim();
        if overview.is_empty() {
            return Err(ConductorError::InvalidArgument(
                "plan overview must not be empty".to_string(),
            ));
        }

        let components: Vec<String> = components
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        Ok(Plan {
            version: self.current().map(|p| p.version + 1).unwrap_or(1),
            overview: overview.to_string(),
            components,
            file_changes,
            created_at: Utc::now(),
        })
    }

    /// Store a committed plan version; versions arrive in order
    pub fn apply(&mut self, plan: Plan) {
        self.versions.push(plan);
    }

    pub fn current(&self) -> Option<&Plan> {
        self.versions.last()
    }

    pub fn history(&self) -> &[Plan] {
        &self.versions
    }
}
