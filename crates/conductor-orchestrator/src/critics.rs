//! Critic coordination with admission control
//!
//! Critics are external workers. Spawning one only registers intent and takes
//! one of `critic_concurrency` slots; the slot is released when the critic
//! reports. Reports may arrive in any order.

use chrono::Utc;
use conductor_core::{
    ConductorError, Critic, CriticId, CriticKind, CriticResult, Result, Synthesis, WorkerState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a worker report was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    Accepted,
    /// The worker had been abandoned; the result is kept and flagged
    AcceptedLate,
}

/// Critics and syntheses of one session
#[derive(Debug, Default)]
pub struct CriticCoordinator {
    critics: BTreeMap<CriticId, Critic>,
    syntheses: Vec<Synthesis>,
}

impl CriticCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: CriticId) -> Result<&Critic> {
        self.critics
            .get(&id)
            .ok_or_else(|| ConductorError::not_found("Critic", id))
    }

    pub fn critics(&self) -> impl Iterator<Item = &Critic> {
        self.critics.values()
    }

    /// Critics still holding an admission slot
    pub fn outstanding(&self) -> usize {
        self.critics.values().filter(|c| c.is_outstanding()).count()
    }

    pub fn available_slots(&self, limit: usize) -> usize {
        limit.saturating_sub(self.outstanding())
    }

    fn next_id(&self) -> CriticId {
        self.critics
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(CriticId(1))
    }

    /// Admit a new critic if a slot is free
    pub fn prepare_spawn(&self, kind: CriticKind, name: &str, limit: usize) -> Result<Critic> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConductorError::InvalidArgument(
                "critic name must not be empty".to_string(),
            ));
        }

        let outstanding = self.outstanding();
        if outstanding >= limit {
            return Err(ConductorError::ResourceExhausted(format!(
                "{} of {} critic slots in use; wait for a critic to report",
                outstanding, limit
            )));
        }

        Ok(Critic::new(self.next_id(), kind, name))
    }

    /// Record a critic's result
    ///
    /// Abandoned critics accept exactly one late result and stay abandoned.
    pub fn prepare_report(
        &self,
        id: CriticId,
        result: CriticResult,
    ) -> Result<(Critic, ReportOutcome)> {
        let mut critic = self.get(id)?.clone();

        let outcome = match critic.state {
            WorkerState::Spawned => {
                critic.state = WorkerState::Reported;
                ReportOutcome::Accepted
            }
            WorkerState::Abandoned if !critic.has_result() => {
                critic.late = true;
                ReportOutcome::AcceptedLate
            }
            WorkerState::Reported | WorkerState::Abandoned => {
                return Err(ConductorError::already_reported("Critic", id));
            }
        };

        critic.result = Some(result);
        critic.reported_at = Some(Utc::now());
        Ok((critic, outcome))
    }

    /// Snapshots of every spawned critic marked abandoned
    pub fn prepare_abandon(&self) -> Vec<Critic> {
        self.critics
            .values()
            .filter(|c| c.is_outstanding())
            .map(|c| {
                let mut critic = c.clone();
                critic.state = WorkerState::Abandoned;
                critic
            })
            .collect()
    }

    /// Build a synthesis over the critics that have reported so far
    pub fn prepare_synthesis(&self, narrative: &str) -> Result<Synthesis> {
        let narrative = narrative.trim();
        if narrative.is_empty() {
            return Err(ConductorError::InvalidArgument(
                "synthesis narrative must not be empty".to_string(),
            ));
        }

        let reported: Vec<CriticId> = self
            .critics
            .values()
            .filter(|c| c.state == WorkerState::Reported)
            .map(|c| c.id)
            .collect();

        if reported.is_empty() {
            return Err(ConductorError::InvalidTransition(
                "no critic has reported yet; synthesis needs at least one result".to_string(),
            ));
        }

        Ok(Synthesis {
            narrative: narrative.to_string(),
            critics: reported,
            created_at: Utc::now(),
        })
    }

    pub fn apply_critic(&mut self, critic: Critic) {
        self.critics.insert(critic.id, critic);
    }

    pub fn apply_synthesis(&mut self, synthesis: Synthesis) {
        self.syntheses.push(synthesis);
    }

    /// Latest synthesis
    pub fn synthesis(&self) -> Option<&Synthesis> {
        self.syntheses.last()
    }

    pub fn syntheses(&self) -> &[Synthesis] {
        &self.syntheses
    }

    /// Count of critics in each state: (spawned, reported, abandoned)
    pub fn state_counts(&self) -> (usize, usize, usize) {
        self.critics
            .values()
            .fold((0, 0, 0), |(s, r, a), c| match c.state {
                WorkerState::Spawned => (s + 1, r, a),
                WorkerState::Reported => (s, r + 1, a),
                WorkerState::Abandoned => (s, r, a + 1),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::IssueCounts;

    fn spawn(coordinator: &mut CriticCoordinator, name: &str, limit: usize) -> Result<CriticId> {
        let critic = coordinator.prepare_spawn(CriticKind::StructuralDesign, name, limit)?;
        let id = critic.id;
        coordinator.apply_critic(critic);
        Ok(id)
    }

    fn report(coordinator: &mut CriticCoordinator, id: CriticId) -> Result<ReportOutcome> {
        let (critic, outcome) =
            coordinator.prepare_report(id, CriticResult::new("ok", IssueCounts::new(0, 1, 2)))?;
        coordinator.apply_critic(critic);
        Ok(outcome)
    }

    #[test]
    fn test_admission_limit() {
        let mut coordinator = CriticCoordinator::new();
        let first = spawn(&mut coordinator, "design", 2).unwrap();
        spawn(&mut coordinator, "tests", 2).unwrap();

        let err = spawn(&mut coordinator, "deps", 2).unwrap_err();
        assert!(matches!(err, ConductorError::ResourceExhausted(_)));
        assert_eq!(coordinator.available_slots(2), 0);

        report(&mut coordinator, first).unwrap();
        assert_eq!(coordinator.available_slots(2), 1);
        let third = spawn(&mut coordinator, "deps", 2).unwrap();
        assert_eq!(third, CriticId(3));
    }

    #[test]
    fn test_report_once() {
        let mut coordinator = CriticCoordinator::new();
        let id = spawn(&mut coordinator, "design", 3).unwrap();

        assert_eq!(report(&mut coordinator, id).unwrap(), ReportOutcome::Accepted);
        let err = report(&mut coordinator, id).unwrap_err();
        assert!(matches!(err, ConductorError::AlreadyReported { .. }));
    }

    #[test]
    fn test_unknown_critic_rejected() {
        let coordinator = CriticCoordinator::new();
        let err = coordinator
            .prepare_report(CriticId(9), CriticResult::default())
            .unwrap_err();
        assert!(matches!(err, ConductorError::NotFound { .. }));
    }

    #[test]
    fn test_abandoned_critic_accepts_one_late_report() {
        let mut coordinator = CriticCoordinator::new();
        let id = spawn(&mut coordinator, "design", 3).unwrap();
        for critic in coordinator.prepare_abandon() {
            coordinator.apply_critic(critic);
        }
        assert_eq!(coordinator.get(id).unwrap().state, WorkerState::Abandoned);
        assert_eq!(coordinator.outstanding(), 0);

        assert_eq!(report(&mut coordinator, id).unwrap(), ReportOutcome::AcceptedLate);
        let critic = coordinator.get(id).unwrap();
        assert!(critic.late);
        assert_eq!(critic.state, WorkerState::Abandoned);

        assert!(report(&mut coordinator, id).is_err());
    }

    #[test]
    fn test_synthesis_needs_a_report() {
        let mut coordinator = CriticCoordinator::new();
        let first = spawn(&mut coordinator, "design", 3).unwrap();
        spawn(&mut coordinator, "tests", 3).unwrap();

        assert!(matches!(
            coordinator.prepare_synthesis("summary"),
            Err(ConductorError::InvalidTransition(_))
        ));

        report(&mut coordinator, first).unwrap();
        let synthesis = coordinator.prepare_synthesis("summary").unwrap();
        assert_eq!(synthesis.critics, vec![first]);
    }

    #[test]
    fn test_state_counts() {
        let mut coordinator = CriticCoordinator::new();
        let first = spawn(&mut coordinator, "design", 3).unwrap();
        spawn(&mut coordinator, "tests", 3).unwrap();
        report(&mut coordinator, first).unwrap();
        assert_eq!(coordinator.state_counts(), (1, 1, 0));
    }
}
