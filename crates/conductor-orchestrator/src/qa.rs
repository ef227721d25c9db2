//! Final quality-assurance gate

use chrono::Utc;
use conductor_core::{
    ConductorError, QaConfig, QaId, QaResult, QaReview, Result, SessionConfig, WorkerState,
};
use std::collections::BTreeMap;

use crate::critics::ReportOutcome;

/// Reject a score outside `range` or a verdict that disagrees with `threshold`
pub fn check_score(score: u8, passed: bool, threshold: u8, range: &QaConfig) -> Result<()> {
    if !range.contains(score) {
        return Err(ConductorError::InconsistentScore(format!(
            "score {} is outside {}..={}",
            score, range.min_score, range.max_score
        )));
    }

    let meets_threshold = score >= threshold;
    if meets_threshold != passed {
        return Err(ConductorError::InconsistentScore(format!(
            "score {} {} the pass threshold {} but the verdict is {}",
            score,
            if meets_threshold { "meets" } else { "is below" },
            threshold,
            if passed { "pass" } else { "fail" }
        )));
    }

    Ok(())
}

/// QA reviews of one session
#[derive(Debug, Default)]
pub struct QaGate {
    reviews: BTreeMap<QaId, QaReview>,
}

impl QaGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: QaId) -> Result<&QaReview> {
        self.reviews
            .get(&id)
            .ok_or_else(|| ConductorError::not_found("QA review", id))
    }

    pub fn reviews(&self) -> impl Iterator<Item = &QaReview> {
        self.reviews.values()
    }

    fn next_id(&self) -> QaId {
        self.reviews
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(QaId(1))
    }

    /// Register a reviewer
    ///
    /// Sessions created with `qa_required = false` only run QA when the caller
    /// asks for it explicitly.
    pub fn prepare_spawn(
        &self,
        name: &str,
        config: &SessionConfig,
        override_not_required: bool,
    ) -> Result<QaReview> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConductorError::InvalidArgument(
                "QA reviewer name must not be empty".to_string(),
            ));
        }

        if !config.qa_required && !override_not_required {
            return Err(ConductorError::InvalidTransition(
                "QA is not required for this session; pass the override to run it anyway"
                    .to_string(),
            ));
        }

        Ok(QaReview::new(self.next_id(), name))
    }

    /// Record a reviewer's verdict
    pub fn prepare_report(
        &self,
        id: QaId,
        result: QaResult,
        threshold: u8,
        range: &QaConfig,
    ) -> Result<(QaReview, ReportOutcome)> {
        let mut review = self.get(id)?.clone();

        let outcome = match review.state {
            WorkerState::Spawned => ReportOutcome::Accepted,
            WorkerState::Abandoned if review.result.is_none() => ReportOutcome::AcceptedLate,
            WorkerState::Reported | WorkerState::Abandoned => {
                return Err(ConductorError::already_reported("QA review", id));
            }
        };

        check_score(result.score, result.passed, threshold, range)?;

        match outcome {
            ReportOutcome::Accepted => review.state = WorkerState::Reported,
            ReportOutcome::AcceptedLate => review.late = true,
        }
        review.result = Some(result);
        review.reported_at = Some(Utc::now());
        Ok((review, outcome))
    }

    /// Snapshots of every spawned review marked abandoned
    pub fn prepare_abandon(&self) -> Vec<QaReview> {
        self.reviews
            .values()
            .filter(|r| r.state == WorkerState::Spawned)
            .map(|r| {
                let mut review = r.clone();
                review.state = WorkerState::Abandoned;
                review
            })
            .collect()
    }

    pub fn apply(&mut self, review: QaReview) {
        self.reviews.insert(review.id, review);
    }

    /// Most recently reported result, if any
    pub fn latest_verdict(&self) -> Option<&QaResult> {
        self.reviews
            .values()
            .filter(|r| r.result.is_some())
            .max_by_key(|r| r.reported_at)
            .and_then(|r| r.result.as_ref())
    }
}
