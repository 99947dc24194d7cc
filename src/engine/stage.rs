//! Pipeline stages
//!
//! `StageTracker` records the path a run took through the pipeline so
//! callers and tests can see which stages were entered and in what order.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ci::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Pending,
    Resolving,
    Provisioning,
    Installing,
    StyleCheck,
    Testing,
    Aggregating,
    Reporting,
    Done,
    /// Absorbing state for runs that ended early
    Error,
}

impl PipelineStage {
    pub fn is_final(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Error)
    }

    /// Stages from which a run may end early in `Error`
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            PipelineStage::Resolving | PipelineStage::Provisioning | PipelineStage::Installing
        )
    }
}

/// Tracks the stages one run has passed through
#[derive(Debug, Clone)]
pub struct StageTracker {
    run_id: RunId,
    visited: Vec<PipelineStage>,
}

impl StageTracker {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            visited: vec![PipelineStage::Pending],
        }
    }

    pub fn current(&self) -> PipelineStage {
        self.visited
            .last()
            .copied()
            .unwrap_or(PipelineStage::Pending)
    }

    /// Move to `stage`
    pub fn enter(&mut self, stage: PipelineStage) {
        debug!(run_id = %self.run_id, from = ?self.current(), to = ?stage, "Stage transition");
        self.visited.push(stage);
    }

    /// End the run early from the current stage
    pub fn fail(&mut self) {
        debug_assert!(
            self.current().can_fail(),
            "run failed from stage {:?}",
            self.current()
        );
        self.enter(PipelineStage::Error);
    }

    pub fn visited(&self) -> &[PipelineStage] {
        &self.visited
    }

    pub fn has_visited(&self, stage: PipelineStage) -> bool {
        self.visited.contains(&stage)
    }

    pub fn into_stages(self) -> Vec<PipelineStage> {
        self.visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_creation() {
        let tracker = StageTracker::new(RunId::from("r1"));
        assert_eq!(tracker.current(), PipelineStage::Pending);
        assert_eq!(tracker.visited().len(), 1);
    }

    #[test]
    fn test_stage_advancement() {
        let mut tracker = StageTracker::new(RunId::from("r1"));
        tracker.enter(PipelineStage::Resolving);
        tracker.enter(PipelineStage::Provisioning);
        tracker.fail();

        assert_eq!(tracker.current(), PipelineStage::Error);
        assert!(tracker.current().is_final());
        assert!(tracker.has_visited(PipelineStage::Provisioning));
        assert!(!tracker.has_visited(PipelineStage::Installing));
    }

    #[test]
    fn test_failable_stages() {
        assert!(PipelineStage::Installing.can_fail());
        assert!(!PipelineStage::Testing.can_fail());
        assert!(!PipelineStage::Done.can_fail());
    }
}
