//! Workflow replayer for backwards compatibility testing.
//!
//! Replaying runs current workflow code against a recorded history and
//! fails if the code would issue different commands than the ones recorded.
//! Run it against exported histories of in-flight instances before
//! deploying a workflow change.

use crate::executor::{ReplaySummary, WorkflowExecutor};
use crate::registry::{Registry, Workflow, WorkflowError, WorkflowRegistry};
use iplocate_core::{History, NonDeterministicError, WorkflowExecution};
use std::path::Path;

const REPLAY_WORKFLOW_ID: &str = "replay-workflow";
const REPLAY_RUN_ID: &str = "replay-run";

/// Replay error
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Non-deterministic workflow detected: {0}")]
    NonDeterministic(NonDeterministicError),
    #[error("Invalid history: {0}")]
    InvalidHistory(String),
    #[error("Replay failed: {0}")]
    ReplayFailed(WorkflowError),
    #[error("Failed to read history: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplayError {
    pub fn is_non_deterministic(&self) -> bool {
        matches!(self, ReplayError::NonDeterministic(_))
    }
}

/// Replays recorded histories against registered workflow code
#[derive(Clone, Default)]
pub struct WorkflowReplayer {
    registry: WorkflowRegistry,
}

impl WorkflowReplayer {
    /// Create a new workflow replayer
    pub fn new() -> Self {
        Self::default()
    }

    /// Replayer sharing the workflow types of an existing registry
    pub fn with_registry(registry: WorkflowRegistry) -> Self {
        Self { registry }
    }

    pub fn register_workflow(&self, name: &str, workflow: Box<dyn Workflow>) {
        self.registry.register_workflow(name, workflow);
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Replay workflow history
    pub fn replay_workflow_history(&self, history: &History) -> Result<ReplaySummary, ReplayError> {
        let execution = WorkflowExecution::new(REPLAY_WORKFLOW_ID, REPLAY_RUN_ID);
        let mut executor = WorkflowExecutor::for_history(&self.registry, execution, history)
            .map_err(|e| ReplayError::InvalidHistory(e.to_string()))?;

        let summary = executor.replay_history(history).map_err(|err| match err {
            WorkflowError::NonDeterministic(err) => ReplayError::NonDeterministic(err),
            other => ReplayError::ReplayFailed(other),
        })?;

        tracing::info!(
            events = history.len(),
            decisions = summary.decisions,
            "history replayed"
        );
        Ok(summary)
    }

    /// Replay workflow history from JSON
    pub fn replay_workflow_history_from_json(&self, json: &str) -> Result<ReplaySummary, ReplayError> {
        let history =
            History::from_json(json).map_err(|e| ReplayError::InvalidHistory(e.to_string()))?;
        self.replay_workflow_history(&history)
    }

    /// Replay a history exported to a JSON file
    pub fn replay_workflow_history_from_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ReplaySummary, ReplayError> {
        let json = std::fs::read_to_string(path)?;
        self.replay_workflow_history_from_json(&json)
    }

    /// Replay the prefix of `history` up to and including `last_event_id`
    pub fn replay_partial_workflow_history(
        &self,
        history: &History,
        last_event_id: i64,
    ) -> Result<ReplaySummary, ReplayError> {
        let events = history
            .events
            .iter()
            .take_while(|event| event.event_id <= last_event_id)
            .cloned()
            .collect();
        self.replay_workflow_history(&History::new(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iplocate_core::HistoryBuilder;

    #[test]
    fn unreadable_inputs_are_reported_before_replay() {
        let replayer = WorkflowReplayer::new();

        let err = replayer
            .replay_workflow_history_from_file("/nonexistent/history.json")
            .unwrap_err();
        assert!(matches!(err, ReplayError::Io(_)), "{}", err);

        let err = replayer
            .replay_workflow_history_from_json("{not json")
            .unwrap_err();
        assert!(matches!(err, ReplayError::InvalidHistory(_)), "{}", err);
    }

    #[test]
    fn unregistered_workflow_type_is_invalid_history() {
        let history = HistoryBuilder::new("Unknown", "tl", None).build();
        let err = WorkflowReplayer::new()
            .replay_workflow_history(&history)
            .unwrap_err();
        assert!(matches!(err, ReplayError::InvalidHistory(_)), "{}", err);
        assert!(!err.is_non_deterministic());
    }
}
