//! Deterministic execution of workflow code against history.

pub mod replay;
pub mod workflow;

pub use replay::ReplayEngine;
pub use workflow::{DecisionOutcome, ReplaySummary, WorkflowExecutor};
