//! Testing framework for iplocate workflows and activities.
//!
//! [`TestWorkflowEnvironment`] runs workflows on a real in-memory engine so
//! that signals, queries, timers and retries behave as they do in a worker.
//! [`WorkflowReplayer`] checks recorded histories against current workflow
//! code.

pub mod suite;

pub use iplocate_worker::replay::*;
pub use suite::*;
