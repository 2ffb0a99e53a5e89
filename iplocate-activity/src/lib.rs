//! Activity authoring SDK.
//!
//! Activities are the side-effecting half of a workflow: they run on a
//! worker, may be retried, and report a result or a typed failure back to
//! the workflow that scheduled them.

pub mod context;

pub use context::*;
