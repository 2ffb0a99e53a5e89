//! Workflow authoring SDK.
//!
//! This crate provides the API for implementing workflows: scheduling
//! activities, durable timers, version markers, signals, queries and
//! cancellation.

pub mod commands;
pub mod context;
pub mod future;
pub mod markers;

pub use commands::*;
pub use context::*;
pub use future::*;
pub use markers::*;
