//! Worker implementation for the iplocate workflow runtime.
//!
//! This crate provides the registry for workflow and activity
//! implementations, the replay executor that drives workflow code
//! deterministically against history, the history replayer, the activity
//! task handler, history stores and the in-process durable engine that ties
//! them together.

pub mod engine;
pub mod executor;
pub mod handlers;
mod instance;
pub mod registry;
pub mod replay;
pub mod store;
pub mod typed;
pub mod worker;

pub use engine::*;
pub use registry::*;
pub use replay::*;
pub use store::*;
pub use typed::*;
pub use worker::*;
