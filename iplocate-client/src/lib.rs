//! Client for the iplocate workflow runtime.
//!
//! This crate provides the caller-side interface for starting workflows,
//! sending signals, issuing queries, cancelling runs and waiting for their
//! results. It talks to any [`iplocate_core::WorkflowService`].

pub mod client;
pub mod error;
pub mod options;

pub use client::*;
pub use error::*;
pub use options::*;
