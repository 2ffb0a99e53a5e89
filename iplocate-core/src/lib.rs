//! Core types and utilities for the iplocate workflow runtime.
//!
//! This crate provides the foundational types, error handling, history
//! events and serialization framework shared by the workflow, activity,
//! worker and client crates.

pub mod encoded;
pub mod error;
pub mod history;
pub mod service;
pub mod types;

pub use encoded::*;
pub use error::*;
pub use history::*;
pub use service::*;
pub use types::*;
