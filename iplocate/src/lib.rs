//! IP geolocation workflows.
//!
//! Activities resolve the host's public address, its location and its
//! timezone over HTTP. Workflows orchestrate them durably:
//!
//! - [`workflows::lookup`]: the versioned lookup routine and its named
//!   variants, gated by the `add-timezone-feature` version marker
//! - [`workflows::monitor`]: a long-running monitor steered by signals and
//!   inspected through queries
//! - [`workflows::observe`]: a slow lookup exposing its progress, and a
//!   workflow that reports on another workflow's state
//!
//! The `iplocate` binary embeds the engine and drives all of them.

pub mod activities;
pub mod cli;
pub mod config;
pub mod error;
pub mod ids;
pub mod tracing_setup;
pub mod workflows;

pub use error::{CapabilityFailure, ConfigError};

/// Task list served by the worker
pub const TASK_LIST: &str = "ip-geolocation";
