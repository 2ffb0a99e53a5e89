//! Task handlers for processing activity tasks.

pub mod activity;

pub use activity::{ActivityTask, ActivityTaskHandler};
