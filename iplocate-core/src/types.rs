//! Core types for the workflow runtime.
//!
//! This module defines the main types used throughout the runtime for
//! workflow execution, activity scheduling, and configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for activities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Initial retry interval
    pub initial_interval: Duration,
    /// Backoff coefficient (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,
    /// Maximum retry interval
    pub maximum_interval: Duration,
    /// Maximum number of attempts, 0 means unlimited
    pub maximum_attempts: i32,
    /// Failure reasons that are never retried
    pub non_retryable_error_types: Vec<String>,
    /// Total time budget for all attempts, zero means unlimited
    pub expiration_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
            maximum_attempts: 0, // Unlimited
            non_retryable_error_types: vec![],
            expiration_interval: Duration::from_secs(0),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based) failed attempts.
    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = self.backoff_coefficient.max(1.0).powi(exponent);
        let mut seconds = self.initial_interval.as_secs_f64() * factor;
        if !self.maximum_interval.is_zero() {
            seconds = seconds.min(self.maximum_interval.as_secs_f64());
        }
        // Overflow or NaN lands on the cap, or Duration::MAX when uncapped
        Duration::try_from_secs_f64(seconds).unwrap_or(if self.maximum_interval.is_zero() {
            Duration::MAX
        } else {
            self.maximum_interval
        })
    }

    /// Whether another attempt may run after `attempt` attempts failed with
    /// `reason`, `elapsed` time after the first attempt started.
    pub fn should_retry(&self, attempt: i32, reason: &str, elapsed: Duration) -> bool {
        if self
            .non_retryable_error_types
            .iter()
            .any(|t| t == reason)
        {
            return false;
        }
        if self.maximum_attempts > 0 && attempt >= self.maximum_attempts {
            return false;
        }
        if !self.expiration_interval.is_zero()
            && elapsed.saturating_add(self.backoff(attempt)) > self.expiration_interval
        {
            return false;
        }
        true
    }
}

/// Workflow ID reuse policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(i32)]
pub enum WorkflowIdReusePolicy {
    /// Allow starting a workflow execution when the last execution close state
    /// is in [terminated, cancelled, failed]
    #[default]
    AllowDuplicateFailedOnly = 0,
    /// Allow starting a workflow execution using the same workflow ID when workflow is not running
    AllowDuplicate = 1,
    /// Do not allow starting a workflow execution using the same workflow ID at all
    RejectDuplicate = 2,
    /// Terminate current running workflow using the same workflow ID if exists,
    /// then start a new run
    TerminateIfRunning = 3,
}

/// Activity options for scheduling activities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    /// Task list to schedule activity on, empty means the workflow's task list
    pub task_list: String,
    /// Budget for all attempts including retries, zero means unlimited
    pub schedule_to_close_timeout: Duration,
    /// Budget for a single attempt
    pub start_to_close_timeout: Duration,
    /// Retry policy, `None` runs a single attempt
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            task_list: String::new(),
            schedule_to_close_timeout: Duration::from_secs(0),
            start_to_close_timeout: Duration::from_secs(60),
            retry_policy: None,
        }
    }
}

/// Workflow execution identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl std::fmt::Display for WorkflowExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// Workflow type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
}

/// Workflow information available in workflow context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub attempt: i32,
}

/// Lifecycle state of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowExecutionStatus {
    Running,
    Completed,
    Failed,
    Canceled,
    Terminated,
}

impl WorkflowExecutionStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, WorkflowExecutionStatus::Running)
    }

    /// Closed without producing a result
    pub fn is_unsuccessful(&self) -> bool {
        matches!(
            self,
            WorkflowExecutionStatus::Failed
                | WorkflowExecutionStatus::Canceled
                | WorkflowExecutionStatus::Terminated
        )
    }
}

impl std::fmt::Display for WorkflowExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            WorkflowExecutionStatus::Running => "RUNNING",
            WorkflowExecutionStatus::Completed => "COMPLETED",
            WorkflowExecutionStatus::Failed => "FAILED",
            WorkflowExecutionStatus::Canceled => "CANCELED",
            WorkflowExecutionStatus::Terminated => "TERMINATED",
        };
        f.write_str(text)
    }
}

/// What the worker does with an instance whose history no longer matches
/// its code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NonDeterministicWorkflowPolicy {
    /// Leave the instance open; it resumes once compatible code is deployed
    #[default]
    BlockWorkflow,
    /// Close the instance as failed
    FailWorkflow,
}

/// Built-in query listing the query types an instance answers
pub const QUERY_TYPE_QUERY_TYPES: &str = "__query_types";

/// Worker identity information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub name: String,
    pub version: String,
}

impl Default for WorkerIdentity {
    fn default() -> Self {
        Self {
            name: format!(
                "iplocate-worker@{}-pid-{}",
                std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
                std::process::id()
            ),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl std::fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
