//! Workflow futures and errors.

use iplocate_core::{EncodingError, NonDeterministicError, TimeoutType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Future resolving to the outcome of a submitted command
pub type CommandFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, WorkflowError>> + Send>>;

/// Future for timer
pub type TimerFuture = Pin<Box<dyn Future<Output = Result<(), WorkflowError>> + Send>>;

/// Classification of activity failure types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityFailureType {
    ExecutionFailed,
    Panic,
    Retryable,
    NonRetryable,
    Application,
    Cancelled,
    Timeout(TimeoutType),
}

impl ActivityFailureType {
    /// Reason string recorded in history and matched against
    /// `RetryPolicy::non_retryable_error_types`
    pub fn reason(&self) -> &'static str {
        match self {
            ActivityFailureType::ExecutionFailed => "ExecutionFailed",
            ActivityFailureType::Panic => "Panic",
            ActivityFailureType::Retryable => "Retryable",
            ActivityFailureType::NonRetryable => "NonRetryable",
            ActivityFailureType::Application => "Application",
            ActivityFailureType::Cancelled => "Cancelled",
            ActivityFailureType::Timeout(_) => "Timeout",
        }
    }

    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "Panic" => ActivityFailureType::Panic,
            "Retryable" => ActivityFailureType::Retryable,
            "NonRetryable" => ActivityFailureType::NonRetryable,
            "Application" => ActivityFailureType::Application,
            "Cancelled" => ActivityFailureType::Cancelled,
            _ => ActivityFailureType::ExecutionFailed,
        }
    }
}

/// Detailed information about an activity failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFailureInfo {
    /// Classification of the error type
    pub failure_type: ActivityFailureType,
    /// Human-readable error message
    pub message: String,
    /// Structured error details/payload (optional)
    pub details: Option<Vec<u8>>,
    /// Whether this error is retryable
    pub retryable: bool,
}

impl ActivityFailureInfo {
    /// Convert details bytes to a string representation
    pub fn details_as_string(&self) -> Option<String> {
        self.details
            .as_ref()
            .map(|d| String::from_utf8_lossy(d).to_string())
    }
}

impl fmt::Display for ActivityFailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Workflow error
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow execution failed: {0}")]
    ExecutionFailed(String),
    #[error(transparent)]
    NonDeterministic(#[from] NonDeterministicError),
    #[error(
        "Workflow code removed support of version {version} for '{change_id}' changeID. \
         The oldest supported version is {min_supported}"
    )]
    VersionRemoved {
        change_id: String,
        version: i32,
        min_supported: i32,
    },
    #[error(
        "Workflow code is too old to support version {version} for '{change_id}' changeID. \
         The maximum supported version is {max_supported}"
    )]
    VersionTooNew {
        change_id: String,
        version: i32,
        max_supported: i32,
    },
    #[error("Workflow panicked: {0}")]
    Panic(String),
    #[error("Activity failed: {0}")]
    ActivityFailed(ActivityFailureInfo),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Workflow cancelled")]
    Cancelled,
    #[error("Generic error: {0}")]
    Generic(String),
}

impl WorkflowError {
    /// Errors that mean the decision itself is broken rather than the
    /// workflow having failed. The instance is not closed for these.
    pub fn is_decision_failure(&self) -> bool {
        matches!(
            self,
            WorkflowError::NonDeterministic(_)
                | WorkflowError::VersionRemoved { .. }
                | WorkflowError::VersionTooNew { .. }
                | WorkflowError::Panic(_)
        )
    }

    /// Activity failure details, if the error came from an activity
    pub fn activity_failure(&self) -> Option<&ActivityFailureInfo> {
        match self {
            WorkflowError::ActivityFailed(info) => Some(info),
            _ => None,
        }
    }
}

impl From<EncodingError> for WorkflowError {
    fn from(err: EncodingError) -> Self {
        WorkflowError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_round_trip() {
        for failure_type in [
            ActivityFailureType::Retryable,
            ActivityFailureType::NonRetryable,
            ActivityFailureType::Application,
            ActivityFailureType::Cancelled,
            ActivityFailureType::Panic,
        ] {
            assert_eq!(
                ActivityFailureType::from_reason(failure_type.reason()),
                failure_type
            );
        }
    }

    #[test]
    fn version_errors_are_decision_failures() {
        let err = WorkflowError::VersionRemoved {
            change_id: "add-timezone-feature".to_string(),
            version: -1,
            min_supported: 1,
        };
        assert!(err.is_decision_failure());
        assert!(err.to_string().contains("removed support of version -1"));

        let failed = WorkflowError::ActivityFailed(ActivityFailureInfo {
            failure_type: ActivityFailureType::NonRetryable,
            message: "API error: invalid query".to_string(),
            details: None,
            retryable: false,
        });
        assert!(!failed.is_decision_failure());
        assert_eq!(
            failed.activity_failure().map(|f| f.message.as_str()),
            Some("API error: invalid query")
        );
    }
}
