//! Errors shared by the engine, the worker and the client.

use std::fmt;
use thiserror::Error;

/// Failure defined by workflow code, with an opaque payload
#[derive(Debug, Clone, Error)]
#[error("custom failure '{reason}' ({} byte details)", details.len())]
pub struct CustomError {
    pub reason: String,
    pub details: Vec<u8>,
}

impl CustomError {
    pub fn new(reason: impl Into<String>, details: Vec<u8>) -> Self {
        Self {
            reason: reason.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("canceled ({} byte details)", details.len())]
pub struct CanceledError {
    pub details: Vec<u8>,
}

#[derive(Debug, Clone, Error)]
#[error("timed out ({timeout_type})")]
pub struct TimeoutError {
    pub timeout_type: TimeoutType,
    pub details: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TimeoutType {
    StartToClose,
    ScheduleToClose,
}

impl fmt::Display for TimeoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutType::StartToClose => "start-to-close",
            TimeoutType::ScheduleToClose => "schedule-to-close",
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenericError {
    pub message: String,
}

impl GenericError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// How replayed workflow code diverged from its recorded history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NonDeterminismReason {
    /// The code issued a command past the end of the recorded decision
    #[error("command not in history")]
    MissingReplayDecision,
    /// The recorded decision holds a command the code no longer issues
    #[error("history command not issued")]
    ExtraReplayDecision,
    #[error("command differs from history")]
    Mismatch,
}

/// Recorded history and the running workflow code disagree.
///
/// Raised while replaying a decision task. The instance cannot make progress
/// until the code is rolled back or the divergence is gated by a version
/// marker.
#[derive(Debug, Clone, Error)]
#[error(
    "nondeterministic {workflow_type} ({workflow_id}): {reason}; \
     history={history_event_text:?}, code={decision_text:?}"
)]
pub struct NonDeterministicError {
    pub reason: NonDeterminismReason,
    pub workflow_type: String,
    pub workflow_id: String,
    pub run_id: String,
    pub task_list: String,
    pub history_event_text: Option<String>,
    pub decision_text: Option<String>,
}

/// Workflow or activity code panicked
#[derive(Debug, Clone, Error)]
#[error("panic: {message}")]
pub struct PanicError {
    pub message: String,
}

/// Requests the engine refused
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("not found: {message}")]
    EntityNotExists { message: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("already started: {message}")]
    WorkflowExecutionAlreadyStarted { message: String },

    #[error("already closed: {message}")]
    WorkflowExecutionAlreadyCompleted { message: String },

    #[error("internal engine error: {message}")]
    InternalService { message: String },

    #[error("query failed: {message}")]
    QueryFailed { message: String },

    #[error("cancellation already requested: {message}")]
    CancellationAlreadyRequested { message: String },
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Custom(#[from] CustomError),

    #[error(transparent)]
    Canceled(#[from] CanceledError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Generic(#[from] GenericError),

    #[error(transparent)]
    Panic(#[from] PanicError),

    #[error(transparent)]
    NonDeterministic(#[from] NonDeterministicError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<crate::encoded::EncodingError> for FlowError {
    fn from(err: crate::encoded::EncodingError) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

pub type FlowResult<T> = Result<T, FlowError>;

pub mod factory {
    use super::*;

    pub fn entity_not_exists(message: impl Into<String>) -> ServerError {
        ServerError::EntityNotExists {
            message: message.into(),
        }
    }

    pub fn already_started(message: impl Into<String>) -> ServerError {
        ServerError::WorkflowExecutionAlreadyStarted {
            message: message.into(),
        }
    }

    pub fn non_deterministic_error(
        reason: NonDeterminismReason,
        workflow_type: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        task_list: impl Into<String>,
        history_event_text: Option<String>,
        decision_text: Option<String>,
    ) -> NonDeterministicError {
        NonDeterministicError {
            reason,
            workflow_type: workflow_type.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            task_list: task_list.into(),
            history_event_text,
            decision_text,
        }
    }
}

pub fn is_canceled_error(err: &FlowError) -> bool {
    matches!(err, FlowError::Canceled(_))
}

pub fn is_timeout_error(err: &FlowError) -> bool {
    matches!(err, FlowError::Timeout(_))
}

pub fn is_entity_not_exists_error(err: &FlowError) -> bool {
    matches!(err, FlowError::Server(ServerError::EntityNotExists { .. }))
}

pub fn is_workflow_execution_already_started_error(err: &FlowError) -> bool {
    matches!(
        err,
        FlowError::Server(ServerError::WorkflowExecutionAlreadyStarted { .. })
    )
}

pub fn is_query_failed_error(err: &FlowError) -> bool {
    matches!(err, FlowError::Server(ServerError::QueryFailed { .. }))
}

pub fn is_non_deterministic_error(err: &FlowError) -> bool {
    matches!(err, FlowError::NonDeterministic(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_convert_and_classify() {
        let err: FlowError = factory::already_started("ip-lookup-observable is running").into();
        assert!(is_workflow_execution_already_started_error(&err));
        assert!(!is_entity_not_exists_error(&err));
        assert!(err.to_string().contains("ip-lookup-observable"));

        let err: FlowError = CanceledError { details: vec![] }.into();
        assert!(is_canceled_error(&err));
        let err: FlowError = TimeoutError {
            timeout_type: TimeoutType::StartToClose,
            details: vec![],
        }
        .into();
        assert!(is_timeout_error(&err));
        assert_eq!(err.to_string(), "timed out (start-to-close)");
    }

    #[test]
    fn non_deterministic_error_mentions_both_sides() {
        let err = factory::non_deterministic_error(
            NonDeterminismReason::Mismatch,
            "GetAddressFromIP",
            "wf-1",
            "run-1",
            "ip-geolocation",
            Some("ActivityTaskScheduled(get_timezone)".to_string()),
            Some("ScheduleActivity(get_location_info)".to_string()),
        );
        let flow = FlowError::from(err);
        assert!(is_non_deterministic_error(&flow));

        let text = flow.to_string();
        assert!(text.contains("command differs from history"));
        assert!(text.contains("get_timezone"));
        assert!(text.contains("get_location_info"));
    }

    #[test]
    fn io_errors_propagate_with_question_mark() {
        fn read_missing() -> FlowResult<Vec<u8>> {
            Ok(std::fs::read("/nonexistent/iplocate/history.json")?)
        }

        let err = read_missing().unwrap_err();
        assert!(matches!(err, FlowError::Io(_)));
        assert!(err.to_string().starts_with("io: "));
    }
}
