//! Caller-side errors.

use iplocate_core::{EncodingError, FlowError, ServerError};

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow already started: {0}")]
    AlreadyStarted(String),

    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("Workflow failed: {reason}")]
    WorkflowFailed {
        reason: String,
        details: Option<Vec<u8>>,
    },

    #[error("Workflow canceled")]
    WorkflowCanceled,

    #[error("Workflow terminated: {0}")]
    WorkflowTerminated(String),

    #[error("Timed out waiting for workflow result")]
    Timeout,

    #[error("Payload encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Service(FlowError),
}

impl From<FlowError> for ClientError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Server(ServerError::EntityNotExists { message }) => {
                ClientError::WorkflowNotFound(message)
            }
            FlowError::Server(ServerError::WorkflowExecutionAlreadyStarted { message }) => {
                ClientError::AlreadyStarted(message)
            }
            FlowError::Server(ServerError::QueryFailed { message }) => {
                ClientError::QueryRejected(message)
            }
            other => ClientError::Service(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iplocate_core::factory::{already_started, entity_not_exists};

    #[test]
    fn service_errors_map_to_client_errors() {
        let err: ClientError = FlowError::from(entity_not_exists("ip-lookup-1")).into();
        assert!(matches!(err, ClientError::WorkflowNotFound(id) if id == "ip-lookup-1"));

        let err: ClientError = FlowError::from(already_started("ip-monitor-8.8.8.8")).into();
        assert!(matches!(err, ClientError::AlreadyStarted(_)));

        let err: ClientError = FlowError::InvalidArgument("bad".to_string()).into();
        assert!(matches!(err, ClientError::Service(_)));
    }
}
