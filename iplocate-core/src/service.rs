//! Workflow service interface.
//!
//! The service is the durable side of the runtime: it owns execution
//! histories, hands decisions to workers and answers client requests. The
//! client crate only ever talks to this trait.

use crate::error::FlowResult;
use crate::history::History;
use crate::types::{WorkflowExecution, WorkflowExecutionStatus, WorkflowIdReusePolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartWorkflowExecutionRequest {
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_list: String,
    pub input: Option<Vec<u8>>,
    pub identity: String,
    pub workflow_id_reuse_policy: WorkflowIdReusePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartWorkflowExecutionResponse {
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWorkflowExecutionRequest {
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub signal_name: String,
    pub input: Option<Vec<u8>>,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCancelWorkflowExecutionRequest {
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub cause: Option<String>,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminateWorkflowExecutionRequest {
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub reason: String,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryWorkflowRequest {
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub query_type: String,
    pub query_args: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryWorkflowResponse {
    pub query_result: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetWorkflowExecutionHistoryRequest {
    pub workflow_id: String,
    pub run_id: Option<String>,
    /// Block until the run has closed
    pub wait_for_close: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeWorkflowExecutionResponse {
    pub execution: WorkflowExecution,
    pub workflow_type: String,
    pub task_list: String,
    pub status: WorkflowExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub history_length: usize,
    pub pending_activities: Vec<String>,
}

/// Durable workflow service
#[async_trait]
pub trait WorkflowService: Send + Sync {
    async fn start_workflow_execution(
        &self,
        request: StartWorkflowExecutionRequest,
    ) -> FlowResult<StartWorkflowExecutionResponse>;

    async fn signal_workflow_execution(
        &self,
        request: SignalWorkflowExecutionRequest,
    ) -> FlowResult<()>;

    async fn request_cancel_workflow_execution(
        &self,
        request: RequestCancelWorkflowExecutionRequest,
    ) -> FlowResult<()>;

    async fn terminate_workflow_execution(
        &self,
        request: TerminateWorkflowExecutionRequest,
    ) -> FlowResult<()>;

    async fn query_workflow(&self, request: QueryWorkflowRequest)
        -> FlowResult<QueryWorkflowResponse>;

    async fn get_workflow_execution_history(
        &self,
        request: GetWorkflowExecutionHistoryRequest,
    ) -> FlowResult<History>;

    async fn describe_workflow_execution(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> FlowResult<DescribeWorkflowExecutionResponse>;
}
