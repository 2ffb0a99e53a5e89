//! Client implementation for the workflow service.
//!
//! This module provides the main client interface for starting workflows,
//! querying workflow state, sending signals, and managing workflow executions.

use crate::error::{ClientError, ClientResult};
use crate::options::{ClientOptions, StartWorkflowOptions};
use async_trait::async_trait;
use iplocate_core::{
    DescribeWorkflowExecutionResponse, EventAttributes, GetWorkflowExecutionHistoryRequest,
    History, QueryWorkflowRequest, RequestCancelWorkflowExecutionRequest,
    SignalWorkflowExecutionRequest, StartWorkflowExecutionRequest,
    TerminateWorkflowExecutionRequest, WorkflowExecution, WorkflowService,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use iplocate_core::QUERY_TYPE_QUERY_TYPES;

/// Client trait for workflow operations
#[async_trait]
pub trait Client: Send + Sync {
    /// Start a workflow execution
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        args: Option<&[u8]>,
    ) -> ClientResult<WorkflowExecution>;

    /// Start a workflow and return a handle for awaiting its result
    async fn execute_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        args: Option<&[u8]>,
    ) -> ClientResult<Box<dyn WorkflowRun>>;

    /// Get an existing workflow execution handle
    fn get_workflow(&self, workflow_id: &str, run_id: Option<&str>) -> Box<dyn WorkflowRun>;

    /// Signal a running workflow
    async fn signal_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        signal_name: &str,
        arg: Option<&[u8]>,
    ) -> ClientResult<()>;

    /// Cancel a workflow execution
    async fn cancel_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: Option<&str>,
    ) -> ClientResult<()>;

    /// Terminate a workflow execution
    async fn terminate_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: Option<&str>,
    ) -> ClientResult<()>;

    /// Query a workflow
    async fn query_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        query_type: &str,
        args: Option<&[u8]>,
    ) -> ClientResult<Vec<u8>>;

    /// Get workflow execution history
    async fn get_workflow_history(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> ClientResult<History>;

    /// Describe workflow execution
    async fn describe_workflow_execution(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> ClientResult<DescribeWorkflowExecutionResponse>;
}

/// Workflow run handle for retrieving results
#[async_trait]
pub trait WorkflowRun: Send + Sync {
    fn workflow_id(&self) -> &str;
    /// Get the run ID, empty when the handle follows the latest run
    fn run_id(&self) -> &str;
    /// Wait for the workflow to close and return its result
    async fn get(&self) -> ClientResult<Option<Vec<u8>>>;
    /// Get with timeout
    async fn get_with_timeout(&self, timeout: Duration) -> ClientResult<Option<Vec<u8>>>;
}

/// Client implementation
#[derive(Clone)]
pub struct WorkflowClient {
    service: Arc<dyn WorkflowService>,
    options: ClientOptions,
}

impl WorkflowClient {
    pub fn new(service: Arc<dyn WorkflowService>, options: ClientOptions) -> Self {
        Self { service, options }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Signal with a JSON encoded payload
    pub async fn signal_json<T: Serialize + ?Sized>(
        &self,
        workflow_id: &str,
        signal_name: &str,
        payload: &T,
    ) -> ClientResult<()> {
        let payload = iplocate_core::encode(payload)?;
        self.signal_workflow(workflow_id, None, signal_name, Some(&payload))
            .await
    }

    /// Query and decode a JSON answer
    pub async fn query_json<T: DeserializeOwned>(
        &self,
        workflow_id: &str,
        query_type: &str,
    ) -> ClientResult<T> {
        let answer = self
            .query_workflow(workflow_id, None, query_type, None)
            .await?;
        Ok(iplocate_core::decode(&answer)?)
    }
}

#[async_trait]
impl Client for WorkflowClient {
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        args: Option<&[u8]>,
    ) -> ClientResult<WorkflowExecution> {
        let request = StartWorkflowExecutionRequest {
            workflow_id: options.id.clone(),
            workflow_type: workflow_type.to_string(),
            task_list: options.task_list,
            input: args.map(|a| a.to_vec()),
            identity: self.options.identity.clone(),
            workflow_id_reuse_policy: options.workflow_id_reuse_policy,
        };
        let response = self.service.start_workflow_execution(request).await?;
        tracing::debug!(workflow_id = %options.id, run_id = %response.run_id, "started workflow");
        Ok(WorkflowExecution::new(options.id, response.run_id))
    }

    async fn execute_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        args: Option<&[u8]>,
    ) -> ClientResult<Box<dyn WorkflowRun>> {
        let execution = self.start_workflow(options, workflow_type, args).await?;
        Ok(Box::new(WorkflowRunImpl {
            service: self.service.clone(),
            workflow_id: execution.workflow_id,
            run_id: execution.run_id,
        }))
    }

    fn get_workflow(&self, workflow_id: &str, run_id: Option<&str>) -> Box<dyn WorkflowRun> {
        Box::new(WorkflowRunImpl {
            service: self.service.clone(),
            workflow_id: workflow_id.to_string(),
            run_id: run_id.unwrap_or_default().to_string(),
        })
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        signal_name: &str,
        arg: Option<&[u8]>,
    ) -> ClientResult<()> {
        let request = SignalWorkflowExecutionRequest {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            signal_name: signal_name.to_string(),
            input: arg.map(|a| a.to_vec()),
            identity: self.options.identity.clone(),
        };
        Ok(self.service.signal_workflow_execution(request).await?)
    }

    async fn cancel_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: Option<&str>,
    ) -> ClientResult<()> {
        let request = RequestCancelWorkflowExecutionRequest {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            cause: reason.map(str::to_string),
            identity: self.options.identity.clone(),
        };
        Ok(self.service.request_cancel_workflow_execution(request).await?)
    }

    async fn terminate_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: Option<&str>,
    ) -> ClientResult<()> {
        let request = TerminateWorkflowExecutionRequest {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            reason: reason.unwrap_or("terminated by client").to_string(),
            identity: self.options.identity.clone(),
        };
        Ok(self.service.terminate_workflow_execution(request).await?)
    }

    async fn query_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        query_type: &str,
        args: Option<&[u8]>,
    ) -> ClientResult<Vec<u8>> {
        let request = QueryWorkflowRequest {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            query_type: query_type.to_string(),
            query_args: args.map(|a| a.to_vec()),
        };
        Ok(self.service.query_workflow(request).await?.query_result)
    }

    async fn get_workflow_history(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> ClientResult<History> {
        let request = GetWorkflowExecutionHistoryRequest {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.map(str::to_string),
            wait_for_close: false,
        };
        Ok(self.service.get_workflow_execution_history(request).await?)
    }

    async fn describe_workflow_execution(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> ClientResult<DescribeWorkflowExecutionResponse> {
        Ok(self
            .service
            .describe_workflow_execution(workflow_id, run_id)
            .await?)
    }
}

struct WorkflowRunImpl {
    service: Arc<dyn WorkflowService>,
    workflow_id: String,
    run_id: String,
}

#[async_trait]
impl WorkflowRun for WorkflowRunImpl {
    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn get(&self) -> ClientResult<Option<Vec<u8>>> {
        let request = GetWorkflowExecutionHistoryRequest {
            workflow_id: self.workflow_id.clone(),
            run_id: (!self.run_id.is_empty()).then(|| self.run_id.clone()),
            wait_for_close: true,
        };
        let history = self.service.get_workflow_execution_history(request).await?;

        match history.close_event() {
            Some(EventAttributes::WorkflowExecutionCompleted { result }) => Ok(result.clone()),
            Some(EventAttributes::WorkflowExecutionFailed { reason, details }) => {
                Err(ClientError::WorkflowFailed {
                    reason: reason.clone(),
                    details: details.clone(),
                })
            }
            Some(EventAttributes::WorkflowExecutionCanceled { .. }) => {
                Err(ClientError::WorkflowCanceled)
            }
            Some(EventAttributes::WorkflowExecutionTerminated { reason }) => {
                Err(ClientError::WorkflowTerminated(reason.clone()))
            }
            _ => Err(ClientError::WorkflowNotFound(format!(
                "{} has no close event",
                self.workflow_id
            ))),
        }
    }

    async fn get_with_timeout(&self, timeout: Duration) -> ClientResult<Option<Vec<u8>>> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| ClientError::Timeout)?
    }
}
