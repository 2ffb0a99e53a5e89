//! Testing framework for iplocate workflows and activities.
//!
//! This module provides utilities for testing workflows and activities
//! against an in-memory engine, without a worker process or persisted
//! histories.

use iplocate_activity::{ActivityContext, ActivityInfo};
use iplocate_client::{
    Client, ClientError, ClientOptions, ClientResult, StartWorkflowOptions, WorkflowClient,
};
use iplocate_core::{EventAttributes, FlowError, History, WorkflowExecution};
use iplocate_worker::{
    decode_payload, ActivityError, Engine, EngineWorker, Registry, Worker, WorkerOptions,
    WorkflowError, WorkflowRegistry,
};
use iplocate_workflow::WorkflowContext;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;

pub use iplocate_worker::{activity_fn, workflow_fn};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Task list served by the test environment's worker
pub const TEST_TASK_LIST: &str = "test-task-list";

const RESULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Test workflow environment for running workflow tests
///
/// Workflows run on an in-memory [`Engine`] served by a real worker, so
/// durable timers follow the tokio clock: under
/// `#[tokio::test(start_paused = true)]` long sleeps complete immediately.
/// The worker starts on first use; registrations made later are still seen.
pub struct TestWorkflowEnvironment {
    engine: Engine,
    registry: WorkflowRegistry,
    worker: EngineWorker,
    worker_started: OnceCell<()>,
    client: WorkflowClient,
}

impl TestWorkflowEnvironment {
    /// Create a new test workflow environment
    pub fn new() -> Self {
        Self::with_worker_options(WorkerOptions {
            identity: "test-worker".to_string(),
            ..WorkerOptions::default()
        })
    }

    pub fn with_worker_options(options: WorkerOptions) -> Self {
        let engine = Engine::in_memory();
        let registry = WorkflowRegistry::new();
        let worker = EngineWorker::new(
            engine.clone(),
            TEST_TASK_LIST,
            options,
            Arc::new(registry.clone()),
        );
        let client = WorkflowClient::new(
            Arc::new(engine.clone()),
            ClientOptions {
                identity: "test-client".to_string(),
            },
        );
        Self {
            engine,
            registry,
            worker,
            worker_started: OnceCell::new(),
            client,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn client(&self) -> &WorkflowClient {
        &self.client
    }

    /// Registry of the environment's worker, for registering workflow and
    /// activity types directly
    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn task_list(&self) -> &str {
        TEST_TASK_LIST
    }

    /// Register a workflow for testing
    ///
    /// # Example
    /// ```ignore
    /// use iplocate_testsuite::TestWorkflowEnvironment;
    ///
    /// let env = TestWorkflowEnvironment::new();
    /// env.register_workflow("my_workflow", |_ctx, input: String| async move {
    ///     Ok(format!("Hello, {}!", input))
    /// });
    /// ```
    pub fn register_workflow<F, Fut, I, O>(&self, name: &str, workflow: F)
    where
        F: Fn(WorkflowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
    {
        self.registry.register_workflow(name, workflow_fn(workflow));
    }

    /// Register an activity for testing
    ///
    /// # Example
    /// ```ignore
    /// env.register_activity("double", |_ctx, n: i32| async move { Ok(n * 2) });
    /// ```
    pub fn register_activity<F, Fut, I, O>(&self, name: &str, activity: F)
    where
        F: Fn(ActivityContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ActivityError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
    {
        self.registry.register_activity(name, activity_fn(activity));
    }

    /// Start the worker now, resuming any runs already saved in the engine's store
    pub async fn start_worker(&self) -> ClientResult<()> {
        self.worker_started
            .get_or_try_init(|| async {
                self.worker
                    .start()
                    .await
                    .map_err(|e| ClientError::Service(FlowError::Other(e.to_string())))
            })
            .await?;
        Ok(())
    }

    /// Start a workflow under `workflow_id` without waiting for it
    pub async fn start_workflow<I: Serialize + ?Sized>(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: &I,
    ) -> ClientResult<WorkflowExecution> {
        self.start_worker().await?;
        let input = iplocate_core::encode(input)?;
        self.client
            .start_workflow(
                StartWorkflowOptions::new(workflow_id, TEST_TASK_LIST),
                workflow_type,
                Some(&input),
            )
            .await
    }

    /// Execute a registered workflow by name with typed input
    ///
    /// # Example
    /// ```ignore
    /// let result: String = env.execute_workflow("greet", "World").await?;
    /// ```
    pub async fn execute_workflow<I, O>(&self, workflow_type: &str, input: &I) -> ClientResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let workflow_id = format!("test-workflow-{}", uuid::Uuid::new_v4());
        self.start_workflow(&workflow_id, workflow_type, input)
            .await?;
        self.workflow_result(&workflow_id).await
    }

    /// Wait for the latest run of `workflow_id` to close and decode its result
    pub async fn workflow_result<O: DeserializeOwned>(&self, workflow_id: &str) -> ClientResult<O> {
        let result = self
            .client
            .get_workflow(workflow_id, None)
            .get_with_timeout(RESULT_TIMEOUT)
            .await?;
        Ok(decode_payload(result.as_deref())?)
    }

    /// Send a signal with a JSON payload
    pub async fn signal_workflow<T: Serialize + ?Sized>(
        &self,
        workflow_id: &str,
        signal_name: &str,
        payload: &T,
    ) -> ClientResult<()> {
        self.client
            .signal_json(workflow_id, signal_name, payload)
            .await
    }

    pub async fn query_workflow<T: DeserializeOwned>(
        &self,
        workflow_id: &str,
        query_type: &str,
    ) -> ClientResult<T> {
        self.client.query_json(workflow_id, query_type).await
    }

    pub async fn cancel_workflow(&self, workflow_id: &str) -> ClientResult<()> {
        self.client
            .cancel_workflow(workflow_id, None, Some("cancelled by test"))
            .await
    }

    pub async fn history(&self, workflow_id: &str) -> ClientResult<History> {
        self.client.get_workflow_history(workflow_id, None).await
    }

    /// Activity types scheduled by the latest run of `workflow_id`, in order
    pub async fn executed_activities(&self, workflow_id: &str) -> ClientResult<Vec<String>> {
        let history = self.history(workflow_id).await?;
        Ok(history
            .events
            .iter()
            .filter_map(|event| match &event.attributes {
                EventAttributes::ActivityTaskScheduled { activity_type, .. } => {
                    Some(activity_type.clone())
                }
                _ => None,
            })
            .collect())
    }

    /// Check if an activity was scheduled by `workflow_id`
    pub async fn was_activity_executed(
        &self,
        workflow_id: &str,
        activity_type: &str,
    ) -> ClientResult<bool> {
        Ok(self
            .executed_activities(workflow_id)
            .await?
            .iter()
            .any(|name| name == activity_type))
    }

    /// Execute a registered activity directly, outside of any workflow
    pub async fn execute_activity<I, O>(&self, name: &str, input: &I) -> Result<O, ActivityError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let activity = self
            .registry
            .get_activity(name)
            .ok_or_else(|| ActivityError::non_retryable(format!("Activity '{}' not registered", name)))?;
        let input = iplocate_core::encode(input)
            .map_err(|e| ActivityError::non_retryable(format!("Input serialization: {}", e)))?;

        let ctx = ActivityContext::new(ActivityInfo::for_test(name), None);
        let output = activity.execute(&ctx, Some(input)).await?;

        iplocate_core::decode(&output)
            .map_err(|e| ActivityError::non_retryable(format!("Output deserialization: {}", e)))
    }
}

impl Default for TestWorkflowEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestWorkflowEnvironment {
    fn drop(&mut self) {
        self.worker.stop();
    }
}
