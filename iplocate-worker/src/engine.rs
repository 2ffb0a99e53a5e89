//! In-process durable execution engine.
//!
//! The engine implements [`WorkflowService`] on top of a [`HistoryStore`].
//! Workers register the task lists they serve; each started run becomes an
//! instance task that records its history and dispatches activities and
//! timers. Open runs persisted by an earlier process are resumed by
//! [`Engine::recover`] when a worker for their task list starts.

use crate::executor::WorkflowExecutor;
use crate::handlers::ActivityTaskHandler;
use crate::instance::{Instance, InstanceHandle, Startup};
use crate::registry::Registry;
use crate::store::{FileHistoryStore, HistoryStore, MemoryHistoryStore};
use crate::worker::WorkerOptions;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use iplocate_core::factory::{already_started, entity_not_exists};
use iplocate_core::{
    DescribeWorkflowExecutionResponse, EventAttributes, FlowResult,
    GetWorkflowExecutionHistoryRequest, History, HistoryEvent, QueryWorkflowRequest,
    QueryWorkflowResponse, RequestCancelWorkflowExecutionRequest, ServerError,
    SignalWorkflowExecutionRequest, StartWorkflowExecutionRequest,
    StartWorkflowExecutionResponse, TerminateWorkflowExecutionRequest, WorkflowExecution,
    WorkflowExecutionStatus, WorkflowIdReusePolicy, WorkflowService,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// What the engine needs from a started worker
#[derive(Clone)]
pub struct WorkerHandle {
    pub registry: Arc<dyn Registry>,
    pub options: WorkerOptions,
    pub activities: Arc<ActivityTaskHandler>,
}

pub(crate) struct EngineShared {
    pub store: Arc<dyn HistoryStore>,
    workers: DashMap<String, WorkerHandle>,
    worker_registered: Notify,
    /// Open runs with a live instance task, by workflow id
    instances: DashMap<String, InstanceHandle>,
}

impl EngineShared {
    pub fn admit(&self, handle: InstanceHandle) {
        self.instances
            .insert(handle.execution.workflow_id.clone(), handle);
    }

    /// Forget the instance of a closed run. A newer run of the same
    /// workflow id keeps its slot.
    pub fn evict(&self, execution: &WorkflowExecution) {
        self.instances
            .remove_if(&execution.workflow_id, |_, handle| handle.execution == *execution);
    }

    pub fn worker(&self, task_list: &str) -> Option<WorkerHandle> {
        self.workers.get(task_list).map(|entry| entry.clone())
    }

    /// Worker serving `task_list`, waiting for one to register if needed
    pub async fn wait_for_worker(&self, task_list: &str) -> WorkerHandle {
        loop {
            let registered = self.worker_registered.notified();
            if let Some(worker) = self.worker(task_list) {
                return worker;
            }
            tracing::debug!(task_list, "waiting for a worker to serve task list");
            registered.await;
        }
    }
}

const HISTORY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Durable execution engine
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
    // serializes run creation, recovery and writes to runs with no instance
    lifecycle: Arc<Mutex<()>>,
}

impl Engine {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                store,
                workers: DashMap::new(),
                worker_registered: Notify::new(),
                instances: DashMap::new(),
            }),
            lifecycle: Arc::new(Mutex::new(())),
        }
    }

    /// Engine whose histories live only as long as the process
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryHistoryStore::new()))
    }

    /// Engine persisting histories as JSON files under `dir`
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileHistoryStore::new(dir)))
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        self.shared.store.clone()
    }

    /// Whether `workflow_id` has a live instance task. Closed runs are
    /// evicted and served from the store.
    pub fn is_resident(&self, workflow_id: &str) -> bool {
        self.shared.instances.contains_key(workflow_id)
    }

    /// Returns false when another worker already serves `task_list`
    pub(crate) fn register_worker(&self, task_list: &str, worker: WorkerHandle) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.shared.workers.entry(task_list.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(worker);
                self.shared.worker_registered.notify_waiters();
                true
            }
        }
    }

    pub(crate) fn unregister_worker(&self, task_list: &str) {
        self.shared.workers.remove(task_list);
    }

    /// Resume every open run persisted for `task_list`.
    ///
    /// Each run is replayed against the registered workflow code; activities
    /// scheduled without an outcome are dispatched again and unfired timers
    /// are re-armed for their remaining time. Returns the number of runs
    /// resumed.
    pub async fn recover(&self, task_list: &str) -> FlowResult<usize> {
        let _guard = self.lifecycle.lock().await;
        let Some(worker) = self.shared.worker(task_list) else {
            return Ok(0);
        };

        let mut recovered = 0;
        for execution in self.shared.store.list_runs().await? {
            if self
                .shared
                .instances
                .get(&execution.workflow_id)
                .is_some_and(|handle| handle.execution == execution)
            {
                continue;
            }
            if self.shared.store.current_run(&execution.workflow_id).await?.as_deref()
                != Some(execution.run_id.as_str())
            {
                continue;
            }
            let Some(history) = self.shared.store.load(&execution).await? else {
                continue;
            };
            if history.status().is_closed()
                || history.started().map(|(_, tl, _)| tl) != Some(task_list)
            {
                continue;
            }

            let mut executor = match WorkflowExecutor::for_history(
                worker.registry.as_ref(),
                execution.clone(),
                &history,
            ) {
                Ok(executor) => executor,
                Err(err) => {
                    tracing::error!(%execution, error = %err, "cannot resume workflow");
                    continue;
                }
            };
            let startup = match executor.replay_history(&history) {
                Ok(summary) => Startup::Recovered {
                    needs_decision: summary.needs_decision(),
                    replay_error: None,
                },
                Err(err) => Startup::Recovered {
                    needs_decision: false,
                    replay_error: Some(err),
                },
            };

            tracing::info!(%execution, events = history.len(), "resuming workflow");
            Instance::spawn(
                self.shared.clone(),
                worker.clone(),
                execution,
                history,
                executor,
                startup,
            );
            recovered += 1;
        }
        Ok(recovered)
    }

    fn instance(&self, workflow_id: &str, run_id: Option<&str>) -> Option<InstanceHandle> {
        self.shared.instances
            .get(workflow_id)
            .filter(|handle| handle.matches(run_id))
            .map(|handle| handle.clone())
    }

    async fn resolve(&self, workflow_id: &str, run_id: Option<&str>) -> FlowResult<WorkflowExecution> {
        let run_id = match run_id {
            Some(run_id) => run_id.to_string(),
            None => self
                .shared
                .store
                .current_run(workflow_id)
                .await?
                .ok_or_else(|| entity_not_exists(format!("workflow not found: {}", workflow_id)))?,
        };
        Ok(WorkflowExecution::new(workflow_id, run_id))
    }

    async fn load(&self, execution: &WorkflowExecution) -> FlowResult<History> {
        Ok(self
            .shared
            .store
            .load(execution)
            .await?
            .ok_or_else(|| entity_not_exists(format!("workflow execution not found: {}", execution)))?)
    }

    /// Status of the latest run of `workflow_id`
    async fn current_status(
        &self,
        workflow_id: &str,
    ) -> FlowResult<Option<(String, WorkflowExecutionStatus)>> {
        if let Some(handle) = self.instance(workflow_id, None) {
            return Ok(Some((handle.execution.run_id.clone(), handle.status())));
        }
        let Some(run_id) = self.shared.store.current_run(workflow_id).await? else {
            return Ok(None);
        };
        let execution = WorkflowExecution::new(workflow_id, run_id.clone());
        Ok(self
            .shared
            .store
            .load(&execution)
            .await?
            .map(|history| (run_id, history.status())))
    }

    /// Deliver an input to a run, directly into its stored history when no
    /// worker is serving it yet
    async fn deliver_input(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        event: EventAttributes,
    ) -> FlowResult<()> {
        if let Some(handle) = self.instance(workflow_id, run_id) {
            if let Ok(result) = handle.send_input(event.clone()).await {
                return result;
            }
        }

        let _guard = self.lifecycle.lock().await;
        if let Some(handle) = self.instance(workflow_id, run_id) {
            if let Ok(result) = handle.send_input(event.clone()).await {
                return result;
            }
        }
        let execution = self.resolve(workflow_id, run_id).await?;
        let mut history = self.load(&execution).await?;
        if history.status().is_closed() {
            return Err(ServerError::WorkflowExecutionAlreadyCompleted {
                message: format!("workflow execution {} already completed", execution),
            }
            .into());
        }
        append(&mut history, event);
        self.shared.store.save(&execution, &history).await
    }

    async fn terminate(&self, execution: &WorkflowExecution, reason: String) -> FlowResult<()> {
        if let Some(handle) = self.instance(&execution.workflow_id, Some(&execution.run_id)) {
            if let Ok(result) = handle.terminate(reason.clone()).await {
                return result;
            }
        }
        let mut history = self.load(execution).await?;
        if history.status().is_closed() {
            return Err(ServerError::WorkflowExecutionAlreadyCompleted {
                message: format!("workflow execution {} already completed", execution),
            }
            .into());
        }
        append(&mut history, EventAttributes::WorkflowExecutionTerminated { reason });
        self.shared.store.save(execution, &history).await
    }
}

fn append(history: &mut History, attributes: EventAttributes) {
    let event_id = history.last_event_id() + 1;
    history.events.push(HistoryEvent {
        event_id,
        timestamp: Utc::now(),
        attributes,
    });
}

#[async_trait]
impl WorkflowService for Engine {
    async fn start_workflow_execution(
        &self,
        request: StartWorkflowExecutionRequest,
    ) -> FlowResult<StartWorkflowExecutionResponse> {
        if request.workflow_id.is_empty() || request.workflow_type.is_empty() {
            return Err(ServerError::BadRequest {
                message: "workflow id and workflow type are required".to_string(),
            }
            .into());
        }

        let _guard = self.lifecycle.lock().await;
        let policy = request.workflow_id_reuse_policy;
        match self.current_status(&request.workflow_id).await? {
            Some((run_id, WorkflowExecutionStatus::Running)) => {
                if policy != WorkflowIdReusePolicy::TerminateIfRunning {
                    return Err(already_started(format!(
                        "workflow {} is already running, run id {}",
                        request.workflow_id, run_id
                    ))
                    .into());
                }
                let running = WorkflowExecution::new(request.workflow_id.clone(), run_id);
                self.terminate(&running, "terminated by workflow id reuse policy".to_string())
                    .await?;
            }
            Some((run_id, status)) => {
                let allowed = match policy {
                    WorkflowIdReusePolicy::AllowDuplicate
                    | WorkflowIdReusePolicy::TerminateIfRunning => true,
                    WorkflowIdReusePolicy::AllowDuplicateFailedOnly => status.is_unsuccessful(),
                    WorkflowIdReusePolicy::RejectDuplicate => false,
                };
                if !allowed {
                    return Err(already_started(format!(
                        "workflow {} already ran as {} with status {} ({:?})",
                        request.workflow_id, run_id, status, policy
                    ))
                    .into());
                }
            }
            None => {}
        }

        let execution = WorkflowExecution::new(
            request.workflow_id.clone(),
            uuid::Uuid::new_v4().to_string(),
        );
        let mut history = History::default();
        append(
            &mut history,
            EventAttributes::WorkflowExecutionStarted {
                workflow_type: request.workflow_type.clone(),
                task_list: request.task_list.clone(),
                input: request.input.clone(),
                identity: request.identity.clone(),
            },
        );

        let worker = self.shared.worker(&request.task_list);
        let executor = match &worker {
            Some(worker) => Some(WorkflowExecutor::for_history(
                worker.registry.as_ref(),
                execution.clone(),
                &history,
            )?),
            None => None,
        };
        self.shared.store.save(&execution, &history).await?;

        tracing::info!(
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
            workflow_type = %request.workflow_type,
            task_list = %request.task_list,
            "workflow started"
        );

        match (worker, executor) {
            (Some(worker), Some(executor)) => {
                Instance::spawn(
                    self.shared.clone(),
                    worker,
                    execution.clone(),
                    history,
                    executor,
                    Startup::Fresh,
                );
            }
            _ => {
                self.shared.instances.remove(&execution.workflow_id);
                tracing::info!(
                    task_list = %request.task_list,
                    "no worker serves the task list yet, run starts when one does"
                );
            }
        }

        Ok(StartWorkflowExecutionResponse {
            run_id: execution.run_id,
        })
    }

    async fn signal_workflow_execution(
        &self,
        request: SignalWorkflowExecutionRequest,
    ) -> FlowResult<()> {
        tracing::debug!(
            workflow_id = %request.workflow_id,
            signal_name = %request.signal_name,
            identity = %request.identity,
            "signal"
        );
        self.deliver_input(
            &request.workflow_id,
            request.run_id.as_deref(),
            EventAttributes::WorkflowExecutionSignaled {
                signal_name: request.signal_name,
                input: request.input,
            },
        )
        .await
    }

    async fn request_cancel_workflow_execution(
        &self,
        request: RequestCancelWorkflowExecutionRequest,
    ) -> FlowResult<()> {
        tracing::info!(
            workflow_id = %request.workflow_id,
            identity = %request.identity,
            "cancel requested"
        );
        self.deliver_input(
            &request.workflow_id,
            request.run_id.as_deref(),
            EventAttributes::WorkflowExecutionCancelRequested {
                cause: request.cause,
            },
        )
        .await
    }

    async fn terminate_workflow_execution(
        &self,
        request: TerminateWorkflowExecutionRequest,
    ) -> FlowResult<()> {
        let _guard = self.lifecycle.lock().await;
        let execution = self
            .resolve(&request.workflow_id, request.run_id.as_deref())
            .await?;
        self.terminate(&execution, request.reason).await
    }

    async fn query_workflow(&self, request: QueryWorkflowRequest) -> FlowResult<QueryWorkflowResponse> {
        let live = match self.instance(&request.workflow_id, request.run_id.as_deref()) {
            Some(handle) => handle
                .query(&request.query_type, request.query_args.clone())
                .await
                .ok(),
            None => None,
        };
        let answer = match live {
            Some(answer) => answer,
            None => {
                let execution = self
                    .resolve(&request.workflow_id, request.run_id.as_deref())
                    .await?;
                let history = self.load(&execution).await?;
                let task_list = history.started().map(|(_, tl, _)| tl).unwrap_or_default();
                let worker = self.shared.worker(task_list).ok_or_else(|| {
                    ServerError::QueryFailed {
                        message: format!("no worker serves task list '{}'", task_list),
                    }
                })?;
                let mut executor = WorkflowExecutor::for_history(
                    worker.registry.as_ref(),
                    execution,
                    &history,
                )?;
                executor
                    .replay_history(&history)
                    .map_err(|e| ServerError::QueryFailed {
                        message: e.to_string(),
                    })?;
                executor.query(&request.query_type, request.query_args.as_deref())
            }
        };

        answer
            .map(|query_result| QueryWorkflowResponse { query_result })
            .map_err(|e| {
                ServerError::QueryFailed {
                    message: e.to_string(),
                }
                .into()
            })
    }

    async fn get_workflow_execution_history(
        &self,
        request: GetWorkflowExecutionHistoryRequest,
    ) -> FlowResult<History> {
        let execution = self
            .resolve(&request.workflow_id, request.run_id.as_deref())
            .await?;

        loop {
            if request.wait_for_close {
                if let Some(handle) = self.instance(&execution.workflow_id, Some(&execution.run_id)) {
                    let mut status = handle.status.clone();
                    // a dropped sender means the instance is gone; re-read the store
                    let _ = status.wait_for(|s| s.is_closed()).await;
                }
            }
            let history = self.load(&execution).await?;
            if !request.wait_for_close || history.status().is_closed() {
                return Ok(history);
            }
            tokio::time::sleep(HISTORY_POLL_INTERVAL).await;
        }
    }

    async fn describe_workflow_execution(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> FlowResult<DescribeWorkflowExecutionResponse> {
        let execution = self.resolve(workflow_id, run_id).await?;
        let history = self.load(&execution).await?;
        let (workflow_type, task_list, _) = history.started().ok_or_else(|| {
            ServerError::InternalService {
                message: format!("history of {} has no start event", execution),
            }
        })?;

        let mut pending_activities: Vec<String> = Vec::new();
        for event in &history.events {
            match &event.attributes {
                EventAttributes::ActivityTaskScheduled { activity_id, .. } => {
                    pending_activities.push(activity_id.clone())
                }
                EventAttributes::ActivityTaskCompleted { activity_id, .. }
                | EventAttributes::ActivityTaskFailed { activity_id, .. }
                | EventAttributes::ActivityTaskTimedOut { activity_id, .. } => {
                    pending_activities.retain(|id| id != activity_id)
                }
                _ => {}
            }
        }

        Ok(DescribeWorkflowExecutionResponse {
            workflow_type: workflow_type.to_string(),
            task_list: task_list.to_string(),
            status: history.status(),
            start_time: history.start_time().unwrap_or_else(Utc::now),
            history_length: history.len(),
            pending_activities,
            execution,
        })
    }
}
