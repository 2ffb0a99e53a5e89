//! Worker implementation for hosting workflows and activities.
//!
//! A worker binds a registry of workflow and activity implementations to a
//! task list on an [`Engine`]. Starting it resumes every open instance the
//! engine has persisted for that task list.

use crate::engine::{Engine, WorkerHandle};
use crate::handlers::ActivityTaskHandler;
use crate::registry::Registry;
use async_trait::async_trait;
use iplocate_core::{NonDeterministicWorkflowPolicy, WorkerIdentity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::watch;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Worker trait for hosting workflows and activities
#[async_trait]
pub trait Worker: Send + Sync {
    /// Start the worker in non-blocking mode
    async fn start(&self) -> Result<(), WorkerError>;

    /// Start the worker and wait until it is stopped
    async fn run(&self) -> Result<(), WorkerError>;

    /// Stop the worker
    fn stop(&self);
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker already started")]
    AlreadyStarted,
    #[error("Task list '{0}' is already served by another worker")]
    TaskListInUse(String),
    #[error("Failed to recover persisted workflows: {0}")]
    RecoveryFailed(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Worker is shutting down")]
    ShuttingDown,
}

/// Worker options for configuration
#[derive(Clone)]
pub struct WorkerOptions {
    /// Maximum concurrent activity executions
    pub max_concurrent_activity_execution_size: usize,
    /// Worker stop timeout
    pub worker_stop_timeout: Duration,
    /// Non-deterministic workflow policy
    pub non_deterministic_workflow_policy: NonDeterministicWorkflowPolicy,
    /// Identity
    pub identity: String,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_activity_execution_size: 1000,
            worker_stop_timeout: Duration::from_secs(10),
            non_deterministic_workflow_policy: NonDeterministicWorkflowPolicy::BlockWorkflow,
            identity: WorkerIdentity::default().name,
        }
    }
}

impl std::fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerOptions")
            .field(
                "max_concurrent_activity_execution_size",
                &self.max_concurrent_activity_execution_size,
            )
            .field(
                "non_deterministic_workflow_policy",
                &self.non_deterministic_workflow_policy,
            )
            .field("identity", &self.identity)
            .finish()
    }
}

/// Worker serving one task list of an in-process [`Engine`]
pub struct EngineWorker {
    engine: Engine,
    task_list: String,
    options: WorkerOptions,
    registry: Arc<dyn Registry>,
    started: AtomicBool,
    stop_tx: watch::Sender<bool>,
    activities: Mutex<Option<Arc<ActivityTaskHandler>>>,
}

impl EngineWorker {
    pub fn new(
        engine: Engine,
        task_list: impl Into<String>,
        options: WorkerOptions,
        registry: Arc<dyn Registry>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            engine,
            task_list: task_list.into(),
            options,
            registry,
            started: AtomicBool::new(false),
            stop_tx,
            activities: Mutex::new(None),
        }
    }

    pub fn task_list(&self) -> &str {
        &self.task_list
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Stop the worker, then wait up to `worker_stop_timeout` for running
    /// activity attempts to finish
    pub async fn shutdown(&self) {
        self.stop();
        let Some(activities) = self.activities.lock().clone() else {
            return;
        };
        let drained = tokio::time::timeout(self.options.worker_stop_timeout, async {
            while activities.in_flight() > 0 {
                tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                task_list = %self.task_list,
                in_flight = activities.in_flight(),
                "stop timeout elapsed with activities still running"
            );
        }
    }

    fn validate(&self) -> Result<(), WorkerError> {
        if self.task_list.is_empty() {
            return Err(WorkerError::InvalidConfiguration(
                "task list must not be empty".to_string(),
            ));
        }
        if self.options.max_concurrent_activity_execution_size == 0 {
            return Err(WorkerError::InvalidConfiguration(
                "max_concurrent_activity_execution_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for EngineWorker {
    async fn start(&self) -> Result<(), WorkerError> {
        self.validate()?;
        if *self.stop_tx.borrow() {
            return Err(WorkerError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        let activities = ActivityTaskHandler::new(
            self.registry.clone(),
            self.options.identity.clone(),
            self.options.max_concurrent_activity_execution_size,
            self.stop_tx.subscribe(),
        );
        let activities = Arc::new(activities);
        *self.activities.lock() = Some(activities.clone());
        let handle = WorkerHandle {
            registry: self.registry.clone(),
            options: self.options.clone(),
            activities,
        };
        if !self.engine.register_worker(&self.task_list, handle) {
            self.started.store(false, Ordering::SeqCst);
            return Err(WorkerError::TaskListInUse(self.task_list.clone()));
        }

        let recovered = self
            .engine
            .recover(&self.task_list)
            .await
            .map_err(|e| WorkerError::RecoveryFailed(e.to_string()))?;

        tracing::info!(
            task_list = %self.task_list,
            identity = %self.options.identity,
            workflows = self.registry.get_registered_workflows().len(),
            activities = self.registry.get_registered_activities().len(),
            recovered,
            "worker started"
        );
        Ok(())
    }

    async fn run(&self) -> Result<(), WorkerError> {
        self.start().await?;
        let mut stop_rx = self.stop_tx.subscribe();
        // the sender lives in self, so this only ends on stop()
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
        Ok(())
    }

    fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        self.stop_tx.send_replace(true);
        self.engine.unregister_worker(&self.task_list);
        tracing::info!(task_list = %self.task_list, "worker stopped");
    }
}
