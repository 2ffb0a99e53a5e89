//! Activity task handler for processing activity tasks.

use crate::registry::{ActivityError, Registry};
use chrono::{DateTime, Utc};
use iplocate_activity::{ActivityContext, ActivityInfo, ActivityRuntime};
use iplocate_core::{EventAttributes, RetryPolicy, TimeoutType, WorkflowExecution};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// One scheduled activity, as handed to a worker
#[derive(Debug, Clone)]
pub struct ActivityTask {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: String,
    pub activity_id: String,
    pub activity_type: String,
    pub task_list: String,
    pub input: Option<Vec<u8>>,
    pub schedule_to_close_timeout: Duration,
    pub start_to_close_timeout: Duration,
    pub retry_policy: Option<RetryPolicy>,
    pub scheduled_time: DateTime<Utc>,
}

impl ActivityTask {
    /// Task for an `ActivityTaskScheduled` event
    pub fn from_scheduled_event(
        workflow_execution: &WorkflowExecution,
        workflow_type: &str,
        attributes: &EventAttributes,
        scheduled_time: DateTime<Utc>,
    ) -> Option<Self> {
        match attributes {
            EventAttributes::ActivityTaskScheduled {
                activity_id,
                activity_type,
                task_list,
                input,
                schedule_to_close_timeout,
                start_to_close_timeout,
                retry_policy,
            } => Some(Self {
                workflow_execution: workflow_execution.clone(),
                workflow_type: workflow_type.to_string(),
                activity_id: activity_id.clone(),
                activity_type: activity_type.clone(),
                task_list: task_list.clone(),
                input: input.clone(),
                schedule_to_close_timeout: *schedule_to_close_timeout,
                start_to_close_timeout: *start_to_close_timeout,
                retry_policy: retry_policy.clone(),
                scheduled_time,
            }),
            _ => None,
        }
    }
}

struct ActivityRuntimeImpl {
    heartbeat_details: Arc<Mutex<Option<Vec<u8>>>>,
    cancelled: Arc<AtomicBool>,
}

impl ActivityRuntime for ActivityRuntimeImpl {
    fn record_heartbeat(&self, details: Option<Vec<u8>>) {
        *self.heartbeat_details.lock() = details;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Activity task handler
///
/// Runs every attempt of an activity, retrying under the task's retry
/// policy, and reports the final outcome as a history event.
pub struct ActivityTaskHandler {
    registry: Arc<dyn Registry>,
    identity: String,
    limiter: Arc<Semaphore>,
    max_concurrent: usize,
    stop_rx: watch::Receiver<bool>,
}

impl ActivityTaskHandler {
    pub fn new(
        registry: Arc<dyn Registry>,
        identity: String,
        max_concurrent: usize,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            identity,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_concurrent: max_concurrent.max(1),
            stop_rx,
        }
    }

    /// Activity attempts currently running
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.limiter.available_permits())
    }

    /// Handle an activity task
    #[tracing::instrument(
        name = "activity",
        skip(self, task),
        fields(
            workflow_id = %task.workflow_execution.workflow_id,
            activity_type = %task.activity_type,
            activity_id = %task.activity_id,
        )
    )]
    pub async fn handle(&self, task: ActivityTask) -> EventAttributes {
        let started = tokio::time::Instant::now();
        let heartbeat_details = Arc::new(Mutex::new(None));
        let mut attempt = 1;

        loop {
            let err = match self.run_attempt(&task, attempt, &heartbeat_details).await {
                Ok(output) => {
                    tracing::info!(attempt, identity = %self.identity, "activity completed");
                    return EventAttributes::ActivityTaskCompleted {
                        activity_id: task.activity_id.clone(),
                        result: Some(output),
                        attempt,
                    };
                }
                Err(err) => err,
            };

            let elapsed = started.elapsed();
            let delay = match &task.retry_policy {
                Some(policy)
                    if err.is_retryable()
                        && policy.should_retry(attempt, err.failure_type().reason(), elapsed)
                        && within_budget(task.schedule_to_close_timeout, elapsed, policy.backoff(attempt)) =>
                {
                    policy.backoff(attempt)
                }
                _ => {
                    tracing::error!(attempt, error = %err, "activity failed");
                    return failure_event(&task.activity_id, err, attempt);
                }
            };

            tracing::warn!(attempt, error = %err, ?delay, "activity attempt failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn run_attempt(
        &self,
        task: &ActivityTask,
        attempt: i32,
        heartbeat_details: &Arc<Mutex<Option<Vec<u8>>>>,
    ) -> Result<Vec<u8>, ActivityError> {
        let activity = self.registry.get_activity(&task.activity_type).ok_or_else(|| {
            tracing::warn!("Activity '{}' not registered in registry", task.activity_type);
            ActivityError::non_retryable(format!("Activity '{}' not registered", task.activity_type))
        })?;

        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ActivityError::Cancelled)?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let runtime = Arc::new(ActivityRuntimeImpl {
            heartbeat_details: heartbeat_details.clone(),
            cancelled: cancelled.clone(),
        });

        let timeout = task.start_to_close_timeout;
        let activity_info = ActivityInfo {
            activity_id: task.activity_id.clone(),
            activity_type: task.activity_type.clone(),
            task_list: task.task_list.clone(),
            workflow_execution: task.workflow_execution.clone(),
            workflow_type: task.workflow_type.clone(),
            attempt,
            scheduled_time: task.scheduled_time,
            started_time: Utc::now(),
            deadline: (!timeout.is_zero()).then(|| std::time::Instant::now() + timeout),
            heartbeat_details: heartbeat_details.lock().clone(),
        };

        let mut context = ActivityContext::new(activity_info, Some(runtime));
        context.set_worker_stop_channel(self.stop_rx.clone());

        tracing::debug!(attempt, "executing activity");
        let handle = tokio::spawn(activity.execute(&context, task.input.clone()));
        let abort = handle.abort_handle();

        let joined = if timeout.is_zero() {
            handle.await
        } else {
            match tokio::time::timeout(timeout, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancelled.store(true, Ordering::Relaxed);
                    abort.abort();
                    return Err(ActivityError::Timeout(TimeoutType::StartToClose));
                }
            }
        };

        match joined {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                Err(ActivityError::Panic(join_error.to_string()))
            }
            Err(join_error) => Err(ActivityError::ExecutionFailed(format!(
                "Activity task cancelled: {}",
                join_error
            ))),
        }
    }
}

fn within_budget(budget: Duration, elapsed: Duration, next_delay: Duration) -> bool {
    budget.is_zero() || elapsed.saturating_add(next_delay) < budget
}

fn failure_event(activity_id: &str, err: ActivityError, attempt: i32) -> EventAttributes {
    match err {
        ActivityError::Timeout(timeout_type) => EventAttributes::ActivityTaskTimedOut {
            activity_id: activity_id.to_string(),
            timeout_type,
            attempt,
        },
        err => EventAttributes::ActivityTaskFailed {
            activity_id: activity_id.to_string(),
            reason: err.failure_type().reason().to_string(),
            message: err.message(),
            details: None,
            retryable: err.is_retryable(),
            attempt,
        },
    }
}
