//! What a running activity can see of its own execution.

use iplocate_core::WorkflowExecution;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Hooks the worker exposes to one activity attempt
pub trait ActivityRuntime: Send + Sync {
    fn record_heartbeat(&self, details: Option<Vec<u8>>);

    /// Set once the attempt timed out and its result will be discarded
    fn is_cancelled(&self) -> bool;
}

/// Passed to every activity attempt
#[derive(Clone)]
pub struct ActivityContext {
    info: ActivityInfo,
    worker_stop: Option<watch::Receiver<bool>>,
    runtime: Option<Arc<dyn ActivityRuntime>>,
}

impl ActivityContext {
    pub fn new(info: ActivityInfo, runtime: Option<Arc<dyn ActivityRuntime>>) -> Self {
        Self {
            info,
            worker_stop: None,
            runtime,
        }
    }

    pub fn set_worker_stop_channel(&mut self, channel: watch::Receiver<bool>) {
        self.worker_stop = Some(channel);
    }

    pub fn get_info(&self) -> &ActivityInfo {
        &self.info
    }

    /// `{workflow_id}/{run_id}/{activity_id}`: stable across retries of the
    /// same activity, distinct for every activity of every run
    pub fn correlation_key(&self) -> String {
        let execution = &self.info.workflow_execution;
        format!(
            "{}/{}/{}",
            execution.workflow_id, execution.run_id, self.info.activity_id
        )
    }

    /// Details are handed to the next attempt if this one fails
    pub fn record_heartbeat(&self, details: Option<&[u8]>) {
        if let Some(runtime) = &self.runtime {
            runtime.record_heartbeat(details.map(<[u8]>::to_vec));
        }
    }

    /// Last heartbeat recorded by an earlier attempt
    pub fn heartbeat_details(&self) -> Option<&[u8]> {
        self.info.heartbeat_details.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(|runtime| runtime.is_cancelled())
    }

    /// True once the worker began shutting down
    pub fn is_worker_stopping(&self) -> bool {
        self.worker_stop
            .as_ref()
            .is_some_and(|stop| *stop.borrow())
    }

    /// Time left before the start-to-close timeout, if there is one
    pub fn remaining_time(&self) -> Option<Duration> {
        self.info
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[derive(Debug, Clone)]
pub struct ActivityInfo {
    pub activity_id: String,
    pub activity_type: String,
    pub task_list: String,
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: String,
    /// Starts at 1
    pub attempt: i32,
    pub scheduled_time: chrono::DateTime<chrono::Utc>,
    pub started_time: chrono::DateTime<chrono::Utc>,
    pub deadline: Option<Instant>,
    pub heartbeat_details: Option<Vec<u8>>,
}

impl ActivityInfo {
    /// Info for running an activity outside of a worker
    pub fn for_test(activity_type: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            activity_id: "0".to_string(),
            activity_type: activity_type.to_string(),
            task_list: "test-task-list".to_string(),
            workflow_execution: WorkflowExecution::new("test-workflow", "test-run"),
            workflow_type: "TestWorkflow".to_string(),
            attempt: 1,
            scheduled_time: now,
            started_time: now,
            deadline: None,
            heartbeat_details: None,
        }
    }
}
