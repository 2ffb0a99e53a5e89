//! A slow lookup exposing its progress, and a workflow reporting on it.

use crate::activities::{WorkflowStatusReport, GET_LOCATION_INFO, QUERY_WORKFLOW_STATUS};
use crate::activities::status::{RESULT_QUERY, STATUS_QUERY};
use iplocate_core::ActivityOptions;
use iplocate_workflow::{WorkflowContext, WorkflowError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const STATUS_STARTING: &str = "starting";
pub const STATUS_FETCHING: &str = "fetching location";
pub const STATUS_COMPLETE: &str = "complete";
pub const STATUS_FAILED: &str = "failed";

/// Input of the observable lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservableLookup {
    pub ip: String,
    /// Delay before the lookup starts
    #[serde(default = "default_fetch_delay_secs")]
    pub fetch_delay_secs: u64,
    /// Delay after the lookup, while the result stays queryable on a running
    /// workflow
    #[serde(default = "default_linger_secs")]
    pub linger_secs: u64,
}

fn default_fetch_delay_secs() -> u64 {
    10
}

fn default_linger_secs() -> u64 {
    20
}

impl ObservableLookup {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            fetch_delay_secs: default_fetch_delay_secs(),
            linger_secs: default_linger_secs(),
        }
    }
}

#[derive(Default)]
struct Progress {
    status: String,
    result: String,
}

/// Look up the location of `input.ip` slowly enough to be observed
pub async fn run_observable_lookup(
    ctx: &WorkflowContext,
    input: ObservableLookup,
    options: &ActivityOptions,
) -> Result<String, WorkflowError> {
    let progress = Arc::new(Mutex::new(Progress {
        status: STATUS_STARTING.to_string(),
        result: String::new(),
    }));

    let state = progress.clone();
    ctx.set_query_handler_json(STATUS_QUERY, move || state.lock().status.clone());
    let state = progress.clone();
    ctx.set_query_handler_json(RESULT_QUERY, move || state.lock().result.clone());

    ctx.sleep(Duration::from_secs(input.fetch_delay_secs)).await?;
    progress.lock().status = STATUS_FETCHING.to_string();

    let outcome = ctx
        .execute_typed_activity::<_, String>(GET_LOCATION_INFO, &input.ip, options.clone())
        .await;
    let location = match outcome {
        Ok(location) => location,
        Err(err) => {
            progress.lock().status = STATUS_FAILED.to_string();
            return Err(err);
        }
    };

    {
        let mut progress = progress.lock();
        progress.status = STATUS_COMPLETE.to_string();
        progress.result = location.clone();
    }
    ctx.get_logger()
        .info(format!("Lookup of {} complete: {}", input.ip, location));

    ctx.sleep(Duration::from_secs(input.linger_secs)).await?;
    Ok(location)
}

/// Report on the state of the workflow `target_id`
pub async fn run_status_checker(
    ctx: &WorkflowContext,
    target_id: String,
    options: &ActivityOptions,
) -> Result<String, WorkflowError> {
    let report: WorkflowStatusReport = ctx
        .execute_typed_activity(QUERY_WORKFLOW_STATUS, &target_id, options.clone())
        .await?;
    let summary = report.summary();
    ctx.get_logger().info(&summary);
    Ok(summary)
}
