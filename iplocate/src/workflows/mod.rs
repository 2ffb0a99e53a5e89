//! Workflows and their registration.

pub mod lookup;
pub mod monitor;
pub mod observe;

pub use lookup::{run_lookup, LookupRequest, LookupResult, LookupVariant, CHANGE_ID};
pub use monitor::{run_monitor, MonitorConfig, MonitorStatus};
pub use observe::{run_observable_lookup, run_status_checker, ObservableLookup};

use crate::config::ActivityConfig;
use iplocate_worker::{workflow_fn, Registry};
use iplocate_workflow::WorkflowContext;

pub const MONITOR_WORKFLOW: &str = "IPMonitorWorkflow";
pub const OBSERVABLE_LOOKUP_WORKFLOW: &str = "IPLookupWorkflow";
pub const STATUS_CHECKER_WORKFLOW: &str = "StatusCheckerWorkflow";

/// Register every workflow under its public type name
pub fn register_workflows(registry: &dyn Registry, activity: &ActivityConfig) {
    for variant in LookupVariant::ALL {
        let options = activity.options();
        registry.register_workflow(
            variant.workflow_type(),
            workflow_fn(move |ctx: WorkflowContext, request: LookupRequest| {
                let options = options.clone();
                async move { run_lookup(&ctx, variant, &request, &options).await }
            }),
        );
    }

    let options = activity.monitor_options();
    registry.register_workflow(
        MONITOR_WORKFLOW,
        workflow_fn(move |ctx: WorkflowContext, config: MonitorConfig| {
            let options = options.clone();
            async move { run_monitor(&ctx, config, &options).await }
        }),
    );

    let options = activity.options();
    registry.register_workflow(
        OBSERVABLE_LOOKUP_WORKFLOW,
        workflow_fn(move |ctx: WorkflowContext, input: ObservableLookup| {
            let options = options.clone();
            async move { run_observable_lookup(&ctx, input, &options).await }
        }),
    );

    let options = activity.options();
    registry.register_workflow(
        STATUS_CHECKER_WORKFLOW,
        workflow_fn(move |ctx: WorkflowContext, target_id: String| {
            let options = options.clone();
            async move { run_status_checker(&ctx, target_id, &options).await }
        }),
    );
}
