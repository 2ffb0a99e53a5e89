//! Workflow id policies.
//!
//! The id decides which starts are duplicates of each other: the engine
//! applies the start's [`WorkflowIdReusePolicy`] to runs sharing an id.

use chrono::{DateTime, Utc};
use iplocate_core::WorkflowIdReusePolicy;

/// Prefix of lookup workflow ids
pub const LOOKUP_ID_PREFIX: &str = "ip-geolocation-workflow";

/// Prefix of monitor workflow ids
pub const MONITOR_ID_PREFIX: &str = "ip-monitor-demo";

/// Fixed id of the observable lookup
pub const OBSERVABLE_LOOKUP_ID: &str = "ip-lookup-observable";

/// Fixed id of the status checker
pub const STATUS_CHECKER_ID: &str = "status-checker";

/// How a workflow id is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceIdPolicy {
    /// `{prefix}-{unix_secs}`: a new instance per start
    TimeBased { prefix: String },
    /// The same id every time, so a repeated start is deduplicated
    Constant(String),
    /// `{prefix}-{entity}`: one instance per business entity
    EntityDerived { prefix: String, entity: String },
}

impl InstanceIdPolicy {
    pub fn id(&self) -> String {
        self.id_at(Utc::now())
    }

    pub fn id_at(&self, now: DateTime<Utc>) -> String {
        match self {
            InstanceIdPolicy::TimeBased { prefix } => format!("{}-{}", prefix, now.timestamp()),
            InstanceIdPolicy::Constant(id) => id.clone(),
            InstanceIdPolicy::EntityDerived { prefix, entity } => format!("{}-{}", prefix, entity),
        }
    }

    /// Reuse policy matching the intent of the id
    pub fn reuse_policy(&self) -> WorkflowIdReusePolicy {
        match self {
            // every start gets a fresh id, the default only matters on a clash
            InstanceIdPolicy::TimeBased { .. } => WorkflowIdReusePolicy::AllowDuplicateFailedOnly,
            InstanceIdPolicy::Constant(_) => WorkflowIdReusePolicy::RejectDuplicate,
            InstanceIdPolicy::EntityDerived { .. } => WorkflowIdReusePolicy::AllowDuplicate,
        }
    }
}
