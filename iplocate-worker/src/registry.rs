//! Named workflow and activity implementations served by a worker.

use dashmap::DashMap;
use dyn_clone::DynClone;
use iplocate_activity::ActivityContext;
use iplocate_core::TimeoutType;
use iplocate_workflow::{ActivityFailureType, WorkflowContext};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use iplocate_workflow::WorkflowError;

/// Future returned by a workflow implementation
pub type WorkflowFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, WorkflowError>> + Send>>;

/// Future returned by an activity implementation
pub type ActivityFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, ActivityError>> + Send>>;

pub trait Workflow: Send + Sync + DynClone {
    fn execute(&self, ctx: WorkflowContext, input: Option<Vec<u8>>) -> WorkflowFuture;
}

dyn_clone::clone_trait_object!(Workflow);

pub trait Activity: Send + Sync + DynClone {
    fn execute(&self, ctx: &ActivityContext, input: Option<Vec<u8>>) -> ActivityFuture;
}

dyn_clone::clone_trait_object!(Activity);

/// How an activity attempt failed; decides whether it is retried
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActivityError {
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("panicked: {0}")]
    Panic(String),
    #[error("{0}")]
    Retryable(String),
    #[error("{0} (not retryable)")]
    NonRetryable(String),
    #[error("application failure: {0}")]
    Application(String),
    #[error("cancelled")]
    Cancelled,
    #[error("timed out ({0})")]
    Timeout(TimeoutType),
}

impl ActivityError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn non_retryable(msg: impl Into<String>) -> Self {
        Self::NonRetryable(msg.into())
    }

    /// Failure reported by the activity's own logic, never retried
    pub fn application(msg: impl Into<String>) -> Self {
        Self::Application(msg.into())
    }

    /// Timeouts and plain execution failures are retried too
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Retryable(_) | Self::ExecutionFailed(_) | Self::Timeout(_)
        )
    }

    pub fn failure_type(&self) -> ActivityFailureType {
        match self {
            Self::ExecutionFailed(_) => ActivityFailureType::ExecutionFailed,
            Self::Panic(_) => ActivityFailureType::Panic,
            Self::Retryable(_) => ActivityFailureType::Retryable,
            Self::NonRetryable(_) => ActivityFailureType::NonRetryable,
            Self::Application(_) => ActivityFailureType::Application,
            Self::Cancelled => ActivityFailureType::Cancelled,
            Self::Timeout(t) => ActivityFailureType::Timeout(*t),
        }
    }

    /// Failure message without the variant prefix
    pub fn message(&self) -> String {
        match self {
            Self::ExecutionFailed(msg)
            | Self::Panic(msg)
            | Self::Retryable(msg)
            | Self::NonRetryable(msg)
            | Self::Application(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Workflow types and activities by name
pub trait Registry: Send + Sync {
    /// Replaces any earlier registration under `name`
    fn register_workflow(&self, name: &str, workflow: Box<dyn Workflow>);

    fn get_registered_workflows(&self) -> Vec<RegistryInfo>;

    fn register_activity(&self, name: &str, activity: Box<dyn Activity>);

    fn get_registered_activities(&self) -> Vec<RegistryInfo>;

    fn get_workflow(&self, name: &str) -> Option<Box<dyn Workflow>>;

    fn get_activity(&self, name: &str) -> Option<Box<dyn Activity>>;
}

/// One registration, as listed by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInfo {
    pub name: String,
    pub type_name: String,
}

/// Shared registry: clones see the same registrations
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workflows: Arc<DashMap<String, Box<dyn Workflow>>>,
    activities: Arc<DashMap<String, Box<dyn Activity>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for WorkflowRegistry {
    fn register_workflow(&self, name: &str, workflow: Box<dyn Workflow>) {
        self.workflows.insert(name.to_string(), workflow);
    }

    fn get_registered_workflows(&self) -> Vec<RegistryInfo> {
        let mut infos: Vec<RegistryInfo> = self
            .workflows
            .iter()
            .map(|entry| RegistryInfo {
                name: entry.key().clone(),
                type_name: "workflow".to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn register_activity(&self, name: &str, activity: Box<dyn Activity>) {
        self.activities.insert(name.to_string(), activity);
    }

    fn get_registered_activities(&self) -> Vec<RegistryInfo> {
        let mut infos: Vec<RegistryInfo> = self
            .activities
            .iter()
            .map(|entry| RegistryInfo {
                name: entry.key().clone(),
                type_name: "activity".to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn get_workflow(&self, name: &str) -> Option<Box<dyn Workflow>> {
        self.workflows.get(name).map(|entry| entry.clone())
    }

    fn get_activity(&self, name: &str) -> Option<Box<dyn Activity>> {
        self.activities.get(name).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct EchoActivity;

    impl Activity for EchoActivity {
        fn execute(&self, _ctx: &ActivityContext, input: Option<Vec<u8>>) -> ActivityFuture {
            Box::pin(async move { Ok(input.unwrap_or_default()) })
        }
    }

    #[derive(Clone)]
    struct NoopWorkflow;

    impl Workflow for NoopWorkflow {
        fn execute(&self, _ctx: WorkflowContext, _input: Option<Vec<u8>>) -> WorkflowFuture {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[test]
    fn registers_and_lists_by_name() {
        let registry = WorkflowRegistry::new();
        registry.register_activity("get_timezone", Box::new(EchoActivity));
        registry.register_activity("get_ip", Box::new(EchoActivity));
        registry.register_workflow("GetAddressFromIP", Box::new(NoopWorkflow));

        let names: Vec<String> = registry
            .get_registered_activities()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["get_ip", "get_timezone"]);
        assert!(registry.get_workflow("GetAddressFromIP").is_some());
        assert!(registry.get_activity("get_location_info").is_none());

        // Clones share the same tables
        let clone = registry.clone();
        clone.register_activity("get_location_info", Box::new(EchoActivity));
        assert!(registry.get_activity("get_location_info").is_some());
    }

    #[test]
    fn retryability_follows_error_kind() {
        assert!(ActivityError::retryable("connection reset").is_retryable());
        assert!(ActivityError::Timeout(TimeoutType::StartToClose).is_retryable());
        assert!(!ActivityError::non_retryable("API error: invalid query").is_retryable());
        assert!(!ActivityError::Cancelled.is_retryable());
        assert_eq!(
            ActivityError::non_retryable("API error: invalid query").message(),
            "API error: invalid query"
        );
        assert_eq!(
            ActivityError::application("bad").failure_type().reason(),
            "Application"
        );
    }
}
