//! Client options.

use iplocate_core::WorkflowIdReusePolicy;

/// Client configuration options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Identity recorded on requests made by this client
    pub identity: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            identity: format!(
                "iplocate-client@{}-pid-{}",
                std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
                std::process::id()
            ),
        }
    }
}

/// Options for starting a workflow
#[derive(Debug, Clone, Default)]
pub struct StartWorkflowOptions {
    pub id: String,
    pub task_list: String,
    pub workflow_id_reuse_policy: WorkflowIdReusePolicy,
}

impl StartWorkflowOptions {
    pub fn new(id: impl Into<String>, task_list: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_list: task_list.into(),
            workflow_id_reuse_policy: WorkflowIdReusePolicy::default(),
        }
    }

    pub fn with_reuse_policy(mut self, policy: WorkflowIdReusePolicy) -> Self {
        self.workflow_id_reuse_policy = policy;
        self
    }
}
