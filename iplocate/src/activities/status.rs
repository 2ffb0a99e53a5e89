//! Reading another workflow's state from inside a workflow.
//!
//! Queries are not recorded in history, so a workflow cannot issue one
//! directly and still replay deterministically. The query runs in an
//! activity instead and its answer is recorded as the activity result.

use iplocate_client::{ClientError, WorkflowClient};
use serde::{Deserialize, Serialize};

/// Query answered with the target's progress
pub const STATUS_QUERY: &str = "status";

/// Query answered with the target's result, empty until it has one
pub const RESULT_QUERY: &str = "result";

/// What the status query activity observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub workflow_id: String,
    pub status: String,
    #[serde(default)]
    pub result: String,
}

/// Query `status` and, best effort, `result` of `workflow_id`
#[tracing::instrument(skip(client))]
pub async fn query_workflow_status(
    client: &WorkflowClient,
    workflow_id: &str,
) -> Result<WorkflowStatusReport, ClientError> {
    let status: String = client.query_json(workflow_id, STATUS_QUERY).await?;
    let result = match client.query_json::<String>(workflow_id, RESULT_QUERY).await {
        Ok(result) => result,
        Err(err) => {
            tracing::debug!(error = %err, "result query unavailable");
            String::new()
        }
    };
    tracing::info!(%status, "received status from target");
    Ok(WorkflowStatusReport {
        workflow_id: workflow_id.to_string(),
        status,
        result,
    })
}

impl WorkflowStatusReport {
    /// `Workflow {id} is '{status}'`, followed by the result when there is one
    pub fn summary(&self) -> String {
        let mut summary = format!("Workflow {} is '{}'", self.workflow_id, self.status);
        if !self.result.is_empty() {
            summary.push_str(&format!(" - Result: {}", self.result));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_mentions_result_only_when_present() {
        let mut report = WorkflowStatusReport {
            workflow_id: "ip-lookup-observable".to_string(),
            status: "fetching location".to_string(),
            result: String::new(),
        };
        assert_eq!(
            report.summary(),
            "Workflow ip-lookup-observable is 'fetching location'"
        );

        report.status = "complete".to_string();
        report.result = "City: X, Region: Y, Country: Z".to_string();
        assert_eq!(
            report.summary(),
            "Workflow ip-lookup-observable is 'complete' - Result: City: X, Region: Y, Country: Z"
        );
    }
}
