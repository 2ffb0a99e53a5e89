//! Typed workflow and activity functions.
//!
//! Adapters turning async functions over serde types into [`Workflow`] and
//! [`Activity`] implementations. Payloads are JSON.

use crate::registry::{Activity, ActivityError, ActivityFuture, Workflow, WorkflowFuture};
use iplocate_activity::ActivityContext;
use iplocate_core::EncodingError;
use iplocate_workflow::{WorkflowContext, WorkflowError};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;

type WorkflowFn = Arc<dyn Fn(WorkflowContext, Option<Vec<u8>>) -> WorkflowFuture + Send + Sync>;

type ActivityFn = Arc<dyn Fn(ActivityContext, Option<Vec<u8>>) -> ActivityFuture + Send + Sync>;

#[derive(Clone)]
struct FnWorkflow(WorkflowFn);

impl Workflow for FnWorkflow {
    fn execute(&self, ctx: WorkflowContext, input: Option<Vec<u8>>) -> WorkflowFuture {
        (self.0)(ctx, input)
    }
}

#[derive(Clone)]
struct FnActivity(ActivityFn);

impl Activity for FnActivity {
    fn execute(&self, ctx: &ActivityContext, input: Option<Vec<u8>>) -> ActivityFuture {
        (self.0)(ctx.clone(), input)
    }
}

/// Missing payloads decode as JSON `null`, so `()` and `Option<T>` inputs
/// need no payload at all
pub fn decode_payload<T: DeserializeOwned>(payload: Option<&[u8]>) -> Result<T, EncodingError> {
    iplocate_core::decode(payload.unwrap_or(b"null"))
}

/// Wrap a typed async closure as a [`Workflow`]
///
/// # Example
/// ```ignore
/// registry.register_workflow(
///     "greet",
///     workflow_fn(|_ctx, name: String| async move { Ok(format!("Hello, {}!", name)) }),
/// );
/// ```
pub fn workflow_fn<F, Fut, I, O>(workflow: F) -> Box<dyn Workflow>
where
    F: Fn(WorkflowContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + 'static,
{
    let workflow = Arc::new(workflow);
    let wrapped: WorkflowFn = Arc::new(
        move |ctx: WorkflowContext, input: Option<Vec<u8>>| -> WorkflowFuture {
            let workflow = workflow.clone();
            Box::pin(async move {
                let input: I = decode_payload(input.as_deref())?;
                let output = workflow(ctx, input).await?;
                Ok(iplocate_core::encode(&output)?)
            })
        },
    );
    Box::new(FnWorkflow(wrapped))
}

/// Wrap a typed async closure as an [`Activity`]
pub fn activity_fn<F, Fut, I, O>(activity: F) -> Box<dyn Activity>
where
    F: Fn(ActivityContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ActivityError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + 'static,
{
    let activity = Arc::new(activity);
    let wrapped: ActivityFn = Arc::new(
        move |ctx: ActivityContext, input: Option<Vec<u8>>| -> ActivityFuture {
            let activity = activity.clone();
            Box::pin(async move {
                let input: I = decode_payload(input.as_deref())
                    .map_err(|e| ActivityError::non_retryable(format!("Input decoding: {}", e)))?;
                let output = activity(ctx, input).await?;
                iplocate_core::encode(&output)
                    .map_err(|e| ActivityError::non_retryable(format!("Output encoding: {}", e)))
            })
        },
    );
    Box::new(FnActivity(wrapped))
}

