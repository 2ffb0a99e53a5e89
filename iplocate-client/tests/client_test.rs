use iplocate_activity::ActivityContext;
use iplocate_client::{Client, ClientError, ClientOptions, StartWorkflowOptions, WorkflowClient};
use iplocate_core::ActivityOptions;
use iplocate_worker::{
    Activity, ActivityError, ActivityFuture, Engine, EngineWorker, Registry, Worker,
    WorkerOptions, Workflow, WorkflowFuture, WorkflowRegistry,
};
use iplocate_workflow::WorkflowContext;
use std::sync::Arc;
use std::time::Duration;

const TASK_LIST: &str = "client-test";

#[derive(Clone)]
struct LookupActivity;

impl Activity for LookupActivity {
    fn execute(&self, _ctx: &ActivityContext, input: Option<Vec<u8>>) -> ActivityFuture {
        Box::pin(async move {
            let ip: String = iplocate_core::decode_required(input.as_deref())
                .map_err(|e| ActivityError::non_retryable(e.to_string()))?;
            if ip == "0.0.0.0" {
                return Err(ActivityError::non_retryable("API error: reserved range"));
            }
            Ok(serde_json::to_vec(&format!("City: X ({})", ip)).unwrap_or_default())
        })
    }
}

#[derive(Clone)]
struct LookupWorkflow;

impl Workflow for LookupWorkflow {
    fn execute(&self, ctx: WorkflowContext, input: Option<Vec<u8>>) -> WorkflowFuture {
        Box::pin(async move {
            let ip: String = iplocate_core::decode_required(input.as_deref())?;
            ctx.set_query_handler_json("target", {
                let ip = ip.clone();
                move || ip.clone()
            });
            if ip == "wait" {
                ctx.sleep(Duration::from_secs(3600)).await?;
            }
            ctx.execute_activity("lookup", input, ActivityOptions::default())
                .await
        })
    }
}

async fn setup() -> (WorkflowClient, EngineWorker) {
    let engine = Engine::in_memory();
    let registry = WorkflowRegistry::new();
    registry.register_workflow("Lookup", Box::new(LookupWorkflow));
    registry.register_activity("lookup", Box::new(LookupActivity));

    let worker = EngineWorker::new(
        engine.clone(),
        TASK_LIST,
        WorkerOptions::default(),
        Arc::new(registry),
    );
    worker.start().await.unwrap();
    let client = WorkflowClient::new(Arc::new(engine), ClientOptions::default());
    (client, worker)
}

fn input(ip: &str) -> Vec<u8> {
    serde_json::to_vec(ip).unwrap()
}

#[tokio::test]
async fn execute_workflow_returns_result() {
    let (client, _worker) = setup().await;

    let run = client
        .execute_workflow(
            StartWorkflowOptions::new("lookup-1", TASK_LIST),
            "Lookup",
            Some(&input("203.0.113.5")),
        )
        .await
        .unwrap();
    let result = run.get_with_timeout(Duration::from_secs(10)).await.unwrap();
    let location: String = serde_json::from_slice(&result.unwrap()).unwrap();
    assert_eq!(location, "City: X (203.0.113.5)");

    let history = client.get_workflow_history("lookup-1", None).await.unwrap();
    assert!(history.status().is_closed());
}

#[tokio::test]
async fn activity_failure_fails_the_workflow() {
    let (client, _worker) = setup().await;

    let run = client
        .execute_workflow(
            StartWorkflowOptions::new("lookup-2", TASK_LIST),
            "Lookup",
            Some(&input("0.0.0.0")),
        )
        .await
        .unwrap();
    match run.get_with_timeout(Duration::from_secs(10)).await {
        Err(ClientError::WorkflowFailed { reason, .. }) => {
            assert!(reason.contains("API error: reserved range"), "{}", reason)
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn query_and_cancel() {
    let (client, _worker) = setup().await;

    client
        .start_workflow(
            StartWorkflowOptions::new("lookup-3", TASK_LIST),
            "Lookup",
            Some(&input("wait")),
        )
        .await
        .unwrap();

    let target: String = client.query_json("lookup-3", "target").await.unwrap();
    assert_eq!(target, "wait");
    assert!(matches!(
        client.query_json::<String>("lookup-3", "nope").await,
        Err(ClientError::QueryRejected(_))
    ));

    client
        .cancel_workflow("lookup-3", None, Some("no longer needed"))
        .await
        .unwrap();
    let run = client.get_workflow("lookup-3", None);
    assert!(matches!(
        run.get_with_timeout(Duration::from_secs(10)).await,
        Err(ClientError::WorkflowCanceled)
    ));
}

#[tokio::test]
async fn unknown_workflow_is_not_found() {
    let (client, _worker) = setup().await;
    assert!(matches!(
        client.signal_json("missing", "pause", &()).await,
        Err(ClientError::WorkflowNotFound(_))
    ));
}
