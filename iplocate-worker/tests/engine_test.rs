use iplocate_activity::ActivityContext;
use iplocate_core::{
    ActivityOptions, EventAttributes, GetWorkflowExecutionHistoryRequest, History, HistoryBuilder,
    NonDeterministicWorkflowPolicy, QueryWorkflowRequest, RequestCancelWorkflowExecutionRequest,
    SignalWorkflowExecutionRequest, StartWorkflowExecutionRequest, WorkflowExecution,
    WorkflowExecutionStatus, WorkflowIdReusePolicy, WorkflowService,
};
use iplocate_worker::{
    Activity, ActivityError, ActivityFuture, Engine, EngineWorker, HistoryStore, Registry,
    Worker, WorkerOptions, Workflow, WorkflowError, WorkflowFuture, WorkflowRegistry,
};
use iplocate_workflow::WorkflowContext;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TASK_LIST: &str = "ip-geolocation";

#[derive(Clone)]
struct ClosureWorkflow<F>(F)
where
    F: Fn(
            WorkflowContext,
            Option<Vec<u8>>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, WorkflowError>> + Send>>
        + Send
        + Sync
        + Clone;

impl<F> Workflow for ClosureWorkflow<F>
where
    F: Fn(
            WorkflowContext,
            Option<Vec<u8>>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, WorkflowError>> + Send>>
        + Send
        + Sync
        + Clone
        + 'static,
{
    fn execute(&self, ctx: WorkflowContext, input: Option<Vec<u8>>) -> WorkflowFuture {
        (self.0)(ctx, input)
    }
}

/// Upper-cases its input and counts invocations
#[derive(Clone, Default)]
struct ShoutActivity {
    calls: Arc<AtomicUsize>,
}

impl Activity for ShoutActivity {
    fn execute(&self, _ctx: &ActivityContext, input: Option<Vec<u8>>) -> ActivityFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let text = String::from_utf8(input.unwrap_or_default())
                .map_err(|e| ActivityError::non_retryable(e.to_string()))?;
            Ok(text.to_uppercase().into_bytes())
        })
    }
}

fn shout_workflow(ctx: WorkflowContext, input: Option<Vec<u8>>) -> WorkflowFuture {
    Box::pin(async move {
        ctx.execute_activity("shout", input, ActivityOptions::default())
            .await
    })
}

/// Records every signal and returns the payload of the first `go`
fn signal_workflow(ctx: WorkflowContext, _input: Option<Vec<u8>>) -> WorkflowFuture {
    Box::pin(async move {
        let received = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
        let snapshot = received.clone();
        ctx.set_query_handler_json("received", move || snapshot.lock().clone());

        let mut inbox = ctx.signal_inbox();
        loop {
            let signal = inbox.recv().await;
            let payload = String::from_utf8_lossy(signal.input.as_deref().unwrap_or_default())
                .to_string();
            received.lock().push(format!("{}:{}", signal.name, payload));
            if signal.name == "go" {
                return Ok(payload.into_bytes());
            }
        }
    })
}

fn sleepy_workflow(ctx: WorkflowContext, input: Option<Vec<u8>>) -> WorkflowFuture {
    Box::pin(async move {
        ctx.sleep(Duration::from_secs(10)).await?;
        ctx.execute_activity("shout", input, ActivityOptions::default())
            .await
    })
}

/// Shouts, then returns the decision time in nanoseconds; the `now` query
/// reports the same clock
fn clock_workflow(ctx: WorkflowContext, input: Option<Vec<u8>>) -> WorkflowFuture {
    Box::pin(async move {
        let clock = ctx.clone();
        ctx.set_query_handler_json("now", move || clock.now().timestamp_nanos_opt());
        ctx.execute_activity("shout", input, ActivityOptions::default())
            .await?;
        let nanos = ctx.now().timestamp_nanos_opt().unwrap_or_default();
        Ok(nanos.to_string().into_bytes())
    })
}

fn registry(shout: ShoutActivity) -> Arc<WorkflowRegistry> {
    let registry = WorkflowRegistry::new();
    registry.register_workflow("Shout", Box::new(ClosureWorkflow(shout_workflow)));
    registry.register_workflow("Signal", Box::new(ClosureWorkflow(signal_workflow)));
    registry.register_workflow("Sleepy", Box::new(ClosureWorkflow(sleepy_workflow)));
    registry.register_workflow("Clock", Box::new(ClosureWorkflow(clock_workflow)));
    registry.register_activity("shout", Box::new(shout));
    Arc::new(registry)
}

async fn start_worker(engine: &Engine, shout: ShoutActivity) -> EngineWorker {
    let worker = EngineWorker::new(
        engine.clone(),
        TASK_LIST,
        WorkerOptions::default(),
        registry(shout),
    );
    worker.start().await.unwrap();
    worker
}

fn start_request(workflow_id: &str, workflow_type: &str, input: &str) -> StartWorkflowExecutionRequest {
    StartWorkflowExecutionRequest {
        workflow_id: workflow_id.to_string(),
        workflow_type: workflow_type.to_string(),
        task_list: TASK_LIST.to_string(),
        input: Some(input.as_bytes().to_vec()),
        identity: "test".to_string(),
        workflow_id_reuse_policy: WorkflowIdReusePolicy::default(),
    }
}

async fn wait_for_close(engine: &Engine, workflow_id: &str) -> History {
    tokio::time::timeout(
        Duration::from_secs(60),
        engine.get_workflow_execution_history(GetWorkflowExecutionHistoryRequest {
            workflow_id: workflow_id.to_string(),
            run_id: None,
            wait_for_close: true,
        }),
    )
    .await
    .expect("workflow did not close in time")
    .unwrap()
}

fn completed_result(history: &History) -> Option<Vec<u8>> {
    match history.close_event() {
        Some(EventAttributes::WorkflowExecutionCompleted { result }) => result.clone(),
        _ => None,
    }
}

fn signal(workflow_id: &str, name: &str, payload: &str) -> SignalWorkflowExecutionRequest {
    SignalWorkflowExecutionRequest {
        workflow_id: workflow_id.to_string(),
        run_id: None,
        signal_name: name.to_string(),
        input: Some(payload.as_bytes().to_vec()),
        identity: "test".to_string(),
    }
}

#[tokio::test]
async fn runs_activity_and_completes() {
    let engine = Engine::in_memory();
    let shout = ShoutActivity::default();
    let _worker = start_worker(&engine, shout.clone()).await;

    engine
        .start_workflow_execution(start_request("shout-1", "Shout", "hello"))
        .await
        .unwrap();
    let history = wait_for_close(&engine, "shout-1").await;

    assert_eq!(history.status(), WorkflowExecutionStatus::Completed);
    assert_eq!(completed_result(&history), Some(b"HELLO".to_vec()));
    assert_eq!(shout.calls.load(Ordering::SeqCst), 1);

    let describe = engine
        .describe_workflow_execution("shout-1", None)
        .await
        .unwrap();
    assert_eq!(describe.workflow_type, "Shout");
    assert!(describe.pending_activities.is_empty());
}

#[tokio::test]
async fn signals_apply_in_order_and_queries_see_them() {
    let engine = Engine::in_memory();
    let _worker = start_worker(&engine, ShoutActivity::default()).await;

    engine
        .start_workflow_execution(start_request("signal-1", "Signal", ""))
        .await
        .unwrap();
    engine
        .signal_workflow_execution(signal("signal-1", "pause", ""))
        .await
        .unwrap();
    engine
        .signal_workflow_execution(signal("signal-1", "change-target", "X"))
        .await
        .unwrap();

    let answer = engine
        .query_workflow(QueryWorkflowRequest {
            workflow_id: "signal-1".to_string(),
            run_id: None,
            query_type: "received".to_string(),
            query_args: None,
        })
        .await
        .unwrap();
    let received: Vec<String> = serde_json::from_slice(&answer.query_result).unwrap();
    assert_eq!(received, vec!["pause:", "change-target:X"]);

    engine
        .signal_workflow_execution(signal("signal-1", "go", "done"))
        .await
        .unwrap();
    let history = wait_for_close(&engine, "signal-1").await;
    assert_eq!(completed_result(&history), Some(b"done".to_vec()));
    assert_eq!(history.signal_count(), 3);

    // closed instances still answer queries
    let answer = engine
        .query_workflow(QueryWorkflowRequest {
            workflow_id: "signal-1".to_string(),
            run_id: None,
            query_type: "received".to_string(),
            query_args: None,
        })
        .await
        .unwrap();
    let received: Vec<String> = serde_json::from_slice(&answer.query_result).unwrap();
    assert_eq!(received.len(), 3);

    let err = engine
        .signal_workflow_execution(signal("signal-1", "go", "again"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already completed"));
}

fn query(workflow_id: &str, query_type: &str) -> QueryWorkflowRequest {
    QueryWorkflowRequest {
        workflow_id: workflow_id.to_string(),
        run_id: None,
        query_type: query_type.to_string(),
        query_args: None,
    }
}

async fn wait_for_eviction(engine: &Engine, workflow_id: &str) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while engine.is_resident(workflow_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("closed run was never evicted");
}

#[tokio::test]
async fn decision_time_matches_its_recorded_event() {
    let engine = Engine::in_memory();
    let _worker = start_worker(&engine, ShoutActivity::default()).await;

    engine
        .start_workflow_execution(start_request("clock-1", "Clock", "tick"))
        .await
        .unwrap();
    let history = wait_for_close(&engine, "clock-1").await;
    let live: i64 = String::from_utf8(completed_result(&history).unwrap())
        .unwrap()
        .parse()
        .unwrap();

    let last_decision = history
        .events
        .iter()
        .rev()
        .find(|e| matches!(e.attributes, EventAttributes::DecisionTaskCompleted { .. }))
        .unwrap();
    assert_eq!(last_decision.timestamp.timestamp_nanos_opt(), Some(live));

    // the query replays the stored history, so ctx.now() comes from events
    wait_for_eviction(&engine, "clock-1").await;
    let answer = engine.query_workflow(query("clock-1", "now")).await.unwrap();
    let replayed: Option<i64> = serde_json::from_slice(&answer.query_result).unwrap();
    assert_eq!(replayed, Some(live));
}

#[tokio::test]
async fn closed_runs_leave_memory_but_stay_queryable() {
    let engine = Engine::in_memory();
    let _worker = start_worker(&engine, ShoutActivity::default()).await;

    engine
        .start_workflow_execution(start_request("open-1", "Signal", ""))
        .await
        .unwrap();
    engine
        .start_workflow_execution(start_request("clock-2", "Clock", "tick"))
        .await
        .unwrap();
    assert!(engine.is_resident("open-1"));

    wait_for_close(&engine, "clock-2").await;
    wait_for_eviction(&engine, "clock-2").await;
    assert!(engine.is_resident("open-1"));

    let answer = engine.query_workflow(query("clock-2", "now")).await.unwrap();
    let replayed: Option<i64> = serde_json::from_slice(&answer.query_result).unwrap();
    assert!(replayed.is_some());

    let describe = engine
        .describe_workflow_execution("clock-2", None)
        .await
        .unwrap();
    assert_eq!(describe.status, WorkflowExecutionStatus::Completed);
    let err = engine
        .signal_workflow_execution(signal("clock-2", "go", ""))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already completed"));

    // an evicted id can start again as a new resident run
    let mut again = start_request("clock-2", "Clock", "tock");
    again.workflow_id_reuse_policy = WorkflowIdReusePolicy::AllowDuplicate;
    engine.start_workflow_execution(again).await.unwrap();
    wait_for_close(&engine, "clock-2").await;
    wait_for_eviction(&engine, "clock-2").await;
}

#[tokio::test]
async fn cancel_stops_before_the_activity() {
    let engine = Engine::in_memory();
    let shout = ShoutActivity::default();
    let _worker = start_worker(&engine, shout.clone()).await;

    engine
        .start_workflow_execution(start_request("sleepy-1", "Sleepy", "x"))
        .await
        .unwrap();
    engine
        .request_cancel_workflow_execution(RequestCancelWorkflowExecutionRequest {
            workflow_id: "sleepy-1".to_string(),
            run_id: None,
            cause: Some("operator".to_string()),
            identity: "test".to_string(),
        })
        .await
        .unwrap();

    let history = wait_for_close(&engine, "sleepy-1").await;
    assert_eq!(history.status(), WorkflowExecutionStatus::Canceled);
    assert_eq!(shout.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn durable_timer_fires() {
    let engine = Engine::in_memory();
    let _worker = start_worker(&engine, ShoutActivity::default()).await;

    engine
        .start_workflow_execution(start_request("sleepy-2", "Sleepy", "late"))
        .await
        .unwrap();
    let history = wait_for_close(&engine, "sleepy-2").await;
    assert_eq!(completed_result(&history), Some(b"LATE".to_vec()));
    assert!(history
        .events
        .iter()
        .any(|e| matches!(e.attributes, EventAttributes::TimerFired { .. })));
}

#[tokio::test]
async fn reuse_policy_controls_duplicate_ids() {
    let engine = Engine::in_memory();
    let _worker = start_worker(&engine, ShoutActivity::default()).await;

    engine
        .start_workflow_execution(start_request("dup", "Signal", ""))
        .await
        .unwrap();
    let err = engine
        .start_workflow_execution(start_request("dup", "Signal", ""))
        .await
        .unwrap_err();
    assert!(iplocate_core::is_workflow_execution_already_started_error(&err));

    let mut terminate = start_request("dup", "Shout", "again");
    terminate.workflow_id_reuse_policy = WorkflowIdReusePolicy::TerminateIfRunning;
    engine.start_workflow_execution(terminate).await.unwrap();
    let history = wait_for_close(&engine, "dup").await;
    assert_eq!(completed_result(&history), Some(b"AGAIN".to_vec()));

    // completed successfully, so the default policy refuses another run
    let err = engine
        .start_workflow_execution(start_request("dup", "Shout", "third"))
        .await
        .unwrap_err();
    assert!(iplocate_core::is_workflow_execution_already_started_error(&err));

    let mut allow = start_request("dup", "Shout", "third");
    allow.workflow_id_reuse_policy = WorkflowIdReusePolicy::AllowDuplicate;
    assert!(engine.start_workflow_execution(allow).await.is_ok());
}

#[tokio::test]
async fn recovery_resumes_persisted_runs() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::with_data_dir(dir.path());

    // a run that scheduled its activity before the process went away
    let history = HistoryBuilder::new("Shout", TASK_LIST, Some(b"resumed".to_vec()))
        .decision(vec![EventAttributes::ActivityTaskScheduled {
            activity_id: "0".to_string(),
            activity_type: "shout".to_string(),
            task_list: TASK_LIST.to_string(),
            input: Some(b"resumed".to_vec()),
            schedule_to_close_timeout: Duration::ZERO,
            start_to_close_timeout: Duration::from_secs(60),
            retry_policy: None,
        }])
        .build();
    let execution = WorkflowExecution::new("recovered-1", "run-1");
    engine.store().save(&execution, &history).await.unwrap();

    // a run started while no worker was serving the task list
    engine
        .start_workflow_execution(start_request("queued-1", "Shout", "queued"))
        .await
        .unwrap();

    let shout = ShoutActivity::default();
    let _worker = start_worker(&engine, shout.clone()).await;

    let resumed = wait_for_close(&engine, "recovered-1").await;
    assert_eq!(completed_result(&resumed), Some(b"RESUMED".to_vec()));
    let queued = wait_for_close(&engine, "queued-1").await;
    assert_eq!(completed_result(&queued), Some(b"QUEUED".to_vec()));
    assert_eq!(shout.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn nondeterministic_history_blocks_or_fails() {
    let diverged = HistoryBuilder::new("Shout", TASK_LIST, None)
        .decision(vec![EventAttributes::TimerStarted {
            timer_id: "0".to_string(),
            start_to_fire_timeout: Duration::from_secs(1),
        }])
        .build();

    for (policy, expected) in [
        (NonDeterministicWorkflowPolicy::BlockWorkflow, WorkflowExecutionStatus::Running),
        (NonDeterministicWorkflowPolicy::FailWorkflow, WorkflowExecutionStatus::Failed),
    ] {
        let engine = Engine::in_memory();
        let execution = WorkflowExecution::new("diverged", "run-1");
        engine.store().save(&execution, &diverged).await.unwrap();

        let worker = EngineWorker::new(
            engine.clone(),
            TASK_LIST,
            WorkerOptions {
                non_deterministic_workflow_policy: policy,
                ..WorkerOptions::default()
            },
            registry(ShoutActivity::default()),
        );
        worker.start().await.unwrap();

        let history = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let history = engine.store().load(&execution).await.unwrap().unwrap();
                if history
                    .events
                    .iter()
                    .any(|e| matches!(e.attributes, EventAttributes::DecisionTaskFailed { .. }))
                {
                    return history;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(history.status(), expected, "{:?}", policy);
        worker.stop();
    }
}

#[tokio::test]
async fn second_worker_for_task_list_is_rejected() {
    let engine = Engine::in_memory();
    let _worker = start_worker(&engine, ShoutActivity::default()).await;

    let second = EngineWorker::new(
        engine.clone(),
        TASK_LIST,
        WorkerOptions::default(),
        registry(ShoutActivity::default()),
    );
    assert!(second.start().await.is_err());
}
