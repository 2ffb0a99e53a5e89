use crate::executor::replay::{ReplayCommandSink, ReplayEngine};
use crate::registry::{Registry, Workflow, WorkflowFuture};
use chrono::{DateTime, Utc};
use iplocate_core::{
    EventAttributes, FlowError, FlowResult, History, WorkflowExecution, WorkflowInfo, WorkflowType,
};
use iplocate_workflow::markers::{decode_version_details, VERSION_MARKER_NAME};
use iplocate_workflow::{
    CancelWorkflowCommand, CompleteWorkflowCommand, FailWorkflowCommand, QueryError,
    WorkflowCommand, WorkflowContext, WorkflowError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Commands produced by one live decision
#[derive(Debug)]
pub struct DecisionOutcome {
    pub commands: Vec<WorkflowCommand>,
    /// The workflow future has finished
    pub closed: bool,
}

/// What replaying a history left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub decisions: usize,
    /// Inputs recorded after the last decision, not yet seen by workflow code
    pub pending_inputs: usize,
}

impl ReplaySummary {
    /// Whether a live decision is due after replay
    pub fn needs_decision(&self) -> bool {
        self.decisions == 0 || self.pending_inputs > 0
    }
}

/// Drives one workflow instance: owns the workflow future and the context it
/// was started with, and runs it one decision at a time.
pub struct WorkflowExecutor {
    info: WorkflowInfo,
    engine: Arc<Mutex<ReplayEngine>>,
    context: WorkflowContext,
    future: Option<WorkflowFuture>,
}

impl WorkflowExecutor {
    pub fn new(workflow: &dyn Workflow, info: WorkflowInfo, input: Option<Vec<u8>>) -> Self {
        let engine = Arc::new(Mutex::new(ReplayEngine::new(&info)));
        let sink = Arc::new(ReplayCommandSink::new(engine.clone()));
        let context = WorkflowContext::with_sink(info.clone(), sink);
        let future = workflow.execute(context.clone(), input);

        Self {
            info,
            engine,
            context,
            future: Some(future),
        }
    }

    /// Build an executor for the run recorded in `history`
    pub fn for_history(
        registry: &dyn Registry,
        execution: WorkflowExecution,
        history: &History,
    ) -> FlowResult<Self> {
        let (workflow_type, task_list, input) = history.started().ok_or_else(|| {
            FlowError::InvalidArgument(
                "history does not begin with WorkflowExecutionStarted".to_string(),
            )
        })?;
        let workflow = registry.get_workflow(workflow_type).ok_or_else(|| {
            FlowError::InvalidArgument(format!("workflow type not registered: {}", workflow_type))
        })?;

        let info = WorkflowInfo {
            workflow_execution: execution,
            workflow_type: WorkflowType {
                name: workflow_type.to_string(),
            },
            task_list: task_list.to_string(),
            start_time: history.start_time().unwrap_or_else(Utc::now),
            attempt: 1,
        };
        Ok(Self::new(
            workflow.as_ref(),
            info,
            input.map(|bytes| bytes.to_vec()),
        ))
    }

    pub fn workflow_info(&self) -> &WorkflowInfo {
        &self.info
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    /// The workflow future has completed
    pub fn is_closed(&self) -> bool {
        self.future.is_none()
    }

    /// Deliver an input event to the workflow
    pub fn apply_input(&mut self, attributes: &EventAttributes) {
        match attributes {
            EventAttributes::WorkflowExecutionSignaled { signal_name, input } => {
                self.context.deliver_signal(signal_name.clone(), input.clone());
            }
            EventAttributes::WorkflowExecutionCancelRequested { .. } => {
                self.engine.lock().apply_input(attributes);
                self.context.set_cancelled(true);
            }
            other => self.engine.lock().apply_input(other),
        }
    }

    /// Run one decision at `time`.
    ///
    /// When `is_replay` is set the emitted commands must equal `expected`;
    /// otherwise they are returned for the caller to record. Errors are
    /// decision failures: nondeterminism, unsupported versions or panics.
    pub fn decide(
        &mut self,
        time: DateTime<Utc>,
        is_replay: bool,
        expected: Vec<EventAttributes>,
    ) -> Result<DecisionOutcome, WorkflowError> {
        self.engine.lock().begin_decision(expected, is_replay);
        self.context.set_replay_mode(is_replay);
        self.context.set_current_time(time);

        if let Some(result) = self.poll_until_quiescent() {
            self.future = None;
            match close_command(result) {
                Ok(command) => {
                    // A mismatch here is reported by finish_decision
                    let _ = self.engine.lock().record_command(command);
                }
                Err(err) => {
                    // The routine stopped early, so recorded commands it never
                    // reached are not a divergence of their own
                    if let Some(divergence) = self.engine.lock().abandon_decision() {
                        return Err(divergence.into());
                    }
                    return Err(err);
                }
            }
        }

        let commands = self.engine.lock().finish_decision()?;
        Ok(DecisionOutcome {
            commands,
            closed: self.future.is_none(),
        })
    }

    fn poll_until_quiescent(&mut self) -> Option<Result<Vec<u8>, WorkflowError>> {
        let future = self.future.as_mut()?;
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        loop {
            let before = self.engine.lock().submitted;
            let polled = std::panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
            match polled {
                Ok(Poll::Ready(result)) => return Some(result),
                Ok(Poll::Pending) => {}
                Err(panic) => return Some(Err(WorkflowError::Panic(panic_message(panic)))),
            }
            if self.engine.lock().submitted == before {
                return None;
            }
        }
    }

    /// Re-run every recorded decision of `history` against the workflow code
    pub fn replay_history(&mut self, history: &History) -> Result<ReplaySummary, WorkflowError> {
        self.context
            .set_recorded_versions(recorded_versions(history));

        let events = &history.events;
        let mut summary = ReplaySummary {
            decisions: 0,
            pending_inputs: 0,
        };
        let mut index = 1;
        while index < events.len() {
            let event = &events[index];
            if let EventAttributes::DecisionTaskCompleted { .. } = event.attributes {
                let mut next = index + 1;
                let mut expected = Vec::new();
                while next < events.len() && events[next].attributes.is_command() {
                    expected.push(events[next].attributes.clone());
                    next += 1;
                }
                self.decide(event.timestamp, true, expected)?;
                summary.decisions += 1;
                summary.pending_inputs = 0;
                index = next;
                continue;
            }
            if event.attributes.is_input() {
                self.apply_input(&event.attributes);
                summary.pending_inputs += 1;
            }
            index += 1;
        }

        tracing::debug!(
            workflow_id = %self.info.workflow_execution.workflow_id,
            decisions = summary.decisions,
            pending_inputs = summary.pending_inputs,
            "replayed history"
        );
        Ok(summary)
    }

    /// Answer a query from the handlers registered by the workflow
    pub fn query(&self, query_type: &str, args: Option<&[u8]>) -> Result<Vec<u8>, QueryError> {
        self.context.handle_query(query_type, args)
    }
}

fn close_command(result: Result<Vec<u8>, WorkflowError>) -> Result<WorkflowCommand, WorkflowError> {
    match result {
        Ok(output) => Ok(WorkflowCommand::CompleteWorkflow(CompleteWorkflowCommand {
            result: Some(output),
        })),
        Err(WorkflowError::Cancelled) => {
            Ok(WorkflowCommand::CancelWorkflow(CancelWorkflowCommand { details: None }))
        }
        Err(err) if err.is_decision_failure() => Err(err),
        Err(err) => Ok(WorkflowCommand::FailWorkflow(FailWorkflowCommand {
            reason: err.to_string(),
            details: err.activity_failure().and_then(|f| f.details.clone()),
        })),
    }
}

/// Version markers recorded in history, by change id
pub fn recorded_versions(history: &History) -> HashMap<String, i32> {
    history
        .events
        .iter()
        .filter_map(|event| match &event.attributes {
            EventAttributes::MarkerRecorded {
                marker_name,
                details: Some(details),
            } if marker_name == VERSION_MARKER_NAME => decode_version_details(details).ok(),
            _ => None,
        })
        .map(|details| (details.change_id, details.version))
        .collect()
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iplocate_core::{ActivityOptions, HistoryBuilder, NonDeterminismReason};
    use iplocate_workflow::DEFAULT_VERSION;
    use std::time::Duration;

    /// Calls `first`, reads a version marker, then calls `second` when the
    /// version is at least 1.
    #[derive(Clone)]
    struct TwoStepWorkflow;

    impl Workflow for TwoStepWorkflow {
        fn execute(&self, ctx: WorkflowContext, _input: Option<Vec<u8>>) -> WorkflowFuture {
            Box::pin(async move {
                let first = ctx
                    .execute_activity("first", None, ActivityOptions::default())
                    .await?;
                let version = ctx.get_version("add-second", DEFAULT_VERSION, 1)?;
                if version >= 1 {
                    ctx.execute_activity("second", None, ActivityOptions::default())
                        .await?;
                }
                Ok(first)
            })
        }
    }

    #[derive(Clone)]
    struct PanickingWorkflow;

    impl Workflow for PanickingWorkflow {
        fn execute(&self, _ctx: WorkflowContext, _input: Option<Vec<u8>>) -> WorkflowFuture {
            Box::pin(async { explode() })
        }
    }

    fn explode() -> Result<Vec<u8>, WorkflowError> {
        panic!("boom")
    }

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            workflow_execution: WorkflowExecution::new("w1", "r1"),
            workflow_type: WorkflowType {
                name: "TwoStep".to_string(),
            },
            task_list: "tl".to_string(),
            start_time: Utc::now(),
            attempt: 1,
        }
    }

    fn scheduled(id: &str, activity_type: &str) -> EventAttributes {
        EventAttributes::ActivityTaskScheduled {
            activity_id: id.to_string(),
            activity_type: activity_type.to_string(),
            task_list: "tl".to_string(),
            input: None,
            schedule_to_close_timeout: Duration::ZERO,
            start_to_close_timeout: Duration::from_secs(60),
            retry_policy: None,
        }
    }

    fn completed(id: &str, result: &[u8]) -> EventAttributes {
        EventAttributes::ActivityTaskCompleted {
            activity_id: id.to_string(),
            result: Some(result.to_vec()),
            attempt: 1,
        }
    }

    #[test]
    fn live_decisions_emit_commands_and_close() {
        let mut executor = WorkflowExecutor::new(&TwoStepWorkflow, info(), None);

        let outcome = executor.decide(Utc::now(), false, Vec::new()).unwrap();
        assert_eq!(outcome.commands.len(), 1);
        assert!(!outcome.closed);

        executor.apply_input(&completed("0", b"1"));
        let outcome = executor.decide(Utc::now(), false, Vec::new()).unwrap();
        let summaries: Vec<String> = outcome.commands.iter().map(|c| c.summary()).collect();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].starts_with("RecordMarker"));
        assert_eq!(summaries[1], "ScheduleActivity(id=1, type=second)");

        executor.apply_input(&completed("1", b"2"));
        let outcome = executor.decide(Utc::now(), false, Vec::new()).unwrap();
        assert!(outcome.closed);
        assert!(matches!(
            outcome.commands.as_slice(),
            [WorkflowCommand::CompleteWorkflow(CompleteWorkflowCommand { result: Some(r) })] if r == b"1"
        ));
    }

    #[test]
    fn pre_change_history_replays_with_default_version() {
        let history = HistoryBuilder::new("TwoStep", "tl", None)
            .decision(vec![scheduled("0", "first")])
            .event(completed("0", b"1"))
            .decision(vec![EventAttributes::WorkflowExecutionCompleted {
                result: Some(b"1".to_vec()),
            }])
            .build();

        let mut executor = WorkflowExecutor::new(&TwoStepWorkflow, info(), None);
        let summary = executor.replay_history(&history).unwrap();
        assert_eq!(summary.decisions, 2);
        assert!(!summary.needs_decision());
        assert!(executor.is_closed());
    }

    #[test]
    fn diverging_history_is_nondeterministic() {
        let history = HistoryBuilder::new("TwoStep", "tl", None)
            .decision(vec![scheduled("0", "other")])
            .build();

        let mut executor = WorkflowExecutor::new(&TwoStepWorkflow, info(), None);
        match executor.replay_history(&history) {
            Err(WorkflowError::NonDeterministic(err)) => {
                assert_eq!(err.reason, NonDeterminismReason::Mismatch)
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn trailing_inputs_call_for_a_live_decision() {
        let history = HistoryBuilder::new("TwoStep", "tl", None)
            .decision(vec![scheduled("0", "first")])
            .event(completed("0", b"1"))
            .build();

        let mut executor = WorkflowExecutor::new(&TwoStepWorkflow, info(), None);
        let summary = executor.replay_history(&history).unwrap();
        assert!(summary.needs_decision());

        let outcome = executor.decide(Utc::now(), false, Vec::new()).unwrap();
        assert_eq!(outcome.commands.len(), 2, "marker and second activity");
    }

    #[test]
    fn marker_above_the_supported_range_fails_the_decision() {
        let history = HistoryBuilder::new("TwoStep", "tl", None)
            .decision(vec![scheduled("0", "first")])
            .event(completed("0", b"1"))
            .decision(vec![
                EventAttributes::MarkerRecorded {
                    marker_name: VERSION_MARKER_NAME.to_string(),
                    details: Some(
                        iplocate_workflow::encode_version_details("add-second", 3).unwrap(),
                    ),
                },
                scheduled("1", "second"),
            ])
            .build();

        let mut executor = WorkflowExecutor::new(&TwoStepWorkflow, info(), None);
        match executor.replay_history(&history) {
            Err(WorkflowError::VersionTooNew {
                change_id,
                version,
                max_supported,
            }) => {
                assert_eq!(change_id, "add-second");
                assert_eq!(version, 3);
                assert_eq!(max_supported, 1);
            }
            other => panic!("unexpected {:?}", other.map(|s| s.decisions)),
        }
    }

    #[test]
    fn panics_fail_the_decision() {
        let mut executor = WorkflowExecutor::new(&PanickingWorkflow, info(), None);
        match executor.decide(Utc::now(), false, Vec::new()) {
            Err(WorkflowError::Panic(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {:?}", other.map(|o| o.commands.len())),
        }
    }
}
