use iplocate_core::factory::non_deterministic_error;
use iplocate_core::{EventAttributes, NonDeterminismReason, NonDeterministicError, WorkflowInfo};
use iplocate_workflow::{
    ActivityFailureInfo, ActivityFailureType, CommandFuture, CommandSink, WorkflowCommand,
    WorkflowError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::task::Poll;

pub type CommandResult = Result<Vec<u8>, WorkflowError>;

/// Decision state shared between the executor and the command sink.
///
/// While a recorded decision is replayed, every command the workflow emits
/// is checked against the next recorded command event. Outside of replay
/// commands are collected for the engine to record.
#[derive(Default)]
pub struct ReplayEngine {
    pub results: HashMap<String, CommandResult>,
    pub expected: VecDeque<EventAttributes>,
    pub new_commands: Vec<WorkflowCommand>,
    pub nondeterminism: Option<NonDeterministicError>,
    pub cancel_requested: bool,
    pub is_replay: bool,
    /// Commands submitted since the executor was created
    pub submitted: usize,
    workflow_type: String,
    workflow_id: String,
    run_id: String,
    task_list: String,
}

impl ReplayEngine {
    pub fn new(info: &WorkflowInfo) -> Self {
        Self {
            workflow_type: info.workflow_type.name.clone(),
            workflow_id: info.workflow_execution.workflow_id.clone(),
            run_id: info.workflow_execution.run_id.clone(),
            task_list: info.task_list.clone(),
            ..Default::default()
        }
    }

    pub fn begin_decision(&mut self, expected: Vec<EventAttributes>, is_replay: bool) {
        self.expected = expected.into();
        self.new_commands.clear();
        self.is_replay = is_replay;
    }

    pub fn record_command(&mut self, command: WorkflowCommand) -> Result<(), NonDeterministicError> {
        if let Some(err) = &self.nondeterminism {
            return Err(err.clone());
        }
        self.submitted += 1;

        if !self.is_replay {
            self.new_commands.push(command);
            return Ok(());
        }

        match self.expected.pop_front() {
            None => Err(self.fail(
                NonDeterminismReason::MissingReplayDecision,
                None,
                Some(command.summary()),
            )),
            Some(event) if !command.matches_event(&event) => Err(self.fail(
                NonDeterminismReason::Mismatch,
                Some(event.summary()),
                Some(command.summary()),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Commands produced by the decision, or the nondeterminism it hit
    pub fn finish_decision(&mut self) -> Result<Vec<WorkflowCommand>, NonDeterministicError> {
        if let Some(err) = &self.nondeterminism {
            return Err(err.clone());
        }
        if self.is_replay {
            if let Some(event) = self.expected.front() {
                let summary = event.summary();
                return Err(self.fail(
                    NonDeterminismReason::ExtraReplayDecision,
                    Some(summary),
                    None,
                ));
            }
        }
        Ok(std::mem::take(&mut self.new_commands))
    }

    /// End a decision the workflow code cut short. Unreached recorded
    /// commands are dropped; a divergence seen before that point is returned.
    pub fn abandon_decision(&mut self) -> Option<NonDeterministicError> {
        self.expected.clear();
        self.new_commands.clear();
        self.nondeterminism.clone()
    }

    fn fail(
        &mut self,
        reason: NonDeterminismReason,
        history_event_text: Option<String>,
        decision_text: Option<String>,
    ) -> NonDeterministicError {
        let err = non_deterministic_error(
            reason,
            self.workflow_type.clone(),
            self.workflow_id.clone(),
            self.run_id.clone(),
            self.task_list.clone(),
            history_event_text,
            decision_text,
        );
        self.nondeterminism = Some(err.clone());
        err
    }

    /// Record the outcome carried by an input event
    pub fn apply_input(&mut self, attributes: &EventAttributes) {
        match attributes {
            EventAttributes::ActivityTaskCompleted {
                activity_id,
                result,
                ..
            } => {
                self.results
                    .insert(activity_id.clone(), Ok(result.clone().unwrap_or_default()));
            }
            EventAttributes::ActivityTaskFailed {
                activity_id,
                reason,
                message,
                details,
                retryable,
                ..
            } => {
                let info = ActivityFailureInfo {
                    failure_type: ActivityFailureType::from_reason(reason),
                    message: message.clone(),
                    details: details.clone(),
                    retryable: *retryable,
                };
                self.results
                    .insert(activity_id.clone(), Err(WorkflowError::ActivityFailed(info)));
            }
            EventAttributes::ActivityTaskTimedOut {
                activity_id,
                timeout_type,
                ..
            } => {
                let info = ActivityFailureInfo {
                    failure_type: ActivityFailureType::Timeout(*timeout_type),
                    message: format!("activity timed out: {}", timeout_type),
                    details: None,
                    retryable: false,
                };
                self.results
                    .insert(activity_id.clone(), Err(WorkflowError::ActivityFailed(info)));
            }
            EventAttributes::TimerFired { timer_id } => {
                self.results.insert(timer_id.clone(), Ok(Vec::new()));
            }
            EventAttributes::WorkflowExecutionCancelRequested { .. } => {
                self.cancel_requested = true;
            }
            _ => {}
        }
    }

    pub fn get_result(&self, command_id: &str) -> Option<&CommandResult> {
        self.results.get(command_id)
    }
}

/// Command sink recording workflow commands into a [`ReplayEngine`]
pub struct ReplayCommandSink {
    engine: Arc<Mutex<ReplayEngine>>,
}

impl ReplayCommandSink {
    pub fn new(engine: Arc<Mutex<ReplayEngine>>) -> Self {
        Self { engine }
    }
}

impl CommandSink for ReplayCommandSink {
    fn submit(&self, command: WorkflowCommand) -> CommandFuture {
        let command_id = command.command_id().map(str::to_string);
        {
            let mut engine = self.engine.lock();
            if command_id.is_some() && engine.cancel_requested {
                return Box::pin(futures::future::ready(Err(WorkflowError::Cancelled)));
            }
            if let Err(err) = engine.record_command(command) {
                return Box::pin(futures::future::ready(Err(err.into())));
            }
        }

        let Some(command_id) = command_id else {
            return Box::pin(futures::future::ready(Ok(Vec::new())));
        };

        let engine = self.engine.clone();
        Box::pin(futures::future::poll_fn(move |_cx| {
            let engine = engine.lock();
            if let Some(result) = engine.get_result(&command_id) {
                return Poll::Ready(result.clone());
            }
            if engine.cancel_requested {
                return Poll::Ready(Err(WorkflowError::Cancelled));
            }
            Poll::Pending
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use iplocate_core::{ActivityOptions, WorkflowExecution, WorkflowType};
    use iplocate_workflow::{ScheduleActivityCommand, StartTimerCommand};
    use std::time::Duration;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            workflow_execution: WorkflowExecution::new("w1", "r1"),
            workflow_type: WorkflowType {
                name: "GetAddressFromIP".to_string(),
            },
            task_list: "ip-geolocation".to_string(),
            start_time: chrono::Utc::now(),
            attempt: 1,
        }
    }

    fn schedule(id: &str, activity_type: &str) -> WorkflowCommand {
        WorkflowCommand::ScheduleActivity(ScheduleActivityCommand {
            activity_id: id.to_string(),
            activity_type: activity_type.to_string(),
            args: None,
            options: ActivityOptions::default(),
        })
    }

    fn new_sink() -> (ReplayCommandSink, Arc<Mutex<ReplayEngine>>) {
        let engine = Arc::new(Mutex::new(ReplayEngine::new(&info())));
        (ReplayCommandSink::new(engine.clone()), engine)
    }

    #[test]
    fn live_commands_are_collected() {
        let (sink, engine) = new_sink();
        engine.lock().begin_decision(Vec::new(), false);

        let mut future = sink.submit(schedule("0", "get_ip"));
        assert!(future.as_mut().now_or_never().is_none());

        let commands = engine.lock().finish_decision().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(engine.lock().submitted, 1);
    }

    #[test]
    fn results_resolve_pending_futures() {
        let (sink, engine) = new_sink();
        engine.lock().begin_decision(Vec::new(), false);
        let future = sink.submit(schedule("0", "get_ip"));

        engine.lock().apply_input(&EventAttributes::ActivityTaskCompleted {
            activity_id: "0".to_string(),
            result: Some(br#""203.0.113.5""#.to_vec()),
            attempt: 1,
        });
        assert_eq!(
            future.now_or_never().unwrap().unwrap(),
            br#""203.0.113.5""#.to_vec()
        );
    }

    #[test]
    fn failed_activity_carries_failure_info() {
        let (sink, engine) = new_sink();
        engine.lock().begin_decision(Vec::new(), false);
        let future = sink.submit(schedule("0", "get_location_info"));

        engine.lock().apply_input(&EventAttributes::ActivityTaskFailed {
            activity_id: "0".to_string(),
            reason: "NonRetryable".to_string(),
            message: "API error: invalid query".to_string(),
            details: None,
            retryable: false,
            attempt: 1,
        });
        let err = future.now_or_never().unwrap().unwrap_err();
        let failure = err.activity_failure().unwrap();
        assert_eq!(failure.failure_type, ActivityFailureType::NonRetryable);
        assert_eq!(failure.message, "API error: invalid query");
    }

    #[test]
    fn replay_detects_mismatch_missing_and_extra_commands() {
        let recorded = schedule("0", "get_location_info").to_event_attributes("ip-geolocation");

        let (sink, engine) = new_sink();
        engine.lock().begin_decision(vec![recorded.clone()], true);
        let result = sink.submit(schedule("0", "get_timezone")).now_or_never();
        assert!(matches!(result, Some(Err(WorkflowError::NonDeterministic(_)))));
        let err = engine.lock().finish_decision().unwrap_err();
        assert_eq!(err.reason, NonDeterminismReason::Mismatch);

        let (sink, engine) = new_sink();
        engine.lock().begin_decision(Vec::new(), true);
        let _ = sink.submit(schedule("0", "get_ip"));
        let err = engine.lock().finish_decision().unwrap_err();
        assert_eq!(err.reason, NonDeterminismReason::MissingReplayDecision);

        let (_sink, engine) = new_sink();
        engine.lock().begin_decision(vec![recorded], true);
        let err = engine.lock().finish_decision().unwrap_err();
        assert_eq!(err.reason, NonDeterminismReason::ExtraReplayDecision);
        assert!(err.history_event_text.unwrap().contains("get_location_info"));
    }

    #[test]
    fn cancellation_rejects_new_commands_and_resolves_pending_ones() {
        let (sink, engine) = new_sink();
        engine.lock().begin_decision(Vec::new(), false);
        let pending = sink.submit(WorkflowCommand::StartTimer(StartTimerCommand {
            timer_id: "0".to_string(),
            duration: Duration::from_secs(30),
        }));

        engine
            .lock()
            .apply_input(&EventAttributes::WorkflowExecutionCancelRequested { cause: None });

        assert!(matches!(
            pending.now_or_never(),
            Some(Err(WorkflowError::Cancelled))
        ));
        assert!(matches!(
            sink.submit(schedule("1", "get_ip")).now_or_never(),
            Some(Err(WorkflowError::Cancelled))
        ));
        assert_eq!(engine.lock().submitted, 1, "rejected command is not recorded");
    }
}
