use iplocate_core::{ActivityOptions, EventAttributes};
use std::time::Duration;

/// Workflow command
#[derive(Debug, Clone)]
pub enum WorkflowCommand {
    ScheduleActivity(ScheduleActivityCommand),
    StartTimer(StartTimerCommand),
    RecordMarker(RecordMarkerCommand),
    CompleteWorkflow(CompleteWorkflowCommand),
    FailWorkflow(FailWorkflowCommand),
    CancelWorkflow(CancelWorkflowCommand),
}

#[derive(Debug, Clone)]
pub struct ScheduleActivityCommand {
    pub activity_id: String,
    pub activity_type: String,
    pub args: Option<Vec<u8>>,
    pub options: ActivityOptions,
}

#[derive(Debug, Clone)]
pub struct StartTimerCommand {
    pub timer_id: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct RecordMarkerCommand {
    pub marker_name: String,
    pub details: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CompleteWorkflowCommand {
    pub result: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct FailWorkflowCommand {
    pub reason: String,
    pub details: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct CancelWorkflowCommand {
    pub details: Option<Vec<u8>>,
}

impl WorkflowCommand {
    /// Id under which the command's outcome is delivered back to the workflow
    pub fn command_id(&self) -> Option<&str> {
        match self {
            WorkflowCommand::ScheduleActivity(cmd) => Some(&cmd.activity_id),
            WorkflowCommand::StartTimer(cmd) => Some(&cmd.timer_id),
            _ => None,
        }
    }

    pub fn closes_workflow(&self) -> bool {
        matches!(
            self,
            WorkflowCommand::CompleteWorkflow(_)
                | WorkflowCommand::FailWorkflow(_)
                | WorkflowCommand::CancelWorkflow(_)
        )
    }

    /// History event recorded for this command
    pub fn to_event_attributes(&self, default_task_list: &str) -> EventAttributes {
        match self {
            WorkflowCommand::ScheduleActivity(cmd) => EventAttributes::ActivityTaskScheduled {
                activity_id: cmd.activity_id.clone(),
                activity_type: cmd.activity_type.clone(),
                task_list: if cmd.options.task_list.is_empty() {
                    default_task_list.to_string()
                } else {
                    cmd.options.task_list.clone()
                },
                input: cmd.args.clone(),
                schedule_to_close_timeout: cmd.options.schedule_to_close_timeout,
                start_to_close_timeout: cmd.options.start_to_close_timeout,
                retry_policy: cmd.options.retry_policy.clone(),
            },
            WorkflowCommand::StartTimer(cmd) => EventAttributes::TimerStarted {
                timer_id: cmd.timer_id.clone(),
                start_to_fire_timeout: cmd.duration,
            },
            WorkflowCommand::RecordMarker(cmd) => EventAttributes::MarkerRecorded {
                marker_name: cmd.marker_name.clone(),
                details: Some(cmd.details.clone()),
            },
            WorkflowCommand::CompleteWorkflow(cmd) => EventAttributes::WorkflowExecutionCompleted {
                result: cmd.result.clone(),
            },
            WorkflowCommand::FailWorkflow(cmd) => EventAttributes::WorkflowExecutionFailed {
                reason: cmd.reason.clone(),
                details: cmd.details.clone(),
            },
            WorkflowCommand::CancelWorkflow(cmd) => EventAttributes::WorkflowExecutionCanceled {
                details: cmd.details.clone(),
            },
        }
    }

    /// Whether a recorded command event was produced by an equivalent command.
    ///
    /// Activities match on id and type, timers on id, markers on name and
    /// details. Inputs and results are not compared.
    pub fn matches_event(&self, event: &EventAttributes) -> bool {
        match (self, event) {
            (
                WorkflowCommand::ScheduleActivity(cmd),
                EventAttributes::ActivityTaskScheduled {
                    activity_id,
                    activity_type,
                    ..
                },
            ) => &cmd.activity_id == activity_id && &cmd.activity_type == activity_type,
            (WorkflowCommand::StartTimer(cmd), EventAttributes::TimerStarted { timer_id, .. }) => {
                &cmd.timer_id == timer_id
            }
            (
                WorkflowCommand::RecordMarker(cmd),
                EventAttributes::MarkerRecorded {
                    marker_name,
                    details,
                },
            ) => &cmd.marker_name == marker_name && details.as_deref() == Some(&cmd.details[..]),
            (
                WorkflowCommand::CompleteWorkflow(_),
                EventAttributes::WorkflowExecutionCompleted { .. },
            ) => true,
            (WorkflowCommand::FailWorkflow(_), EventAttributes::WorkflowExecutionFailed { .. }) => {
                true
            }
            (
                WorkflowCommand::CancelWorkflow(_),
                EventAttributes::WorkflowExecutionCanceled { .. },
            ) => true,
            _ => false,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            WorkflowCommand::ScheduleActivity(cmd) => format!(
                "ScheduleActivity(id={}, type={})",
                cmd.activity_id, cmd.activity_type
            ),
            WorkflowCommand::StartTimer(cmd) => format!("StartTimer(id={})", cmd.timer_id),
            WorkflowCommand::RecordMarker(cmd) => format!(
                "RecordMarker(name={}, details={})",
                cmd.marker_name,
                String::from_utf8_lossy(&cmd.details)
            ),
            WorkflowCommand::CompleteWorkflow(_) => "CompleteWorkflow".to_string(),
            WorkflowCommand::FailWorkflow(cmd) => format!("FailWorkflow(reason={})", cmd.reason),
            WorkflowCommand::CancelWorkflow(_) => "CancelWorkflow".to_string(),
        }
    }
}
