//! Workflow execution history.
//!
//! Every execution is persisted as an append-only list of events. Events
//! that follow a `DecisionTaskCompleted` event are the commands produced by
//! that decision; everything else is an input delivered to the workflow
//! (activity results, timer firings, signals, cancellation requests).

use crate::encoded::payload_serde;
use crate::types::{RetryPolicy, WorkflowExecutionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single persisted history event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub timestamp: DateTime<Utc>,
    pub attributes: EventAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventAttributes {
    WorkflowExecutionStarted {
        workflow_type: String,
        task_list: String,
        #[serde(with = "payload_serde", default)]
        input: Option<Vec<u8>>,
        identity: String,
    },
    DecisionTaskCompleted {
        identity: String,
    },
    DecisionTaskFailed {
        cause: String,
        details: String,
    },
    ActivityTaskScheduled {
        activity_id: String,
        activity_type: String,
        task_list: String,
        #[serde(with = "payload_serde", default)]
        input: Option<Vec<u8>>,
        schedule_to_close_timeout: Duration,
        start_to_close_timeout: Duration,
        retry_policy: Option<RetryPolicy>,
    },
    ActivityTaskCompleted {
        activity_id: String,
        #[serde(with = "payload_serde", default)]
        result: Option<Vec<u8>>,
        attempt: i32,
    },
    ActivityTaskFailed {
        activity_id: String,
        reason: String,
        message: String,
        #[serde(with = "payload_serde", default)]
        details: Option<Vec<u8>>,
        retryable: bool,
        attempt: i32,
    },
    ActivityTaskTimedOut {
        activity_id: String,
        timeout_type: crate::error::TimeoutType,
        attempt: i32,
    },
    TimerStarted {
        timer_id: String,
        start_to_fire_timeout: Duration,
    },
    TimerFired {
        timer_id: String,
    },
    MarkerRecorded {
        marker_name: String,
        #[serde(with = "payload_serde", default)]
        details: Option<Vec<u8>>,
    },
    WorkflowExecutionSignaled {
        signal_name: String,
        #[serde(with = "payload_serde", default)]
        input: Option<Vec<u8>>,
    },
    WorkflowExecutionCancelRequested {
        cause: Option<String>,
    },
    WorkflowExecutionCompleted {
        #[serde(with = "payload_serde", default)]
        result: Option<Vec<u8>>,
    },
    WorkflowExecutionFailed {
        reason: String,
        #[serde(with = "payload_serde", default)]
        details: Option<Vec<u8>>,
    },
    WorkflowExecutionCanceled {
        #[serde(with = "payload_serde", default)]
        details: Option<Vec<u8>>,
    },
    WorkflowExecutionTerminated {
        reason: String,
    },
}

impl EventAttributes {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventAttributes::WorkflowExecutionStarted { .. } => "WorkflowExecutionStarted",
            EventAttributes::DecisionTaskCompleted { .. } => "DecisionTaskCompleted",
            EventAttributes::DecisionTaskFailed { .. } => "DecisionTaskFailed",
            EventAttributes::ActivityTaskScheduled { .. } => "ActivityTaskScheduled",
            EventAttributes::ActivityTaskCompleted { .. } => "ActivityTaskCompleted",
            EventAttributes::ActivityTaskFailed { .. } => "ActivityTaskFailed",
            EventAttributes::ActivityTaskTimedOut { .. } => "ActivityTaskTimedOut",
            EventAttributes::TimerStarted { .. } => "TimerStarted",
            EventAttributes::TimerFired { .. } => "TimerFired",
            EventAttributes::MarkerRecorded { .. } => "MarkerRecorded",
            EventAttributes::WorkflowExecutionSignaled { .. } => "WorkflowExecutionSignaled",
            EventAttributes::WorkflowExecutionCancelRequested { .. } => {
                "WorkflowExecutionCancelRequested"
            }
            EventAttributes::WorkflowExecutionCompleted { .. } => "WorkflowExecutionCompleted",
            EventAttributes::WorkflowExecutionFailed { .. } => "WorkflowExecutionFailed",
            EventAttributes::WorkflowExecutionCanceled { .. } => "WorkflowExecutionCanceled",
            EventAttributes::WorkflowExecutionTerminated { .. } => "WorkflowExecutionTerminated",
        }
    }

    /// Events written on behalf of a decision, matched against workflow
    /// commands on replay.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            EventAttributes::ActivityTaskScheduled { .. }
                | EventAttributes::TimerStarted { .. }
                | EventAttributes::MarkerRecorded { .. }
                | EventAttributes::WorkflowExecutionCompleted { .. }
                | EventAttributes::WorkflowExecutionFailed { .. }
                | EventAttributes::WorkflowExecutionCanceled { .. }
        )
    }

    /// Events delivered to the workflow between decisions.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            EventAttributes::ActivityTaskCompleted { .. }
                | EventAttributes::ActivityTaskFailed { .. }
                | EventAttributes::ActivityTaskTimedOut { .. }
                | EventAttributes::TimerFired { .. }
                | EventAttributes::WorkflowExecutionSignaled { .. }
                | EventAttributes::WorkflowExecutionCancelRequested { .. }
        )
    }

    pub fn close_status(&self) -> Option<WorkflowExecutionStatus> {
        match self {
            EventAttributes::WorkflowExecutionCompleted { .. } => {
                Some(WorkflowExecutionStatus::Completed)
            }
            EventAttributes::WorkflowExecutionFailed { .. } => Some(WorkflowExecutionStatus::Failed),
            EventAttributes::WorkflowExecutionCanceled { .. } => {
                Some(WorkflowExecutionStatus::Canceled)
            }
            EventAttributes::WorkflowExecutionTerminated { .. } => {
                Some(WorkflowExecutionStatus::Terminated)
            }
            _ => None,
        }
    }

    /// Short human readable description used in nondeterminism reports
    pub fn summary(&self) -> String {
        match self {
            EventAttributes::ActivityTaskScheduled {
                activity_id,
                activity_type,
                ..
            } => format!("ActivityTaskScheduled(id={}, type={})", activity_id, activity_type),
            EventAttributes::TimerStarted { timer_id, .. } => {
                format!("TimerStarted(id={})", timer_id)
            }
            EventAttributes::MarkerRecorded {
                marker_name,
                details,
            } => format!(
                "MarkerRecorded(name={}, details={})",
                marker_name,
                details
                    .as_deref()
                    .map(String::from_utf8_lossy)
                    .unwrap_or_default()
            ),
            other => other.event_type().to_string(),
        }
    }
}

/// Complete history of one workflow run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub events: Vec<HistoryEvent>,
}

impl History {
    pub fn new(events: Vec<HistoryEvent>) -> Self {
        Self { events }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_event_id(&self) -> i64 {
        self.events.last().map(|e| e.event_id).unwrap_or(0)
    }

    /// Workflow type, task list and input from the first event
    pub fn started(&self) -> Option<(&str, &str, Option<&[u8]>)> {
        match self.events.first().map(|e| &e.attributes) {
            Some(EventAttributes::WorkflowExecutionStarted {
                workflow_type,
                task_list,
                input,
                ..
            }) => Some((workflow_type.as_str(), task_list.as_str(), input.as_deref())),
            _ => None,
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(|e| e.timestamp)
    }

    pub fn status(&self) -> WorkflowExecutionStatus {
        self.events
            .iter()
            .rev()
            .find_map(|e| e.attributes.close_status())
            .unwrap_or(WorkflowExecutionStatus::Running)
    }

    /// The close event, if the run has finished
    pub fn close_event(&self) -> Option<&EventAttributes> {
        self.events
            .iter()
            .rev()
            .map(|e| &e.attributes)
            .find(|a| a.close_status().is_some())
    }

    /// Number of signals recorded for this run
    pub fn signal_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.attributes, EventAttributes::WorkflowExecutionSignaled { .. }))
            .count()
    }
}

/// Builds histories by hand, numbering events as they are added.
#[derive(Debug, Clone)]
pub struct HistoryBuilder {
    events: Vec<HistoryEvent>,
    clock: DateTime<Utc>,
}

impl HistoryBuilder {
    pub fn new(workflow_type: &str, task_list: &str, input: Option<Vec<u8>>) -> Self {
        let clock = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now);
        let mut builder = Self {
            events: Vec::new(),
            clock,
        };
        builder.push(EventAttributes::WorkflowExecutionStarted {
            workflow_type: workflow_type.to_string(),
            task_list: task_list.to_string(),
            input,
            identity: "history-builder".to_string(),
        });
        builder
    }

    /// Moves the event clock forward
    pub fn advance(mut self, by: Duration) -> Self {
        self.clock += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        self
    }

    pub fn event(mut self, attributes: EventAttributes) -> Self {
        self.push(attributes);
        self
    }

    /// Appends a `DecisionTaskCompleted` event followed by `commands`
    pub fn decision(mut self, commands: Vec<EventAttributes>) -> Self {
        self.push(EventAttributes::DecisionTaskCompleted {
            identity: "history-builder".to_string(),
        });
        for command in commands {
            self.push(command);
        }
        self
    }

    pub fn build(self) -> History {
        History::new(self.events)
    }

    fn push(&mut self, attributes: EventAttributes) {
        let event_id = self.events.len() as i64 + 1;
        self.events.push(HistoryEvent {
            event_id,
            timestamp: self.clock,
            attributes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_lookup() -> History {
        HistoryBuilder::new("GetAddressFromIP", "ip-geolocation", Some(b"{}".to_vec()))
            .decision(vec![EventAttributes::TimerStarted {
                timer_id: "0".to_string(),
                start_to_fire_timeout: Duration::from_secs(45),
            }])
            .advance(Duration::from_secs(45))
            .event(EventAttributes::TimerFired {
                timer_id: "0".to_string(),
            })
            .decision(vec![EventAttributes::WorkflowExecutionCompleted {
                result: Some(br#"{"location":"City: X, Region: Y, Country: Z"}"#.to_vec()),
            }])
            .build()
    }

    #[test]
    fn history_survives_json_export() {
        let history = completed_lookup();
        let json = history.to_json_pretty().unwrap();
        assert!(json.contains("\"event_type\": \"TimerFired\""));
        assert!(json.contains("City: X, Region: Y, Country: Z"));

        let back = History::from_json(&json).unwrap();
        assert_eq!(back, history);
    }

    #[test]
    fn status_follows_close_event() {
        let history = completed_lookup();
        assert_eq!(history.status(), WorkflowExecutionStatus::Completed);
        assert_eq!(history.last_event_id(), 6);

        let (workflow_type, task_list, input) = history.started().unwrap();
        assert_eq!(workflow_type, "GetAddressFromIP");
        assert_eq!(task_list, "ip-geolocation");
        assert_eq!(input, Some(&b"{}"[..]));

        let open = HistoryBuilder::new("IPMonitorWorkflow", "ip-geolocation", None).build();
        assert_eq!(open.status(), WorkflowExecutionStatus::Running);
        assert!(open.close_event().is_none());
    }

    #[test]
    fn event_classification() {
        let fired = EventAttributes::TimerFired {
            timer_id: "1".to_string(),
        };
        assert!(fired.is_input());
        assert!(!fired.is_command());

        let marker = EventAttributes::MarkerRecorded {
            marker_name: "Version".to_string(),
            details: Some(br#"{"change_id":"add-timezone-feature","version":1}"#.to_vec()),
        };
        assert!(marker.is_command());
        assert!(marker.summary().contains("add-timezone-feature"));
    }
}
