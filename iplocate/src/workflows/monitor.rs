//! Long-running address monitor steered by signals.
//!
//! The monitor looks up the location of its current target every check
//! interval. Signals pause and resume it, change its target or interval, or
//! stop it; queries report its progress without affecting it.

use crate::activities::GET_LOCATION_INFO;
use chrono::{DateTime, Utc};
use iplocate_core::ActivityOptions;
use iplocate_workflow::{ReceivedSignal, WorkflowContext, WorkflowError, WorkflowLogger};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const SIGNAL_PAUSE: &str = "pause";
pub const SIGNAL_RESUME: &str = "resume";
pub const SIGNAL_CHANGE_TARGET: &str = "change-target";
pub const SIGNAL_CHANGE_INTERVAL: &str = "change-interval";
pub const SIGNAL_STOP: &str = "stop";

pub const QUERY_STATUS: &str = "status";
pub const QUERY_HISTORY: &str = "history";
pub const QUERY_STATS: &str = "stats";

/// Entries kept in the monitor's history
pub const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub initial_ip: String,
    pub check_interval_secs: u64,
    /// 0 runs until stopped
    #[serde(default)]
    pub max_checks: u32,
}

/// Payload of [`SIGNAL_CHANGE_TARGET`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeTarget {
    pub new_ip: String,
}

/// Payload of [`SIGNAL_CHANGE_INTERVAL`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInterval {
    pub new_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to the `status` query, and the monitor's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub current_ip: String,
    pub check_interval_secs: u64,
    pub total_checks: u32,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_result: String,
    pub history: Vec<HistoryEntry>,
}

/// Answer to the `stats` query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub total_checks: u32,
    pub current_ip: String,
    pub is_paused: bool,
    pub check_interval: String,
    pub last_check_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Monitor {
    current_ip: String,
    interval: Duration,
    paused: bool,
    stopping: bool,
    total_checks: u32,
    last_check_time: Option<DateTime<Utc>>,
    last_result: String,
    history: VecDeque<HistoryEntry>,
}

impl Monitor {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            current_ip: config.initial_ip.clone(),
            interval: Duration::from_secs(config.check_interval_secs),
            paused: false,
            stopping: false,
            total_checks: 0,
            last_check_time: None,
            last_result: String::new(),
            history: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    fn state(&self) -> MonitorState {
        if self.stopping {
            MonitorState::Stopped
        } else if self.paused {
            MonitorState::Paused
        } else {
            MonitorState::Running
        }
    }

    fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state(),
            current_ip: self.current_ip.clone(),
            check_interval_secs: self.interval.as_secs(),
            total_checks: self.total_checks,
            last_check_time: self.last_check_time,
            last_result: self.last_result.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }

    fn stats(&self) -> MonitorStats {
        MonitorStats {
            total_checks: self.total_checks,
            current_ip: self.current_ip.clone(),
            is_paused: self.paused,
            check_interval: format!("{:?}", self.interval),
            last_check_time: self.last_check_time,
        }
    }

    fn record(&mut self, entry: HistoryEntry) {
        self.total_checks += 1;
        self.last_check_time = Some(entry.timestamp);
        self.last_result = match (&entry.location, &entry.error) {
            (Some(location), _) => location.clone(),
            (None, Some(error)) => format!("ERROR: {}", error),
            (None, None) => String::new(),
        };
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    fn done(&self, max_checks: u32) -> bool {
        self.stopping || (max_checks > 0 && self.total_checks >= max_checks)
    }

    /// Apply one signal. Unknown signals and bad payloads are ignored.
    fn apply(&mut self, signal: &ReceivedSignal, logger: &WorkflowLogger) {
        match signal.name.as_str() {
            SIGNAL_PAUSE => {
                self.paused = true;
                logger.info("Monitor paused");
            }
            SIGNAL_RESUME => {
                self.paused = false;
                logger.info("Monitor resumed");
            }
            SIGNAL_STOP => {
                self.stopping = true;
                logger.info("Monitor stopping");
            }
            SIGNAL_CHANGE_TARGET => match signal.decode::<ChangeTarget>() {
                Ok(ChangeTarget { new_ip }) => {
                    logger.info(format!("Target changed from {} to {}", self.current_ip, new_ip));
                    self.current_ip = new_ip;
                }
                Err(err) => logger.warn(format!("Ignoring {} signal: {}", signal.name, err)),
            },
            SIGNAL_CHANGE_INTERVAL => match signal.decode::<ChangeInterval>() {
                Ok(ChangeInterval { new_interval_secs: 0 }) => {
                    logger.warn("Ignoring change to a zero check interval");
                }
                Ok(ChangeInterval { new_interval_secs }) => {
                    self.interval = Duration::from_secs(new_interval_secs);
                    logger.info(format!("Check interval changed to {}s", new_interval_secs));
                }
                Err(err) => logger.warn(format!("Ignoring {} signal: {}", signal.name, err)),
            },
            other => logger.warn(format!("Ignoring unknown signal {}", other)),
        }
    }
}

/// Run the monitor until it is stopped or has made `max_checks` checks.
/// Returns the final status.
pub async fn run_monitor(
    ctx: &WorkflowContext,
    config: MonitorConfig,
    options: &ActivityOptions,
) -> Result<MonitorStatus, WorkflowError> {
    if config.check_interval_secs == 0 {
        return Err(WorkflowError::ExecutionFailed(
            "check interval must be at least one second".to_string(),
        ));
    }

    let logger = ctx.get_logger();
    let monitor = Arc::new(Mutex::new(Monitor::new(&config)));

    let state = monitor.clone();
    ctx.set_query_handler_json(QUERY_STATUS, move || state.lock().status());
    let state = monitor.clone();
    ctx.set_query_handler_json(QUERY_HISTORY, move || {
        state.lock().history.iter().cloned().collect::<Vec<_>>()
    });
    let state = monitor.clone();
    ctx.set_query_handler_json(QUERY_STATS, move || state.lock().stats());

    logger.info(format!(
        "Monitoring {} every {}s",
        config.initial_ip, config.check_interval_secs
    ));

    let mut inbox = ctx.signal_inbox();
    loop {
        if monitor.lock().done(config.max_checks) {
            break;
        }

        // pending signals are applied before a new timer is started
        let signal = match inbox.try_recv() {
            Some(signal) => Some(signal),
            None => {
                let interval = monitor.lock().interval;
                let timer = ctx.new_timer(interval);
                tokio::select! {
                    biased;
                    signal = inbox.recv() => Some(signal),
                    fired = timer => {
                        fired?;
                        None
                    }
                }
            }
        };

        if let Some(signal) = signal {
            monitor.lock().apply(&signal, &logger);
        }

        let target = {
            let state = monitor.lock();
            if state.paused || state.stopping {
                continue;
            }
            state.current_ip.clone()
        };

        let entry = check(ctx, &target, options).await?;
        monitor.lock().record(entry);
    }

    let status = monitor.lock().status();
    logger.info(format!("Monitor stopped after {} checks", status.total_checks));
    Ok(status)
}

/// Look up `ip` once. Activity failures become history entries.
async fn check(
    ctx: &WorkflowContext,
    ip: &str,
    options: &ActivityOptions,
) -> Result<HistoryEntry, WorkflowError> {
    let outcome = ctx
        .execute_typed_activity::<_, String>(GET_LOCATION_INFO, ip, options.clone())
        .await;

    let (location, error) = match outcome {
        Ok(location) => (Some(location), None),
        Err(err) if err.is_decision_failure() || matches!(err, WorkflowError::Cancelled) => {
            return Err(err);
        }
        Err(err) => {
            let message = err
                .activity_failure()
                .map(|failure| failure.message.clone())
                .unwrap_or_else(|| err.to_string());
            ctx.get_logger()
                .warn(format!("Check of {} failed: {}", ip, message));
            (None, Some(message))
        }
    };

    Ok(HistoryEntry {
        timestamp: ctx.now(),
        ip: ip.to_string(),
        location,
        error,
    })
}
