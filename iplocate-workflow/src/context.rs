//! Workflow context and core functions for authoring workflows.
//!
//! Workflow code must be deterministic: everything it observes from the
//! outside world (activity results, timers, signals, the current time,
//! version markers) comes through this context, so that re-running the same
//! code against the same history produces the same commands.

use crate::commands::{
    RecordMarkerCommand, ScheduleActivityCommand, StartTimerCommand, WorkflowCommand,
};
use crate::future::{CommandFuture, TimerFuture, WorkflowError};
use crate::markers::{encode_version_details, DEFAULT_VERSION, VERSION_MARKER_NAME};
use chrono::{DateTime, Utc};
use futures::future::poll_fn;
use futures::FutureExt;
use iplocate_core::{ActivityOptions, WorkflowInfo, QUERY_TYPE_QUERY_TYPES};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

/// Type alias for query handlers
pub type QueryHandler = Box<dyn Fn(Option<&[u8]>) -> Result<Vec<u8>, String> + Send + Sync>;

type SignalQueue = Arc<Mutex<VecDeque<ReceivedSignal>>>;

/// Trait for handling workflow commands (implemented by worker)
///
/// `submit` is called synchronously at the point the workflow issues the
/// command; the returned future resolves once the outcome is known.
pub trait CommandSink: Send + Sync {
    fn submit(&self, command: WorkflowCommand) -> CommandFuture;
}

/// No-op command sink for testing/initialization
struct NoopCommandSink;

impl CommandSink for NoopCommandSink {
    fn submit(&self, _command: WorkflowCommand) -> CommandFuture {
        Box::pin(async { Err(WorkflowError::Generic("No command sink configured".into())) })
    }
}

/// A signal delivered to the workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSignal {
    pub name: String,
    pub input: Option<Vec<u8>>,
}

impl ReceivedSignal {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, WorkflowError> {
        Ok(iplocate_core::decode_required(self.input.as_deref())?)
    }
}

/// Error returned when a query cannot be answered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("unknown queryType {query_type}. KnownQueryTypes={known:?}")]
    UnknownQueryType {
        query_type: String,
        known: Vec<String>,
    },
    #[error("query handler failed: {0}")]
    HandlerFailed(String),
}

/// Workflow context for executing workflow logic
#[derive(Clone)]
pub struct WorkflowContext {
    workflow_info: WorkflowInfo,
    command_sink: Arc<dyn CommandSink>,
    sequence: Arc<AtomicU64>,
    signals: SignalQueue,
    query_handlers: Arc<Mutex<HashMap<String, QueryHandler>>>,
    cancelled: Arc<AtomicBool>,
    // Replay flag - true while a recorded decision is being re-executed
    is_replay: Arc<AtomicBool>,
    // Deterministic time - current time in nanoseconds (unix epoch)
    current_time_nanos: Arc<AtomicI64>,
    // Versions already read by this run
    change_versions: Arc<Mutex<HashMap<String, i32>>>,
    // Version markers found in recorded history
    recorded_versions: Arc<Mutex<HashMap<String, i32>>>,
}

impl WorkflowContext {
    pub fn new(workflow_info: WorkflowInfo) -> Self {
        Self::with_sink(workflow_info, Arc::new(NoopCommandSink))
    }

    pub fn with_sink(workflow_info: WorkflowInfo, sink: Arc<dyn CommandSink>) -> Self {
        let start_time_nanos = workflow_info.start_time.timestamp_nanos_opt().unwrap_or(0);

        Self {
            workflow_info,
            command_sink: sink,
            sequence: Arc::new(AtomicU64::new(0)),
            signals: Arc::new(Mutex::new(VecDeque::new())),
            query_handlers: Arc::new(Mutex::new(HashMap::new())),
            cancelled: Arc::new(AtomicBool::new(false)),
            is_replay: Arc::new(AtomicBool::new(false)),
            current_time_nanos: Arc::new(AtomicI64::new(start_time_nanos)),
            change_versions: Arc::new(Mutex::new(HashMap::new())),
            recorded_versions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Set replay mode
    pub fn set_replay_mode(&self, is_replay: bool) {
        self.is_replay.store(is_replay, Ordering::SeqCst);
    }

    /// Whether the current decision is being re-executed from history
    pub fn is_replaying(&self) -> bool {
        self.is_replay.load(Ordering::SeqCst)
    }

    /// Set current workflow time (from deterministic source)
    pub fn set_current_time(&self, time: DateTime<Utc>) {
        if let Some(nanos) = time.timestamp_nanos_opt() {
            self.current_time_nanos.store(nanos, Ordering::SeqCst);
        }
    }

    /// Set the version markers found in recorded history (used during replay)
    pub fn set_recorded_versions(&self, versions: HashMap<String, i32>) {
        *self.recorded_versions.lock() = versions;
    }

    /// Append a signal to the ordered inbox
    pub fn deliver_signal(&self, name: impl Into<String>, input: Option<Vec<u8>>) {
        self.signals.lock().push_back(ReceivedSignal {
            name: name.into(),
            input,
        });
    }

    /// Signals delivered but not yet received by workflow code
    pub fn pending_signal_count(&self) -> usize {
        self.signals.lock().len()
    }

    fn next_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{}", seq)
    }

    /// Get workflow information
    pub fn workflow_info(&self) -> &WorkflowInfo {
        &self.workflow_info
    }

    /// Execute an activity
    pub async fn execute_activity(
        &self,
        activity_type: &str,
        args: Option<Vec<u8>>,
        options: ActivityOptions,
    ) -> Result<Vec<u8>, WorkflowError> {
        let activity_id = self.next_id();

        let command = WorkflowCommand::ScheduleActivity(ScheduleActivityCommand {
            activity_id,
            activity_type: activity_type.to_string(),
            args,
            options,
        });

        self.command_sink.submit(command).await
    }

    /// Execute an activity with a JSON encoded argument and result
    pub async fn execute_typed_activity<A, R>(
        &self,
        activity_type: &str,
        arg: &A,
        options: ActivityOptions,
    ) -> Result<R, WorkflowError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = iplocate_core::encode(arg)?;
        let output = self
            .execute_activity(activity_type, Some(args), options)
            .await?;
        Ok(iplocate_core::decode(&output)?)
    }

    /// Get the version of a change for this instance
    ///
    /// The first call for a `change_id` fixes the version for the rest of the
    /// run:
    /// - if history recorded a marker for it, the recorded version
    /// - if a recorded decision is being replayed without one, `DEFAULT_VERSION`
    /// - otherwise `max_supported`, recorded as a new marker
    ///
    /// Fails when the version falls outside `[min_supported, max_supported]`.
    ///
    /// # Example
    /// ```rust,ignore
    /// let version = ctx.get_version("add-timezone-feature", DEFAULT_VERSION, 1)?;
    /// if version >= 1 {
    ///     ctx.execute_activity("get_timezone", ...).await?;
    /// }
    /// ```
    pub fn get_version(
        &self,
        change_id: &str,
        min_supported: i32,
        max_supported: i32,
    ) -> Result<i32, WorkflowError> {
        if let Some(&version) = self.change_versions.lock().get(change_id) {
            Self::validate_version(change_id, version, min_supported, max_supported)?;
            return Ok(version);
        }

        let recorded = self.recorded_versions.lock().get(change_id).copied();
        let version = match recorded {
            Some(version) => version,
            None if self.is_replaying() => DEFAULT_VERSION,
            None => max_supported,
        };

        Self::validate_version(change_id, version, min_supported, max_supported)?;

        if version != DEFAULT_VERSION {
            let command = WorkflowCommand::RecordMarker(RecordMarkerCommand {
                marker_name: VERSION_MARKER_NAME.to_string(),
                details: encode_version_details(change_id, version)?,
            });
            // Markers resolve at submission; only a replay mismatch fails here.
            if let Some(Err(err)) = self.command_sink.submit(command).now_or_never() {
                return Err(err);
            }
        }

        self.change_versions
            .lock()
            .insert(change_id.to_string(), version);
        Ok(version)
    }

    fn validate_version(
        change_id: &str,
        version: i32,
        min_supported: i32,
        max_supported: i32,
    ) -> Result<(), WorkflowError> {
        if version < min_supported {
            return Err(WorkflowError::VersionRemoved {
                change_id: change_id.to_string(),
                version,
                min_supported,
            });
        }
        if version > max_supported {
            return Err(WorkflowError::VersionTooNew {
                change_id: change_id.to_string(),
                version,
                max_supported,
            });
        }
        Ok(())
    }

    /// Set a query handler
    ///
    /// Handlers run outside of any decision and must only read state.
    pub fn set_query_handler<F>(&self, query_type: &str, handler: F)
    where
        F: Fn(Option<&[u8]>) -> Result<Vec<u8>, String> + Send + Sync + 'static,
    {
        self.query_handlers
            .lock()
            .insert(query_type.to_string(), Box::new(handler));
    }

    /// Set a query handler answering with a JSON snapshot
    pub fn set_query_handler_json<T, F>(&self, query_type: &str, snapshot: F)
    where
        T: Serialize,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.set_query_handler(query_type, move |_args| {
            iplocate_core::encode(&snapshot()).map_err(|e| e.to_string())
        });
    }

    /// Registered query types, sorted
    pub fn query_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.query_handlers.lock().keys().cloned().collect();
        types.sort();
        types
    }

    /// Answer a query from registered handlers
    pub fn handle_query(&self, query_type: &str, args: Option<&[u8]>) -> Result<Vec<u8>, QueryError> {
        if query_type == QUERY_TYPE_QUERY_TYPES {
            return iplocate_core::encode(&self.query_types())
                .map_err(|e| QueryError::HandlerFailed(e.to_string()));
        }
        let handlers = self.query_handlers.lock();
        match handlers.get(query_type) {
            Some(handler) => handler(args).map_err(QueryError::HandlerFailed),
            None => {
                let mut known: Vec<String> = handlers.keys().cloned().collect();
                known.sort();
                Err(QueryError::UnknownQueryType {
                    query_type: query_type.to_string(),
                    known,
                })
            }
        }
    }

    /// Sleep for a duration (workflow-aware)
    pub async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError> {
        self.new_timer(duration).await
    }

    /// Create a durable timer. The timer is started when this is called.
    pub fn new_timer(&self, duration: Duration) -> TimerFuture {
        if duration.is_zero() {
            return Box::pin(async { Ok(()) });
        }
        let timer_id = self.next_id();
        let command = WorkflowCommand::StartTimer(StartTimerCommand { timer_id, duration });
        let future = self.command_sink.submit(command);
        Box::pin(async move { future.await.map(|_| ()) })
    }

    /// Get current workflow time (deterministic)
    pub fn now(&self) -> DateTime<Utc> {
        let nanos = self.current_time_nanos.load(Ordering::SeqCst);
        DateTime::from_timestamp(
            nanos.div_euclid(1_000_000_000),
            nanos.rem_euclid(1_000_000_000) as u32,
        )
        .unwrap_or_default()
    }

    /// Channel receiving only signals named `signal_name`, in arrival order
    pub fn get_signal_channel(&self, signal_name: &str) -> SignalChannel {
        SignalChannel::new(signal_name, self.signals.clone())
    }

    /// Inbox receiving every signal in arrival order
    pub fn signal_inbox(&self) -> SignalInbox {
        SignalInbox {
            signals: self.signals.clone(),
        }
    }

    /// Get a cancellation channel
    pub fn get_cancellation_channel(&self) -> CancellationChannel {
        CancellationChannel::new(self.cancelled.clone())
    }

    /// Check if cancellation of this workflow was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::SeqCst);
    }

    /// Get a replay-aware logger
    pub fn get_logger(&self) -> WorkflowLogger {
        WorkflowLogger {
            workflow_id: self.workflow_info.workflow_execution.workflow_id.clone(),
            workflow_type: self.workflow_info.workflow_type.name.clone(),
            is_replay: self.is_replay.clone(),
        }
    }
}

/// Signal channel for receiving signals of one name
pub struct SignalChannel {
    signal_name: String,
    signals: SignalQueue,
}

impl SignalChannel {
    fn new(signal_name: &str, signals: SignalQueue) -> Self {
        Self {
            signal_name: signal_name.to_string(),
            signals,
        }
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        poll_fn(|_cx| match self.try_recv() {
            Some(input) => Poll::Ready(input),
            None => Poll::Pending,
        })
        .await
    }

    /// Take the oldest pending signal with this name. The outer `Option` is
    /// `None` when there is none; the inner one is the signal payload.
    pub fn try_recv(&mut self) -> Option<Option<Vec<u8>>> {
        let mut signals = self.signals.lock();
        let position = signals.iter().position(|s| s.name == self.signal_name)?;
        signals.remove(position).map(|s| s.input)
    }
}

/// Ordered inbox over all signals
pub struct SignalInbox {
    signals: SignalQueue,
}

impl SignalInbox {
    pub async fn recv(&mut self) -> ReceivedSignal {
        poll_fn(|_cx| match self.try_recv() {
            Some(signal) => Poll::Ready(signal),
            None => Poll::Pending,
        })
        .await
    }

    pub fn try_recv(&mut self) -> Option<ReceivedSignal> {
        self.signals.lock().pop_front()
    }
}

/// Cancellation channel
pub struct CancellationChannel {
    cancelled: Arc<AtomicBool>,
}

impl CancellationChannel {
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }

    pub async fn recv(&mut self) {
        poll_fn(|_cx| {
            if self.cancelled.load(Ordering::SeqCst) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

/// Logger that stays quiet while history is replayed, so each line is
/// emitted once per instance rather than once per replay.
#[derive(Clone)]
pub struct WorkflowLogger {
    workflow_id: String,
    workflow_type: String,
    is_replay: Arc<AtomicBool>,
}

impl WorkflowLogger {
    fn enabled(&self) -> bool {
        !self.is_replay.load(Ordering::SeqCst)
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        if self.enabled() {
            tracing::debug!(workflow_id = %self.workflow_id, workflow_type = %self.workflow_type, "{}", msg.as_ref());
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if self.enabled() {
            tracing::info!(workflow_id = %self.workflow_id, workflow_type = %self.workflow_type, "{}", msg.as_ref());
        }
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        if self.enabled() {
            tracing::warn!(workflow_id = %self.workflow_id, workflow_type = %self.workflow_type, "{}", msg.as_ref());
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        if self.enabled() {
            tracing::error!(workflow_id = %self.workflow_id, workflow_type = %self.workflow_type, "{}", msg.as_ref());
        }
    }
}
