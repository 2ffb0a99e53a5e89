//! A running workflow instance.
//!
//! Each instance is a tokio task owning its executor and history. Every
//! change arrives through the instance mailbox, so history is appended,
//! decided on and saved by a single writer.

use crate::engine::{EngineShared, WorkerHandle};
use crate::executor::WorkflowExecutor;
use crate::handlers::ActivityTask;
use chrono::{DateTime, Utc};
use iplocate_core::{
    EventAttributes, FlowResult, History, HistoryEvent, NonDeterministicWorkflowPolicy,
    ServerError, WorkflowExecution, WorkflowExecutionStatus,
};
use iplocate_workflow::{QueryError, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

pub(crate) enum InstanceMessage {
    Input {
        event: EventAttributes,
        ack: Option<oneshot::Sender<FlowResult<()>>>,
    },
    Query {
        query_type: String,
        args: Option<Vec<u8>>,
        reply: oneshot::Sender<Result<Vec<u8>, QueryError>>,
    },
    Terminate {
        reason: String,
        ack: oneshot::Sender<FlowResult<()>>,
    },
}

/// The instance task exited after its run closed. Callers fall back to the
/// stored history.
#[derive(Debug)]
pub(crate) struct InstanceGone;

/// Engine-side handle to a spawned instance
#[derive(Clone)]
pub(crate) struct InstanceHandle {
    pub execution: WorkflowExecution,
    pub tx: mpsc::UnboundedSender<InstanceMessage>,
    pub status: watch::Receiver<WorkflowExecutionStatus>,
}

impl InstanceHandle {
    pub fn status(&self) -> WorkflowExecutionStatus {
        *self.status.borrow()
    }

    pub fn matches(&self, run_id: Option<&str>) -> bool {
        run_id.map_or(true, |run_id| run_id == self.execution.run_id)
    }

    /// Deliver an input and wait until it has been recorded
    pub async fn send_input(&self, event: EventAttributes) -> Result<FlowResult<()>, InstanceGone> {
        let (ack, done) = oneshot::channel();
        self.send(InstanceMessage::Input {
            event,
            ack: Some(ack),
        })?;
        done.await.map_err(|_| InstanceGone)
    }

    pub async fn query(
        &self,
        query_type: &str,
        args: Option<Vec<u8>>,
    ) -> Result<Result<Vec<u8>, QueryError>, InstanceGone> {
        let (reply, answer) = oneshot::channel();
        self.send(InstanceMessage::Query {
            query_type: query_type.to_string(),
            args,
            reply,
        })?;
        answer.await.map_err(|_| InstanceGone)
    }

    pub async fn terminate(&self, reason: String) -> Result<FlowResult<()>, InstanceGone> {
        let (ack, done) = oneshot::channel();
        self.send(InstanceMessage::Terminate { reason, ack })?;
        done.await.map_err(|_| InstanceGone)
    }

    fn send(&self, message: InstanceMessage) -> Result<(), InstanceGone> {
        self.tx.send(message).map_err(|_| InstanceGone)
    }
}

/// How a spawned instance begins
pub(crate) enum Startup {
    /// Brand new run: decide on the started event
    Fresh,
    /// Recovered run whose recorded decisions were replayed
    Recovered {
        needs_decision: bool,
        replay_error: Option<WorkflowError>,
    },
}

pub(crate) struct Instance {
    shared: Arc<EngineShared>,
    worker: WorkerHandle,
    execution: WorkflowExecution,
    workflow_type: String,
    task_list: String,
    history: History,
    executor: WorkflowExecutor,
    status: WorkflowExecutionStatus,
    status_tx: watch::Sender<WorkflowExecutionStatus>,
    blocked: bool,
    cancel_requested: bool,
    self_tx: mpsc::WeakUnboundedSender<InstanceMessage>,
}

impl Instance {
    /// Spawn the instance task and register its handle with the engine
    pub fn spawn(
        shared: Arc<EngineShared>,
        worker: WorkerHandle,
        execution: WorkflowExecution,
        history: History,
        executor: WorkflowExecutor,
        startup: Startup,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = history.status();
        let (status_tx, status_rx) = watch::channel(status);
        let info = executor.workflow_info().clone();
        let cancel_requested = history.events.iter().any(|e| {
            matches!(
                e.attributes,
                EventAttributes::WorkflowExecutionCancelRequested { .. }
            )
        });

        let instance = Instance {
            shared,
            worker,
            execution: execution.clone(),
            workflow_type: info.workflow_type.name,
            task_list: info.task_list,
            history,
            executor,
            status,
            status_tx,
            blocked: false,
            cancel_requested,
            self_tx: tx.downgrade(),
        };
        let handle = InstanceHandle {
            execution,
            tx,
            status: status_rx,
        };
        // Registered before the task runs so a run that closes in its first
        // decision evicts its own entry
        instance.shared.admit(handle);
        tokio::spawn(instance.run(rx, startup));
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<InstanceMessage>, startup: Startup) {
        if let Err(err) = self.begin(startup).await {
            tracing::error!(
                workflow_id = %self.execution.workflow_id,
                run_id = %self.execution.run_id,
                error = %err,
                "failed to persist workflow history"
            );
        }

        while !self.status_tx.borrow().is_closed() {
            let Some(message) = rx.recv().await else {
                return;
            };
            self.handle(message).await;
        }

        // Closed and saved: new requests go to the store, queued ones are
        // still answered here
        self.shared.evict(&self.execution);
        rx.close();
        while let Some(message) = rx.recv().await {
            self.handle(message).await;
        }
        tracing::debug!(
            workflow_id = %self.execution.workflow_id,
            run_id = %self.execution.run_id,
            "instance evicted"
        );
    }

    async fn handle(&mut self, message: InstanceMessage) {
        match message {
            InstanceMessage::Input { event, ack } => {
                let result = self.handle_input(event).await;
                match ack {
                    Some(ack) => {
                        let _ = ack.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            tracing::debug!(
                                workflow_id = %self.execution.workflow_id,
                                error = %err,
                                "input dropped"
                            );
                        }
                    }
                }
            }
            InstanceMessage::Query {
                query_type,
                args,
                reply,
            } => {
                let _ = reply.send(self.executor.query(&query_type, args.as_deref()));
            }
            InstanceMessage::Terminate { reason, ack } => {
                let _ = ack.send(self.terminate(reason).await);
            }
        }
    }

    async fn begin(&mut self, startup: Startup) -> FlowResult<()> {
        match startup {
            Startup::Fresh => {
                let commands = self.decide();
                self.save().await?;
                self.dispatch(&commands);
            }
            Startup::Recovered {
                needs_decision,
                replay_error,
            } => {
                let pending = self.pending_work();
                match replay_error {
                    Some(err) => {
                        self.fail_decision(err);
                        self.save().await?;
                    }
                    None if needs_decision => {
                        let commands = self.decide();
                        self.save().await?;
                        self.dispatch(&commands);
                    }
                    None => {}
                }
                if !self.status.is_closed() {
                    self.dispatch(&pending);
                }
            }
        }
        Ok(())
    }

    async fn handle_input(&mut self, event: EventAttributes) -> FlowResult<()> {
        if self.status.is_closed() {
            return Err(ServerError::WorkflowExecutionAlreadyCompleted {
                message: format!("workflow execution {} already completed", self.execution),
            }
            .into());
        }
        if matches!(event, EventAttributes::WorkflowExecutionCancelRequested { .. }) {
            if self.cancel_requested {
                return Err(ServerError::CancellationAlreadyRequested {
                    message: format!("cancellation already requested for {}", self.execution),
                }
                .into());
            }
            self.cancel_requested = true;
        }

        self.executor.apply_input(&event);
        self.append(event);
        let commands = if self.blocked {
            Vec::new()
        } else {
            self.decide()
        };
        self.save().await?;
        self.dispatch(&commands);
        Ok(())
    }

    async fn terminate(&mut self, reason: String) -> FlowResult<()> {
        if self.status.is_closed() {
            return Err(ServerError::WorkflowExecutionAlreadyCompleted {
                message: format!("workflow execution {} already completed", self.execution),
            }
            .into());
        }
        tracing::info!(
            workflow_id = %self.execution.workflow_id,
            run_id = %self.execution.run_id,
            %reason,
            "terminating workflow"
        );
        self.append(EventAttributes::WorkflowExecutionTerminated { reason });
        self.save().await
    }

    /// Run a live decision and record its commands. Returns the recorded
    /// command events that need dispatching.
    fn decide(&mut self) -> Vec<HistoryEvent> {
        // Replay hands this timestamp back to ctx.now()
        let now = Utc::now();
        let outcome = match self.executor.decide(now, false, Vec::new()) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fail_decision(err);
                return Vec::new();
            }
        };

        self.append_at(
            now,
            EventAttributes::DecisionTaskCompleted {
                identity: self.worker.options.identity.clone(),
            },
        );
        let first = self.history.events.len();
        for command in &outcome.commands {
            self.append_at(now, command.to_event_attributes(&self.task_list));
        }
        tracing::debug!(
            workflow_id = %self.execution.workflow_id,
            commands = outcome.commands.len(),
            closed = outcome.closed,
            "decision completed"
        );
        self.history.events[first..].to_vec()
    }

    fn fail_decision(&mut self, err: WorkflowError) {
        let policy = self.worker.options.non_deterministic_workflow_policy;
        tracing::error!(
            workflow_id = %self.execution.workflow_id,
            run_id = %self.execution.run_id,
            workflow_type = %self.workflow_type,
            ?policy,
            error = %err,
            "decision task failed"
        );

        self.append(EventAttributes::DecisionTaskFailed {
            cause: decision_failure_cause(&err).to_string(),
            details: err.to_string(),
        });
        match policy {
            NonDeterministicWorkflowPolicy::BlockWorkflow => self.blocked = true,
            NonDeterministicWorkflowPolicy::FailWorkflow => {
                self.append(EventAttributes::WorkflowExecutionFailed {
                    reason: err.to_string(),
                    details: None,
                });
            }
        }
    }

    fn append(&mut self, attributes: EventAttributes) {
        self.append_at(Utc::now(), attributes);
    }

    fn append_at(&mut self, timestamp: DateTime<Utc>, attributes: EventAttributes) {
        let closes = attributes.close_status();
        self.history.events.push(HistoryEvent {
            event_id: self.history.last_event_id() + 1,
            timestamp,
            attributes,
        });
        if let Some(status) = closes {
            self.status = status;
        }
    }

    /// Persist history, then publish the status
    async fn save(&mut self) -> FlowResult<()> {
        self.shared.store.save(&self.execution, &self.history).await?;
        if *self.status_tx.borrow() != self.status {
            if self.status.is_closed() {
                tracing::info!(
                    workflow_id = %self.execution.workflow_id,
                    run_id = %self.execution.run_id,
                    status = %self.status,
                    "workflow closed"
                );
            }
            self.status_tx.send_replace(self.status);
        }
        Ok(())
    }

    /// Activities and timers recorded as started but without an outcome
    fn pending_work(&self) -> Vec<HistoryEvent> {
        let mut pending: HashMap<&str, &HistoryEvent> = HashMap::new();
        let mut order = Vec::new();
        for event in &self.history.events {
            match &event.attributes {
                EventAttributes::ActivityTaskScheduled { activity_id: id, .. }
                | EventAttributes::TimerStarted { timer_id: id, .. } => {
                    pending.insert(id.as_str(), event);
                    order.push(id.as_str());
                }
                EventAttributes::ActivityTaskCompleted { activity_id: id, .. }
                | EventAttributes::ActivityTaskFailed { activity_id: id, .. }
                | EventAttributes::ActivityTaskTimedOut { activity_id: id, .. }
                | EventAttributes::TimerFired { timer_id: id } => {
                    pending.remove(id.as_str());
                }
                _ => {}
            }
        }
        order
            .into_iter()
            .filter_map(|id| pending.remove(id).cloned())
            .collect()
    }

    fn dispatch(&self, events: &[HistoryEvent]) {
        for event in events {
            match &event.attributes {
                EventAttributes::ActivityTaskScheduled { .. } => {
                    let Some(task) = ActivityTask::from_scheduled_event(
                        &self.execution,
                        &self.workflow_type,
                        &event.attributes,
                        event.timestamp,
                    ) else {
                        continue;
                    };
                    let shared = self.shared.clone();
                    let mailbox = self.self_tx.clone();
                    tokio::spawn(async move {
                        let worker = shared.wait_for_worker(&task.task_list).await;
                        let outcome = worker.activities.handle(task).await;
                        deliver(&mailbox, outcome);
                    });
                }
                EventAttributes::TimerStarted {
                    timer_id,
                    start_to_fire_timeout,
                } => {
                    let remaining = remaining(event.timestamp, *start_to_fire_timeout);
                    let fired = EventAttributes::TimerFired {
                        timer_id: timer_id.clone(),
                    };
                    let mailbox = self.self_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(remaining).await;
                        deliver(&mailbox, fired);
                    });
                }
                _ => {}
            }
        }
    }
}

fn deliver(mailbox: &mpsc::WeakUnboundedSender<InstanceMessage>, event: EventAttributes) {
    if let Some(tx) = mailbox.upgrade() {
        let _ = tx.send(InstanceMessage::Input { event, ack: None });
    }
}

/// Time left on a timer started at `started`
fn remaining(started: DateTime<Utc>, duration: Duration) -> Duration {
    let elapsed = (Utc::now() - started).to_std().unwrap_or(Duration::ZERO);
    duration.saturating_sub(elapsed)
}

fn decision_failure_cause(err: &WorkflowError) -> &'static str {
    match err {
        WorkflowError::NonDeterministic(_) => "NonDeterministic",
        WorkflowError::VersionRemoved { .. } | WorkflowError::VersionTooNew { .. } => {
            "UnsupportedVersion"
        }
        WorkflowError::Panic(_) => "WorkflowPanic",
        _ => "WorkflowError",
    }
}
