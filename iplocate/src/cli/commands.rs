//! Command runners.

use crate::activities::status::STATUS_QUERY;
use crate::cli::args::{
    CancelArgs, HistoryArgs, LookupArgs, MonitorArgs, ObserveArgs, QueryArgs, ReplayArgs,
    SignalArgs,
};
use crate::cli::runtime::{replay_registry, Runtime};
use crate::config::AppConfig;
use crate::ids::{InstanceIdPolicy, MONITOR_ID_PREFIX, OBSERVABLE_LOOKUP_ID, STATUS_CHECKER_ID};
use crate::workflows::monitor::{
    ChangeInterval, ChangeTarget, HistoryEntry, MonitorStats, QUERY_HISTORY, QUERY_STATS,
    QUERY_STATUS, SIGNAL_CHANGE_INTERVAL, SIGNAL_CHANGE_TARGET, SIGNAL_PAUSE, SIGNAL_RESUME,
    SIGNAL_STOP,
};
use crate::workflows::observe::{STATUS_COMPLETE, STATUS_FAILED};
use crate::workflows::{
    LookupRequest, LookupResult, LookupVariant, MonitorConfig, MonitorStatus, ObservableLookup,
    MONITOR_WORKFLOW, OBSERVABLE_LOOKUP_WORKFLOW, STATUS_CHECKER_WORKFLOW,
};
use anyhow::{bail, Context, Result};
use iplocate_client::{Client, ClientError, StartWorkflowOptions};
use iplocate_core::WorkflowIdReusePolicy;
use iplocate_worker::{decode_payload, WorkflowReplayer};
use serde::{de::DeserializeOwned, Serialize};
use std::process::ExitCode;
use std::time::Duration;

const OBSERVE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MONITOR_TARGET_DEMO_IP: &str = "1.1.1.1";
const MONITOR_DEMO_INTERVAL_SECS: u64 = 3;

/// Run the worker until Ctrl+C
pub async fn worker(runtime: &Runtime) -> Result<()> {
    tracing::info!(
        task_list = runtime.task_list(),
        data_dir = %runtime.config().engine.data_dir.display(),
        "Worker ready. Press Ctrl+C to stop."
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Stopping worker");
    runtime.shutdown().await;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Start `workflow_type` under `workflow_id`. Returns false when a run with
/// that id already exists and the start was rejected.
async fn start<I: Serialize + ?Sized>(
    runtime: &Runtime,
    workflow_id: &str,
    reuse_policy: WorkflowIdReusePolicy,
    workflow_type: &str,
    input: &I,
) -> Result<bool> {
    let input = iplocate_core::encode(input)?;
    let options = StartWorkflowOptions::new(workflow_id, runtime.task_list())
        .with_reuse_policy(reuse_policy);
    match runtime
        .client()
        .start_workflow(options, workflow_type, Some(&input))
        .await
    {
        Ok(execution) => {
            tracing::info!(
                workflow_id = %execution.workflow_id,
                run_id = %execution.run_id,
                workflow_type,
                "Started workflow"
            );
            Ok(true)
        }
        Err(ClientError::AlreadyStarted(message)) => {
            tracing::info!(workflow_id, %message, "Workflow already exists");
            Ok(false)
        }
        Err(err) => Err(err).with_context(|| format!("failed to start {}", workflow_type)),
    }
}

async fn result<O: DeserializeOwned>(runtime: &Runtime, workflow_id: &str) -> Result<O> {
    let payload = runtime
        .client()
        .get_workflow(workflow_id, None)
        .get()
        .await
        .with_context(|| format!("workflow {} did not complete", workflow_id))?;
    Ok(decode_payload(payload.as_deref())?)
}

async fn query<T: DeserializeOwned>(runtime: &Runtime, workflow_id: &str, name: &str) -> Result<T> {
    runtime
        .client()
        .query_json(workflow_id, name)
        .await
        .with_context(|| format!("query {} on {} failed", name, workflow_id))
}

async fn signal<T: Serialize + ?Sized>(
    runtime: &Runtime,
    workflow_id: &str,
    name: &str,
    payload: &T,
) -> Result<()> {
    runtime
        .client()
        .signal_json(workflow_id, name, payload)
        .await
        .with_context(|| format!("signal {} to {} failed", name, workflow_id))?;
    println!("Sent {} signal", name);
    Ok(())
}

/// Start a lookup and print its result
///
/// A rejected start (a constant or entity id already used) attaches to the
/// existing run and prints its result.
pub async fn lookup(runtime: &Runtime, args: LookupArgs) -> Result<()> {
    let variant = LookupVariant::from(args.variant);
    let policy = args.id_policy();
    let workflow_id = policy.id();
    let request = LookupRequest {
        address: args.address.clone(),
        pause_secs: args.pause_secs,
    };

    let started = start(
        runtime,
        &workflow_id,
        policy.reuse_policy(),
        variant.workflow_type(),
        &request,
    )
    .await?;
    if !started {
        println!("Workflow {} already exists, waiting for its result", workflow_id);
    }

    let result: LookupResult = self::result(runtime, &workflow_id).await?;
    println!("Workflow ID: {}", workflow_id);
    println!("Location: {}", result.location);
    match &result.timezone {
        Some(timezone) => println!("Timezone: {}", timezone),
        None => println!("Timezone: (not resolved)"),
    }
    Ok(())
}

fn print_status(status: &MonitorStatus) {
    println!(
        "  state={:?} ip={} interval={}s checks={} last={}",
        status.state,
        status.current_ip,
        status.check_interval_secs,
        status.total_checks,
        status.last_result
    );
}

/// Scripted signals and queries against a new monitor
pub async fn monitor(runtime: &Runtime, args: MonitorArgs) -> Result<()> {
    let defaults = &runtime.config().monitor;
    let config = MonitorConfig {
        initial_ip: args.ip.unwrap_or_else(|| defaults.initial_ip.clone()),
        check_interval_secs: args
            .interval_secs
            .unwrap_or_else(|| defaults.check_interval.as_secs()),
        max_checks: args.max_checks.unwrap_or(defaults.max_checks),
    };
    if config.check_interval_secs == 0 {
        bail!("check interval must be at least one second");
    }

    let policy = InstanceIdPolicy::TimeBased {
        prefix: MONITOR_ID_PREFIX.to_string(),
    };
    let workflow_id = policy.id();
    start(
        runtime,
        &workflow_id,
        policy.reuse_policy(),
        MONITOR_WORKFLOW,
        &config,
    )
    .await?;
    println!("Monitoring {} as {}", config.initial_ip, workflow_id);

    let settle = Duration::from_secs(config.check_interval_secs + 2);

    tokio::time::sleep(settle).await;
    println!("\n1. Status after the first check:");
    print_status(&query(runtime, &workflow_id, QUERY_STATUS).await?);

    println!("\n2. Pausing:");
    signal(runtime, &workflow_id, SIGNAL_PAUSE, &()).await?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    print_status(&query(runtime, &workflow_id, QUERY_STATUS).await?);

    println!("\n3. Changing target while paused:");
    let change = ChangeTarget {
        new_ip: MONITOR_TARGET_DEMO_IP.to_string(),
    };
    signal(runtime, &workflow_id, SIGNAL_CHANGE_TARGET, &change).await?;

    println!("\n4. Resuming:");
    signal(runtime, &workflow_id, SIGNAL_RESUME, &()).await?;
    tokio::time::sleep(settle).await;
    print_status(&query(runtime, &workflow_id, QUERY_STATUS).await?);

    println!("\n5. Changing the check interval:");
    let change = ChangeInterval {
        new_interval_secs: MONITOR_DEMO_INTERVAL_SECS,
    };
    signal(runtime, &workflow_id, SIGNAL_CHANGE_INTERVAL, &change).await?;
    tokio::time::sleep(Duration::from_secs(MONITOR_DEMO_INTERVAL_SECS * 3 + 1)).await;

    println!("\n6. History:");
    let history: Vec<HistoryEntry> = query(runtime, &workflow_id, QUERY_HISTORY).await?;
    for entry in history.iter().rev().take(5).rev() {
        let outcome = match (&entry.location, &entry.error) {
            (Some(location), _) => location.clone(),
            (None, Some(error)) => format!("ERROR: {}", error),
            (None, None) => String::new(),
        };
        println!("  {} {} {}", entry.timestamp.format("%H:%M:%S"), entry.ip, outcome);
    }
    println!("  ({} entries)", history.len());

    println!("\n7. Stats:");
    let stats: MonitorStats = query(runtime, &workflow_id, QUERY_STATS).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    println!("\n8. Stopping:");
    signal(runtime, &workflow_id, SIGNAL_STOP, &()).await?;
    let status: MonitorStatus = result(runtime, &workflow_id).await?;
    print_status(&status);
    Ok(())
}

/// Start the observable lookup and report on it from status checker runs
pub async fn observe(runtime: &Runtime, args: ObserveArgs) -> Result<()> {
    start(
        runtime,
        OBSERVABLE_LOOKUP_ID,
        WorkflowIdReusePolicy::AllowDuplicate,
        OBSERVABLE_LOOKUP_WORKFLOW,
        &ObservableLookup::new(&args.ip),
    )
    .await?;

    loop {
        start(
            runtime,
            STATUS_CHECKER_ID,
            WorkflowIdReusePolicy::AllowDuplicate,
            STATUS_CHECKER_WORKFLOW,
            OBSERVABLE_LOOKUP_ID,
        )
        .await?;
        let summary: String = result(runtime, STATUS_CHECKER_ID).await?;
        println!("{}", summary);

        let status: String = query(runtime, OBSERVABLE_LOOKUP_ID, STATUS_QUERY).await?;
        if status == STATUS_COMPLETE || status == STATUS_FAILED {
            break;
        }
        tokio::time::sleep(OBSERVE_POLL_INTERVAL).await;
    }

    let location: String = result(runtime, OBSERVABLE_LOOKUP_ID).await?;
    println!("Lookup finished: {}", location);
    Ok(())
}

pub async fn signal_workflow(runtime: &Runtime, args: SignalArgs) -> Result<()> {
    let payload = match &args.payload {
        Some(json) => {
            let value: serde_json::Value =
                serde_json::from_str(json).context("payload is not valid JSON")?;
            Some(serde_json::to_vec(&value)?)
        }
        None => None,
    };
    runtime
        .client()
        .signal_workflow(&args.workflow_id, None, &args.name, payload.as_deref())
        .await
        .with_context(|| format!("signal {} to {} failed", args.name, args.workflow_id))?;
    println!("Sent {} signal to {}", args.name, args.workflow_id);
    Ok(())
}

pub async fn query_workflow(runtime: &Runtime, args: QueryArgs) -> Result<()> {
    let answer: serde_json::Value = query(runtime, &args.workflow_id, &args.name).await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

pub async fn cancel_workflow(runtime: &Runtime, args: CancelArgs) -> Result<()> {
    runtime
        .client()
        .cancel_workflow(&args.workflow_id, None, Some("cancelled from the command line"))
        .await
        .with_context(|| format!("failed to cancel {}", args.workflow_id))?;
    println!("Requested cancellation of {}", args.workflow_id);
    Ok(())
}

pub async fn history(runtime: &Runtime, args: HistoryArgs) -> Result<()> {
    let history = runtime
        .client()
        .get_workflow_history(&args.workflow_id, None)
        .await
        .with_context(|| format!("failed to read history of {}", args.workflow_id))?;
    let json = history.to_json_pretty()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "Wrote {} events ({:?}) to {}",
                history.len(),
                history.status(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Replay an exported history. Nondeterminism exits with a failure code.
pub fn replay(config: &AppConfig, args: ReplayArgs) -> Result<ExitCode> {
    let replayer = WorkflowReplayer::with_registry(replay_registry(config));
    match replayer.replay_workflow_history_from_file(&args.file) {
        Ok(summary) => {
            println!(
                "Replayed {} decisions from {} without nondeterminism",
                summary.decisions,
                args.file.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) if err.is_non_deterministic() => {
            eprintln!("Nondeterminism detected: {}", err);
            Ok(ExitCode::FAILURE)
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to replay {}", args.file.display()))
        }
    }
}
