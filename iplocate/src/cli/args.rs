use crate::ids::{InstanceIdPolicy, LOOKUP_ID_PREFIX};
use crate::workflows::LookupVariant;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// IP geolocation workflows
#[derive(Parser, Debug)]
#[command(name = "iplocate")]
#[command(about = "Durable IP geolocation workflows: versioned lookups, a signal-driven monitor and status checks")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "IPLOCATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding workflow histories and lookup records
    #[arg(long, global = true, env = "IPLOCATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the worker, resuming persisted workflows (runs until Ctrl+C)
    Worker,

    /// Look up an address and print its location
    Lookup(LookupArgs),

    /// Run the monitor demo: signals and queries against a running monitor
    Monitor(MonitorArgs),

    /// Run a slow lookup and watch it from a status checker workflow
    Observe(ObserveArgs),

    /// Send a signal to a workflow
    Signal(SignalArgs),

    /// Query a workflow and print the JSON answer
    Query(QueryArgs),

    /// Request cancellation of a workflow
    Cancel(CancelArgs),

    /// Print or export the history of a workflow's latest run
    History(HistoryArgs),

    /// Replay an exported history against the current workflow code
    Replay(ReplayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LookupArgs {
    /// Address to locate (default: this host's public address)
    #[arg(long)]
    pub address: Option<String>,

    /// Lookup routine to run
    #[arg(long, value_enum, default_value_t = VariantArg::Versioned)]
    pub variant: VariantArg,

    /// How the workflow id is chosen
    #[arg(long, value_enum, default_value_t = IdPolicyArg::Time)]
    pub id_policy: IdPolicyArg,

    /// Durable pause before the version marker is read
    #[arg(long, default_value = "0")]
    pub pause_secs: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantArg {
    /// Timezone gated by the version marker
    Versioned,
    /// Location only
    V1,
    /// Location and timezone
    V2,
    /// Versioned, with record and compensate steps
    Recorded,
}

impl From<VariantArg> for LookupVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Versioned => LookupVariant::Versioned,
            VariantArg::V1 => LookupVariant::LocationV1,
            VariantArg::V2 => LookupVariant::TimezoneV2,
            VariantArg::Recorded => LookupVariant::Recorded,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicyArg {
    /// A new workflow per run
    Time,
    /// One fixed id, repeated runs return the first result
    Constant,
    /// One workflow per address
    Entity,
}

impl LookupArgs {
    pub fn id_policy(&self) -> InstanceIdPolicy {
        let prefix = LOOKUP_ID_PREFIX.to_string();
        match self.id_policy {
            IdPolicyArg::Time => InstanceIdPolicy::TimeBased { prefix },
            IdPolicyArg::Constant => InstanceIdPolicy::Constant(prefix),
            IdPolicyArg::Entity => InstanceIdPolicy::EntityDerived {
                prefix,
                entity: self.address.clone().unwrap_or_else(|| "self".to_string()),
            },
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Address to monitor first (default from configuration)
    #[arg(long)]
    pub ip: Option<String>,

    /// Seconds between checks (default from configuration)
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Stop after this many checks, 0 for no limit (default from configuration)
    #[arg(long)]
    pub max_checks: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct ObserveArgs {
    /// Address to locate
    #[arg(long, default_value = "8.8.8.8")]
    pub ip: String,
}

#[derive(Args, Debug, Clone)]
pub struct SignalArgs {
    /// Workflow id
    pub workflow_id: String,

    /// Signal name
    pub name: String,

    /// JSON payload
    #[arg(long)]
    pub payload: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Workflow id
    pub workflow_id: String,

    /// Query type
    pub name: String,
}

#[derive(Args, Debug, Clone)]
pub struct CancelArgs {
    /// Workflow id
    pub workflow_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Workflow id
    pub workflow_id: String,

    /// Write the history to this file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// History exported with `iplocate history --output`
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_lookup_flags() {
        let cli = Cli::try_parse_from([
            "iplocate",
            "--data-dir",
            "/tmp/iplocate",
            "lookup",
            "--address",
            "203.0.113.5",
            "--variant",
            "recorded",
            "--id-policy",
            "entity",
            "--pause-secs",
            "45",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/iplocate")));
        let Command::Lookup(args) = cli.command else {
            panic!("expected lookup");
        };
        assert_eq!(LookupVariant::from(args.variant), LookupVariant::Recorded);
        assert_eq!(args.pause_secs, 45);
        assert_eq!(args.id_policy().id(), "ip-geolocation-workflow-203.0.113.5");
    }

    #[test]
    fn parses_signal_with_payload() {
        let cli = Cli::try_parse_from([
            "iplocate",
            "signal",
            "ip-monitor-demo-1",
            "change-target",
            "--payload",
            r#"{"new_ip":"1.1.1.1"}"#,
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Signal(args) = cli.command else {
            panic!("expected signal");
        };
        assert_eq!(args.workflow_id, "ip-monitor-demo-1");
        assert_eq!(args.name, "change-target");
        assert_eq!(args.payload.as_deref(), Some(r#"{"new_ip":"1.1.1.1"}"#));
    }
}
