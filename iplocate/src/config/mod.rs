//! Application configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `IPLOCATE_*` environment variables, then command line flags. The result
//! is validated once at load time.

use crate::error::ConfigError;
use iplocate_core::{ActivityOptions, NonDeterministicWorkflowPolicy, RetryPolicy};
use iplocate_worker::WorkerOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod serde_duration;

pub use serde_duration::parse_duration;

/// Application configuration with validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine and worker configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// HTTP providers
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Activity timeouts and retries
    #[serde(default)]
    pub activity: ActivityConfig,

    /// Defaults for the monitor workflow
    #[serde(default)]
    pub monitor: MonitorDefaults,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding workflow histories and lookup records
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Task list name for this worker
    #[serde(default = "default_task_list")]
    pub task_list: String,

    /// What happens to a run whose history no longer matches the code
    #[serde(default)]
    pub nondeterminism: NondeterminismPolicy,

    /// Maximum concurrent activity executions
    #[serde(default = "default_max_concurrent_activities")]
    pub max_concurrent_activities: usize,

    /// How long shutdown waits for running activities
    #[serde(with = "serde_duration", default = "default_stop_timeout")]
    pub stop_timeout: Duration,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".iplocate")
}

fn default_task_list() -> String {
    crate::TASK_LIST.to_string()
}

fn default_max_concurrent_activities() -> usize {
    100
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            task_list: default_task_list(),
            nondeterminism: NondeterminismPolicy::default(),
            max_concurrent_activities: default_max_concurrent_activities(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NondeterminismPolicy {
    /// Keep the run open and blocked until the code is fixed
    #[default]
    Block,
    /// Close the run as failed
    Fail,
}

impl From<NondeterminismPolicy> for NonDeterministicWorkflowPolicy {
    fn from(policy: NondeterminismPolicy) -> Self {
        match policy {
            NondeterminismPolicy::Block => NonDeterministicWorkflowPolicy::BlockWorkflow,
            NondeterminismPolicy::Fail => NonDeterministicWorkflowPolicy::FailWorkflow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Service returning the caller's public address as plain text
    #[serde(default = "default_ipify_url")]
    pub ipify_url: String,

    /// Base URL of the ip-api geolocation service
    #[serde(default = "default_ip_api_url")]
    pub ip_api_url: String,

    /// Timeout of a single HTTP request
    #[serde(with = "serde_duration", default = "default_http_timeout")]
    pub http_timeout: Duration,
}

fn default_ipify_url() -> String {
    "https://api.ipify.org".to_string()
}

fn default_ip_api_url() -> String {
    "http://ip-api.com".to_string()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ipify_url: default_ipify_url(),
            ip_api_url: default_ip_api_url(),
            http_timeout: default_http_timeout(),
        }
    }
}

/// Activity timeout and retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Budget for a single attempt
    #[serde(with = "serde_duration", default = "default_start_to_close")]
    pub start_to_close: Duration,

    /// Budget for a single attempt of the monitor's periodic check
    #[serde(with = "serde_duration", default = "default_monitor_start_to_close")]
    pub monitor_start_to_close: Duration,

    /// Initial retry interval
    #[serde(with = "serde_duration", default = "default_initial_interval")]
    pub initial_interval: Duration,

    /// Backoff coefficient for exponential backoff
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,

    /// Maximum interval between retries
    #[serde(with = "serde_duration", default = "default_maximum_interval")]
    pub maximum_interval: Duration,

    /// Maximum number of attempts, 0 retries without limit
    #[serde(default = "default_maximum_attempts")]
    pub maximum_attempts: u32,
}

fn default_start_to_close() -> Duration {
    Duration::from_secs(60)
}

fn default_monitor_start_to_close() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_maximum_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_maximum_attempts() -> u32 {
    5
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            start_to_close: default_start_to_close(),
            monitor_start_to_close: default_monitor_start_to_close(),
            initial_interval: default_initial_interval(),
            backoff_coefficient: default_backoff_coefficient(),
            maximum_interval: default_maximum_interval(),
            maximum_attempts: default_maximum_attempts(),
        }
    }
}

impl ActivityConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: self.initial_interval,
            backoff_coefficient: self.backoff_coefficient,
            maximum_interval: self.maximum_interval,
            maximum_attempts: i32::try_from(self.maximum_attempts).unwrap_or(i32::MAX),
            ..RetryPolicy::default()
        }
    }

    /// Options for the lookup activities
    pub fn options(&self) -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: self.start_to_close,
            retry_policy: Some(self.retry_policy()),
            ..ActivityOptions::default()
        }
    }

    /// Options for the monitor's periodic check
    pub fn monitor_options(&self) -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: self.monitor_start_to_close,
            ..self.options()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorDefaults {
    #[serde(default = "default_initial_ip")]
    pub initial_ip: String,

    #[serde(with = "serde_duration", default = "default_check_interval")]
    pub check_interval: Duration,

    /// 0 runs until stopped
    #[serde(default)]
    pub max_checks: u32,
}

fn default_initial_ip() -> String {
    "8.8.8.8".to_string()
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for MonitorDefaults {
    fn default() -> Self {
        Self {
            initial_ip: default_initial_ip(),
            check_interval: default_check_interval(),
            max_checks: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `iplocate=debug,info`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Load defaults, the optional TOML file and the process environment,
    /// then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override values from `IPLOCATE_*` variables found by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("IPLOCATE_DATA_DIR") {
            self.engine.data_dir = PathBuf::from(dir);
        }
        if let Some(task_list) = lookup("IPLOCATE_TASK_LIST") {
            self.engine.task_list = task_list;
        }
        if let Some(url) = lookup("IPLOCATE_IPIFY_URL") {
            self.providers.ipify_url = url;
        }
        if let Some(url) = lookup("IPLOCATE_IP_API_URL") {
            self.providers.ip_api_url = url;
        }
        if let Some(timeout) = lookup("IPLOCATE_HTTP_TIMEOUT") {
            self.providers.http_timeout = parse_duration(&timeout).map_err(|e| {
                ConfigError::Invalid(format!("IPLOCATE_HTTP_TIMEOUT: {}", e))
            })?;
        }
        if let Some(filter) = lookup("IPLOCATE_LOG") {
            self.logging.filter = filter;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.task_list.is_empty() {
            return Err(ConfigError::MissingField("engine.task_list".to_string()));
        }

        if self.engine.max_concurrent_activities == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_concurrent_activities must be greater than 0".to_string(),
            ));
        }

        for (field, url) in [
            ("providers.ipify_url", &self.providers.ipify_url),
            ("providers.ip_api_url", &self.providers.ip_api_url),
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::MissingField(field.to_string()));
            }
        }

        for (field, timeout) in [
            ("providers.http_timeout", self.providers.http_timeout),
            ("activity.start_to_close", self.activity.start_to_close),
            (
                "activity.monitor_start_to_close",
                self.activity.monitor_start_to_close,
            ),
            ("monitor.check_interval", self.monitor.check_interval),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be greater than 0",
                    field
                )));
            }
        }

        if self.activity.backoff_coefficient < 1.0 {
            return Err(ConfigError::Invalid(
                "Backoff coefficient must be >= 1.0".to_string(),
            ));
        }

        if self.activity.maximum_interval < self.activity.initial_interval {
            return Err(ConfigError::Invalid(
                "activity.maximum_interval must not be shorter than activity.initial_interval"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Worker options for the configured engine
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            max_concurrent_activity_execution_size: self.engine.max_concurrent_activities,
            worker_stop_timeout: self.engine.stop_timeout,
            non_deterministic_workflow_policy: self.engine.nondeterminism.into(),
            identity: format!("iplocate-worker-{}", std::process::id()),
        }
    }

    /// File backing the lookup record store
    pub fn records_path(&self) -> PathBuf {
        self.engine.data_dir.join("records.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.task_list, "ip-geolocation");
        assert_eq!(config.providers.ipify_url, "https://api.ipify.org");
        assert_eq!(config.providers.ip_api_url, "http://ip-api.com");
        assert_eq!(config.activity.maximum_attempts, 5);
        assert_eq!(config.monitor.check_interval, Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [engine]
            data_dir = "/var/lib/iplocate"
            nondeterminism = "fail"

            [providers]
            http_timeout = "2500ms"

            [activity]
            start_to_close = 45
            maximum_interval = "2m"
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.data_dir, PathBuf::from("/var/lib/iplocate"));
        assert_eq!(config.engine.task_list, "ip-geolocation");
        assert_eq!(config.engine.nondeterminism, NondeterminismPolicy::Fail);
        assert_eq!(config.providers.http_timeout, Duration::from_millis(2500));
        assert_eq!(config.providers.ipify_url, "https://api.ipify.org");
        assert_eq!(config.activity.start_to_close, Duration::from_secs(45));
        assert_eq!(config.activity.maximum_interval, Duration::from_secs(120));
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::from_toml("[logging]\nfilter = \"warn\"\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("IPLOCATE_DATA_DIR", "/tmp/iplocate"),
            ("IPLOCATE_IP_API_URL", "http://127.0.0.1:9000"),
            ("IPLOCATE_HTTP_TIMEOUT", "3"),
            ("IPLOCATE_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.engine.data_dir, PathBuf::from("/tmp/iplocate"));
        assert_eq!(config.providers.ip_api_url, "http://127.0.0.1:9000");
        assert_eq!(config.providers.http_timeout, Duration::from_secs(3));
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.records_path(), PathBuf::from("/tmp/iplocate/records.json"));
    }

    #[test]
    fn malformed_environment_values_are_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|key| (key == "IPLOCATE_HTTP_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("IPLOCATE_HTTP_TIMEOUT")));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.activity.backoff_coefficient = 0.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.providers.http_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("http_timeout")));

        let mut config = AppConfig::default();
        config.providers.ip_api_url = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(field)) if field == "providers.ip_api_url"));

        let mut config = AppConfig::default();
        config.engine.task_list.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/iplocate.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/iplocate.toml"));
    }

    #[test]
    fn activity_config_builds_retry_policy() {
        let config = ActivityConfig::default();
        let options = config.options();
        let policy = options.retry_policy.clone().unwrap();
        assert_eq!(options.start_to_close_timeout, Duration::from_secs(60));
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.maximum_interval, Duration::from_secs(60));
        assert_eq!(policy.maximum_attempts, 5);

        let monitor = config.monitor_options();
        assert_eq!(monitor.start_to_close_timeout, Duration::from_secs(30));
        assert_eq!(monitor.retry_policy, options.retry_policy);
    }
}
