//! History persistence.
//!
//! The engine saves a run's full history after every change. Stores keep
//! one history per run plus a pointer to the latest run of each workflow id.

use async_trait::async_trait;
use dashmap::DashMap;
use iplocate_core::{FlowError, FlowResult, History, WorkflowExecution};
use std::path::{Path, PathBuf};

/// Durable storage for workflow histories
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist the full history of a run and make it the workflow's current run
    async fn save(&self, execution: &WorkflowExecution, history: &History) -> FlowResult<()>;

    async fn load(&self, execution: &WorkflowExecution) -> FlowResult<Option<History>>;

    /// Run id of the latest run started for `workflow_id`
    async fn current_run(&self, workflow_id: &str) -> FlowResult<Option<String>>;

    async fn list_runs(&self) -> FlowResult<Vec<WorkflowExecution>>;
}

/// Store keeping histories in memory, lost when the process exits
#[derive(Default)]
pub struct MemoryHistoryStore {
    histories: DashMap<WorkflowExecution, History>,
    current: DashMap<String, String>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn save(&self, execution: &WorkflowExecution, history: &History) -> FlowResult<()> {
        self.histories.insert(execution.clone(), history.clone());
        self.current
            .insert(execution.workflow_id.clone(), execution.run_id.clone());
        Ok(())
    }

    async fn load(&self, execution: &WorkflowExecution) -> FlowResult<Option<History>> {
        Ok(self.histories.get(execution).map(|entry| entry.clone()))
    }

    async fn current_run(&self, workflow_id: &str) -> FlowResult<Option<String>> {
        Ok(self.current.get(workflow_id).map(|entry| entry.clone()))
    }

    async fn list_runs(&self) -> FlowResult<Vec<WorkflowExecution>> {
        let mut runs: Vec<WorkflowExecution> =
            self.histories.iter().map(|entry| entry.key().clone()).collect();
        runs.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        Ok(runs)
    }
}

const CURRENT_FILE: &str = "current";

/// Store writing one JSON file per run under a data directory.
///
/// Layout is `{dir}/{workflow_id}/{run_id}.json`, with `{dir}/{workflow_id}/current`
/// naming the latest run. Workflow ids are escaped to stay valid file names.
/// Files are replaced atomically; only one process may use a directory.
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.dir.join(escape_file_name(workflow_id))
    }

    fn run_path(&self, execution: &WorkflowExecution) -> PathBuf {
        self.workflow_dir(&execution.workflow_id)
            .join(format!("{}.json", escape_file_name(&execution.run_id)))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn save(&self, execution: &WorkflowExecution, history: &History) -> FlowResult<()> {
        let dir = self.workflow_dir(&execution.workflow_id);
        tokio::fs::create_dir_all(&dir).await?;

        let json = history
            .to_json_pretty()
            .map_err(|e| FlowError::Serialization(e.to_string()))?;
        write_atomic(&self.run_path(execution), json.as_bytes()).await?;
        write_atomic(&dir.join(CURRENT_FILE), execution.run_id.as_bytes()).await?;
        Ok(())
    }

    async fn load(&self, execution: &WorkflowExecution) -> FlowResult<Option<History>> {
        let json = match tokio::fs::read_to_string(self.run_path(execution)).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        History::from_json(&json)
            .map(Some)
            .map_err(|e| FlowError::Serialization(format!("{}: {}", execution, e)))
    }

    async fn current_run(&self, workflow_id: &str) -> FlowResult<Option<String>> {
        let path = self.workflow_dir(workflow_id).join(CURRENT_FILE);
        match tokio::fs::read_to_string(path).await {
            Ok(run_id) => Ok(Some(run_id.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_runs(&self) -> FlowResult<Vec<WorkflowExecution>> {
        let mut runs = Vec::new();
        let mut workflows = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(e.into()),
        };

        while let Some(workflow) = workflows.next_entry().await? {
            if !workflow.file_type().await?.is_dir() {
                continue;
            }
            let Some(workflow_id) = workflow.file_name().to_str().and_then(unescape_file_name)
            else {
                continue;
            };
            let mut files = tokio::fs::read_dir(workflow.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name();
                let Some(run_id) = name
                    .to_str()
                    .and_then(|n| n.strip_suffix(".json"))
                    .and_then(unescape_file_name)
                else {
                    continue;
                };
                runs.push(WorkflowExecution::new(workflow_id.clone(), run_id));
            }
        }

        runs.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        Ok(runs)
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Percent-escape everything outside `[A-Za-z0-9._-]`
fn escape_file_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => escaped.push(byte as char),
            // a leading dot would make `.` and `..` valid ids
            b'.' if !escaped.is_empty() => escaped.push('.'),
            _ => escaped.push_str(&format!("%{:02X}", byte)),
        }
    }
    escaped
}

fn unescape_file_name(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
