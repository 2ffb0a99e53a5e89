//! The engine, worker and client shared by the CLI commands.

use crate::activities::{register_activities, FileRecordStore, IpLocator, ReqwestGetter};
use crate::config::AppConfig;
use crate::workflows::register_workflows;
use anyhow::{Context, Result};
use iplocate_client::{ClientOptions, WorkflowClient};
use iplocate_worker::{Engine, EngineWorker, Registry, Worker, WorkflowRegistry};
use std::sync::Arc;

/// An embedded engine persisting under the configured data directory, with
/// a started worker serving the configured task list.
///
/// Starting the worker resumes every open workflow found in the data
/// directory. The directory must not be shared with another running process.
pub struct Runtime {
    config: AppConfig,
    worker: EngineWorker,
    client: WorkflowClient,
    registry: WorkflowRegistry,
}

impl Runtime {
    pub async fn start(config: AppConfig) -> Result<Self> {
        let engine = Engine::with_data_dir(&config.engine.data_dir);
        let client = WorkflowClient::new(Arc::new(engine.clone()), ClientOptions::default());

        let http = ReqwestGetter::new(config.providers.http_timeout)
            .context("failed to build HTTP client")?;
        let locator = IpLocator::from_config(Arc::new(http), &config.providers);
        let records = Arc::new(FileRecordStore::new(config.records_path()));

        let registry = WorkflowRegistry::new();
        register_activities(&registry, locator, records, client.clone());
        register_workflows(&registry, &config.activity);

        let worker = EngineWorker::new(
            engine,
            &config.engine.task_list,
            config.worker_options(),
            Arc::new(registry.clone()),
        );
        worker.start().await.context("failed to start worker")?;

        tracing::debug!(
            data_dir = %config.engine.data_dir.display(),
            task_list = %config.engine.task_list,
            workflows = registry.get_registered_workflows().len(),
            activities = registry.get_registered_activities().len(),
            "runtime started"
        );

        Ok(Self {
            config,
            worker,
            client,
            registry,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &WorkflowClient {
        &self.client
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn task_list(&self) -> &str {
        &self.config.engine.task_list
    }

    /// Stop the worker, letting running activities finish
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}

/// Registry holding only the workflow types, for replaying histories
pub fn replay_registry(config: &AppConfig) -> WorkflowRegistry {
    let registry = WorkflowRegistry::new();
    register_workflows(&registry, &config.activity);
    registry
}
