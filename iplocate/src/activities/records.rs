//! Lookup records.
//!
//! The recorded lookup variant registers each lookup before resolving it and
//! removes the record again if the lookup fails. Records are keyed by the
//! correlation token of the activity that created them, so a retried
//! `record_lookup` attempt overwrites its own record instead of adding one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRecord {
    pub ip: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("record store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("record store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable storage for lookup records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record under `token`
    async fn put(&self, token: &str, record: LookupRecord) -> Result<(), RecordStoreError>;

    /// Remove the record under `token`, returning whether one existed
    async fn remove(&self, token: &str) -> Result<bool, RecordStoreError>;

    async fn get(&self, token: &str) -> Result<Option<LookupRecord>, RecordStoreError>;

    async fn tokens(&self) -> Result<Vec<String>, RecordStoreError>;
}

/// Store keeping records in memory
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, LookupRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, token: &str, record: LookupRecord) -> Result<(), RecordStoreError> {
        self.records.insert(token.to_string(), record);
        Ok(())
    }

    async fn remove(&self, token: &str) -> Result<bool, RecordStoreError> {
        Ok(self.records.remove(token).is_some())
    }

    async fn get(&self, token: &str) -> Result<Option<LookupRecord>, RecordStoreError> {
        Ok(self.records.get(token).map(|entry| entry.clone()))
    }

    async fn tokens(&self) -> Result<Vec<String>, RecordStoreError> {
        let mut tokens: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        tokens.sort();
        Ok(tokens)
    }
}

/// Store keeping all records in one JSON file.
///
/// Every change rewrites the file atomically. Only one process may use a
/// file at a time.
pub struct FileRecordStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

type Records = BTreeMap<String, LookupRecord>;

impl FileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Records, RecordStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Records::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, records: &Records) -> Result<(), RecordStoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(records)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn put(&self, token: &str, record: LookupRecord) -> Result<(), RecordStoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        records.insert(token.to_string(), record);
        self.write(&records).await
    }

    async fn remove(&self, token: &str) -> Result<bool, RecordStoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        if records.remove(token).is_none() {
            return Ok(false);
        }
        self.write(&records).await?;
        Ok(true)
    }

    async fn get(&self, token: &str) -> Result<Option<LookupRecord>, RecordStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.remove(token))
    }

    async fn tokens(&self) -> Result<Vec<String>, RecordStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.into_keys().collect())
    }
}
