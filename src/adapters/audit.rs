//! Audit sinks.
//!
//! The JSONL sink appends one record per line, the same layout the run
//! logs use, so the file can be tailed and grepped directly.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use super::AuditSink;
use crate::domain::AuditRecord;

/// Append-only audit log on disk
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Open the audit log in the configured home directory
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::audit_log_path()?))
    }

    /// Append a record to the log
    pub async fn append(&self, record: &AuditRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create audit directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;

        let json = serde_json::to_string(record).context("Failed to serialize audit record")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write audit record")?;
        file.flush().await.context("Failed to flush audit record")?;

        Ok(())
    }

    /// Read back all records in order
    pub async fn replay(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse audit record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, category: &str, event: &str, fields: Map<String, Value>) {
        let record = AuditRecord::new(category, event, fields);
        if let Err(e) = self.append(&record).await {
            warn!(category, event, error = %e, "Dropping audit record");
        }
    }
}

/// In-process audit sink, handy for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records so far
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Records matching a category and event name
    pub fn matching(&self, category: &str, event: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.category == category && r.event == event)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, category: &str, event: &str, fields: Map<String, Value>) {
        match self.records.lock() {
            Ok(mut records) => records.push(AuditRecord::new(category, event, fields)),
            Err(_) => warn!(category, event, "Audit buffer poisoned, dropping record"),
        }
    }
}
