//! Durable scan progress records with resume support

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};

/// Lifecycle of one scan attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Starting,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ScanStatus {
    /// Valid transitions: starting -> running -> {completed|failed|paused};
    /// paused -> running is the only re-entry.
    pub fn can_transition(self, to: ScanStatus) -> bool {
        use ScanStatus::*;
        matches!(
            (self, to),
            (Starting, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Paused)
                | (Paused, Running)
        )
    }

    /// Terminal checkpoints are read-only history
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

/// Durable record of one scan run's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub scan_id: String,
    pub subject_identity: String,
    pub days_range: u32,
    pub total_candidates: usize,
    pub processed_count: usize,
    pub extracted_count: usize,
    pub duplicate_count: usize,
    pub failed_count: usize,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    /// Message ids already handled, consulted on resume
    pub processed_message_ids: HashSet<String>,
}

impl ScanCheckpoint {
    pub fn new(subject_identity: &str, days_range: u32) -> Self {
        let now = Utc::now();
        Self {
            scan_id: uuid::Uuid::new_v4().to_string(),
            subject_identity: subject_identity.to_string(),
            days_range,
            total_candidates: 0,
            processed_count: 0,
            extracted_count: 0,
            duplicate_count: 0,
            failed_count: 0,
            status: ScanStatus::Starting,
            created_at: now,
            updated_at: now,
            error_message: None,
            processed_message_ids: HashSet::new(),
        }
    }

    /// A non-terminal checkpoint can be picked up again
    pub fn can_resume(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Apply a partial update. Counters are monotonic non-decreasing:
    /// the merge takes the max, so replayed updates are idempotent.
    pub fn apply(&mut self, update: &CheckpointUpdate) -> Result<()> {
        if let Some(status) = update.status {
            if status != self.status && !self.status.can_transition(status) {
                return Err(IngestError::CheckpointError(format!(
                    "Invalid status transition {:?} -> {:?}",
                    self.status, status
                )));
            }
            self.status = status;
        }
        if let Some(total) = update.total_candidates {
            self.total_candidates = total;
        }
        if let Some(n) = update.processed_count {
            self.processed_count = self.processed_count.max(n);
        }
        if let Some(n) = update.extracted_count {
            self.extracted_count = self.extracted_count.max(n);
        }
        if let Some(n) = update.duplicate_count {
            self.duplicate_count = self.duplicate_count.max(n);
        }
        if let Some(n) = update.failed_count {
            self.failed_count = self.failed_count.max(n);
        }
        if let Some(msg) = &update.error_message {
            self.error_message = Some(msg.clone());
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial checkpoint update, merged idempotently
#[derive(Debug, Clone, Default)]
pub struct CheckpointUpdate {
    pub status: Option<ScanStatus>,
    pub total_candidates: Option<usize>,
    pub processed_count: Option<usize>,
    pub extracted_count: Option<usize>,
    pub duplicate_count: Option<usize>,
    pub failed_count: Option<usize>,
    pub error_message: Option<String>,
}

impl CheckpointUpdate {
    pub fn status(status: ScanStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            status: Some(ScanStatus::Failed),
            error_message: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// Trait defining checkpoint persistence for easier testing
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Allocate a new checkpoint in `starting` state and return it.
    /// Must succeed before any candidate is processed: the scan_id is
    /// surfaced to the caller immediately so a dropped connection can
    /// be resumed.
    async fn create(&self, subject_identity: &str, days_range: u32) -> Result<ScanCheckpoint>;

    /// Load an existing checkpoint by scan id
    async fn load(&self, scan_id: &str) -> Result<ScanCheckpoint>;

    /// Idempotent partial merge of progress fields
    async fn update(&self, scan_id: &str, update: CheckpointUpdate) -> Result<()>;

    /// Record message ids as handled, for resume skipping
    async fn mark_processed(&self, scan_id: &str, message_ids: &[String]) -> Result<()>;

    /// Message ids already handled; empty set for a fresh scan
    async fn load_processed_ids(&self, scan_id: &str) -> Result<HashSet<String>>;
}

/// File-backed checkpoint store: one pretty-printed JSON file per scan
pub struct FileCheckpointStore {
    directory: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn from_config(config: &crate::config::CheckpointConfig) -> Self {
        Self::new(&config.directory)
    }

    fn path_for(&self, scan_id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", scan_id))
    }

    async fn write(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
        if let Some(parent) = self.path_for(&checkpoint.scan_id).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(checkpoint)?;
        tokio::fs::write(self.path_for(&checkpoint.scan_id), json).await?;
        tracing::debug!("Saved checkpoint for scan {}", checkpoint.scan_id);
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<ScanCheckpoint> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            IngestError::CheckpointError(format!("Cannot read checkpoint {:?}: {}", path, e))
        })?;
        let checkpoint = serde_json::from_str(&json)
            .map_err(|e| IngestError::CheckpointError(format!("Invalid checkpoint: {}", e)))?;
        Ok(checkpoint)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn create(&self, subject_identity: &str, days_range: u32) -> Result<ScanCheckpoint> {
        let checkpoint = ScanCheckpoint::new(subject_identity, days_range);
        self.write(&checkpoint).await?;
        tracing::info!(
            "Created checkpoint: scan_id={}, subject={}, days={}",
            checkpoint.scan_id,
            subject_identity,
            days_range
        );
        Ok(checkpoint)
    }

    async fn load(&self, scan_id: &str) -> Result<ScanCheckpoint> {
        self.read(&self.path_for(scan_id)).await
    }

    async fn update(&self, scan_id: &str, update: CheckpointUpdate) -> Result<()> {
        let mut checkpoint = self.load(scan_id).await?;
        checkpoint.apply(&update)?;
        self.write(&checkpoint).await
    }

    async fn mark_processed(&self, scan_id: &str, message_ids: &[String]) -> Result<()> {
        let mut checkpoint = self.load(scan_id).await?;
        checkpoint
            .processed_message_ids
            .extend(message_ids.iter().cloned());
        checkpoint.updated_at = Utc::now();
        self.write(&checkpoint).await
    }

    async fn load_processed_ids(&self, scan_id: &str) -> Result<HashSet<String>> {
        match self.load(scan_id).await {
            Ok(checkpoint) => Ok(checkpoint.processed_message_ids),
            Err(_) => Ok(HashSet::new()),
        }
    }
}
