//! Dead-letter sinks.
//!
//! A sink accepts terminal failure records. [`JsonlDeadLetterSink`] is the
//! durable one: an append-only JSONL file that operators can list and prune.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use skyfeed_core::DeadLetterRecord;

use crate::error::QueueError;

/// Destination for records whose retries were exhausted.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), QueueError>;

    /// Every record currently held, oldest first.
    async fn list(&self) -> Result<Vec<DeadLetterRecord>, QueueError>;
}

// ── In-memory ───────────────────────────────────────────────────

/// Sink that keeps records in memory. Used by tests and `once` runs.
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), QueueError> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
        Ok(self.records.lock().await.clone())
    }
}

// ── JSONL file ──────────────────────────────────────────────────

/// Append-only JSONL dead-letter file with time-based retention.
pub struct JsonlDeadLetterSink {
    path: PathBuf,
    retention: Duration,
    /// Serializes appends and prune rewrites.
    lock: Mutex<()>,
}

impl JsonlDeadLetterSink {
    /// Open (or create) the sink, ensuring the parent directory exists.
    pub fn open(path: impl Into<PathBuf>, retention_days: u32) -> Result<Self, QueueError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), retention_days, "dead-letter sink opened");
        Ok(Self {
            path,
            retention: Duration::days(i64::from(retention_days)),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop records dead-lettered before `now - retention`. Returns the number removed.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let _guard = self.lock.lock().await;
        let cutoff = now - self.retention;
        let records = read_records(&self.path)?;
        let before = records.len();
        let kept: Vec<&DeadLetterRecord> = records
            .iter()
            .filter(|r| r.dead_lettered_at >= cutoff)
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
            for record in &kept {
                serde_json::to_writer(&mut file, record)?;
                file.write_all(b"\n")?;
            }
            file.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        info!(removed, kept = kept.len(), "pruned dead-letter records past retention");
        Ok(removed)
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), QueueError> {
        let _guard = self.lock.lock().await;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
        let _guard = self.lock.lock().await;
        read_records(&self.path)
    }
}

fn read_records(path: &Path) -> Result<Vec<DeadLetterRecord>, QueueError> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed dead-letter line"),
        }
    }
    Ok(records)
}
