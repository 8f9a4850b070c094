//! One ingestion run of one source: page through the adapter, upsert every
//! item, and append the result to the JSONL run log.
//!
//! Every page fetch and every item write is wrapped by the [`RetryPolicy`].
//! A page that exhausts it ends the run as dead-lettered; an item that
//! exhausts it is counted and the run carries on with the next item.
//!
//! A run stopped by the page limit, or by a retryable fetch failure, leaves a
//! pending cursor for its source. The next run starts there instead of at the
//! first page. With a run log the pending cursors survive a restart.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use skyfeed_connector::{FetchPage, SourceAdapter};
use skyfeed_core::{FailureContext, FailureStage, IngestError, Item, ScheduleEntry};
use skyfeed_queue::{DeadLetterSink, QueueError, RetryPolicy};
use skyfeed_storage::{ItemStore, UpsertOutcome};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub pages: u32,
    pub items_fetched: usize,
    pub inserted: usize,
    pub modified: usize,
    pub skipped_stale: usize,
    /// Items whose store write was dead-lettered.
    pub items_dead_lettered: usize,
    /// The page limit stopped the run with a cursor still pending.
    pub truncated: bool,
    /// The run started from a cursor left by an earlier run.
    #[serde(default)]
    pub resumed: bool,
}

impl RunStats {
    pub fn written(&self) -> usize {
        self.inserted + self.modified
    }
}

/// Terminal result of a run as observed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunStats),
    /// A page fetch failed terminally. Items from earlier pages stay written.
    DeadLettered {
        stats: RunStats,
        stage: FailureStage,
        error: String,
    },
}

impl RunOutcome {
    pub fn stats(&self) -> &RunStats {
        match self {
            Self::Completed(stats) | Self::DeadLettered { stats, .. } => stats,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Line of `runs.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id: Uuid,
    pub source: String,
    pub trigger: TriggerKind,
    /// "completed" or "dead_lettered".
    pub status: String,
    pub stats: RunStats,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Where the next run of this source starts. Absent once a run reached the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_cursor: Option<String>,
}

pub struct JobRunner {
    store: Arc<dyn ItemStore>,
    retry: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterSink>,
    log_dir: Option<PathBuf>,
    /// Source name to the cursor its next run resumes from.
    pending: Mutex<HashMap<String, String>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn ItemStore>,
        retry: RetryPolicy,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            store,
            retry,
            dead_letters,
            log_dir: None,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Append every finished run to `<dir>/runs.jsonl`, and pick up the
    /// cursors pending from the last logged run of each source.
    pub fn with_run_log(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let pending = self.pending.get_mut();
        for logged in read_run_log(&dir, usize::MAX) {
            match logged.pending_cursor {
                Some(cursor) => pending.insert(logged.source, cursor),
                None => pending.remove(&logged.source),
            };
        }
        if !pending.is_empty() {
            info!(sources = pending.len(), "restored pending cursors from run log");
        }
        self.log_dir = Some(dir);
        self
    }

    /// Cursor the next run of `source` starts from, if an earlier run left one.
    pub async fn pending_cursor(&self, source: &str) -> Option<String> {
        self.pending.lock().await.get(source).cloned()
    }

    pub async fn run(
        &self,
        entry: &ScheduleEntry,
        adapter: &dyn SourceAdapter,
        trigger: TriggerKind,
    ) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(source = %entry.name, run_id = %run_id, ?trigger, "ingestion run started");

        let (outcome, pending_cursor) = self.execute(run_id, entry, adapter, trigger).await;
        {
            let mut pending = self.pending.lock().await;
            match &pending_cursor {
                Some(cursor) => pending.insert(entry.name.clone(), cursor.clone()),
                None => pending.remove(&entry.name),
            };
        }
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            RunOutcome::Completed(stats) => info!(
                source = %entry.name,
                run_id = %run_id,
                pages = stats.pages,
                written = stats.written(),
                stale = stats.skipped_stale,
                dead_lettered = stats.items_dead_lettered,
                duration_ms,
                "ingestion run completed"
            ),
            RunOutcome::DeadLettered { stage, error, .. } => warn!(
                source = %entry.name,
                run_id = %run_id,
                stage = ?stage,
                error = %error,
                duration_ms,
                "ingestion run dead-lettered"
            ),
        }

        if let Some(dir) = &self.log_dir {
            let entry = RunLogEntry {
                id: run_id,
                source: entry.name.clone(),
                trigger,
                status: if outcome.is_completed() { "completed" } else { "dead_lettered" }.into(),
                stats: outcome.stats().clone(),
                started_at,
                completed_at: Utc::now(),
                duration_ms,
                error: match &outcome {
                    RunOutcome::DeadLettered { error, .. } => Some(error.clone()),
                    RunOutcome::Completed(_) => None,
                },
                pending_cursor,
            };
            append_run_log(dir, &entry);
        }
        outcome
    }

    /// Returns the outcome and the cursor the next run should start from.
    async fn execute(
        &self,
        run_id: Uuid,
        entry: &ScheduleEntry,
        adapter: &dyn SourceAdapter,
        trigger: TriggerKind,
    ) -> (RunOutcome, Option<String>) {
        let mut stats = RunStats::default();
        let mut cursor = self.pending_cursor(&entry.name).await;
        let max_pages = entry.max_pages.max(1);
        if let Some(c) = &cursor {
            info!(source = %entry.name, cursor = %c, "resuming from saved cursor");
            stats.resumed = true;
        }

        loop {
            let context = FailureContext::fetch(
                &entry.name,
                json!({
                    "run_id": run_id,
                    "trigger": trigger,
                    "page": stats.pages,
                    "cursor": cursor,
                }),
            );
            let page = match self.fetch_page(adapter, cursor.as_deref(), context).await {
                Ok(page) => page,
                Err(e) => {
                    // A permanent failure restarts the walk from the first page.
                    let resume = match &e {
                        QueueError::DeadLettered(record) if !record.retryable => None,
                        _ => cursor,
                    };
                    let outcome = RunOutcome::DeadLettered {
                        stats,
                        stage: FailureStage::Fetch,
                        error: e.to_string(),
                    };
                    return (outcome, resume);
                }
            };

            stats.pages += 1;
            stats.items_fetched += page.items.len();
            debug!(
                source = %entry.name,
                page = stats.pages,
                items = page.items.len(),
                has_next = page.next_cursor.is_some(),
                "page fetched"
            );

            for item in page.items {
                self.write_item(run_id, item, &mut stats).await;
            }

            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
            if stats.pages >= max_pages {
                info!(source = %entry.name, max_pages, "page limit reached, remaining pages wait for the next run");
                stats.truncated = true;
                return (RunOutcome::Completed(stats), cursor);
            }
        }
        (RunOutcome::Completed(stats), None)
    }

    async fn fetch_page(
        &self,
        adapter: &dyn SourceAdapter,
        cursor: Option<&str>,
        context: FailureContext,
    ) -> Result<FetchPage, QueueError> {
        self.retry
            .run(self.dead_letters.as_ref(), context, move |_| adapter.fetch(cursor))
            .await
    }

    async fn write_item(&self, run_id: Uuid, item: Item, stats: &mut RunStats) {
        let context = FailureContext::store_write(
            &item.source,
            &item.sort_key,
            json!({ "run_id": run_id, "timestamp": item.timestamp }),
        );
        let store = self.store.as_ref();
        let item_ref = &item;
        let result = self
            .retry
            .run(self.dead_letters.as_ref(), context, move |_| async move {
                store.upsert(item_ref.clone()).await.map_err(IngestError::from)
            })
            .await;

        match result {
            Ok(UpsertOutcome::Inserted) => stats.inserted += 1,
            Ok(UpsertOutcome::Modified) => stats.modified += 1,
            Ok(UpsertOutcome::SkippedStale) => stats.skipped_stale += 1,
            Err(e) => {
                if !matches!(e, QueueError::DeadLettered(_)) {
                    error!(key = %item.key(), error = %e, "item write failed without dead-letter record");
                }
                stats.items_dead_lettered += 1;
            }
        }
    }
}

/// Append one run to `<dir>/runs.jsonl`. Failures are logged, never raised.
pub fn append_run_log(dir: &Path, entry: &RunLogEntry) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(error = %e, dir = %dir.display(), "failed to create run log directory");
        return;
    }
    let path = dir.join("runs.jsonl");
    let line = match serde_json::to_string(entry) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "failed to serialize run log entry");
            return;
        }
    };
    let mut file = match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to open run log");
            return;
        }
    };
    if let Err(e) = writeln!(file, "{line}") {
        warn!(error = %e, "failed to write run log entry");
    }
}

/// Most recent `limit` runs from `<dir>/runs.jsonl`, oldest first.
pub fn read_run_log(dir: &Path, limit: usize) -> Vec<RunLogEntry> {
    let Ok(content) = std::fs::read_to_string(dir.join("runs.jsonl")) else {
        return Vec::new();
    };
    let entries: Vec<RunLogEntry> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    let skip = entries.len().saturating_sub(limit);
    entries.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_round_trips_and_keeps_tail() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            append_run_log(
                dir.path(),
                &RunLogEntry {
                    id: Uuid::new_v4(),
                    source: format!("src-{i}"),
                    trigger: TriggerKind::Manual,
                    status: "completed".into(),
                    stats: RunStats {
                        pages: 1,
                        items_fetched: i,
                        inserted: i,
                        ..Default::default()
                    },
                    started_at: Utc::now(),
                    completed_at: Utc::now(),
                    duration_ms: 5,
                    error: None,
                    pending_cursor: (i == 1).then(|| "page-2".to_string()),
                },
            );
        }

        let raw = std::fs::read_to_string(dir.path().join("runs.jsonl")).unwrap();
        assert!(raw.contains("\"trigger\":\"manual\""));
        assert!(!raw.contains("\"error\""));
        assert_eq!(raw.matches("\"pending_cursor\"").count(), 1);

        let tail = read_run_log(dir.path(), 2);
        let names: Vec<&str> = tail.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(names, vec!["src-1", "src-2"]);
    }

    #[test]
    fn old_log_lines_without_new_fields_still_parse() {
        let dir = tempfile::tempdir().unwrap();
        let line = json!({
            "id": Uuid::new_v4(),
            "source": "nasa",
            "trigger": "scheduled",
            "status": "completed",
            "stats": {
                "pages": 1, "items_fetched": 1, "inserted": 1, "modified": 0,
                "skipped_stale": 0, "items_dead_lettered": 0, "truncated": false
            },
            "started_at": Utc::now(),
            "completed_at": Utc::now(),
            "duration_ms": 3
        });
        std::fs::write(dir.path().join("runs.jsonl"), format!("{line}\n")).unwrap();

        let entries = read_run_log(dir.path(), 10);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].pending_cursor.is_none());
        assert!(!entries[0].stats.resumed);
    }

    #[test]
    fn missing_run_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_run_log(dir.path(), 10).is_empty());
    }

    #[test]
    fn outcome_exposes_stats() {
        let outcome = RunOutcome::DeadLettered {
            stats: RunStats {
                pages: 2,
                ..Default::default()
            },
            stage: FailureStage::Fetch,
            error: "HTTP 404".into(),
        };
        assert!(!outcome.is_completed());
        assert_eq!(outcome.stats().pages, 2);
    }
}
