//! Wiring: config → store, adapters, coordinator, dispatcher and sync consumer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};

use skyfeed_connector::AdapterRegistry;
use skyfeed_core::config::StorageConfig;
use skyfeed_core::{Config, SourcesFile};
use skyfeed_ingest::{build_embedder, build_index, EmbeddingSyncConsumer};
use skyfeed_queue::{
    BatchReport, ChangeDispatcher, DeadLetterSink, DispatcherSettings, JsonlDeadLetterSink,
    RetryPolicy,
};
use skyfeed_storage::{snapshot, ItemStore, LogFeed, MemoryStore};

use crate::coordinator::Coordinator;
use crate::job_runner::{JobRunner, RunOutcome};

pub struct Pipeline {
    config: Config,
    sources: SourcesFile,
    store: Arc<MemoryStore>,
    dead_letters: Arc<JsonlDeadLetterSink>,
    coordinator: Arc<Coordinator>,
    dispatcher: ChangeDispatcher,
}

impl Pipeline {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let sources = SourcesFile::load_or_builtin(&config.sources_path)
            .with_context(|| format!("loading {}", config.sources_path.display()))?;

        let feed = Arc::new(LogFeed::new());
        let store = Arc::new(restore_store(&config.storage, Arc::clone(&feed))?);
        let dead_letters = Arc::new(JsonlDeadLetterSink::open(
            config.dead_letter.path.clone(),
            config.dead_letter.retention_days,
        )?);
        let retry = RetryPolicy::from_config(&config.retry);

        let registry = AdapterRegistry::from_sources(&sources, config.retry.attempt_timeout())?;
        let runner = JobRunner::new(store.clone(), retry.clone(), dead_letters.clone())
            .with_run_log(config.storage.run_log_dir());
        let coordinator = Coordinator::from_sources(&sources, &registry, Arc::new(runner))?;

        let embedder = build_embedder(&config.embedding)?;
        let index = build_index(&config.index, embedder.dimensions()).await?;
        let consumer = EmbeddingSyncConsumer::new(
            embedder,
            index,
            retry,
            dead_letters.clone(),
            config.dispatch.sync_parallelism,
        );
        let dispatcher = ChangeDispatcher::new(
            feed,
            Arc::new(consumer),
            DispatcherSettings::from_config(&config.dispatch),
        );

        Ok(Self {
            config,
            sources,
            store,
            dead_letters,
            coordinator: Arc::new(coordinator),
            dispatcher,
        })
    }

    pub fn sources(&self) -> &SourcesFile {
        &self.sources
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Run one source now, sync its changes to the index and save the snapshot.
    pub async fn run_once(&self, source: &str) -> anyhow::Result<(RunOutcome, BatchReport)> {
        let outcome = self
            .coordinator
            .run_now(source)
            .await?
            .with_context(|| format!("run of '{source}' did not finish"))?;
        let report = self.dispatcher.drain().await?;
        self.save_snapshot().await?;
        Ok((outcome, report))
    }

    /// Run scheduler, dispatcher and maintenance until `shutdown` resolves.
    ///
    /// The scheduler stops first so in-flight runs land in the feed before
    /// the dispatcher delivers its last batches.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let (stop_scheduler, scheduler_rx) = watch::channel(false);
        let (stop_workers, workers_rx) = watch::channel(false);

        let scheduler = tokio::spawn(Arc::clone(&self.coordinator).run(scheduler_rx));
        let dispatcher = tokio::spawn(self.dispatcher.clone().run(workers_rx.clone()));
        let maintenance = tokio::spawn(maintenance_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.dead_letters),
            Duration::from_secs(self.config.storage.reclaim_interval_secs.max(1)),
            workers_rx,
        ));
        info!(
            sources = self.coordinator.sources().count(),
            "pipeline running, press Ctrl-C to stop"
        );

        shutdown.await;
        info!("shutdown requested");

        stop_scheduler.send_replace(true);
        if let Err(e) = scheduler.await {
            error!(error = %e, "scheduler task panicked");
        }
        stop_workers.send_replace(true);
        for (name, handle) in [("dispatcher", dispatcher), ("maintenance", maintenance)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "task panicked");
            }
        }

        let report = self.dispatcher.drain().await?;
        if report.delivered > 0 {
            info!(%report, "delivered remaining changes");
        }
        self.save_snapshot().await?;
        info!("pipeline stopped");
        Ok(())
    }

    pub async fn save_snapshot(&self) -> anyhow::Result<()> {
        if !self.config.storage.snapshot_enabled {
            return Ok(());
        }
        let path = self.config.storage.snapshot_path();
        let items = self.store.live_items(Utc::now()).await;
        snapshot::save(&path, &items)?;
        Ok(())
    }
}

fn restore_store(storage: &StorageConfig, feed: Arc<LogFeed>) -> anyhow::Result<MemoryStore> {
    if !storage.snapshot_enabled {
        return Ok(MemoryStore::new(feed));
    }
    let path = storage.snapshot_path();
    let items = snapshot::load(&path)?;
    if !items.is_empty() {
        info!(path = %path.display(), items = items.len(), "store restored from snapshot");
    }
    Ok(MemoryStore::with_items(feed, items))
}

/// Periodic TTL reclamation and dead-letter pruning.
async fn maintenance_loop(
    store: Arc<MemoryStore>,
    dead_letters: Arc<JsonlDeadLetterSink>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = shutdown.changed() => {
                if res.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let now = Utc::now();
        match store.reclaim_expired(now).await {
            Ok(0) => {}
            Ok(n) => info!(reclaimed = n, "expired items reclaimed"),
            Err(e) => error!(error = %e, "reclamation pass failed"),
        }
        match dead_letters.prune(now).await {
            Ok(0) => {}
            Ok(n) => info!(pruned = n, "dead-letter records past retention pruned"),
            Err(e) => error!(error = %e, "dead-letter prune failed"),
        }
    }
}

/// Dead-letter records from the configured sink, newest last.
pub async fn list_dead_letters(
    config: &Config,
    limit: usize,
) -> anyhow::Result<Vec<skyfeed_core::DeadLetterRecord>> {
    let sink = JsonlDeadLetterSink::open(
        config.dead_letter.path.clone(),
        config.dead_letter.retention_days,
    )?;
    let records = sink.list().await?;
    let skip = records.len().saturating_sub(limit);
    Ok(records.into_iter().skip(skip).collect())
}
