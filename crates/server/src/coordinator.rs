//! Trigger coordinator: one schedule loop per source, one run per source at a time.
//!
//! Each source owns a reservation flag. A trigger that finds the flag taken
//! is skipped, never queued; the next tick is attempted normally. Runs are
//! spawned so a slow source never delays another source's schedule.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use skyfeed_connector::{AdapterRegistry, SourceAdapter};
use skyfeed_core::{ScheduleEntry, SourcesFile};

use crate::cadence::{jitter, Cadence, CadenceError};
use crate::job_runner::{JobRunner, RunOutcome, TriggerKind};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("source '{0}' has no registered adapter")]
    MissingAdapter(String),

    #[error("source '{name}': {error}")]
    Cadence {
        name: String,
        #[source]
        error: CadenceError,
    },
}

#[derive(Debug)]
pub enum TriggerOutcome {
    /// The run was spawned; the handle resolves with its outcome.
    Started(JoinHandle<RunOutcome>),
    /// A previous run of the same source is still in flight.
    Skipped,
}

struct SourceSlot {
    entry: ScheduleEntry,
    cadence: Cadence,
    adapter: Arc<dyn SourceAdapter>,
    running: AtomicBool,
}

/// Held by a run for its whole lifetime; releases the source on drop.
struct Reservation(Arc<SourceSlot>);

impl Reservation {
    fn acquire(slot: &Arc<SourceSlot>) -> Option<Self> {
        slot.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(slot)))
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

pub struct Coordinator {
    slots: BTreeMap<String, Arc<SourceSlot>>,
    runner: Arc<JobRunner>,
}

impl Coordinator {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self {
            slots: BTreeMap::new(),
            runner,
        }
    }

    /// Bind every enabled source to its adapter from `registry`.
    pub fn from_sources(
        sources: &SourcesFile,
        registry: &AdapterRegistry,
        runner: Arc<JobRunner>,
    ) -> Result<Self, CoordinatorError> {
        let mut coordinator = Self::new(runner);
        for entry in sources.enabled() {
            let adapter = registry
                .get(&entry.name)
                .ok_or_else(|| CoordinatorError::MissingAdapter(entry.name.clone()))?;
            coordinator.add_source(entry.clone(), adapter)?;
        }
        Ok(coordinator)
    }

    pub fn add_source(
        &mut self,
        entry: ScheduleEntry,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Result<(), CoordinatorError> {
        let cadence = entry
            .cadence
            .parse::<Cadence>()
            .map_err(|error| CoordinatorError::Cadence {
                name: entry.name.clone(),
                error,
            })?;
        debug!(source = %entry.name, ?cadence, "source scheduled");
        self.slots.insert(
            entry.name.clone(),
            Arc::new(SourceSlot {
                entry,
                cadence,
                adapter,
                running: AtomicBool::new(false),
            }),
        );
        Ok(())
    }

    pub fn sources(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.slots.values().map(|slot| &slot.entry)
    }

    pub fn is_running(&self, source: &str) -> bool {
        self.slots
            .get(source)
            .is_some_and(|slot| slot.running.load(Ordering::Acquire))
    }

    /// Start a run of `source` unless one is already in flight.
    pub fn trigger(&self, source: &str, kind: TriggerKind) -> Result<TriggerOutcome, CoordinatorError> {
        let slot = self
            .slots
            .get(source)
            .ok_or_else(|| CoordinatorError::UnknownSource(source.to_string()))?;

        let Some(reservation) = Reservation::acquire(slot) else {
            info!(source, ?kind, "previous run still in flight, skipping trigger");
            return Ok(TriggerOutcome::Skipped);
        };

        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move {
            let slot = Arc::clone(&reservation.0);
            let outcome = runner.run(&slot.entry, slot.adapter.as_ref(), kind).await;
            drop(reservation);
            outcome
        });
        Ok(TriggerOutcome::Started(handle))
    }

    /// Trigger a manual run and wait for it. `None` when it was skipped.
    pub async fn run_now(&self, source: &str) -> Result<Option<RunOutcome>, CoordinatorError> {
        match self.trigger(source, TriggerKind::Manual)? {
            TriggerOutcome::Skipped => Ok(None),
            TriggerOutcome::Started(handle) => match handle.await {
                Ok(outcome) => Ok(Some(outcome)),
                Err(e) => {
                    error!(source, error = %e, "ingestion run panicked");
                    Ok(None)
                }
            },
        }
    }

    /// Run every source's schedule until `shutdown` flips to `true`, then
    /// wait for in-flight runs to finish.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut loops = Vec::with_capacity(self.slots.len());
        for name in self.slots.keys() {
            let this = Arc::clone(&self);
            loops.push(tokio::spawn(this.schedule_loop(name.clone(), shutdown.clone())));
        }
        info!(sources = loops.len(), "scheduler started");

        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "schedule loop panicked");
            }
        }
        info!("scheduler stopped");
    }

    async fn schedule_loop(self: Arc<Self>, name: String, mut shutdown: watch::Receiver<bool>) {
        let Some(slot) = self.slots.get(&name).cloned() else {
            return;
        };
        let mut in_flight: Option<JoinHandle<RunOutcome>> = None;

        loop {
            let Some(delay) = slot.cadence.delay_from(Utc::now()) else {
                warn!(source = %name, "cadence has no upcoming fire time, schedule ends");
                break;
            };
            let delay = delay + jitter(slot.entry.flexible_window());
            debug!(source = %name, delay_secs = delay.as_secs(), "next trigger scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match self.trigger(&name, TriggerKind::Scheduled) {
                Ok(TriggerOutcome::Started(handle)) => in_flight = Some(handle),
                Ok(TriggerOutcome::Skipped) => {}
                Err(e) => {
                    error!(source = %name, error = %e, "scheduled trigger failed");
                    break;
                }
            }
        }

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                info!(source = %name, "waiting for in-flight run");
            }
            if let Err(e) = handle.await {
                error!(source = %name, error = %e, "ingestion run panicked");
            }
        }
    }
}
