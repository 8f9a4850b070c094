//! Scheduler, job runner and wiring for the skyfeed ingestion pipeline.
//!
//! - [`cadence`]: rate/cron cadence parsing and trigger jitter
//! - [`coordinator`]: per-source schedule loops with single-run reservation
//! - [`job_runner`]: paged fetch → retried upserts → JSONL run log
//! - [`pipeline`]: builds every component from [`skyfeed_core::Config`]

pub mod cadence;
pub mod coordinator;
pub mod job_runner;
pub mod pipeline;

pub use cadence::{Cadence, CadenceError};
pub use coordinator::{Coordinator, CoordinatorError, TriggerOutcome};
pub use job_runner::{JobRunner, RunOutcome, RunStats, TriggerKind};
pub use pipeline::Pipeline;
