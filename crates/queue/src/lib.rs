//! Retry/dead-letter policy and change dispatch.
//!
//! - [`RetryPolicy`]: bounded retries (count and age) around any fallible unit of work
//! - [`DeadLetterSink`]: terminal destination for exhausted work, in memory or JSONL
//! - [`MicroBatcher`]: size/time bounded accumulator
//! - [`ChangeDispatcher`]: per-partition feed workers delivering filtered batches
//!   to a [`ChangeConsumer`]

pub mod batcher;
pub mod consumer;
pub mod dead_letter;
pub mod dispatcher;
pub mod error;
pub mod retry;

pub use batcher::MicroBatcher;
pub use consumer::{BatchReport, ChangeConsumer};
pub use dead_letter::{DeadLetterSink, JsonlDeadLetterSink, MemoryDeadLetterSink};
pub use dispatcher::{is_deliverable, ChangeDispatcher, DispatcherSettings};
pub use error::QueueError;
pub use retry::RetryPolicy;
