//! Bounded retry with dead-lettering.
//!
//! Every unit of work (page fetch, item write, index sync) runs through
//! [`RetryPolicy::run`]. Two limits apply and whichever is hit first wins:
//! a retry count (`max_retries` beyond the first attempt) and an age budget
//! measured from the first attempt. Permanent errors stop immediately.
//! Once a limit is hit the failure is written to a [`DeadLetterSink`] and
//! the caller gets [`QueueError::DeadLettered`].

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use skyfeed_core::config::RetryConfig;
use skyfeed_core::{DeadLetterRecord, FailureContext, IngestError};

use crate::dead_letter::DeadLetterSink;
use crate::error::QueueError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    max_age: Duration,
    base_delay: Duration,
    max_delay: Duration,
    attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, max_age: Duration) -> Self {
        Self {
            max_retries,
            max_age,
            ..Self::default()
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_age: Duration::from_secs(config.max_age_secs),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max.max(base);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Delay before attempt `attempt + 1`: exponential, capped, with equal jitter
    /// (half fixed, half uniform random).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        let full = self.base_delay.saturating_mul(exp).min(self.max_delay);
        let half_ms = (full.as_millis() / 2) as u64;
        let jitter_ms = if half_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half_ms)
        };
        Duration::from_millis(half_ms + jitter_ms)
    }

    /// Run `op` until it succeeds or a limit is reached.
    ///
    /// `op` receives the 1-based attempt number. Each attempt is bounded by
    /// the attempt timeout; a timeout counts as a transient failure.
    pub async fn run<T, F, Fut>(
        &self,
        sink: &dyn DeadLetterSink,
        context: FailureContext,
        mut op: F,
    ) -> Result<T, QueueError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let started = Instant::now();
        let first_attempt_at = Utc::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let last_attempt_at = Utc::now();
            let result = match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::transient(format!(
                    "attempt timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(source = %context.source, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let delay = self
                .backoff(attempt)
                .max(err.retry_after().unwrap_or_default());
            let exhausted = !err.is_retryable()
                || attempt > self.max_retries
                || started.elapsed() + delay > self.max_age;

            if !exhausted {
                debug!(
                    source = %context.source,
                    sort_key = ?context.sort_key,
                    stage = ?context.stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let record = DeadLetterRecord::new(
                context,
                err.to_string(),
                err.is_retryable(),
                attempt,
                first_attempt_at,
                last_attempt_at,
            );
            return Err(dead_letter(sink, record).await);
        }
    }
}

async fn dead_letter(sink: &dyn DeadLetterSink, record: DeadLetterRecord) -> QueueError {
    warn!(
        id = %record.id,
        source = %record.source,
        sort_key = ?record.sort_key,
        stage = ?record.stage,
        attempts = record.attempt_count,
        retryable = record.retryable,
        error = %record.error,
        "dead-lettering failed work"
    );
    match sink.send(record.clone()).await {
        Ok(()) => QueueError::DeadLettered(Box::new(record)),
        Err(e) => {
            error!(source = %record.source, error = %e, "dead-letter sink rejected record");
            QueueError::Sink {
                sink: e.to_string(),
                original: record.error,
            }
        }
    }
}
