//! Micro-batch accumulator for change events.
//!
//! Collects items and flushes when either the size threshold or the time
//! window is reached, whichever comes first. The window starts at the first
//! push into an empty batch, so a trickle of events is delivered at most one
//! window late.

use std::time::Duration;

use tokio::time::Instant;

/// Accumulates items into micro-batches.
pub struct MicroBatcher<T> {
    buffer: Vec<T>,
    max_size: usize,
    max_wait: Duration,
    batch_started: Option<Instant>,
}

impl<T> MicroBatcher<T> {
    /// - `max_size`: flush when this many items are buffered (at least 1).
    /// - `max_wait`: flush when this much time has passed since the first push.
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: Vec::with_capacity(max_size),
            max_size,
            max_wait,
            batch_started: None,
        }
    }

    /// Add items to the current batch. Starts the window on the first non-empty push.
    pub fn push(&mut self, items: impl IntoIterator<Item = T>) {
        let before = self.buffer.len();
        self.buffer.extend(items);
        if self.batch_started.is_none() && self.buffer.len() > before {
            self.batch_started = Some(Instant::now());
        }
    }

    pub fn should_flush(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        if self.buffer.len() >= self.max_size {
            return true;
        }
        self.batch_started
            .is_some_and(|started| started.elapsed() >= self.max_wait)
    }

    /// Time until the window closes, `None` while the batch is empty.
    pub fn remaining(&self) -> Option<Duration> {
        self.batch_started
            .map(|started| self.max_wait.saturating_sub(started.elapsed()))
    }

    /// Take the whole buffer and reset the window.
    pub fn flush(&mut self) -> Vec<T> {
        self.batch_started = None;
        std::mem::take(&mut self.buffer)
    }

    /// Room left before the size threshold.
    pub fn capacity_left(&self) -> usize {
        self.max_size.saturating_sub(self.buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_on_size() {
        let mut batcher = MicroBatcher::new(3, Duration::from_secs(60));
        batcher.push(0..3);
        assert!(batcher.should_flush());
        assert_eq!(batcher.capacity_left(), 0);
    }

    #[test]
    fn test_no_flush_below_size() {
        let mut batcher = MicroBatcher::new(5, Duration::from_secs(60));
        batcher.push(0..2);
        assert!(!batcher.should_flush());
        assert_eq!(batcher.capacity_left(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_timeout() {
        let mut batcher = MicroBatcher::new(100, Duration::from_secs(30));
        batcher.push([1]);
        assert!(!batcher.should_flush());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(batcher.should_flush());
        assert_eq!(batcher.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_flush_resets_state() {
        let mut batcher = MicroBatcher::new(2, Duration::from_secs(60));
        batcher.push(0..3);
        let flushed = batcher.flush();
        assert_eq!(flushed, vec![0, 1, 2]);
        assert!(batcher.is_empty());
        assert!(batcher.remaining().is_none());
        assert!(!batcher.should_flush());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_push_no_timer() {
        let mut batcher: MicroBatcher<u32> = MicroBatcher::new(5, Duration::from_millis(1));
        batcher.push(Vec::new());
        tokio::time::advance(Duration::from_millis(5)).await;
        assert!(!batcher.should_flush());
        assert!(batcher.remaining().is_none());
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let mut batcher = MicroBatcher::new(0, Duration::from_secs(60));
        batcher.push(["a"]);
        assert!(batcher.should_flush());
    }
}
