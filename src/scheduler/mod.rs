//! Cooperative batching for long computations on a single-threaded runtime.
//!
//! Work is split into bounded units; after each unit the scheduler yields to the
//! runtime so other tasks (input handling, redraws, I/O completions) get a turn.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchScheduler {
    batch_size: usize,
}

impl BatchScheduler {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches `len` items split into.
    pub fn batch_count(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size)
    }

    /// Run `work` on consecutive batches of `items`, yielding between batches.
    ///
    /// Returns the number of batches processed.
    pub async fn run<T, F>(&self, items: &[T], mut work: F) -> usize
    where
        F: FnMut(&[T]),
    {
        let mut batches = 0;
        for batch in items.chunks(self.batch_size) {
            work(batch);
            batches += 1;
            tokio::task::yield_now().await;
        }
        debug!("Processed {} items in {} batches", items.len(), batches);
        batches
    }
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::new(10)
    }
}
