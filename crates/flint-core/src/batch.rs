//! Batches of jobs discovered together.
//!
//! A batch groups the jobs produced by one discovery pass (e.g. a folder
//! walk) so listeners can observe the start and end of the whole operation.
//!
//! ## Completion
//!
//! A batch is finished once it is computed (no more jobs will be added) and
//! every job counted in its total has been processed, failed jobs included.
//! Completion is reported exactly once, by whichever of the last worker or
//! the discovery procedure observes it first.

use crate::error::{FlintError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct BatchState {
    total: usize,
    current: usize,
    computed: bool,
    started: bool,
    ended: bool,
    cancel_at: Option<usize>,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    computing: Option<Duration>,
    indexing: Option<Duration>,
    overall: Option<Duration>,
}

impl BatchState {
    fn is_finished(&self) -> bool {
        let cancelled = self.cancel_at.map_or(false, |at| self.current >= at);
        cancelled || (self.computed && self.current >= self.total)
    }

    /// Record completion the first time the batch is seen finished.
    fn complete_if_finished(&mut self, created: Instant) -> bool {
        if self.ended || !self.is_finished() {
            return false;
        }
        self.ended = true;
        self.indexing = self.started_instant.map(|s| s.elapsed());
        self.overall = Some(created.elapsed());
        true
    }
}

/// A group of jobs tracked for lifecycle notification.
#[derive(Debug)]
pub struct IndexBatch {
    id: u64,
    index_id: String,
    created: DateTime<Utc>,
    created_instant: Instant,
    state: Mutex<BatchState>,
}

impl IndexBatch {
    /// Create an open batch whose total grows as jobs are discovered.
    pub fn new(index_id: impl Into<String>) -> Self {
        IndexBatch {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            index_id: index_id.into(),
            created: Utc::now(),
            created_instant: Instant::now(),
            state: Mutex::new(BatchState::default()),
        }
    }

    /// Create a batch of known size, computed from the start.
    pub fn with_total(index_id: impl Into<String>, total: usize) -> Self {
        let batch = IndexBatch::new(index_id);
        {
            let mut state = batch.state.lock();
            state.total = total;
            state.computed = true;
        }
        batch
    }

    /// Count one more job in the batch.
    pub fn increase_total(&self) -> Result<()> {
        self.increase_total_by(1)
    }

    /// Count `by` more jobs in the batch.
    ///
    /// Fails once the batch has been marked computed.
    pub fn increase_total_by(&self, by: usize) -> Result<()> {
        let mut state = self.state.lock();
        if state.computed {
            return Err(FlintError::BatchComputed { batch: self.id });
        }
        state.total += by;
        Ok(())
    }

    /// Uncount a job that was counted but could not be submitted.
    ///
    /// Returns true if this call completed the batch.
    pub(crate) fn decrease_total(&self) -> bool {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
        state.complete_if_finished(self.created_instant)
    }

    /// Mark the start of indexing; returns true only for the first call.
    pub(crate) fn start_indexing(&self) -> bool {
        let mut state = self.state.lock();
        if state.started {
            return false;
        }
        state.started = true;
        state.started_at = Some(Utc::now());
        state.started_instant = Some(Instant::now());
        true
    }

    /// Count one processed job.
    ///
    /// Returns true if this call completed the batch.
    pub(crate) fn increase_current(&self) -> bool {
        let mut state = self.state.lock();
        state.current += 1;
        state.complete_if_finished(self.created_instant)
    }

    /// Declare that no more jobs will be added.
    ///
    /// Returns true if every job was already processed, i.e. this call
    /// completed the batch.
    pub(crate) fn set_computed(&self) -> bool {
        let mut state = self.state.lock();
        if !state.computed {
            state.computed = true;
            state.computing = Some(self.created_instant.elapsed());
        }
        state.complete_if_finished(self.created_instant)
    }

    /// Cancel the batch: it finishes once `current_count` jobs are processed.
    pub fn cancel(&self, current_count: usize) {
        self.state.lock().cancel_at = Some(current_count);
    }

    /// Batch ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// ID of the index this batch writes to
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// When the batch was created
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// When the first job of the batch started, if it has
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    /// Whether no more jobs will be added
    pub fn is_computed(&self) -> bool {
        self.state.lock().computed
    }

    /// Whether the first job of the batch has started
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Whether the batch is finished
    pub fn is_finished(&self) -> bool {
        self.state.lock().is_finished()
    }

    /// Number of processed jobs
    pub fn current_count(&self) -> usize {
        self.state.lock().current
    }

    /// Number of jobs counted so far
    pub fn total_count(&self) -> usize {
        self.state.lock().total
    }

    /// Number of documents the batch covers: the processed count once
    /// finished (accounts for cancellation), the total otherwise.
    pub fn total_documents(&self) -> usize {
        let state = self.state.lock();
        if state.is_finished() {
            state.current
        } else {
            state.total
        }
    }

    /// Time spent discovering jobs, once computed
    pub fn computing_duration(&self) -> Option<Duration> {
        self.state.lock().computing
    }

    /// Time between the first job starting and the batch finishing
    pub fn indexing_duration(&self) -> Option<Duration> {
        self.state.lock().indexing
    }

    /// Time between creation and the batch finishing
    pub fn total_duration(&self) -> Option<Duration> {
        self.state.lock().overall
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_completion_requires_computed() {
        let batch = IndexBatch::new("docs");
        batch.increase_total().unwrap();
        batch.increase_total().unwrap();

        assert!(!batch.increase_current());
        assert!(!batch.increase_current());
        assert!(!batch.is_finished());

        // Computing after the last job completes the batch
        assert!(batch.set_computed());
        assert!(batch.is_finished());
        assert!(!batch.set_computed());
        assert!(batch.total_duration().is_some());
    }

    #[test]
    fn test_completion_fires_on_last_job() {
        let batch = IndexBatch::new("docs");
        batch.increase_total_by(2).unwrap();
        assert!(!batch.set_computed());

        assert!(!batch.increase_current());
        assert!(batch.increase_current());
        // Extra calls never report completion again
        assert!(!batch.increase_current());
    }

    #[test]
    fn test_increase_total_after_computed_fails() {
        let batch = IndexBatch::with_total("docs", 3);
        assert!(batch.is_computed());
        assert!(matches!(
            batch.increase_total(),
            Err(FlintError::BatchComputed { .. })
        ));
        assert_eq!(batch.total_count(), 3);
    }

    #[test]
    fn test_start_once() {
        let batch = IndexBatch::new("docs");
        assert!(!batch.is_started());
        assert!(batch.start_indexing());
        assert!(!batch.start_indexing());
        assert!(batch.started_at().is_some());
    }

    #[test]
    fn test_cancel() {
        let batch = IndexBatch::new("docs");
        batch.increase_total_by(10).unwrap();
        batch.cancel(2);
        assert!(!batch.increase_current());
        assert!(batch.increase_current());
        assert_eq!(batch.total_documents(), 2);
    }

    #[test]
    fn test_concurrent_completion_fires_once() {
        let total = 64;
        let batch = Arc::new(IndexBatch::with_total("docs", total));
        let completions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let batch = batch.clone();
                let completions = completions.clone();
                thread::spawn(move || {
                    for _ in 0..total / 8 {
                        if batch.increase_current() {
                            completions.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(batch.current_count(), total);
    }

    #[test]
    fn test_uncounted_job_lets_batch_end() {
        let batch = IndexBatch::new("docs");
        batch.increase_total_by(2).unwrap();
        assert!(!batch.increase_current());
        assert!(!batch.decrease_total());
        assert_eq!(batch.total_count(), 1);

        assert!(batch.set_computed());
        assert!(batch.is_finished());

        // Uncounting after the end does not fire again
        assert!(!batch.decrease_total());
    }
}
