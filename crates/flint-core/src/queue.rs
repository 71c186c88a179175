//! Two-lane priority queue of pending jobs.
//!
//! Each lane is a mutex-guarded binary heap ordered by `IndexJob::queue_order`:
//! high priority first, then creation order. The lanes never share jobs.
//!
//! ## Locking
//!
//! Operations touching both lanes always lock the multi lane before the
//! single lane. No lock is held while running a job.

use crate::job::IndexJob;
use crate::types::{Lane, Priority, Requester};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::debug;

/// Heap entry: reverses the queue order so the max-heap pops the first job.
struct Queued(Arc<IndexJob>);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.queue_order(&self.0)
    }
}

/// Selects jobs for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFilter {
    /// Every pending job
    All,
    /// Jobs submitted by a requester
    Requester(Requester),
    /// Jobs targeting the index with this ID
    Index(String),
}

impl JobFilter {
    /// Check whether a job passes the filter
    pub fn matches(&self, job: &IndexJob) -> bool {
        match self {
            JobFilter::All => true,
            JobFilter::Requester(requester) => job.is_for_requester(requester),
            JobFilter::Index(index_id) => job.is_for_index(index_id),
        }
    }
}

/// What `enqueue_deduplicated` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deduplication {
    /// No similar job was pending; the job was queued
    Queued,
    /// A similar low priority job was replaced by this high priority one
    Replaced,
    /// A similar job was already pending; the job was dropped
    Dropped,
}

/// Pending jobs, in two independent lanes.
pub struct JobQueue {
    multi: Mutex<BinaryHeap<Queued>>,
    single: Option<Mutex<BinaryHeap<Queued>>>,
}

impl JobQueue {
    /// Create a queue, with a single-worker lane if `single_lane` is true.
    pub fn new(single_lane: bool) -> Self {
        JobQueue {
            multi: Mutex::new(BinaryHeap::new()),
            single: single_lane.then(|| Mutex::new(BinaryHeap::new())),
        }
    }

    /// Whether this queue has a single-worker lane
    pub fn has_single_lane(&self) -> bool {
        self.single.is_some()
    }

    /// The lane a job submitted to `lane` really goes to.
    ///
    /// Without a single-worker lane, single-lane jobs go to the multi lane.
    pub fn effective_lane(&self, lane: Lane) -> Lane {
        match (lane, &self.single) {
            (Lane::Single, Some(_)) => Lane::Single,
            _ => Lane::Multi,
        }
    }

    fn heap(&self, lane: Lane) -> &Mutex<BinaryHeap<Queued>> {
        match (lane, &self.single) {
            (Lane::Single, Some(single)) => single,
            _ => &self.multi,
        }
    }

    /// Add a job to a lane. No de-duplication is performed.
    pub fn enqueue(&self, job: Arc<IndexJob>, lane: Lane) {
        self.heap(lane).lock().push(Queued(job));
    }

    /// Add a job unless a similar one is already pending in either lane.
    ///
    /// A high priority job replaces a similar pending low priority job.
    pub fn enqueue_deduplicated(&self, job: Arc<IndexJob>, lane: Lane) -> Deduplication {
        let mut multi = self.multi.lock();
        let mut single = self.single.as_ref().map(|s| s.lock());

        let pending = multi
            .iter()
            .chain(single.iter().flat_map(|heap| heap.iter()))
            .find(|queued| queued.0.is_similar(&job))
            .map(|queued| queued.0.clone());

        let outcome = match pending {
            None => Deduplication::Queued,
            Some(existing)
                if job.priority() == Priority::High && existing.priority() == Priority::Low =>
            {
                let sequence = existing.sequence();
                multi.retain(|queued| queued.0.sequence() != sequence);
                if let Some(heap) = single.as_mut() {
                    heap.retain(|queued| queued.0.sequence() != sequence);
                }
                debug!(job = %existing.id(), "Replacing pending job with higher priority job");
                Deduplication::Replaced
            }
            Some(existing) => {
                debug!(job = %job.id(), pending = %existing.id(), "Dropping duplicate job");
                return Deduplication::Dropped;
            }
        };

        match (self.effective_lane(lane), single.as_mut()) {
            (Lane::Single, Some(heap)) => heap.push(Queued(job)),
            _ => multi.push(Queued(job)),
        }
        outcome
    }

    /// Remove and return the first job of a lane, if any.
    pub fn dequeue_next(&self, lane: Lane) -> Option<Arc<IndexJob>> {
        self.heap(lane).lock().pop().map(|queued| queued.0)
    }

    /// Remove every pending job targeting an index, from both lanes.
    ///
    /// Returns the number of removed jobs.
    pub fn clear_jobs_for_index(&self, index_id: &str) -> usize {
        let mut removed = 0;
        for heap in self.heaps() {
            let mut heap = heap.lock();
            let before = heap.len();
            heap.retain(|queued| !queued.0.is_for_index(index_id));
            removed += before - heap.len();
        }
        if removed > 0 {
            debug!(index = %index_id, removed = removed, "Removed pending jobs for index");
        }
        removed
    }

    /// Drain both lanes. Returns the number of removed jobs.
    pub fn clear_all(&self) -> usize {
        self.heaps()
            .map(|heap| {
                let mut heap = heap.lock();
                let count = heap.len();
                heap.clear();
                count
            })
            .sum()
    }

    /// Point-in-time list of pending jobs matching a filter, in queue order.
    ///
    /// Multi-lane jobs come first, then single-lane jobs.
    pub fn snapshot(&self, filter: &JobFilter) -> Vec<Arc<IndexJob>> {
        let mut jobs = Vec::new();
        for heap in self.heaps() {
            let mut lane: Vec<Arc<IndexJob>> = heap
                .lock()
                .iter()
                .filter(|queued| filter.matches(&queued.0))
                .map(|queued| queued.0.clone())
                .collect();
            lane.sort_by(|a, b| a.queue_order(b));
            jobs.extend(lane);
        }
        jobs
    }

    /// Whether any job for an index is pending
    pub fn has_jobs_for_index(&self, index_id: &str) -> bool {
        self.heaps()
            .any(|heap| heap.lock().iter().any(|queued| queued.0.is_for_index(index_id)))
    }

    /// Number of pending jobs for an index
    pub fn count_for_index(&self, index_id: &str) -> usize {
        self.count_matching(&JobFilter::Index(index_id.to_string()))
    }

    /// Number of pending jobs submitted by a requester
    pub fn count_for_requester(&self, requester: &Requester) -> usize {
        self.count_matching(&JobFilter::Requester(requester.clone()))
    }

    fn count_matching(&self, filter: &JobFilter) -> usize {
        self.heaps()
            .map(|heap| heap.lock().iter().filter(|q| filter.matches(&q.0)).count())
            .sum()
    }

    /// Whether a lane has no pending job
    pub fn is_empty(&self, lane: Lane) -> bool {
        self.heap(lane).lock().is_empty()
    }

    /// Total number of pending jobs in both lanes
    pub fn len(&self) -> usize {
        self.heaps().map(|heap| heap.lock().len()).sum()
    }

    fn heaps(&self) -> impl Iterator<Item = &Mutex<BinaryHeap<Queued>>> {
        std::iter::once(&self.multi).chain(self.single.iter())
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("multi", &self.multi.lock().len())
            .field("single", &self.single.as_ref().map(|s| s.lock().len()))
            .finish()
    }
}
