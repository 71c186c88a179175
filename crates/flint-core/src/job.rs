//! Indexing jobs.
//!
//! A job is one unit of indexing work: a content item to add, update or
//! delete in one index, or a request to clear that index entirely. Jobs are
//! immutable once built except for their completion status, which is set
//! exactly once by the worker that runs them.

use crate::batch::IndexBatch;
use crate::index::Index;
use crate::types::{ContentType, Priority, Requester};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide creation counter, gives every job a distinct rank.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

const PENDING: u8 = 0;
const SUCCEEDED: u8 = 1;
const FAILED: u8 = 2;

/// Reserved content identity of clear jobs, for display only.
const CLEAR_CONTENT_ID: &str = "CLEAR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Content,
    Clear,
}

/// A job to be run by the `IndexManager`.
///
/// ## Example
///
/// ```rust,ignore
/// use flint_core::{IndexJob, Priority, Requester};
///
/// let job = IndexJob::new("/data/report.xml", "local-file", index.clone())
///     .with_priority(Priority::High)
///     .with_requester(Requester::new("watcher"));
/// manager.submit(job, Lane::Multi)?;
/// ```
pub struct IndexJob {
    sequence: u64,
    created: Instant,
    kind: JobKind,
    content_id: String,
    content_type: ContentType,
    index: Arc<dyn Index>,
    requester: Requester,
    priority: Priority,
    batch: Option<Arc<IndexBatch>>,
    parameters: HashMap<String, String>,
    status: AtomicU8,
}

impl IndexJob {
    /// Create a new low priority job for a content item.
    pub fn new(
        content_id: impl Into<String>,
        content_type: impl Into<ContentType>,
        index: Arc<dyn Index>,
    ) -> Self {
        IndexJob {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            created: Instant::now(),
            kind: JobKind::Content,
            content_id: content_id.into(),
            content_type: content_type.into(),
            index,
            requester: Requester::new("anonymous"),
            priority: Priority::Low,
            batch: None,
            parameters: HashMap::new(),
            status: AtomicU8::new(PENDING),
        }
    }

    /// Create a job that clears every document from an index.
    pub fn clear(index: Arc<dyn Index>, priority: Priority, requester: Requester) -> Self {
        IndexJob {
            kind: JobKind::Clear,
            ..IndexJob::new(CLEAR_CONTENT_ID, ContentType::new(CLEAR_CONTENT_ID), index)
        }
        .with_priority(priority)
        .with_requester(requester)
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the requester
    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = requester;
        self
    }

    /// Attach the job to a batch
    pub fn with_batch(mut self, batch: Arc<IndexBatch>) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Set the translation parameters
    pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add one translation parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Identifier built from the job's creation rank and identity, for logs.
    pub fn id(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}-{}",
            self.sequence,
            self.content_id,
            self.content_type,
            self.index.index_id(),
            self.requester,
            self.priority
        )
    }

    /// Creation rank, strictly increasing across all jobs of the process
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the job was created (monotonic clock)
    pub fn created(&self) -> Instant {
        self.created
    }

    /// The content ID
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// The content type
    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    /// The index this job targets
    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }

    /// The requester that submitted this job
    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// The job's priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The batch this job belongs to, if any
    pub fn batch(&self) -> Option<&Arc<IndexBatch>> {
        self.batch.as_ref()
    }

    /// Whether this job is part of a batch
    pub fn is_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// A copy of the job's parameters
    pub fn parameters(&self) -> HashMap<String, String> {
        self.parameters.clone()
    }

    pub(crate) fn parameters_ref(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// Whether this job clears its index instead of indexing content
    pub fn is_clear_job(&self) -> bool {
        self.kind == JobKind::Clear
    }

    /// Whether this job targets the index with the given ID
    pub fn is_for_index(&self, index_id: &str) -> bool {
        self.index.index_id() == index_id
    }

    /// Whether this job was submitted by the given requester
    pub fn is_for_requester(&self, requester: &Requester) -> bool {
        &self.requester == requester
    }

    /// Whether two jobs would do the same work.
    ///
    /// Jobs are similar when they share content ID, content type, target
    /// index and parameters. Priority, requester and batch are ignored.
    pub fn is_similar(&self, other: &IndexJob) -> bool {
        self.kind == other.kind
            && self.content_id == other.content_id
            && self.content_type == other.content_type
            && self.index.index_id() == other.index.index_id()
            && self.parameters == other.parameters
    }

    /// Queue order: higher priority first, then earlier creation first.
    ///
    /// Never returns `Equal` for two distinct jobs.
    pub fn queue_order(&self, other: &IndexJob) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }

    /// Mark the job finished with the given outcome.
    ///
    /// Only the first call has an effect; returns `false` for later calls.
    pub(crate) fn finish(&self, success: bool) -> bool {
        let outcome = if success { SUCCEEDED } else { FAILED };
        self.status
            .compare_exchange(PENDING, outcome, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the job has finished running
    pub fn is_finished(&self) -> bool {
        self.status.load(Ordering::Acquire) != PENDING
    }

    /// Whether the job finished successfully.
    ///
    /// Only meaningful once `is_finished` returns true.
    pub fn was_successful(&self) -> bool {
        self.status.load(Ordering::Acquire) == SUCCEEDED
    }
}

impl fmt::Debug for IndexJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexJob")
            .field("sequence", &self.sequence)
            .field("content_id", &self.content_id)
            .field("content_type", &self.content_type)
            .field("index", &self.index.index_id())
            .field("priority", &self.priority)
            .field("clear", &self.is_clear_job())
            .field("finished", &self.is_finished())
            .field("success", &self.was_successful())
            .finish()
    }
}

impl fmt::Display for IndexJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {} [{} on {}, {}, finished: {}, success: {}]",
            self.sequence,
            self.content_id,
            self.index.index_id(),
            self.priority,
            self.is_finished(),
            self.was_successful()
        )
    }
}
