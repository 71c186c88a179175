//! Indexing lifecycle notifications.
//!
//! Detailed job diagnostics are only reported here: a failed job carries no
//! more than `finished = true, success = false`.
//!
//! Listener calls are best effort. A panicking listener is isolated by the
//! manager and never prevents the job's own bookkeeping.

use crate::batch::IndexBatch;
use crate::job::IndexJob;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives indexing lifecycle events.
///
/// Every method has an empty default so implementations only override what
/// they need. Methods may be called concurrently from several workers.
pub trait IndexListener: Send + Sync {
    /// The first job of a batch is starting
    fn start_batch(&self, _batch: &Arc<IndexBatch>) {}

    /// Every job of a batch has been processed
    fn end_batch(&self, _batch: &Arc<IndexBatch>) {}

    /// A job is starting
    fn start_job(&self, _job: &Arc<IndexJob>) {}

    /// A job has finished, successfully or not
    fn end_job(&self, _job: &Arc<IndexJob>) {}

    /// Something unexpected but not fatal happened while running a job
    fn warn(&self, _job: &Arc<IndexJob>, _message: &str) {}

    /// A job (or the post-processing of its index) failed
    fn error(&self, _job: Option<&Arc<IndexJob>>, _message: &str, _cause: Option<&anyhow::Error>) {}
}

/// A listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpListener;

impl IndexListener for NoOpListener {}

/// A listener that forwards every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl IndexListener for TracingListener {
    fn start_batch(&self, batch: &Arc<IndexBatch>) {
        info!(batch = batch.id(), index = %batch.index_id(), "Batch started");
    }

    fn end_batch(&self, batch: &Arc<IndexBatch>) {
        info!(
            batch = batch.id(),
            index = %batch.index_id(),
            documents = batch.total_documents(),
            elapsed_ms = batch.total_duration().map(|d| d.as_millis() as u64).unwrap_or(0),
            "Batch finished"
        );
    }

    fn start_job(&self, job: &Arc<IndexJob>) {
        debug!(job = %job.id(), "Job started");
    }

    fn end_job(&self, job: &Arc<IndexJob>) {
        debug!(job = %job.id(), success = job.was_successful(), "Job finished");
    }

    fn warn(&self, job: &Arc<IndexJob>, message: &str) {
        warn!(job = %job.id(), "{}", message);
    }

    fn error(&self, job: Option<&Arc<IndexJob>>, message: &str, cause: Option<&anyhow::Error>) {
        let job_id = job.map(|j| j.id()).unwrap_or_default();
        match cause {
            Some(cause) => {
                let cause = format!("{:#}", cause);
                error!(job = %job_id, error = %cause, "{}", message)
            }
            None => error!(job = %job_id, "{}", message),
        }
    }
}

/// Events sent by the channel listener
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// A batch started
    StartBatch(Arc<IndexBatch>),
    /// A batch finished
    EndBatch(Arc<IndexBatch>),
    /// A job started
    StartJob(Arc<IndexJob>),
    /// A job finished
    EndJob(Arc<IndexJob>),
    /// A warning about a job
    Warn { job: Arc<IndexJob>, message: String },
    /// An error, with its cause chain rendered as text
    Error {
        job: Option<Arc<IndexJob>>,
        message: String,
        cause: Option<String>,
    },
}

/// A listener that sends every event over a channel
pub struct ChannelListener {
    sender: crossbeam_channel::Sender<ListenerEvent>,
}

impl ChannelListener {
    /// Create a new channel-based listener
    pub fn new() -> (Self, crossbeam_channel::Receiver<ListenerEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (ChannelListener { sender }, receiver)
    }
}

impl Default for ChannelListener {
    fn default() -> Self {
        Self::new().0
    }
}

impl IndexListener for ChannelListener {
    fn start_batch(&self, batch: &Arc<IndexBatch>) {
        let _ = self.sender.send(ListenerEvent::StartBatch(batch.clone()));
    }

    fn end_batch(&self, batch: &Arc<IndexBatch>) {
        let _ = self.sender.send(ListenerEvent::EndBatch(batch.clone()));
    }

    fn start_job(&self, job: &Arc<IndexJob>) {
        let _ = self.sender.send(ListenerEvent::StartJob(job.clone()));
    }

    fn end_job(&self, job: &Arc<IndexJob>) {
        let _ = self.sender.send(ListenerEvent::EndJob(job.clone()));
    }

    fn warn(&self, job: &Arc<IndexJob>, message: &str) {
        let _ = self.sender.send(ListenerEvent::Warn {
            job: job.clone(),
            message: message.to_string(),
        });
    }

    fn error(&self, job: Option<&Arc<IndexJob>>, message: &str, cause: Option<&anyhow::Error>) {
        let _ = self.sender.send(ListenerEvent::Error {
            job: job.cloned(),
            message: message.to_string(),
            cause: cause.map(|c| format!("{:#}", c)),
        });
    }
}

/// Wraps a listener so a panicking callback is logged and swallowed.
#[derive(Clone)]
pub(crate) struct SafeListener {
    inner: Arc<dyn IndexListener>,
}

impl SafeListener {
    pub(crate) fn new(inner: Arc<dyn IndexListener>) -> Self {
        SafeListener { inner }
    }

    fn call(&self, event: &str, f: impl FnOnce(&dyn IndexListener)) {
        let inner = self.inner.as_ref();
        if catch_unwind(AssertUnwindSafe(|| f(inner))).is_err() {
            error!(event = event, "Index listener panicked");
        }
    }

    pub(crate) fn start_batch(&self, batch: &Arc<IndexBatch>) {
        self.call("start_batch", |l| l.start_batch(batch));
    }

    pub(crate) fn end_batch(&self, batch: &Arc<IndexBatch>) {
        self.call("end_batch", |l| l.end_batch(batch));
    }

    pub(crate) fn start_job(&self, job: &Arc<IndexJob>) {
        self.call("start_job", |l| l.start_job(job));
    }

    pub(crate) fn end_job(&self, job: &Arc<IndexJob>) {
        self.call("end_job", |l| l.end_job(job));
    }

    pub(crate) fn warn(&self, job: &Arc<IndexJob>, message: &str) {
        self.call("warn", |l| l.warn(job, message));
    }

    pub(crate) fn error(&self, job: Option<&Arc<IndexJob>>, message: &str, cause: Option<&anyhow::Error>) {
        self.call("error", |l| l.error(job, message, cause));
    }
}
