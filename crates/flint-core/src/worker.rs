//! One drain attempt of a queue lane.
//!
//! Every submission schedules exactly one `Worker::run` on a pool thread.
//! A run pops at most one job; an empty lane means another run already took
//! the job, so the worker returns without doing anything.
//!
//! ## Job State Machine
//!
//! ```text
//! Dequeued -> ContentFetched -> Translated -> Applied -> Finished(success)
//!     \              \               \            \
//!      +--------------+---------------+------------+--> Finished(failure)
//! ```
//!
//! Deleted content skips translation and is applied as a delete by rule.
//! Clear jobs skip fetch and translation and clear the index directly.

use crate::error::FlintError;
use crate::index::IndexIO;
use crate::job::IndexJob;
use crate::manager::ManagerContext;
use crate::types::Lane;
use anyhow::anyhow;
use std::collections::HashMap;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace};

/// Drains one job from a lane.
pub(crate) struct Worker {
    ctx: Arc<ManagerContext>,
    lane: Lane,
}

impl Worker {
    pub(crate) fn new(ctx: Arc<ManagerContext>, lane: Lane) -> Self {
        Worker { ctx, lane }
    }

    /// Run the next job of the lane, if there is one.
    pub(crate) fn run(&self) {
        let job = match self.ctx.queue.dequeue_next(self.lane) {
            Some(job) => job,
            None => {
                trace!(lane = %self.lane, "No job to run");
                return;
            }
        };
        let listener = &self.ctx.listener;

        if let Some(batch) = job.batch() {
            if batch.start_indexing() {
                listener.start_batch(batch);
            }
        }
        listener.start_job(&job);

        let io = match job.index().io() {
            Ok(io) => Some(io),
            Err(e) => {
                listener.error(Some(&job), "Failed to open index", Some(&e));
                None
            }
        };

        let success = match &io {
            Some(io) => match catch_unwind(AssertUnwindSafe(|| self.process(&job, io))) {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    let job_failure = e
                        .downcast_ref::<FlintError>()
                        .map_or(true, FlintError::is_job_failure);
                    debug!(job = %job.id(), job_failure = job_failure, error = %e, "Job failed");
                    listener.error(Some(&job), &e.to_string(), Some(&e));
                    false
                }
                Err(payload) => {
                    let e = anyhow::Error::new(FlintError::Internal(panic_message(payload.as_ref())));
                    listener.error(Some(&job), "Unexpected panic while indexing", Some(&e));
                    false
                }
            },
            None => false,
        };

        job.finish(success);
        let batch_finished = job.batch().map_or(false, |batch| batch.increase_current());

        if let Some(io) = &io {
            self.post_process(&job, io.as_ref(), success, batch_finished);
        }

        listener.end_job(&job);
        if batch_finished {
            if let Some(batch) = job.batch() {
                listener.end_batch(batch);
            }
        }

        self.ctx.open_indexes.sweep();
    }

    fn process(&self, job: &Arc<IndexJob>, io: &Arc<dyn IndexIO>) -> anyhow::Result<()> {
        self.ctx.checkpoint()?;

        if job.is_clear_job() {
            let cleared = io.clear().map_err(|e| apply_error(job, e))?;
            if !cleared {
                return Err(FlintError::apply(job.index().index_id(), "index was not cleared").into());
            }
            return Ok(());
        }

        let content = self
            .ctx
            .fetcher
            .get_content(job)
            .map_err(|e| FlintError::Fetch {
                content_id: job.content_id().to_string(),
                reason: format!("{:#}", e),
            })?;

        let deleted = content.is_deleted().map_err(|e| FlintError::Fetch {
            content_id: job.content_id().to_string(),
            reason: format!("cannot tell whether content was deleted: {:#}", e),
        })?;
        if deleted {
            let rule = content
                .delete_rule()
                .ok_or_else(|| anyhow!("Deleted content {} has no delete rule", job.content_id()))?;
            self.ctx.checkpoint()?;
            if !io.delete(&rule).map_err(|e| apply_error(job, e))? {
                self.ctx.listener.warn(job, "Index did not delete documents");
            }
            debug!(job = %job.id(), rule = %rule, "Deleted documents");
            return Ok(());
        }

        let mut parameters: HashMap<String, String> = job.index().parameters(content.as_ref());
        parameters.extend(job.parameters_ref().iter().map(|(k, v)| (k.clone(), v.clone())));

        let documents = match self.ctx.translate(content.as_ref(), &parameters)? {
            Some(documents) => documents,
            None => {
                self.ctx.listener.warn(job, "Translator produced nothing to index");
                return Ok(());
            }
        };
        if documents.is_empty() {
            self.ctx.listener.warn(job, "No documents to index");
            return Ok(());
        }

        self.ctx.checkpoint()?;
        let rule = content.delete_rule();
        if !io
            .insert_or_update(rule.as_ref(), &documents)
            .map_err(|e| apply_error(job, e))?
        {
            self.ctx.listener.warn(job, "Index did not apply documents");
        }
        debug!(job = %job.id(), bytes = documents.len(), "Applied documents");
        Ok(())
    }

    /// Refresh and commit the index after a job, as its state requires.
    ///
    /// Failures are reported to the listener and never change the job outcome.
    fn post_process(&self, job: &Arc<IndexJob>, io: &dyn IndexIO, success: bool, batch_finished: bool) {
        let listener = &self.ctx.listener;

        if batch_finished || (!job.is_batch() && success) {
            if let Err(e) = io.refresh() {
                listener.error(Some(job), "Failed to refresh index", Some(&e));
            }
        }

        if !self.ctx.queue.has_jobs_for_index(job.index().index_id()) {
            if let Err(e) = io.commit() {
                listener.error(Some(job), "Failed to commit index", Some(&e));
            }
        }
    }
}

fn apply_error(job: &IndexJob, e: anyhow::Error) -> FlintError {
    FlintError::apply(job.index().index_id(), format!("{:#}", e))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
