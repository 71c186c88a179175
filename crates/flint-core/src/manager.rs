//! The index manager.
//!
//! `IndexManager` is the facade of Flint: it accepts job submissions, owns
//! the worker pools, dispatches translators and drives shutdown.
//!
//! ## Scheduling
//!
//! Each submission enqueues the job, then schedules exactly one pool task
//! that drains one job from the same lane if one is available. Pool
//! occupancy therefore tracks queue depth without any other signal.
//!
//! ## Example
//!
//! ```rust,ignore
//! use flint_core::{IndexManager, ManagerConfig, MemoryIndex, TracingListener};
//!
//! let manager = IndexManager::new(fetcher, Arc::new(TracingListener), ManagerConfig::default())?;
//! let index = MemoryIndex::new("docs", manager.open_indexes().clone());
//! manager.submit(IndexJob::new("/data/a.xml", "local-file", index), Lane::Multi)?;
//! manager.shutdown(Duration::from_secs(5));
//! ```

use crate::batch::IndexBatch;
use crate::cache::{OpenIndexCache, DEFAULT_MAX_OPEN, DEFAULT_SWEEP_INTERVAL};
use crate::config::Config;
use crate::content::{Content, ContentFetcher};
use crate::error::{FlintError, Result};
use crate::index::{Index, IndexRegistry};
use crate::job::IndexJob;
use crate::listener::{IndexListener, SafeListener};
use crate::pool::WorkerPool;
use crate::queue::{Deduplication, JobFilter, JobQueue};
use crate::translate::{ContentTranslator, ContentTranslatorFactory, TranslatorRegistry, XmlTranslatorFactory};
use crate::types::{ContentType, Lane, Priority, Requester};
use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Settings of an `IndexManager`.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of threads of the multi-worker pool
    pub threads: usize,
    /// Whether to start a dedicated single-worker lane
    pub single_thread: bool,
    /// Maximum number of open index handles
    pub max_open: usize,
    /// Minimum time between two sweeps of the open-index cache
    pub sweep_interval: Duration,
    /// Prefix of worker thread names
    pub thread_name_prefix: String,
    /// Default time to wait for running jobs at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            threads: 10,
            single_thread: false,
            max_open: DEFAULT_MAX_OPEN,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            thread_name_prefix: "indexing".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for ManagerConfig {
    fn from(config: &Config) -> Self {
        ManagerConfig {
            threads: config.indexing.threads,
            single_thread: config.indexing.single_thread,
            max_open: config.open_indexes.max_open,
            sweep_interval: Duration::from_secs(config.open_indexes.sweep_interval_secs),
            thread_name_prefix: config.indexing.thread_name_prefix.clone(),
            shutdown_timeout: Duration::from_secs(config.indexing.shutdown_timeout_secs),
        }
    }
}

/// State shared between the manager and its workers.
pub(crate) struct ManagerContext {
    pub(crate) queue: JobQueue,
    pub(crate) fetcher: Arc<dyn ContentFetcher>,
    pub(crate) listener: SafeListener,
    pub(crate) translators: TranslatorRegistry,
    pub(crate) open_indexes: Arc<OpenIndexCache>,
    pub(crate) indexes: IndexRegistry,
    closing: AtomicBool,
    /// Set once the pools were told to stop; never cleared
    interrupted: AtomicBool,
}

impl ManagerContext {
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Fail if the manager is closing or its pools were stopped.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.is_closing() || self.interrupted.load(Ordering::Acquire) {
            return Err(FlintError::ShuttingDown);
        }
        Ok(())
    }

    /// Translate content and read the whole canonical stream.
    ///
    /// Reading stops early when the manager starts closing.
    pub(crate) fn translate(
        &self,
        content: &dyn Content,
        parameters: &HashMap<String, String>,
    ) -> Result<Option<Vec<u8>>> {
        let media_type = content
            .media_type()
            .map_err(|e| FlintError::translation(format!("media type not found: {:#}", e)))?;
        let translator = self.translators.resolve(&media_type)?;

        let stream = translator
            .translate(content, parameters)
            .map_err(|e| FlintError::translation(format!("{:#}", e)))?;
        let mut stream = match stream {
            Some(stream) => stream,
            None => return Ok(None),
        };

        let mut documents = Vec::new();
        let mut buffer = [0u8; 8192];
        loop {
            self.checkpoint()?;
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => documents.extend_from_slice(&buffer[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(FlintError::translation(format!(
                        "failed to read translated content: {}",
                        e
                    )))
                }
            }
        }
        Ok(Some(documents))
    }
}

/// Schedules indexing jobs on worker pools.
pub struct IndexManager {
    ctx: Arc<ManagerContext>,
    multi: WorkerPool,
    single: Option<WorkerPool>,
    config: ManagerConfig,
}

impl IndexManager {
    /// Create a manager and start its worker pools.
    ///
    /// The XML passthrough translator is registered for the XML media types.
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        listener: Arc<dyn IndexListener>,
        config: ManagerConfig,
    ) -> Result<Self> {
        let multi = WorkerPool::new(&format!("{}-t", config.thread_name_prefix), config.threads)?;
        let single = if config.single_thread {
            Some(WorkerPool::new(
                &format!("{}-single", config.thread_name_prefix),
                1,
            )?)
        } else {
            None
        };

        let translators = TranslatorRegistry::new();
        translators.register(Arc::new(XmlTranslatorFactory));

        let ctx = Arc::new(ManagerContext {
            queue: JobQueue::new(config.single_thread),
            fetcher,
            listener: SafeListener::new(listener),
            translators,
            open_indexes: Arc::new(OpenIndexCache::new(config.max_open, config.sweep_interval)),
            indexes: IndexRegistry::new(),
            closing: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        });

        info!(
            threads = multi.size(),
            single_thread = config.single_thread,
            max_open = config.max_open,
            "Index manager started"
        );
        Ok(IndexManager {
            ctx,
            multi,
            single,
            config,
        })
    }

    /// The manager's settings
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Submit a job to a lane.
    ///
    /// Single-lane jobs go to the multi lane when the manager has no
    /// single-worker pool. Plain submission never de-duplicates.
    pub fn submit(&self, job: IndexJob, lane: Lane) -> Result<Arc<IndexJob>> {
        self.validate(&job)?;
        let job = Arc::new(job);
        let lane = self.ctx.queue.effective_lane(lane);

        self.ctx.indexes.register(job.index().clone());
        self.ctx.queue.enqueue(job.clone(), lane);
        self.schedule(lane)?;

        debug!(job = %job.id(), lane = %lane, "Submitted job");
        Ok(job)
    }

    /// Submit a job unless a similar job is already pending.
    ///
    /// A high priority job replaces a similar pending low priority one.
    /// Returns `None` when the job was dropped.
    pub fn submit_deduplicated(&self, job: IndexJob, lane: Lane) -> Result<Option<Arc<IndexJob>>> {
        self.validate(&job)?;
        let job = Arc::new(job);
        let lane = self.ctx.queue.effective_lane(lane);

        self.ctx.indexes.register(job.index().clone());
        match self.ctx.queue.enqueue_deduplicated(job.clone(), lane) {
            Deduplication::Dropped => Ok(None),
            Deduplication::Queued | Deduplication::Replaced => {
                self.schedule(lane)?;
                Ok(Some(job))
            }
        }
    }

    fn validate(&self, job: &IndexJob) -> Result<()> {
        if self.multi.is_shutdown() {
            return Err(FlintError::ShuttingDown);
        }
        if job.content_id().is_empty() {
            return Err(FlintError::invalid_job("content ID is empty"));
        }
        if job.index().index_id().is_empty() {
            return Err(FlintError::invalid_job("index ID is empty"));
        }
        Ok(())
    }

    fn schedule(&self, lane: Lane) -> Result<()> {
        let pool = match (lane, &self.single) {
            (Lane::Single, Some(single)) => single,
            _ => &self.multi,
        };
        let worker = crate::worker::Worker::new(self.ctx.clone(), lane);
        pool.execute(move || worker.run())
    }

    /// Submit a content item for indexing.
    #[allow(clippy::too_many_arguments)]
    pub fn index(
        &self,
        content_id: impl Into<String>,
        content_type: impl Into<ContentType>,
        index: Arc<dyn Index>,
        requester: Requester,
        priority: Priority,
        lane: Lane,
        parameters: HashMap<String, String>,
    ) -> Result<Arc<IndexJob>> {
        let job = IndexJob::new(content_id, content_type, index)
            .with_requester(requester)
            .with_priority(priority)
            .with_parameters(parameters);
        self.submit(job, lane)
    }

    /// Submit a content item as part of a batch.
    ///
    /// The batch total grows by one; fails if the batch is already computed.
    /// A job that cannot be submitted is not counted.
    #[allow(clippy::too_many_arguments)]
    pub fn index_batch(
        &self,
        batch: &Arc<IndexBatch>,
        content_id: impl Into<String>,
        content_type: impl Into<ContentType>,
        index: Arc<dyn Index>,
        requester: Requester,
        priority: Priority,
        parameters: HashMap<String, String>,
    ) -> Result<Arc<IndexJob>> {
        let job = IndexJob::new(content_id, content_type, index)
            .with_requester(requester)
            .with_priority(priority)
            .with_parameters(parameters)
            .with_batch(batch.clone());
        batch.increase_total()?;
        self.submit(job, Lane::Multi).map_err(|e| {
            if batch.decrease_total() {
                self.ctx.listener.end_batch(batch);
            }
            e
        })
    }

    /// Submit several content items as one batch of known size.
    ///
    /// The returned batch is computed from the start.
    pub fn index_contents(
        &self,
        contents: Vec<(String, ContentType)>,
        index: Arc<dyn Index>,
        requester: Requester,
        priority: Priority,
        parameters: HashMap<String, String>,
    ) -> Result<Arc<IndexBatch>> {
        let batch = Arc::new(IndexBatch::with_total(index.index_id(), contents.len()));
        for (content_id, content_type) in contents {
            let job = IndexJob::new(content_id, content_type, index.clone())
                .with_requester(requester.clone())
                .with_priority(priority)
                .with_parameters(parameters.clone())
                .with_batch(batch.clone());
            self.submit(job, Lane::Multi)?;
        }
        Ok(batch)
    }

    /// Submit a job to the single-worker lane.
    pub fn index_single_thread(&self, job: IndexJob) -> Result<Arc<IndexJob>> {
        self.submit(job, Lane::Single)
    }

    /// Clear an index.
    ///
    /// Pending jobs for the index are removed first, so they can never be
    /// applied after the clear. Submissions racing with this call are not
    /// ordered against it.
    pub fn clear(&self, index: Arc<dyn Index>, requester: Requester, priority: Priority) -> Result<Arc<IndexJob>> {
        let removed = self.ctx.queue.clear_jobs_for_index(index.index_id());
        info!(index = %index.index_id(), removed = removed, "Clearing index");
        self.submit(IndexJob::clear(index, priority, requester), Lane::Multi)
    }

    /// Declare that no more jobs will be added to a batch.
    ///
    /// Fires the batch end notification if every job was already processed.
    pub fn mark_computed(&self, batch: &Arc<IndexBatch>) {
        if batch.set_computed() {
            self.ctx.listener.end_batch(batch);
        }
    }

    /// Pending jobs matching a filter. Never waits for running jobs.
    pub fn status(&self, filter: &JobFilter) -> Vec<Arc<IndexJob>> {
        self.ctx.queue.snapshot(filter)
    }

    /// Number of pending jobs
    pub fn pending_jobs(&self) -> usize {
        self.ctx.queue.len()
    }

    /// Register a factory for every media type it supports
    pub fn register_translator_factory(&self, factory: Arc<dyn ContentTranslatorFactory>) {
        self.ctx.translators.register(factory);
    }

    /// Register a factory for one media type
    pub fn register_translator_factory_for(
        &self,
        media_type: impl Into<String>,
        factory: Arc<dyn ContentTranslatorFactory>,
    ) {
        self.ctx.translators.register_for(media_type, factory);
    }

    /// Set the translator used for media types without a factory
    pub fn set_default_translator(&self, translator: Option<Arc<dyn ContentTranslator>>) {
        self.ctx.translators.set_default(translator);
    }

    /// Resolve the translator for a media type
    pub fn translator(&self, media_type: &str) -> Result<Arc<dyn ContentTranslator>> {
        self.ctx.translators.resolve(media_type)
    }

    /// Translate content without indexing it.
    ///
    /// Index parameters are merged with `parameters`; the latter win.
    pub fn translate_content(
        &self,
        index: &dyn Index,
        content: &dyn Content,
        parameters: &HashMap<String, String>,
    ) -> Result<Option<Vec<u8>>> {
        let mut merged = index.parameters(content);
        merged.extend(parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.ctx.translate(content, &merged)
    }

    /// The open-index cache shared by this manager's indexes
    pub fn open_indexes(&self) -> &Arc<OpenIndexCache> {
        &self.ctx.open_indexes
    }

    /// Every index this manager has seen
    pub fn indexes(&self) -> &IndexRegistry {
        &self.ctx.indexes
    }

    /// Whether the manager is closing
    pub fn is_closing(&self) -> bool {
        self.ctx.is_closing()
    }

    /// Shut down with the configured timeout
    pub fn stop(&self) -> bool {
        self.shutdown(self.config.shutdown_timeout)
    }

    /// Shut the manager down.
    ///
    /// Pending jobs are dropped and running jobs are asked to stop. Every
    /// known index is closed, whether or not the pools stopped in time.
    /// Returns false if the pools did not terminate within `timeout`.
    #[instrument(skip(self))]
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let dropped = self.ctx.queue.clear_all();
        info!(dropped = dropped, "Shutting down index manager");

        self.ctx.closing.store(true, Ordering::Release);

        self.ctx.interrupted.store(true, Ordering::Release);
        self.multi.shutdown_now();
        if let Some(single) = &self.single {
            single.shutdown_now();
        }

        let deadline = Instant::now() + timeout;
        let mut terminated = self.multi.await_termination(timeout);
        if let Some(single) = &self.single {
            let remaining = deadline.saturating_duration_since(Instant::now());
            terminated &= single.await_termination(remaining);
        }
        if !terminated {
            warn!("Indexing interrupted: worker pools did not stop in time");
        }

        let failures = self.ctx.indexes.close_all();
        self.ctx.closing.store(false, Ordering::Release);

        info!(terminated = terminated, close_failures = failures, "Index manager shut down");
        terminated
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("config", &self.config)
            .field("queue", &self.ctx.queue)
            .field("indexes", &self.ctx.indexes)
            .finish()
    }
}
