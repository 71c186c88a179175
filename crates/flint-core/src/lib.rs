//! # Flint Core Library
//!
//! This crate provides the indexing job scheduler of Flint: the job and
//! batch model, the two-lane priority queue, the worker pools that drain it,
//! and the bounded cache of open index handles. Storage engines, content
//! sources and translators plug in behind traits.
//!
//! ## Architecture
//!
//! - **Jobs** (`job`, `batch`): Units of indexing work and their grouping
//! - **Queue** (`queue`): Priority lanes with targeted removal and snapshots
//! - **Manager** (`manager`, `worker`, `pool`): Submission, execution and shutdown
//! - **Collaborators** (`content`, `translate`, `index`, `listener`): Plug-in traits
//! - **Cache** (`cache`): Least-recently-used eviction of open index handles
//! - **Implementations** (`memory`, `local`): In-memory index and local files
//! - **Config** (`config`): Configuration management
//!
//! ## Example
//!
//! ```rust,ignore
//! use flint_core::{IndexJob, IndexManager, Lane, LocalFileFetcher, ManagerConfig, MemoryIndex, TracingListener};
//! use std::sync::Arc;
//!
//! let manager = IndexManager::new(
//!     Arc::new(LocalFileFetcher::new()),
//!     Arc::new(TracingListener),
//!     ManagerConfig::default(),
//! )?;
//! let index = MemoryIndex::new("docs", manager.open_indexes().clone());
//!
//! manager.submit(IndexJob::new("/data/report.xml", "local-file", index), Lane::Multi)?;
//! manager.stop();
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod index;
pub mod job;
pub mod listener;
pub mod local;
pub mod manager;
pub mod memory;
pub mod pool;
pub mod queue;
pub mod translate;
pub mod types;
mod worker;

// Re-export commonly used types
pub use batch::IndexBatch;
pub use cache::OpenIndexCache;
pub use config::Config;
pub use content::{Content, ContentFetcher, DeleteRule, InMemoryContent};
pub use error::{FlintError, Result};
pub use index::{Index, IndexIO, IndexRegistry};
pub use job::IndexJob;
pub use listener::{ChannelListener, IndexListener, ListenerEvent, NoOpListener, TracingListener};
pub use local::{Action, LocalFileContent, LocalFileFetcher, LocalIndexReport, LocalIndexer};
pub use manager::{IndexManager, ManagerConfig};
pub use memory::{MemoryIndex, MemoryIndexIO};
pub use queue::{JobFilter, JobQueue};
pub use translate::{
    ContentTranslator, ContentTranslatorFactory, PlainTextTranslatorFactory, TranslatorRegistry,
    XmlTranslatorFactory,
};
pub use types::{ContentType, Lane, Priority, Requester};
