//! Index collaborator traits and the index registry.
//!
//! The storage engine behind an index (Lucene-like, Solr-like, in memory) is
//! external to Flint. The scheduler only needs two seams:
//!
//! - **`Index`**: a named, long-lived index that can open I/O handles
//! - **`IndexIO`**: an open handle accepting writes, commits and refreshes
//!
//! The `IndexRegistry` records every index the manager has seen so that
//! shutdown can close them all, whatever state their jobs are in.

use crate::content::{Content, DeleteRule};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// An open handle on an index.
///
/// Handles are shared between the worker that writes through them and the
/// open-index cache that may close them. Implementations must be `Send + Sync`
/// and serialise their own writes.
///
/// ## Usage Clock
///
/// `last_time_used` drives least-recently-used eviction. Implementations
/// should refresh it whenever the handle is really used (a write, a commit,
/// a search), not when it is merely inspected.
pub trait IndexIO: Send + Sync {
    /// ID of the index this handle belongs to
    fn index_id(&self) -> &str;

    /// Add documents, replacing those matched by `rule` when given.
    ///
    /// `documents` is the canonical stream produced by a translator.
    /// Returns `false` if the handle did not apply the change (e.g. closed).
    fn insert_or_update(&self, rule: Option<&DeleteRule>, documents: &[u8]) -> anyhow::Result<bool>;

    /// Delete the documents matched by `rule`.
    fn delete(&self, rule: &DeleteRule) -> anyhow::Result<bool>;

    /// Remove every document from the index.
    fn clear(&self) -> anyhow::Result<bool>;

    /// Make pending changes durable.
    fn commit(&self) -> anyhow::Result<()>;

    /// Make committed or pending changes visible to readers.
    fn refresh(&self) -> anyhow::Result<()>;

    /// Close the handle. Further writes return `Ok(false)`.
    fn close(&self) -> anyhow::Result<()>;

    /// Last time the handle was used
    fn last_time_used(&self) -> Instant;

    /// Whether the handle has been closed
    fn is_closed(&self) -> bool;
}

/// A named index that jobs target.
///
/// Two `Index` values with the same `index_id` are considered the same index
/// by the queue (for removal and status filtering).
pub trait Index: Send + Sync {
    /// Unique identifier of the index
    fn index_id(&self) -> &str;

    /// Get an open I/O handle, opening a new one if needed.
    ///
    /// Implementations that open a handle should register it with the
    /// manager's `OpenIndexCache`.
    fn io(&self) -> anyhow::Result<Arc<dyn IndexIO>>;

    /// Parameters this index supplies for translating a content item.
    ///
    /// Job parameters take precedence over these.
    fn parameters(&self, _content: &dyn Content) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Close any open handle.
    fn close(&self) -> anyhow::Result<()>;
}

/// Compare two indexes by object identity.
pub(crate) fn same_index(a: &Arc<dyn Index>, b: &Arc<dyn Index>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Registry of every index known to a manager.
///
/// This is an explicit service object owned by the `IndexManager` so that
/// each manager (and each test) sees only its own indexes.
#[derive(Default)]
pub struct IndexRegistry {
    indexes: DashMap<String, Arc<dyn Index>>,
}

impl IndexRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        IndexRegistry {
            indexes: DashMap::new(),
        }
    }

    /// Register an index, replacing any index registered under the same ID.
    pub fn register(&self, index: Arc<dyn Index>) {
        let id = index.index_id().to_string();
        if self.indexes.insert(id.clone(), index).is_none() {
            debug!(index = %id, "Registered index");
        }
    }

    /// Remove an index, only if the registered entry is this exact index.
    pub fn deregister(&self, index: &Arc<dyn Index>) -> bool {
        self.indexes
            .remove_if(index.index_id(), |_, registered| same_index(registered, index))
            .is_some()
    }

    /// Look up an index by ID
    pub fn get(&self, index_id: &str) -> Option<Arc<dyn Index>> {
        self.indexes.get(index_id).map(|entry| entry.value().clone())
    }

    /// IDs of all registered indexes
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.indexes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered indexes
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Check if no index is registered
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Close every registered index.
    ///
    /// Failures are logged and do not stop the remaining indexes from being
    /// closed. Returns the number of indexes that failed to close.
    pub fn close_all(&self) -> usize {
        let indexes: Vec<Arc<dyn Index>> = self.indexes.iter().map(|e| e.value().clone()).collect();
        let mut failures = 0;

        for index in indexes {
            match index.close() {
                Ok(()) => debug!(index = %index.index_id(), "Closed index"),
                Err(e) => {
                    failures += 1;
                    error!(index = %index.index_id(), error = %e, "Failed to close index");
                }
            }
        }

        info!(
            indexes = self.indexes.len(),
            failures = failures,
            "Closed all registered indexes"
        );
        failures
    }
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("indexes", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubIndex {
        id: String,
        closed: AtomicBool,
        fail_close: bool,
    }

    impl StubIndex {
        fn new(id: &str, fail_close: bool) -> Arc<Self> {
            Arc::new(StubIndex {
                id: id.to_string(),
                closed: AtomicBool::new(false),
                fail_close,
            })
        }
    }

    impl Index for StubIndex {
        fn index_id(&self) -> &str {
            &self.id
        }

        fn io(&self) -> anyhow::Result<Arc<dyn IndexIO>> {
            anyhow::bail!("stub index has no handle")
        }

        fn close(&self) -> anyhow::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                anyhow::bail!("disk unavailable");
            }
            Ok(())
        }
    }

    #[test]
    fn test_register_and_close_all() {
        let registry = IndexRegistry::new();
        let docs = StubIndex::new("docs", false);
        let broken = StubIndex::new("broken", true);

        registry.register(docs.clone());
        registry.register(broken.clone());
        assert_eq!(registry.ids(), vec!["broken".to_string(), "docs".to_string()]);

        assert_eq!(registry.close_all(), 1);
        assert!(docs.closed.load(Ordering::SeqCst));
        assert!(broken.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_deregister_requires_same_index() {
        let registry = IndexRegistry::new();
        let first: Arc<dyn Index> = StubIndex::new("docs", false);
        let second: Arc<dyn Index> = StubIndex::new("docs", false);

        registry.register(first.clone());
        assert!(!registry.deregister(&second));
        assert_eq!(registry.len(), 1);
        assert!(registry.deregister(&first));
        assert!(registry.is_empty());
    }
}
