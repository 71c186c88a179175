//! In-memory index.
//!
//! `MemoryIndex` keeps documents in a map keyed by delete rule. It is the
//! reference `Index` implementation used by the CLI and by tests, and shows
//! how an index cooperates with the `OpenIndexCache`.
//!
//! ## Handle States
//!
//! ```text
//! CLEAN --write--> DIRTY --commit--> CLEAN
//!   \                 \
//!    +--close--> CLOSED <--close (commits first)
//! ```
//!
//! Writes go to the handle's working copy and become visible to readers of
//! the index once committed. A closed handle rejects writes; the next call
//! to `MemoryIndex::io` opens a new handle.

use crate::cache::OpenIndexCache;
use crate::content::{Content, DeleteRule};
use crate::index::{Index, IndexIO};
use anyhow::bail;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

type Documents = BTreeMap<String, Vec<u8>>;

/// State of an open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// No uncommitted change
    Clean,
    /// Some changes are not committed yet
    Dirty,
    /// The handle is closed
    Closed,
}

struct Working {
    state: HandleState,
    documents: Documents,
    next_key: u64,
}

/// An open handle on a `MemoryIndex`.
pub struct MemoryIndexIO {
    index_id: String,
    committed: Arc<RwLock<Documents>>,
    working: Mutex<Working>,
    last_used: Mutex<Instant>,
    cache: Arc<OpenIndexCache>,
}

impl MemoryIndexIO {
    fn open(index_id: &str, committed: Arc<RwLock<Documents>>, cache: Arc<OpenIndexCache>) -> Self {
        let documents = committed.read().clone();
        MemoryIndexIO {
            index_id: index_id.to_string(),
            committed,
            working: Mutex::new(Working {
                state: HandleState::Clean,
                next_key: documents.len() as u64,
                documents,
            }),
            last_used: Mutex::new(Instant::now()),
            cache,
        }
    }

    /// Current state
    pub fn state(&self) -> HandleState {
        self.working.lock().state
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Apply a change to the working copy unless the handle is closed.
    fn write(&self, change: impl FnOnce(&mut Working) -> anyhow::Result<()>) -> anyhow::Result<bool> {
        let mut working = self.working.lock();
        if working.state == HandleState::Closed {
            return Ok(false);
        }
        change(&mut working)?;
        working.state = HandleState::Dirty;
        drop(working);
        self.touch();
        Ok(true)
    }
}

fn document_key(rule: &DeleteRule) -> anyhow::Result<String> {
    match rule {
        DeleteRule::Term { .. } => Ok(rule.to_string()),
        DeleteRule::Query(query) => bail!("memory indexes do not support query rules: {}", query),
    }
}

impl IndexIO for MemoryIndexIO {
    fn index_id(&self) -> &str {
        &self.index_id
    }

    fn insert_or_update(&self, rule: Option<&DeleteRule>, documents: &[u8]) -> anyhow::Result<bool> {
        let key = rule.map(document_key).transpose()?;
        self.write(|working| {
            let key = match key {
                Some(key) => key,
                None => {
                    working.next_key += 1;
                    format!("_doc={}", working.next_key)
                }
            };
            working.documents.insert(key, documents.to_vec());
            Ok(())
        })
    }

    fn delete(&self, rule: &DeleteRule) -> anyhow::Result<bool> {
        let key = document_key(rule)?;
        self.write(|working| {
            working.documents.remove(&key);
            Ok(())
        })
    }

    fn clear(&self) -> anyhow::Result<bool> {
        self.write(|working| {
            working.documents.clear();
            Ok(())
        })
    }

    fn commit(&self) -> anyhow::Result<()> {
        let mut working = self.working.lock();
        if working.state == HandleState::Dirty {
            *self.committed.write() = working.documents.clone();
            working.state = HandleState::Clean;
            debug!(index = %self.index_id, documents = working.documents.len(), "Committed");
        }
        Ok(())
    }

    fn refresh(&self) -> anyhow::Result<()> {
        self.touch();
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        self.commit()?;
        self.working.lock().state = HandleState::Closed;
        self.cache.remove(self);
        debug!(index = %self.index_id, "Closed handle");
        Ok(())
    }

    fn last_time_used(&self) -> Instant {
        *self.last_used.lock()
    }

    fn is_closed(&self) -> bool {
        self.state() == HandleState::Closed
    }
}

/// An index held in memory.
pub struct MemoryIndex {
    id: String,
    cache: Arc<OpenIndexCache>,
    committed: Arc<RwLock<Documents>>,
    current: Mutex<Option<Arc<MemoryIndexIO>>>,
    parameters: HashMap<String, String>,
}

impl MemoryIndex {
    /// Create an empty index whose handles register with `cache`
    pub fn new(id: impl Into<String>, cache: Arc<OpenIndexCache>) -> Arc<Self> {
        Self::with_parameters(id, cache, HashMap::new())
    }

    /// Create an empty index supplying translation parameters
    pub fn with_parameters(
        id: impl Into<String>,
        cache: Arc<OpenIndexCache>,
        parameters: HashMap<String, String>,
    ) -> Arc<Self> {
        Arc::new(MemoryIndex {
            id: id.into(),
            cache,
            committed: Arc::new(RwLock::new(BTreeMap::new())),
            current: Mutex::new(None),
            parameters,
        })
    }

    /// Open (or reuse) the typed handle
    pub fn handle(&self) -> Arc<MemoryIndexIO> {
        let mut current = self.current.lock();
        if let Some(io) = current.as_ref() {
            if !io.is_closed() {
                return io.clone();
            }
        }

        let io = Arc::new(MemoryIndexIO::open(&self.id, self.committed.clone(), self.cache.clone()));
        self.cache.add(io.clone());
        *current = Some(io.clone());
        debug!(index = %self.id, "Opened handle");
        io
    }

    /// Committed document stored under a key (the rule, e.g. `_path=/a.xml`)
    pub fn document(&self, key: &str) -> Option<Vec<u8>> {
        self.committed.read().get(key).cloned()
    }

    /// Keys of all committed documents, sorted
    pub fn keys(&self) -> Vec<String> {
        self.committed.read().keys().cloned().collect()
    }

    /// Number of committed documents
    pub fn len(&self) -> usize {
        self.committed.read().len()
    }

    /// Check if no document is committed
    pub fn is_empty(&self) -> bool {
        self.committed.read().is_empty()
    }
}

impl Index for MemoryIndex {
    fn index_id(&self) -> &str {
        &self.id
    }

    fn io(&self) -> anyhow::Result<Arc<dyn IndexIO>> {
        Ok(self.handle())
    }

    fn parameters(&self, _content: &dyn Content) -> HashMap<String, String> {
        self.parameters.clone()
    }

    fn close(&self) -> anyhow::Result<()> {
        let current = self.current.lock().take();
        match current {
            Some(io) => io.close(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("id", &self.id)
            .field("documents", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> Arc<OpenIndexCache> {
        Arc::new(OpenIndexCache::default())
    }

    #[test]
    fn test_writes_visible_after_commit() {
        let index = MemoryIndex::new("docs", cache());
        let io = index.handle();
        assert_eq!(io.state(), HandleState::Clean);

        let rule = DeleteRule::term("_path", "/a.xml");
        assert!(io.insert_or_update(Some(&rule), b"<a/>").unwrap());
        assert_eq!(io.state(), HandleState::Dirty);
        assert!(index.is_empty());

        io.commit().unwrap();
        assert_eq!(io.state(), HandleState::Clean);
        assert_eq!(index.document("_path=/a.xml"), Some(b"<a/>".to_vec()));

        // Update replaces the document with the same rule
        io.insert_or_update(Some(&rule), b"<b/>").unwrap();
        io.delete(&DeleteRule::term("_path", "/missing.xml")).unwrap();
        io.commit().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.document("_path=/a.xml"), Some(b"<b/>".to_vec()));
    }

    #[test]
    fn test_close_commits_and_deregisters() {
        let cache = cache();
        let index = MemoryIndex::new("docs", cache.clone());
        let io = index.handle();
        assert!(cache.is_open(io.as_ref()));

        io.insert_or_update(None, b"<x/>").unwrap();
        io.close().unwrap();

        assert_eq!(io.state(), HandleState::Closed);
        assert!(!cache.is_open(io.as_ref()));
        assert_eq!(index.len(), 1);
        // A closed handle applies nothing
        assert!(!io.clear().unwrap());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_reopen_gives_new_handle() {
        let cache = cache();
        let index = MemoryIndex::new("docs", cache.clone());
        let first = index.handle();
        assert!(Arc::ptr_eq(&first, &index.handle()));

        first.close().unwrap();
        let second = index.handle();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert!(cache.is_open(second.as_ref()));
    }

    #[test]
    fn test_sweep_closes_memory_handles() {
        let cache = Arc::new(OpenIndexCache::new(1, std::time::Duration::from_secs(60)));
        let older = MemoryIndex::new("older", cache.clone());
        let newer = MemoryIndex::new("newer", cache.clone());

        let old_io = older.handle();
        old_io.insert_or_update(None, b"<o/>").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let new_io = newer.handle();
        new_io.refresh().unwrap();

        assert_eq!(cache.sweep_now(), 1);
        assert!(old_io.is_closed());
        assert!(!new_io.is_closed());
        // Closing committed the pending write
        assert_eq!(older.len(), 1);
    }

    #[test]
    fn test_query_rules_are_rejected() {
        let index = MemoryIndex::new("docs", cache());
        let io = index.handle();
        assert!(io.delete(&DeleteRule::query("type:doc")).is_err());
        assert!(io.insert_or_update(Some(&DeleteRule::query("q")), b"<a/>").is_err());
    }

    #[test]
    fn test_index_close() {
        let cache = cache();
        let index = MemoryIndex::new("docs", cache.clone());
        index.handle().clear().unwrap();
        Index::close(index.as_ref()).unwrap();
        assert!(cache.is_empty());
        // Closing again is a no-op
        Index::close(index.as_ref()).unwrap();
    }
}
