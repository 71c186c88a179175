//! Bounded cache of open index handles.
//!
//! Every opened `IndexIO` handle is registered here. A periodic sweep closes
//! the least recently used handles while more than `max_open` are open.
//!
//! ## Identity
//!
//! Handles are keyed by object identity, not by index ID: two handles on the
//! same index may coexist for a while and are evicted independently.
//!
//! ## Eviction
//!
//! Eviction order follows each handle's own `last_time_used` clock. A handle
//! whose close fails stays in the cache and the sweep moves on to the next
//! oldest one; each handle is tried at most once per sweep.

use crate::error::FlintError;
use crate::index::IndexIO;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

/// Default maximum number of open handles
pub const DEFAULT_MAX_OPEN: usize = 100;

/// Default minimum time between two sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

fn handle_key(handle: &dyn IndexIO) -> usize {
    handle as *const _ as *const () as usize
}

/// Registry of open index handles with least-recently-used eviction.
pub struct OpenIndexCache {
    handles: DashMap<usize, Arc<dyn IndexIO>>,
    max_open: AtomicUsize,
    interval: Duration,
    last_sweep: Mutex<Option<Instant>>,
}

impl OpenIndexCache {
    /// Create a cache with a capacity and a sweep interval
    pub fn new(max_open: usize, interval: Duration) -> Self {
        OpenIndexCache {
            handles: DashMap::new(),
            max_open: AtomicUsize::new(max_open),
            interval,
            last_sweep: Mutex::new(None),
        }
    }

    /// Register a newly opened handle
    pub fn add(&self, handle: Arc<dyn IndexIO>) {
        let key = handle_key(handle.as_ref());
        debug!(index = %handle.index_id(), "Registered open index handle");
        self.handles.insert(key, handle);
    }

    /// Deregister a handle. Returns false if it was not registered.
    ///
    /// Handles call this from their own `close`.
    pub fn remove(&self, handle: &dyn IndexIO) -> bool {
        self.handles.remove(&handle_key(handle)).is_some()
    }

    /// Whether a handle is registered
    pub fn is_open(&self, handle: &dyn IndexIO) -> bool {
        self.handles.contains_key(&handle_key(handle))
    }

    /// Number of registered handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if no handle is registered
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Current capacity
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::Relaxed)
    }

    /// Change the capacity. Takes effect at the next sweep.
    pub fn set_max_open(&self, max_open: usize) {
        self.max_open.store(max_open, Ordering::Relaxed);
    }

    /// Minimum time between two sweeps
    pub fn sweep_interval(&self) -> Duration {
        self.interval
    }

    /// Evict excess handles, at most once per sweep interval.
    ///
    /// Returns the number of handles closed, 0 when throttled.
    pub fn sweep(&self) -> usize {
        {
            let mut last = self.last_sweep.lock();
            if let Some(at) = *last {
                if at.elapsed() < self.interval {
                    return 0;
                }
            }
            *last = Some(Instant::now());
        }
        self.sweep_now()
    }

    /// Evict excess handles now, ignoring the throttle.
    #[instrument(skip(self), fields(open = self.handles.len(), max = self.max_open()))]
    pub fn sweep_now(&self) -> usize {
        let max_open = self.max_open();
        if self.handles.len() <= max_open {
            return 0;
        }

        let mut candidates: Vec<(Instant, usize, Arc<dyn IndexIO>)> = self
            .handles
            .iter()
            .map(|e| (e.value().last_time_used(), *e.key(), e.value().clone()))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut closed = 0;
        for (_, key, handle) in candidates {
            if self.handles.len() <= max_open {
                break;
            }
            match handle.close() {
                Ok(()) => {
                    self.handles.remove(&key);
                    closed += 1;
                    debug!(index = %handle.index_id(), "Closed least recently used index handle");
                }
                Err(e) => {
                    let err = FlintError::Close {
                        index: handle.index_id().to_string(),
                        reason: format!("{:#}", e),
                    };
                    error!(error = %err, "Skipping index handle");
                }
            }
        }

        info!(closed = closed, open = self.handles.len(), "Swept open index handles");
        closed
    }
}

impl Default for OpenIndexCache {
    fn default() -> Self {
        OpenIndexCache::new(DEFAULT_MAX_OPEN, DEFAULT_SWEEP_INTERVAL)
    }
}

impl std::fmt::Debug for OpenIndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenIndexCache")
            .field("open", &self.handles.len())
            .field("max_open", &self.max_open())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::DeleteRule;
    use std::sync::atomic::AtomicBool;

    struct StubHandle {
        name: String,
        used: Instant,
        closed: AtomicBool,
        close_calls: AtomicUsize,
        fail_close: bool,
    }

    impl StubHandle {
        fn new(name: &str, base: Instant, offset_secs: u64, fail_close: bool) -> Arc<Self> {
            Arc::new(StubHandle {
                name: name.to_string(),
                used: base + Duration::from_secs(offset_secs),
                closed: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
                fail_close,
            })
        }

        fn is_closed_now(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl IndexIO for StubHandle {
        fn index_id(&self) -> &str {
            &self.name
        }

        fn insert_or_update(&self, _rule: Option<&DeleteRule>, _documents: &[u8]) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn delete(&self, _rule: &DeleteRule) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn clear(&self) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn commit(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn refresh(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn close(&self) -> anyhow::Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                anyhow::bail!("handle is busy");
            }
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn last_time_used(&self) -> Instant {
            self.used
        }

        fn is_closed(&self) -> bool {
            self.is_closed_now()
        }
    }

    #[test]
    fn test_sweep_closes_oldest() {
        let base = Instant::now();
        let cache = OpenIndexCache::new(2, DEFAULT_SWEEP_INTERVAL);
        let a = StubHandle::new("A", base, 1, false);
        let b = StubHandle::new("B", base, 2, false);
        let c = StubHandle::new("C", base, 3, false);
        for handle in [&a, &b, &c] {
            cache.add(handle.clone());
        }

        assert_eq!(cache.sweep(), 1);
        assert!(a.is_closed_now());
        assert!(!b.is_closed_now());
        assert!(!c.is_closed_now());

        let a_dyn: Arc<dyn IndexIO> = a;
        let c_dyn: Arc<dyn IndexIO> = c;
        assert!(!cache.is_open(a_dyn.as_ref()));
        assert!(cache.is_open(c_dyn.as_ref()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_sweep_closes_k_oldest() {
        let base = Instant::now();
        let cache = OpenIndexCache::new(3, DEFAULT_SWEEP_INTERVAL);
        // Added out of usage order
        let offsets = [7, 2, 9, 4, 1, 8];
        let handles: Vec<_> = offsets
            .iter()
            .map(|o| StubHandle::new(&format!("h{}", o), base, *o, false))
            .collect();
        for handle in &handles {
            cache.add(handle.clone());
        }

        assert_eq!(cache.sweep_now(), 3);
        for (handle, offset) in handles.iter().zip(offsets) {
            assert_eq!(handle.is_closed_now(), offset <= 4, "handle {}", handle.name);
        }
    }

    #[test]
    fn test_failed_close_skips_to_next_oldest() {
        let base = Instant::now();
        let cache = OpenIndexCache::new(1, DEFAULT_SWEEP_INTERVAL);
        let stuck = StubHandle::new("stuck", base, 1, true);
        let old = StubHandle::new("old", base, 2, false);
        let fresh = StubHandle::new("fresh", base, 3, false);
        for handle in [&stuck, &old, &fresh] {
            cache.add(handle.clone());
        }

        // Still over capacity after skipping the stuck handle, so both others go
        assert_eq!(cache.sweep_now(), 2);
        assert_eq!(stuck.close_calls.load(Ordering::SeqCst), 1);
        assert!(old.is_closed_now());
        assert!(fresh.is_closed_now());
        assert_eq!(cache.len(), 1);

        let stuck_dyn: Arc<dyn IndexIO> = stuck;
        assert!(cache.is_open(stuck_dyn.as_ref()));
    }

    #[test]
    fn test_failed_close_stops_once_under_capacity() {
        let base = Instant::now();
        let cache = OpenIndexCache::new(2, DEFAULT_SWEEP_INTERVAL);
        let stuck = StubHandle::new("stuck", base, 1, true);
        let old = StubHandle::new("old", base, 2, false);
        let fresh = StubHandle::new("fresh", base, 3, false);
        for handle in [&stuck, &old, &fresh] {
            cache.add(handle.clone());
        }

        assert_eq!(cache.sweep_now(), 1);
        assert_eq!(stuck.close_calls.load(Ordering::SeqCst), 1);
        assert!(old.is_closed_now());
        assert!(!fresh.is_closed_now());
        assert_eq!(fresh.close_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_sweep_is_throttled() {
        let base = Instant::now();
        let cache = OpenIndexCache::new(0, DEFAULT_SWEEP_INTERVAL);
        cache.add(StubHandle::new("A", base, 1, false));
        assert_eq!(cache.sweep(), 1);

        cache.add(StubHandle::new("B", base, 2, false));
        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_set_max_open_does_not_evict() {
        let base = Instant::now();
        let cache = OpenIndexCache::default();
        let a = StubHandle::new("A", base, 1, false);
        cache.add(a.clone());
        cache.set_max_open(0);
        assert_eq!(cache.max_open(), 0);
        assert!(!a.is_closed_now());

        let handle: Arc<dyn IndexIO> = a;
        assert!(cache.remove(handle.as_ref()));
        assert!(!cache.remove(handle.as_ref()));
        assert!(cache.is_empty());
    }
}
