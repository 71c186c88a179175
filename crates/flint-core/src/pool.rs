//! Fixed-size pool of named worker threads.
//!
//! Tasks are boxed closures sent over a channel. Shutting the pool down
//! closes the channel and raises a stop signal: queued tasks that have not
//! started yet are discarded, running tasks finish on their own.

use crate::error::{FlintError, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

const EXIT_POLL: Duration = Duration::from_millis(10);

/// A fixed-size thread pool.
pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Mutex<Option<Sender<Task>>>,
    stop_signal: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    done_rx: Receiver<()>,
}

impl WorkerPool {
    /// Start `size` threads named `{name}-{n}`.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let stop_signal = Arc::new(AtomicBool::new(false));

        let mut threads = Vec::with_capacity(size);
        for n in 0..size {
            let receiver = receiver.clone();
            let done_tx = done_tx.clone();
            let stop_signal = stop_signal.clone();
            let thread = thread::Builder::new()
                .name(format!("{}-{}", name, n))
                .spawn(move || {
                    run_tasks(receiver, stop_signal);
                    let _ = done_tx.send(());
                })?;
            threads.push(thread);
        }

        debug!(pool = %name, threads = size, "Started worker pool");
        Ok(WorkerPool {
            name: name.to_string(),
            size,
            sender: Mutex::new(Some(sender)),
            stop_signal,
            threads: Mutex::new(threads),
            done_rx,
        })
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task. Fails once the pool is shut down.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(Box::new(task))
                .map_err(|_| FlintError::ShuttingDown),
            None => Err(FlintError::ShuttingDown),
        }
    }

    /// Whether the pool no longer accepts tasks
    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting tasks and discard queued tasks that have not started.
    pub fn shutdown_now(&self) {
        self.stop_signal.store(true, Ordering::Release);
        if self.sender.lock().take().is_some() {
            debug!(pool = %self.name, "Worker pool shutting down");
        }
    }

    /// Wait for every thread to exit, up to `timeout`.
    ///
    /// Returns false if some threads were still running at the deadline.
    /// Only threads that already exited are joined, so the wait never
    /// outlasts the deadline.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut threads = self.threads.lock();

        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                threads.drain(..).partition(|t| t.is_finished());
            *threads = running;
            for thread in finished {
                let _ = thread.join();
            }
            if threads.is_empty() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(pool = %self.name, running = threads.len(), "Worker pool did not terminate in time");
                return false;
            }
            // A thread signals just before it exits; poll until it is finished
            let _ = self.done_rx.recv_timeout(remaining.min(EXIT_POLL));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn run_tasks(receiver: Receiver<Task>, stop_signal: Arc<AtomicBool>) {
    for task in receiver.iter() {
        if stop_signal.load(Ordering::Acquire) {
            continue;
        }
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Worker pool task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_tasks() {
        let pool = WorkerPool::new("test", 4).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for n in 0..20 {
            let tx = tx.clone();
            pool.execute(move || {
                let _ = tx.send(n);
            })
            .unwrap();
        }

        let mut seen: Vec<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_thread_names() {
        let pool = WorkerPool::new("indexing", 1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(move || {
            let _ = tx.send(thread::current().name().map(String::from));
        })
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("indexing-0"));
    }

    #[test]
    fn test_panicking_task_keeps_thread_alive() {
        let pool = WorkerPool::new("test", 1).unwrap();
        pool.execute(|| panic!("task bug")).unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(move || {
            let _ = tx.send(());
        })
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_shutdown_discards_pending_and_rejects_new() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let ran = Arc::new(AtomicUsize::new(0));

        pool.execute(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..5 {
            let ran = ran.clone();
            pool.execute(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown_now();
        assert!(matches!(pool.execute(|| {}), Err(FlintError::ShuttingDown)));

        drop(gate_tx);
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_await_termination_times_out() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        pool.execute(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.shutdown_now();
        let start = Instant::now();
        assert!(!pool.await_termination(Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_secs(2));

        drop(gate_tx);
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_await_termination_with_busy_and_idle_threads() {
        let pool = WorkerPool::new("test", 3).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        pool.execute(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Idle threads exit right away, the busy one keeps the pool alive
        pool.shutdown_now();
        let start = Instant::now();
        assert!(!pool.await_termination(Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.threads.lock().len(), 1);

        drop(gate_tx);
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert!(pool.threads.lock().is_empty());
    }
}
