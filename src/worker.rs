//! Worker pools with per-worker task queues
//!
//! Each worker is a tokio task draining its own unbounded queue of closures,
//! so everything posted to one worker runs sequentially and in order. An
//! owner (a connection or bridge stream) takes a [`WorkerLease`] from the
//! least-loaded worker when it is created and keeps that affinity for its
//! whole life; the lease releases the load slot when dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Job {
    Run(Task),
    Stop,
}

/// A single queue-draining task
pub struct Worker {
    id: usize,
    pool: &'static str,
    tx: mpsc::UnboundedSender<Job>,
    load: AtomicUsize,
    stopped: AtomicBool,
}

impl Worker {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of owners currently leased to this worker
    pub fn load(&self) -> usize {
        self.load.load(Ordering::Relaxed)
    }

    /// Queue `f` to run on this worker
    ///
    /// Returns false if the worker has stopped and the task was dropped.
    pub fn task<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(Job::Run(Box::new(f))).is_ok()
    }
}

/// Affinity to one worker, held by the owner for its lifetime
pub struct WorkerLease {
    worker: Arc<Worker>,
}

impl WorkerLease {
    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn task<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.worker.task(f)
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.worker.load.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("pool", &self.worker.pool)
            .field("worker", &self.worker.id)
            .finish()
    }
}

/// Fixed set of workers
pub struct WorkerPool {
    name: &'static str,
    workers: Vec<Arc<Worker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `count` workers on the current tokio runtime
    pub fn start(name: &'static str, count: usize) -> Self {
        let count = count.max(1);
        let mut workers = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            workers.push(Arc::new(Worker {
                id,
                pool: name,
                tx,
                load: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
            }));
            handles.push(tokio::spawn(run_worker(name, id, rx)));
        }

        tracing::debug!(pool = name, workers = count, "Worker pool started");

        Self {
            name,
            workers,
            handles: Mutex::new(handles),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Lease the least-loaded worker (lowest id on ties)
    pub fn lease(&self) -> WorkerLease {
        let worker = self
            .workers
            .iter()
            .min_by_key(|w| (w.load(), w.id))
            .cloned()
            .unwrap_or_else(|| self.workers[0].clone());
        worker.load.fetch_add(1, Ordering::Relaxed);
        WorkerLease { worker }
    }

    /// Stop every worker after its queued tasks have run
    pub async fn close(&self) {
        for worker in &self.workers {
            worker.stopped.store(true, Ordering::Release);
            let _ = worker.tx.send(Job::Stop);
        }

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(pool = self.name, error = %e, "Worker task ended abnormally");
            }
        }

        tracing::debug!(pool = self.name, "Worker pool closed");
    }
}

async fn run_worker(pool: &'static str, id: usize, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Run(task) => {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(pool = pool, worker = id, "Worker task panicked");
                }
            }
            Job::Stop => break,
        }
    }
}
