//! Fixed-size pool of worker threads.
//!
//! Jobs are queued on an unbounded channel and picked up by whichever worker
//! is free. Dropping or shutting down the pool closes the queue; workers
//! finish everything already queued and then exit.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::BatchTaskError;

/// Workers used when nothing else is configured.
pub const DEFAULT_WORKERS: usize = 5;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(id: usize, queue: Arc<Mutex<Receiver<Job>>>) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("pdf-seal-worker-{}", id))
            .spawn(move || loop {
                // The guard is released before the job runs.
                let next = match queue.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(poisoned) => poisoned.into_inner().recv(),
                };
                match next {
                    Ok(job) => {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            log::error!("Worker {}: job panicked", id);
                        }
                    },
                    Err(_) => {
                        log::debug!("Worker {}: queue closed, exiting", id);
                        break;
                    },
                }
            })?;
        Ok(Self {
            id,
            handle: Some(handle),
        })
    }
}

/// Owned pool of worker threads.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<Worker>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("open", &self.sender.is_some())
            .finish()
    }
}

impl WorkerPool {
    /// Start `size` workers (at least one).
    pub fn new(size: usize) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let queue = Arc::new(Mutex::new(receiver));
        let workers = (0..size.max(1))
            .map(|id| Worker::spawn(id, Arc::clone(&queue)))
            .collect::<std::io::Result<Vec<_>>>()?;

        log::debug!("Started worker pool with {} thread(s)", workers.len());
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Pool with [`DEFAULT_WORKERS`] threads.
    pub fn with_default_size() -> std::io::Result<Self> {
        Self::new(DEFAULT_WORKERS)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Fails only after [`shutdown`](Self::shutdown).
    pub fn execute<F>(&self, job: F) -> Result<(), BatchTaskError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .ok_or(BatchTaskError::WorkerLost)?
            .send(Box::new(job))
            .map_err(|_| BatchTaskError::WorkerLost)
    }

    /// Stop accepting jobs, let queued jobs finish, and join every worker.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    log::error!("Worker {} terminated abnormally", worker.id);
                }
            }
        }
        log::debug!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
