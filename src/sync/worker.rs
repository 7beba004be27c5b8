//! Fixed-size worker pool for background sync work.

use crate::error::{Result, StoreError};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Result of a job running on the pool.
///
/// The result can be taken once; later calls report
/// [`StoreError::WorkerUnavailable`]. Dropping the handle does not cancel
/// the job.
pub struct JobHandle<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Handle whose result is already known.
    pub(crate) fn ready(result: Result<T>) -> Self {
        let (sender, receiver) = bounded(1);
        let _ = sender.send(result);
        Self { receiver }
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<T> {
        self.receiver
            .recv()
            .unwrap_or(Err(StoreError::WorkerUnavailable))
    }

    /// Block up to `timeout`. `None` means the job is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(StoreError::WorkerUnavailable)),
        }
    }

    /// Non-blocking check. `None` means the job is still running.
    pub fn try_get(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StoreError::WorkerUnavailable)),
        }
    }
}

/// Threads fed from a shared job queue.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size.max(1));

        for i in 0..size.max(1) {
            let receiver = receiver.clone();
            let worker = std::thread::Builder::new()
                .name(format!("topic-sync-worker-{i}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("background job panicked");
                        }
                    }
                })?;
            workers.push(worker);
        }

        debug!(workers = workers.len(), "worker pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. If the pool is shut down the handle reports
    /// [`StoreError::WorkerUnavailable`].
    pub fn submit<T, F>(&self, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = result_tx.send(job());
        });

        if let Some(sender) = &self.sender {
            // On failure the job (and its result sender) is dropped
            let _ = sender.send(job);
        }

        JobHandle {
            receiver: result_rx,
        }
    }

    /// Stop accepting jobs, let queued ones finish, and join the workers.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
