//! Persistent worker pool for backoff fan-out
//!
//! Backoff strategies dispatch a small, fixed number of recommendation
//! sub-calls per request. Workers stay alive and read tasks from a bounded
//! channel, so a request pays for a channel send instead of a thread spawn.
//!
//! # Design
//!
//! ```text
//!   spawn / execute ──> bounded channel (num_threads * 4) ──> worker 0..N (recv)
//! ```
//!
//! A task submitted from inside a worker, or while the queue is full, runs on
//! the submitting thread. Sub-calls that wait on other sub-calls therefore
//! never starve the pool.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

static SHARED_POOL: LazyLock<Arc<WorkerPool>> = LazyLock::new(|| {
    let num_threads = num_cpus::get();
    Arc::new(WorkerPool::new(num_threads))
});

/// Process-wide pool sized to the number of CPUs.
pub fn shared_pool() -> Arc<WorkerPool> {
    Arc::clone(&SHARED_POOL)
}

thread_local! {
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of worker threads fed through a bounded channel.
pub struct WorkerPool {
    sender: Sender<BoxedTask>,
    workers: Vec<JoinHandle<()>>,
    num_threads: usize,
}

impl WorkerPool {
    /// Spawn `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let (sender, receiver) = bounded::<BoxedTask>(num_threads * 4);

        let workers = (0..num_threads)
            .map(|id| {
                let rx = receiver.clone();
                thread::Builder::new()
                    .name(format!("schematree-worker-{}", id))
                    .spawn(move || worker_loop(rx))
                    .expect("failed to spawn schematree worker thread")
            })
            .collect();

        debug!(target: "schematree::pool", num_threads, "worker pool started");
        Self {
            sender,
            workers,
            num_threads,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Run `f` on a worker without waiting for it.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if IN_WORKER.with(Cell::get) {
            f();
            return;
        }
        match self.sender.try_send(Box::new(f)) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => task(),
        }
    }

    /// Run `f` on a worker and return a handle to its result.
    pub fn spawn<F, R>(&self, f: F) -> ResultReceiver<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_sender, result_receiver) = bounded(1);
        self.execute(move || {
            // Receiver may have been dropped
            let _ = result_sender.send(f());
        });
        ResultReceiver {
            receiver: result_receiver,
        }
    }

    /// Close the queue and wait for every worker to finish its current task.
    pub fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

fn worker_loop(receiver: Receiver<BoxedTask>) {
    IN_WORKER.with(|flag| flag.set(true));
    while let Ok(task) = receiver.recv() {
        // A panicking task drops its result sender; the waiting side sees a
        // RecvError instead of hanging.
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(target: "schematree::pool", "task panicked");
        }
    }
}

/// Handle to the result of a spawned task.
pub struct ResultReceiver<T> {
    receiver: Receiver<T>,
}

impl<T> ResultReceiver<T> {
    /// Block until the result is available.
    pub fn recv(self) -> Result<T, RecvError> {
        self.receiver.recv().map_err(|_| RecvError)
    }
}

/// The task was dropped before producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl std::fmt::Display for RecvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task finished without producing a result")
    }
}

impl std::error::Error for RecvError {}
