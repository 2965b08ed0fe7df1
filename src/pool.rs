//! Bounded worker pool with caller-runs backpressure.
//!
//! Jobs go through a `crossbeam_channel::bounded` queue. When the queue is full
//! the submitting thread runs the job itself, which throttles the producer to
//! the pace of the workers without ever dropping work.

use crate::config::PoolConfig;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce(WorkerId) + Send + 'static>;

/// Which thread is running a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerId {
    Worker(usize),
    /// The submitting thread, running a job it could not enqueue
    Caller,
}

impl WorkerId {
    /// Dense slot index: the caller is slot 0, worker `i` is slot `i + 1`.
    pub fn slot(self) -> usize {
        match self {
            WorkerId::Caller => 0,
            WorkerId::Worker(i) => i + 1,
        }
    }
}

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    workers: usize,
    capacity: usize,
    active: Arc<AtomicUsize>,
    caller_runs: AtomicU64,
}

impl WorkerPool {
    /// Spawns the workers. Zero workers means every job runs on the caller.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let workers = config.worker_count();
        let capacity = config.capacity(workers);
        let active = Arc::new(AtomicUsize::new(0));

        if workers == 0 {
            debug!("Worker pool running inline");
            return Ok(Self {
                sender: None,
                handles: Vec::new(),
                workers,
                capacity,
                active,
                caller_runs: AtomicU64::new(0),
            });
        }

        let (sender, receiver) = bounded::<Job>(capacity);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let active = Arc::clone(&active);
            let handle = thread::Builder::new()
                .name(format!("ariadne-worker-{}", index))
                .spawn(move || worker_loop(index, receiver, active))
                .with_context(|| format!("Failed to spawn worker thread {}", index))?;
            handles.push(handle);
        }

        debug!(workers, capacity, "Worker pool started");
        Ok(Self {
            sender: Some(sender),
            handles,
            workers,
            capacity,
            active,
            caller_runs: AtomicU64::new(0),
        })
    }

    /// Enqueues `job`, or runs it right here when the queue is full.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce(WorkerId) + Send + 'static,
    {
        let job: Job = Box::new(job);
        let job = match &self.sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => return,
                Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => job,
            },
            None => job,
        };
        self.caller_runs.fetch_add(1, Ordering::Relaxed);
        run_job(job, WorkerId::Caller);
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Execution slots including the caller, for sizing a [`WorkerLocal`].
    pub fn slot_count(&self) -> usize {
        self.workers + 1
    }

    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }

    /// Workers currently inside a job.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn caller_runs(&self) -> u64 {
        self.caller_runs.load(Ordering::Relaxed)
    }

    /// Closes the queue and waits for every queued job to finish.
    pub fn shutdown(mut self) {
        self.join_workers();
    }

    fn join_workers(&mut self) {
        drop(self.sender.take());
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_workers();
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>, active: Arc<AtomicUsize>) {
    for job in receiver.iter() {
        active.fetch_add(1, Ordering::Relaxed);
        run_job(job, WorkerId::Worker(index));
        active.fetch_sub(1, Ordering::Relaxed);
    }
}

fn run_job(job: Job, worker: WorkerId) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(worker))) {
        error!(?worker, panic = %panic_message(payload.as_ref()), "Job panicked");
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One lazily created `T` per execution slot.
///
/// Each slot is only ever touched by the thread owning that [`WorkerId`], so
/// the locks are uncontended.
pub struct WorkerLocal<T> {
    slots: Vec<Mutex<Option<T>>>,
}

impl<T> WorkerLocal<T> {
    pub fn new(slot_count: usize) -> Self {
        let slots = (0..slot_count.max(1)).map(|_| Mutex::new(None)).collect();
        Self { slots }
    }

    pub fn with<R>(&self, worker: WorkerId, init: impl FnOnce() -> T, f: impl FnOnce(&mut T) -> R) -> R {
        let slot = &self.slots[worker.slot() % self.slots.len()];
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.get_or_insert_with(init))
    }
}
