//! Worker Pool
//!
//! ```text
//!   submit ──► [bounded channel] ──► worker-0
//!                                ├─► worker-1
//!                                └─► worker-N
//! ```
//!
//! Workers exit when the sending side is dropped by `shutdown`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, TierError};

use super::{Scheduler, Task, TaskHandle};

struct Job {
    task: Task,
    done: Sender<Result<()>>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    running: AtomicU64,
}

/// Tasks submitted but not yet finished, with a condvar for `wait_idle`
#[derive(Default)]
struct Outstanding {
    count: Mutex<u64>,
    idle: Condvar,
}

impl Outstanding {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Fixed-size thread pool fed by a channel
pub struct WorkerPool {
    name: String,
    threads: usize,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    outstanding: Arc<Outstanding>,
}

impl WorkerPool {
    /// Spawn `threads` workers sharing a queue of `queue_depth` tasks
    pub fn new(name: impl Into<String>, threads: usize, queue_depth: usize) -> Result<Self> {
        Self::spawn(name.into(), threads, channel::bounded(queue_depth.max(1)))
    }

    /// Pool whose `submit` never blocks. For tasks that submit follow-up tasks
    /// from inside a worker, where a full bounded queue could deadlock.
    pub fn unbounded(name: impl Into<String>, threads: usize) -> Result<Self> {
        Self::spawn(name.into(), threads, channel::unbounded())
    }

    fn spawn(name: String, threads: usize, (sender, receiver): (Sender<Job>, Receiver<Job>)) -> Result<Self> {
        let counters = Arc::new(Counters::default());
        let outstanding = Arc::new(Outstanding::default());

        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads.max(1) {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let outstanding = Arc::clone(&outstanding);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, idx))
                .spawn(move || worker_loop(receiver, counters, outstanding))?;
            workers.push(handle);
        }

        tracing::debug!(pool = %name, threads = workers.len(), "Worker pool started");

        Ok(Self {
            name,
            threads: workers.len(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
            outstanding,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until every submitted task has finished
    pub fn wait_idle(&self) {
        let mut count = self.outstanding.count.lock();
        while *count > 0 {
            self.outstanding.idle.wait(&mut count);
        }
    }

    /// Stop accepting tasks, drain the queue and join the workers
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!(pool = %self.name, "Worker thread panicked");
            }
        }
        tracing::debug!(pool = %self.name, "Worker pool stopped");
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            threads: self.threads,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            running: self.counters.running.load(Ordering::Relaxed),
            queued: self
                .sender
                .lock()
                .as_ref()
                .map(|s| s.len())
                .unwrap_or(0),
        }
    }
}

impl Scheduler for WorkerPool {
    fn submit(&self, task: Task) -> Result<TaskHandle> {
        // Clone the sender so a full queue does not hold the lock
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| TierError::Cancelled(format!("{} is shut down", self.name)))?;

        let (done_tx, done_rx) = channel::bounded(1);
        self.outstanding.add();
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if sender.send(Job { task, done: done_tx }).is_err() {
            self.outstanding.finish();
            return Err(TierError::Cancelled(format!("{} is shut down", self.name)));
        }
        Ok(TaskHandle::new(done_rx))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.stats())
    }
}

fn worker_loop(receiver: Receiver<Job>, counters: Arc<Counters>, outstanding: Arc<Outstanding>) {
    for job in receiver.iter() {
        counters.running.fetch_add(1, Ordering::Relaxed);
        let result = panic::catch_unwind(AssertUnwindSafe(job.task))
            .unwrap_or_else(|_| Err(TierError::Storage("task panicked".to_string())));
        counters.running.fetch_sub(1, Ordering::Relaxed);

        match &result {
            Ok(()) => counters.completed.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                tracing::debug!(error = %e, "Task failed");
                counters.failed.fetch_add(1, Ordering::Relaxed)
            }
        };

        // Submitter may have dropped the handle
        let _ = job.done.send(result);
        outstanding.finish();
    }
}

/// Counters of one worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub threads: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub running: u64,
    pub queued: usize,
}

impl fmt::Display for WorkerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<threads={}, submitted={}, completed={}, failed={}, running={}, queued={}>",
            self.threads, self.submitted, self.completed, self.failed, self.running, self.queued
        )
    }
}
