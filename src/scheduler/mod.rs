//! Scheduler Module
//!
//! Bounded-concurrency task submission.
//!
//! ## Responsibilities
//! - `Scheduler` is the seam the engine submits work through
//! - `WorkerPool` is the in-crate implementation: a fixed set of OS threads
//!   draining a bounded crossbeam channel
//! - `TaskHandle` lets the submitter wait for a task's outcome
//!
//! Two pools run per `Db`: the general worker pool (scans, table creation) and
//! the flush executor's pool, so flushing never queues behind scans.

mod pool;

use crossbeam::channel::Receiver;

use crate::error::{Result, TierError};

pub use pool::{WorkerPool, WorkerStats};

/// Unit of work run by a scheduler
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Something that runs tasks with bounded concurrency
pub trait Scheduler: Send + Sync {
    /// Queue `task`. Blocks while the queue is full; fails `Cancelled` after shutdown.
    fn submit(&self, task: Task) -> Result<TaskHandle>;
}

/// Completion handle of a submitted task
#[derive(Debug)]
pub struct TaskHandle {
    done: Receiver<Result<()>>,
}

impl TaskHandle {
    pub(crate) fn new(done: Receiver<Result<()>>) -> Self {
        Self { done }
    }

    /// Block until the task finishes and return its result
    pub fn wait(self) -> Result<()> {
        self.done.recv().unwrap_or_else(|_| {
            Err(TierError::Cancelled(
                "task dropped before completion".to_string(),
            ))
        })
    }

    /// Result if the task already finished
    pub fn try_wait(&self) -> Option<Result<()>> {
        self.done.try_recv().ok()
    }
}
