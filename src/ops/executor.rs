//! Flush Executor
//!
//! Dedicated pool for ops, separate from the scan/create worker pool.
//!
//! ## Failure Handling
//! - Retryable errors: the op is deferred and re-submitted on the next flush
//!   cycle (the next `schedule` or `wait_idle`), up to `flush_retry_limit` runs
//! - `Corruption`: the executor turns fatal; queued ops become no-ops, new
//!   ops are refused, and `health()` reports the cause

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, TierError};
use crate::scheduler::{Scheduler, WorkerPool};

use super::Op;

struct Deferred {
    op: Op,
    attempts: u32,
}

struct Shared {
    retry_limit: u32,
    deferred: Mutex<Vec<Deferred>>,
    fatal: Mutex<Option<String>>,
    scheduled: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
}

impl Shared {
    fn check_fatal(&self) -> Result<()> {
        match self.fatal.lock().as_ref() {
            Some(cause) => Err(TierError::Corruption(cause.clone())),
            None => Ok(()),
        }
    }

    fn run(&self, op: Op, attempts: u32) -> Result<()> {
        if let Err(e) = self.check_fatal() {
            self.abandoned.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let result = op.execute();
        match &result {
            Ok(()) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e @ TierError::Corruption(_)) => {
                tracing::error!(op = ?op, error = %e, "Flush pipeline corrupted, refusing further flushes");
                self.fatal.lock().get_or_insert_with(|| e.to_string());
                self.abandoned.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_retryable() && attempts + 1 < self.retry_limit => {
                tracing::warn!(op = ?op, attempt = attempts + 1, error = %e, "Flush op failed, deferring");
                self.deferred.lock().push(Deferred {
                    op,
                    attempts: attempts + 1,
                });
            }
            Err(e) => {
                tracing::error!(op = ?op, attempts = attempts + 1, error = %e, "Flush op abandoned");
                self.abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }
}

/// Runs flush ops with deferral and fatal escalation
pub struct FlushExecutor {
    pool: WorkerPool,
    shared: Arc<Shared>,
}

impl FlushExecutor {
    pub fn new(threads: usize, retry_limit: u32) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::unbounded("flush", threads)?,
            shared: Arc::new(Shared {
                retry_limit: retry_limit.max(1),
                deferred: Mutex::new(Vec::new()),
                fatal: Mutex::new(None),
                scheduled: AtomicU64::new(0),
                succeeded: AtomicU64::new(0),
                retried: AtomicU64::new(0),
                abandoned: AtomicU64::new(0),
            }),
        })
    }

    /// Queue `op`, first re-submitting ops deferred by earlier failures
    pub fn schedule(&self, op: Op) -> Result<()> {
        self.shared.check_fatal()?;
        self.resubmit_deferred()?;
        self.shared.scheduled.fetch_add(1, Ordering::Relaxed);
        self.submit(op, 0)
    }

    /// Wait for every queued op, running deferred retries until none remain
    pub fn wait_idle(&self) -> Result<()> {
        loop {
            self.pool.wait_idle();
            if self.shared.check_fatal().is_err() || self.shared.deferred.lock().is_empty() {
                break;
            }
            self.resubmit_deferred()?;
        }
        self.health()
    }

    /// `Corruption` once any op hit an unrecoverable inconsistency
    pub fn health(&self) -> Result<()> {
        self.shared.check_fatal()
    }

    /// Stop the pool; deferred ops are dropped
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.shared.deferred.lock().clear();
    }

    pub fn stats(&self) -> FlushStats {
        FlushStats {
            scheduled: self.shared.scheduled.load(Ordering::Relaxed),
            succeeded: self.shared.succeeded.load(Ordering::Relaxed),
            retried: self.shared.retried.load(Ordering::Relaxed),
            abandoned: self.shared.abandoned.load(Ordering::Relaxed),
            deferred: self.shared.deferred.lock().len(),
            fatal: self.shared.fatal.lock().is_some(),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn resubmit_deferred(&self) -> Result<()> {
        let deferred: Vec<Deferred> = std::mem::take(&mut *self.shared.deferred.lock());
        for item in deferred {
            self.shared.retried.fetch_add(1, Ordering::Relaxed);
            self.submit(item.op, item.attempts)?;
        }
        Ok(())
    }

    fn submit(&self, op: Op, attempts: u32) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.pool
            .submit(Box::new(move || shared.run(op, attempts)))?;
        Ok(())
    }
}

/// Counters of the flush executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub scheduled: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub deferred: usize,
    pub fatal: bool,
}

impl fmt::Display for FlushStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flush<scheduled={}, succeeded={}, retried={}, abandoned={}, deferred={}, fatal={}>",
            self.scheduled, self.succeeded, self.retried, self.abandoned, self.deferred, self.fatal
        )
    }
}
