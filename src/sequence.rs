//! Sequence Generator
//!
//! Hands out monotonically increasing OpIndex values. One generator is owned by
//! the `Db` and injected into whoever needs fresh indices; there is no process-wide
//! counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic OpIndex source
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicU64,
}

impl SequenceGenerator {
    /// Create a generator whose first `next()` returns `last + 1`
    pub fn new(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Allocate the next index
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last index handed out (0 if none)
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Make sure future indices are greater than `seen`
    pub fn advance_past(&self, seen: u64) {
        self.last.fetch_max(seen, Ordering::SeqCst);
    }
}
