//! Allocator Adapter
//!
//! Page memory is drawn from an `Allocator`. The engine only relies on the trait;
//! `SizeClassAllocator` is the in-crate implementation: it rounds every request up
//! to a power-of-two size class and enforces a global byte limit shared by all
//! buffer pools.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{Result, TierError};

/// Smallest size class handed out
pub const MIN_SIZE_CLASS: usize = 64;

/// Memory source for buffer pages
pub trait Allocator: Send + Sync {
    /// Size class a request of `size` bytes is charged as
    fn size_class(&self, size: usize) -> usize;

    /// Charge `size_class(size)` bytes against the arena without handing out memory.
    /// Used when the buffer already exists (pages read back from disk).
    fn reserve(&self, size: usize) -> Result<usize>;

    /// Allocate an empty buffer able to hold `size` bytes without reallocating.
    /// The caller is charged `size_class(size)` bytes until `release`.
    fn allocate(&self, size: usize) -> Result<Vec<u8>> {
        let class = self.reserve(size)?;
        Ok(Vec::with_capacity(class))
    }

    /// Return `class` bytes previously charged by `allocate`
    fn release(&self, class: usize);

    /// Bytes currently charged
    fn allocated(&self) -> usize;
}

/// Power-of-two size-classed allocator with a hard limit
pub struct SizeClassAllocator {
    limit: usize,
    allocated: AtomicUsize,
    allocations: AtomicU64,
    failures: AtomicU64,
}

impl SizeClassAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            allocated: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Allocator for SizeClassAllocator {
    fn size_class(&self, size: usize) -> usize {
        size.max(MIN_SIZE_CLASS).next_power_of_two()
    }

    fn reserve(&self, size: usize) -> Result<usize> {
        let class = self.size_class(size);
        let reserved = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(class)?;
                (next <= self.limit).then_some(next)
            });

        if reserved.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(TierError::OutOfCapacity(format!(
                "allocator limit {} reached ({} in use, {} requested)",
                self.limit,
                self.allocated(),
                class
            )));
        }

        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(class)
    }

    fn release(&self, class: usize) {
        let previous = self.allocated.fetch_sub(class, Ordering::AcqRel);
        debug_assert!(previous >= class, "allocator released more than it handed out");
    }

    fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }
}

impl fmt::Display for SizeClassAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocator<limit={}, allocated={}, allocations={}, failures={}>",
            self.limit,
            self.allocated(),
            self.allocations.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed)
        )
    }
}
