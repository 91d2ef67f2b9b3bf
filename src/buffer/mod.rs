//! Buffer Pool Managers
//!
//! Column data lives in pages, one page per (block, column). Three pools hold pages
//! at different stages of their life:
//!
//! ```text
//!   write path ──► mutable ──FlushBlock──► flushed ──Commit──► durable ◄── block files
//!                 (retained)              (retained)          (evictable)
//! ```
//!
//! ## Responsibilities
//! - Bounded memory per tier with LRU eviction of unpinned, unretained pages
//! - Lock-light pinning for readers (read lock + atomic refcount)
//! - Tier transitions that never leave a window where a page is in no pool
//!
//! A page is retained until its block file is committed: before that the pool copy
//! is the only copy, so it must not be evicted.

mod page;
mod pool;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::alloc::{Allocator, SizeClassAllocator};
use crate::config::Config;
use crate::error::{Result, TierError};

pub use page::{Page, PageHandle};
pub use pool::{BufferPool, PoolSummary};

/// Identifies one column page of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub block_id: u64,
    pub column: u32,
}

impl PageKey {
    pub fn new(block_id: u64, column: usize) -> Self {
        Self {
            block_id,
            column: column as u32,
        }
    }
}

/// Buffer tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Mutable,
    Flushed,
    Durable,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Mutable => "mutable",
            Tier::Flushed => "flushed",
            Tier::Durable => "durable",
        };
        f.write_str(name)
    }
}

/// The three pools plus the allocator they draw from
pub struct BufferManagers {
    pub mutable: BufferPool,
    pub flushed: BufferPool,
    pub durable: BufferPool,
    allocator: Arc<SizeClassAllocator>,
}

impl BufferManagers {
    pub fn new(config: &Config) -> Self {
        let allocator = Arc::new(SizeClassAllocator::new(config.allocator_limit));
        let shared: Arc<dyn Allocator> = allocator.clone();
        let timeout = Duration::from_millis(config.pool_acquire_timeout_ms);

        Self {
            mutable: BufferPool::new(
                "mutable",
                Tier::Mutable,
                config.mutable_pool_capacity,
                Arc::clone(&shared),
                timeout,
            ),
            flushed: BufferPool::new(
                "flushed",
                Tier::Flushed,
                config.flushed_pool_capacity,
                Arc::clone(&shared),
                timeout,
            ),
            durable: BufferPool::new(
                "durable",
                Tier::Durable,
                config.durable_pool_capacity,
                shared,
                timeout,
            ),
            allocator,
        }
    }

    pub fn allocator(&self) -> &SizeClassAllocator {
        &self.allocator
    }

    /// Pin `key` from the first tier holding it, searching the way pages mature
    pub fn locate(&self, key: PageKey) -> Option<PageHandle> {
        self.mutable
            .pin(key)
            .or_else(|| self.flushed.pin(key))
            .or_else(|| self.durable.pin(key))
    }

    /// Move all `keys` from mutable to flushed.
    ///
    /// Every page is adopted by the flushed pool before any is detached from the
    /// mutable pool, so on failure the mutable tier still owns everything.
    pub(crate) fn mature_to_flushed(&self, keys: &[PageKey]) -> Result<()> {
        let mut adopted = Vec::with_capacity(keys.len());
        for key in keys {
            if self.flushed.contains(*key) {
                continue;
            }
            let page = self.mutable.peek(*key).ok_or_else(|| {
                TierError::Corruption(format!(
                    "page for block {} column {} missing from mutable pool",
                    key.block_id, key.column
                ))
            })?;
            if let Err(e) = self.flushed.adopt(Arc::clone(&page), true) {
                // Undo without releasing memory; the mutable pool still charges it
                for key in &adopted {
                    if let Some(page) = self.flushed.detach(*key) {
                        self.mutable.reclaim(&page);
                    }
                }
                return Err(e);
            }
            adopted.push(*key);
        }

        for key in keys {
            self.mutable.detach(*key);
        }
        Ok(())
    }

    /// Move committed pages into the durable tier, or drop them if it has no room.
    ///
    /// After commit a page can always be reloaded from its block file, so losing
    /// it here only costs a later read.
    pub(crate) fn mature_to_durable(&self, keys: &[PageKey]) {
        for key in keys {
            let Some(page) = self.flushed.peek(*key).or_else(|| self.mutable.peek(*key)) else {
                continue;
            };
            if self.durable.try_adopt(&page, false) {
                if self.flushed.detach(*key).is_none() {
                    self.mutable.detach(*key);
                }
            } else {
                page.set_retained(false);
                if !self.flushed.remove(*key) {
                    self.mutable.remove(*key);
                }
            }
        }
    }

    /// Drop any copy of `keys` still held by the mutable tier (failed writes)
    pub(crate) fn discard_mutable(&self, keys: &[PageKey]) {
        for key in keys {
            self.mutable.remove(*key);
        }
    }

    pub fn summaries(&self) -> [PoolSummary; 3] {
        [
            self.mutable.summary(),
            self.flushed.summary(),
            self.durable.summary(),
        ]
    }
}

impl fmt::Display for BufferManagers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.mutable)?;
        writeln!(f, "{}", self.flushed)?;
        writeln!(f, "{}", self.durable)?;
        write!(f, "{}", self.allocator)
    }
}
