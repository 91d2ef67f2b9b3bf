//! Buffer Pool
//!
//! Fixed-capacity map from `PageKey` to pages.
//!
//! ## Concurrency
//! - `state`: RwLock over the page map. Hits (`pin`) take the read lock and bump
//!   an atomic refcount, so concurrent readers of resident pages never serialise.
//! - Inserting, evicting and moving pages take the write lock. Because every pin
//!   is created under the map lock, a page observed with zero pins under the write
//!   lock cannot gain one while it is being evicted.
//! - `acquire` waits on `signal` for an unpin when nothing is evictable.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::alloc::Allocator;
use crate::error::{Result, TierError};

use super::page::{Page, PageHandle};
use super::{PageKey, Tier};

/// Upper bound on a single wait for an unpin before re-checking the pool
const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Default)]
struct PoolState {
    pages: HashMap<PageKey, Arc<Page>>,
    /// Sum of `charged` over `pages`
    used: usize,
}

/// Shared pool internals; pages keep a weak reference to their owner for unpin
/// bookkeeping
pub(crate) struct PoolInner {
    name: String,
    tier: Tier,
    capacity: usize,
    acquire_timeout: Duration,
    allocator: Arc<dyn Allocator>,
    state: RwLock<PoolState>,
    clock: AtomicU64,
    signal_lock: Mutex<()>,
    signal: Condvar,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    /// Pages whose pin count dropped to zero while owned by this pool
    unpins: AtomicU64,
}

impl PoolInner {
    pub(crate) fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn notify_unpinned(&self) {
        self.unpins.fetch_add(1, Ordering::Relaxed);
        self.signal.notify_all();
    }

    /// Evict LRU pages until `need` more bytes fit. Called with the write lock held.
    fn make_room(&self, state: &mut PoolState, need: usize) -> bool {
        while state.used + need > self.capacity {
            let victim = state
                .pages
                .values()
                .filter(|p| p.is_evictable())
                .min_by_key(|p| p.last_unpinned())
                .map(|p| p.key());

            let Some(key) = victim else {
                return false;
            };
            if let Some(page) = state.pages.remove(&key) {
                state.used -= page.charged();
                self.allocator.release(page.charged());
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(pool = %self.name, block_id = key.block_id, column = key.column, "Evicted page");
            }
        }
        true
    }

    fn wait_for_unpin(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        let mut guard = self.signal_lock.lock();
        let slice = (deadline - now).min(WAIT_SLICE);
        self.signal.wait_for(&mut guard, slice);
        true
    }

    fn out_of_capacity(&self, key: PageKey, need: usize) -> TierError {
        let state = self.state.read();
        TierError::OutOfCapacity(format!(
            "{} pool cannot fit {} bytes for block {} column {} (capacity={}, used={}, pages={})",
            self.name,
            need,
            key.block_id,
            key.column,
            self.capacity,
            state.used,
            state.pages.len()
        ))
    }
}

/// One tier of page storage
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(
        name: impl Into<String>,
        tier: Tier,
        capacity: usize,
        allocator: Arc<dyn Allocator>,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                tier,
                capacity,
                acquire_timeout,
                allocator,
                state: RwLock::new(PoolState::default()),
                clock: AtomicU64::new(0),
                signal_lock: Mutex::new(()),
                signal: Condvar::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                unpins: AtomicU64::new(0),
            }),
        }
    }

    // =========================================================================
    // Pin / Acquire
    // =========================================================================

    /// Pin a resident page. Read lock only.
    pub fn pin(&self, key: PageKey) -> Option<PageHandle> {
        let state = self.inner.state.read();
        let page = state.pages.get(&key)?;
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        Some(PageHandle::pin(Arc::clone(page)))
    }

    /// Release a pin (same as dropping the handle)
    pub fn unpin(&self, handle: PageHandle) {
        drop(handle);
    }

    /// Return a pinned, evictable page for `key`, creating an empty one with room
    /// for `size_hint` bytes if absent.
    pub fn acquire(&self, key: PageKey, size_hint: usize) -> Result<PageHandle> {
        self.acquire_with(key, size_hint, false)
    }

    /// Like `acquire`, but a newly created page is retained (never evicted) until
    /// a tier transition clears it.
    pub(crate) fn acquire_retained(&self, key: PageKey, size_hint: usize) -> Result<PageHandle> {
        self.acquire_with(key, size_hint, true)
    }

    fn acquire_with(&self, key: PageKey, size_hint: usize, retained: bool) -> Result<PageHandle> {
        let inner = &self.inner;
        let class = inner.allocator.size_class(size_hint);
        if class > inner.capacity {
            return Err(inner.out_of_capacity(key, class));
        }

        let deadline = Instant::now() + inner.acquire_timeout;
        loop {
            {
                let mut state = inner.state.write();
                if let Some(page) = state.pages.get(&key) {
                    inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(PageHandle::pin(Arc::clone(page)));
                }

                if inner.make_room(&mut state, class) {
                    if let Ok(buffer) = inner.allocator.allocate(size_hint) {
                        inner.misses.fetch_add(1, Ordering::Relaxed);
                        let page = Arc::new(Page::new(key, buffer, class, retained, inner));
                        state.pages.insert(key, Arc::clone(&page));
                        state.used += class;
                        return Ok(PageHandle::pin(page));
                    }
                }
            }

            if !inner.wait_for_unpin(deadline) {
                return Err(inner.out_of_capacity(key, class));
            }
        }
    }

    /// Pin `key`, reading it with `load` on a miss. Used by the durable tier.
    pub fn get_or_load<F>(&self, key: PageKey, load: F) -> Result<PageHandle>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(handle) = self.pin(key) {
            return Ok(handle);
        }

        // I/O happens outside the map lock
        let data = load()?;
        let inner = &self.inner;
        let class = inner.allocator.size_class(data.len());
        if class > inner.capacity {
            return Err(inner.out_of_capacity(key, class));
        }

        let deadline = Instant::now() + inner.acquire_timeout;
        let mut data = Some(data);
        loop {
            {
                let mut state = inner.state.write();
                if let Some(page) = state.pages.get(&key) {
                    inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(PageHandle::pin(Arc::clone(page)));
                }

                if inner.make_room(&mut state, class) && inner.allocator.reserve(class).is_ok() {
                    inner.misses.fetch_add(1, Ordering::Relaxed);
                    let bytes = data.take().unwrap_or_default();
                    let page = Arc::new(Page::new(key, bytes, class, false, inner));
                    state.pages.insert(key, Arc::clone(&page));
                    state.used += class;
                    return Ok(PageHandle::pin(page));
                }
            }

            if !inner.wait_for_unpin(deadline) {
                return Err(inner.out_of_capacity(key, class));
            }
        }
    }

    // =========================================================================
    // Tier Transitions (flush pipeline only)
    // =========================================================================

    /// Shared reference to a resident page without pinning it
    pub(crate) fn peek(&self, key: PageKey) -> Option<Arc<Page>> {
        self.inner.state.read().pages.get(&key).cloned()
    }

    /// Take ownership of a page detached (or about to be detached) from another
    /// pool. Waits for room like `acquire`.
    pub(crate) fn adopt(&self, page: Arc<Page>, retained: bool) -> Result<()> {
        let inner = &self.inner;
        let key = page.key();
        let deadline = Instant::now() + inner.acquire_timeout;
        loop {
            if self.try_adopt(&page, retained) {
                return Ok(());
            }
            if !inner.wait_for_unpin(deadline) {
                return Err(inner.out_of_capacity(key, page.charged()));
            }
        }
    }

    /// Adopt without waiting. Returns false if the pool is full of unevictable pages.
    pub(crate) fn try_adopt(&self, page: &Arc<Page>, retained: bool) -> bool {
        let inner = &self.inner;
        let mut state = inner.state.write();
        if state.pages.contains_key(&page.key()) {
            return true;
        }
        if page.charged() > inner.capacity || !inner.make_room(&mut state, page.charged()) {
            return false;
        }
        page.set_retained(retained);
        page.set_owner(inner);
        state.used += page.charged();
        state.pages.insert(page.key(), Arc::clone(page));
        true
    }

    /// Remove a page whose memory now belongs to another pool
    pub(crate) fn detach(&self, key: PageKey) -> Option<Arc<Page>> {
        let mut state = self.inner.state.write();
        let page = state.pages.remove(&key)?;
        state.used -= page.charged();
        Some(page)
    }

    /// Hand a page detached from another pool back to this one, which never
    /// stopped charging it
    pub(crate) fn reclaim(&self, page: &Page) {
        page.set_owner(&self.inner);
    }

    /// Drop a page and return its memory to the allocator
    pub fn remove(&self, key: PageKey) -> bool {
        let mut state = self.inner.state.write();
        match state.pages.remove(&key) {
            Some(page) => {
                state.used -= page.charged();
                self.inner.allocator.release(page.charged());
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn tier(&self) -> Tier {
        self.inner.tier
    }

    pub fn contains(&self, key: PageKey) -> bool {
        self.inner.state.read().pages.contains_key(&key)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Bytes charged by resident pages
    pub fn used(&self) -> usize {
        self.inner.state.read().used
    }

    pub fn page_count(&self) -> usize {
        self.inner.state.read().pages.len()
    }

    /// Resident pages with at least one pin
    pub fn pinned_count(&self) -> usize {
        self.inner
            .state
            .read()
            .pages
            .values()
            .filter(|p| p.pin_count() > 0)
            .count()
    }

    /// Occupancy snapshot
    pub fn summary(&self) -> PoolSummary {
        let state = self.inner.state.read();
        PoolSummary {
            name: self.inner.name.clone(),
            tier: self.inner.tier,
            capacity: self.inner.capacity,
            used: state.used,
            pages: state.pages.len(),
            pinned: state.pages.values().filter(|p| p.pin_count() > 0).count(),
            retained: state.pages.values().filter(|p| p.is_retained()).count(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            unpins: self.inner.unpins.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.summary().fmt(f)
    }
}

/// Point-in-time occupancy of one pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSummary {
    pub name: String,
    pub tier: Tier,
    pub capacity: usize,
    pub used: usize,
    pub pages: usize,
    pub pinned: usize,
    pub retained: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub unpins: u64,
}

impl fmt::Display for PoolSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}<tier={}, capacity={}, used={}, pages={}, pinned={}, retained={}, hits={}, misses={}, evictions={}, unpins={}>",
            self.name,
            self.tier,
            self.capacity,
            self.used,
            self.pages,
            self.pinned,
            self.retained,
            self.hits,
            self.misses,
            self.evictions,
            self.unpins
        )
    }
}
