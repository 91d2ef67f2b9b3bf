//! Buffer pages
//!
//! A `Page` holds the encoded bytes of one column of one block. `PageHandle` is
//! the pin: creating one increments the page refcount, dropping it decrements and
//! records the unpin time used for LRU eviction.
//!
//! A page moves between pools during tier transitions while readers may still
//! pin it, so the final unpin is reported to whichever pool owns the page at that
//! moment, not the pool the pin came from.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::pool::PoolInner;
use super::PageKey;

/// Columnar bytes of one (block, column)
pub struct Page {
    key: PageKey,
    data: RwLock<Vec<u8>>,
    /// Bytes charged against pool capacity and the allocator
    charged: usize,
    pins: AtomicUsize,
    /// Retained pages are never evicted (their only copy lives in memory)
    retained: AtomicBool,
    last_unpinned: AtomicU64,
    /// Pool currently holding the page
    owner: RwLock<Weak<PoolInner>>,
}

impl Page {
    pub(crate) fn new(
        key: PageKey,
        data: Vec<u8>,
        charged: usize,
        retained: bool,
        owner: &Arc<PoolInner>,
    ) -> Self {
        Self {
            key,
            data: RwLock::new(data),
            charged,
            pins: AtomicUsize::new(0),
            retained: AtomicBool::new(retained),
            last_unpinned: AtomicU64::new(0),
            owner: RwLock::new(Arc::downgrade(owner)),
        }
    }

    pub fn key(&self) -> PageKey {
        self.key
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn charged(&self) -> usize {
        self.charged
    }

    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    pub fn is_retained(&self) -> bool {
        self.retained.load(Ordering::Acquire)
    }

    pub(crate) fn set_retained(&self, retained: bool) {
        self.retained.store(retained, Ordering::Release);
    }

    pub(crate) fn last_unpinned(&self) -> u64 {
        self.last_unpinned.load(Ordering::Acquire)
    }

    pub(crate) fn set_owner(&self, pool: &Arc<PoolInner>) {
        *self.owner.write() = Arc::downgrade(pool);
    }

    fn owner(&self) -> Option<Arc<PoolInner>> {
        self.owner.read().upgrade()
    }

    pub(crate) fn is_evictable(&self) -> bool {
        self.pin_count() == 0 && !self.is_retained()
    }

    /// Run `f` over the encoded bytes under a shared lock
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.data.read();
        f(&data)
    }

    /// Append encoded bytes; only the table's writer calls this
    pub(crate) fn append(&self, f: impl FnOnce(&mut Vec<u8>)) {
        let mut data = self.data.write();
        f(&mut data);
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("key", &self.key)
            .field("len", &self.len())
            .field("charged", &self.charged)
            .field("pins", &self.pin_count())
            .field("retained", &self.is_retained())
            .finish()
    }
}

/// A pinned page. Unpins on drop.
pub struct PageHandle {
    page: Arc<Page>,
}

impl PageHandle {
    /// Pin `page`. Callers hold the owning pool's map lock so a zero-pin page
    /// cannot be evicted concurrently.
    pub(crate) fn pin(page: Arc<Page>) -> Self {
        page.pins.fetch_add(1, Ordering::AcqRel);
        Self { page }
    }

    pub fn key(&self) -> PageKey {
        self.page.key
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.page.read(f)
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        let previous = self.page.pins.fetch_sub(1, Ordering::AcqRel);
        if previous != 1 {
            return;
        }
        // None once the owning pool itself is gone
        if let Some(pool) = self.page.owner() {
            self.page.last_unpinned.store(pool.tick(), Ordering::Release);
            pool.notify_unpinned();
        }
    }
}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PageHandle").field(&self.page).finish()
    }
}
