//! Segment and block iterators
//!
//! Cursor-style (`valid` / `next` / `get_handle` / `close`). Every iterator owns a
//! reference to the snapshot contents, so iterators can be moved to other
//! threads and several can walk one snapshot at once.

use std::sync::Arc;

use crate::catalog::{BlockId, SegmentId};
use crate::error::{Result, TierError};

use super::reader::PrefetchHandle;
use super::{BlockView, SnapshotInner};

/// Walks the segments of a snapshot
pub struct SegmentIterator {
    inner: Arc<SnapshotInner>,
    pos: usize,
    closed: bool,
}

impl SegmentIterator {
    pub(crate) fn new(inner: Arc<SnapshotInner>) -> Self {
        Self {
            inner,
            pos: 0,
            closed: false,
        }
    }

    pub fn valid(&self) -> bool {
        !self.closed && !self.inner.is_closed() && self.pos < self.inner.segments().len()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        if self.valid() {
            self.pos += 1;
        }
    }

    /// Handle to the current segment, `None` past the end
    pub fn get_handle(&self) -> Option<SegmentHandle> {
        self.valid().then(|| SegmentHandle {
            inner: Arc::clone(&self.inner),
            segment: self.pos,
        })
    }

    /// Idempotent
    pub fn close(&mut self) {
        self.closed = true;
    }
}

/// One segment of a snapshot
pub struct SegmentHandle {
    inner: Arc<SnapshotInner>,
    segment: usize,
}

impl SegmentHandle {
    pub(super) fn at(inner: Arc<SnapshotInner>, segment: usize) -> Self {
        Self { inner, segment }
    }

    pub fn id(&self) -> SegmentId {
        self.inner.segments()[self.segment].id
    }

    pub fn block_count(&self) -> usize {
        self.inner.segments()[self.segment].blocks.len()
    }

    pub fn rows(&self) -> u64 {
        self.inner.segments()[self.segment]
            .blocks
            .iter()
            .map(|b| b.rows as u64)
            .sum()
    }

    /// Visible block ids in segment order
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.inner.segments()[self.segment]
            .blocks
            .iter()
            .map(|b| b.id)
            .collect()
    }

    /// Handle to block `id` of this segment
    pub fn block(&self, id: BlockId) -> Result<BlockHandle> {
        let view = self.inner.segments()[self.segment]
            .blocks
            .iter()
            .find(|b| b.id == id)
            .copied()
            .ok_or_else(|| {
                TierError::NotFound(format!("block {} in segment {}", id, self.id()))
            })?;
        Ok(BlockHandle {
            inner: Arc::clone(&self.inner),
            view,
        })
    }

    pub fn new_iterator(&self) -> BlockIterator {
        BlockIterator {
            inner: Arc::clone(&self.inner),
            segment: self.segment,
            pos: 0,
            closed: false,
        }
    }
}

/// Walks the blocks of one segment
pub struct BlockIterator {
    inner: Arc<SnapshotInner>,
    segment: usize,
    pos: usize,
    closed: bool,
}

impl BlockIterator {
    pub fn valid(&self) -> bool {
        !self.closed
            && !self.inner.is_closed()
            && self.pos < self.inner.segments()[self.segment].blocks.len()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        if self.valid() {
            self.pos += 1;
        }
    }

    pub fn get_handle(&self) -> Option<BlockHandle> {
        self.valid().then(|| BlockHandle {
            inner: Arc::clone(&self.inner),
            view: self.inner.segments()[self.segment].blocks[self.pos],
        })
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

/// One block of a snapshot, with the row count visible to it
pub struct BlockHandle {
    inner: Arc<SnapshotInner>,
    view: BlockView,
}

impl BlockHandle {
    pub fn id(&self) -> BlockId {
        self.view.id
    }

    pub fn segment_id(&self) -> SegmentId {
        self.view.segment_id
    }

    pub fn rows(&self) -> u32 {
        self.view.rows
    }

    /// Pin every selected column page of this block
    pub fn prefetch(&self) -> Result<PrefetchHandle> {
        self.prefetch_attrs(self.inner.columns())
    }

    /// Pin the pages of `attrs` only. Each must be one of the snapshot's columns.
    pub fn prefetch_attrs(&self, attrs: &[usize]) -> Result<PrefetchHandle> {
        if self.inner.is_closed() {
            return Err(TierError::Cancelled(format!(
                "snapshot holding block {} is closed",
                self.view.id
            )));
        }
        let mut pinned = Vec::with_capacity(attrs.len());
        for &column in attrs {
            if !self.inner.columns().contains(&column) {
                return Err(TierError::SchemaMismatch(format!(
                    "column {} was not selected for block {}",
                    column, self.view.id
                )));
            }
            let ty = self
                .inner
                .column_type(column)
                .ok_or_else(|| TierError::SchemaMismatch(format!("column {}", column)))?;
            // Pins taken so far are released when `pinned` drops on error
            let handle = self.inner.pin_page(&self.view, column)?;
            pinned.push((column, ty, handle));
        }
        Ok(PrefetchHandle::new(self.view.id, self.view.rows, pinned))
    }
}

impl std::fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("segment", &self.segment)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHandle")
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}
