//! Snapshot & Iterator Protocol
//!
//! A snapshot is an immutable list of `(segment, [(block, visible rows)])`
//! captured under the table's publish read lock. It pins nothing: pages are
//! pinned only between `BlockHandle::prefetch()` and `PrefetchHandle::close()`.
//!
//! ```text
//!   Snapshot ──new_iterator──► SegmentIterator ──get_handle──► SegmentHandle
//!                                                                  │
//!                                                            new_iterator
//!                                                                  ▼
//!   ColumnReader ◄──get_reader_by_attr── PrefetchHandle ◄──prefetch── BlockHandle
//! ```
//!
//! `Snapshot::segment(id)`, `SegmentHandle::block(id)` and
//! `BlockHandle::prefetch_attrs(attrs)` give direct access by id for callers that
//! already hold segment and block ids, such as `Relation` reads.
//!
//! Rows visible to a snapshot never change: later writes only append past the
//! captured counts, and referenced pages stay reachable (retained until durable,
//! reloadable from block files after).

mod iterator;
mod reader;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::{BufferManagers, PageHandle, PageKey};
use crate::catalog::{BlockId, BlockState, Catalog, SegmentId, Table, TableId};
use crate::ctx::GetSnapshotCtx;
use crate::error::{Result, TierError};
use crate::storage::BlockFileReader;
use crate::types::ColumnType;

pub use iterator::{BlockHandle, BlockIterator, SegmentHandle, SegmentIterator};
pub use reader::{ColumnReader, PrefetchHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockView {
    pub id: BlockId,
    pub segment_id: SegmentId,
    pub rows: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentView {
    pub id: SegmentId,
    pub blocks: Vec<BlockView>,
}

pub(crate) struct SnapshotInner {
    table: Arc<Table>,
    catalog: Arc<Catalog>,
    buffers: Arc<BufferManagers>,
    /// Selected column indices, in request order
    columns: Vec<usize>,
    segments: Vec<SegmentView>,
    closed: AtomicBool,
}

impl SnapshotInner {
    pub(crate) fn segments(&self) -> &[SegmentView] {
        &self.segments
    }

    pub(crate) fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub(crate) fn column_type(&self, column: usize) -> Option<ColumnType> {
        self.table.schema().columns.get(column).map(|c| c.ty)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pin one column page of `block`, searching mutable → flushed → durable and
    /// reading the block file on a durable miss
    pub(crate) fn pin_page(&self, block: &BlockView, column: usize) -> Result<PageHandle> {
        let key = PageKey::new(block.id, column);
        if let Some(handle) = self.buffers.locate(key) {
            return Ok(handle);
        }

        // Pages leave the last in-memory tier only after their block is durable
        let state = self.catalog.block(block.id)?.state();
        if state != BlockState::Durable {
            return Err(TierError::Storage(format!(
                "block {} column {} is {} but resident in no pool",
                block.id, column, state
            )));
        }

        let path = self
            .catalog
            .layout()
            .block_path(self.table.id(), block.segment_id, block.id);
        self.buffers.durable.get_or_load(key, || {
            let mut reader = BlockFileReader::open(&path)?;
            if reader.meta().block_id != block.id {
                return Err(TierError::Corruption(format!(
                    "{} holds block {}, expected {}",
                    path.display(),
                    reader.meta().block_id,
                    block.id
                )));
            }
            if reader.meta().rows < block.rows {
                return Err(TierError::Corruption(format!(
                    "{} holds {} rows, snapshot expects {}",
                    path.display(),
                    reader.meta().rows,
                    block.rows
                )));
            }
            tracing::trace!(block_id = block.id, column, "Loading page from block file");
            reader.read_column(column)
        })
    }
}

/// Point-in-time view of a table
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    /// Capture the published state of `table`
    pub(crate) fn capture(
        catalog: Arc<Catalog>,
        buffers: Arc<BufferManagers>,
        table: Arc<Table>,
        ctx: &GetSnapshotCtx,
    ) -> Result<Self> {
        let column_count = table.schema().len();
        let columns: Vec<usize> = if ctx.columns.is_empty() {
            (0..column_count).collect()
        } else {
            let mut seen = HashSet::new();
            for &column in &ctx.columns {
                if column >= column_count || !seen.insert(column) {
                    return Err(TierError::SchemaMismatch(format!(
                        "invalid or repeated column {} for table '{}' with {} columns",
                        column,
                        table.name(),
                        column_count
                    )));
                }
            }
            ctx.columns.clone()
        };

        let segments = {
            let _publish = table.publish_read();
            let table_segments = table.segment_ids();

            let wanted: Option<HashSet<SegmentId>> = if ctx.scan_all {
                None
            } else {
                for id in &ctx.segment_ids {
                    if !table_segments.contains(id) {
                        return Err(TierError::NotFound(format!(
                            "segment {} in table '{}'",
                            id,
                            table.name()
                        )));
                    }
                }
                Some(ctx.segment_ids.iter().copied().collect())
            };

            let mut views = Vec::new();
            for segment_id in table_segments {
                if wanted.as_ref().is_some_and(|w| !w.contains(&segment_id)) {
                    continue;
                }
                let segment = catalog.segment(segment_id)?;
                let mut blocks = Vec::new();
                for block in catalog.segment_blocks(&segment)? {
                    let rows = block.rows();
                    if rows > 0 {
                        blocks.push(BlockView {
                            id: block.id(),
                            segment_id,
                            rows,
                        });
                    }
                }
                if !blocks.is_empty() {
                    views.push(SegmentView {
                        id: segment_id,
                        blocks,
                    });
                }
            }
            views
        };

        table.snapshot_opened();
        tracing::trace!(table_id = table.id(), segments = segments.len(), "Snapshot captured");
        Ok(Self {
            inner: Arc::new(SnapshotInner {
                table,
                catalog,
                buffers,
                columns,
                segments,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn table_id(&self) -> TableId {
        self.inner.table.id()
    }

    pub fn table_name(&self) -> &str {
        self.inner.table.name()
    }

    /// Selected column indices
    pub fn columns(&self) -> &[usize] {
        &self.inner.columns
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.inner.segments.iter().map(|s| s.id).collect()
    }

    pub fn segment_count(&self) -> usize {
        self.inner.segments.len()
    }

    /// Handle to segment `id`, which must be part of this snapshot
    pub fn segment(&self, id: SegmentId) -> Result<SegmentHandle> {
        if self.is_closed() {
            return Err(TierError::Cancelled(format!(
                "snapshot of table '{}' is closed",
                self.table_name()
            )));
        }
        let pos = self
            .inner
            .segments
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| {
                TierError::NotFound(format!(
                    "segment {} in snapshot of table '{}'",
                    id,
                    self.table_name()
                ))
            })?;
        Ok(SegmentHandle::at(Arc::clone(&self.inner), pos))
    }

    /// Rows visible to this snapshot
    pub fn rows(&self) -> u64 {
        self.inner
            .segments
            .iter()
            .flat_map(|s| s.blocks.iter())
            .map(|b| b.rows as u64)
            .sum()
    }

    /// Iterate segments in table order. Yields nothing once the snapshot is closed.
    pub fn new_iterator(&self) -> SegmentIterator {
        SegmentIterator::new(Arc::clone(&self.inner))
    }

    /// Release the snapshot. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.table.snapshot_closed();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("table_id", &self.table_id())
            .field("segments", &self.inner.segments)
            .field("columns", &self.inner.columns)
            .field("closed", &self.is_closed())
            .finish()
    }
}
