//! Table metadata
//!
//! ## Locks
//! - `append`: serialises writers and drop; holds the rollover state
//! - `publish`: writers take it exclusively to make staged rows visible, snapshot
//!   capture takes it shared
//! - `checkpoint`: one checkpoint (or table record rewrite) at a time
//!
//! Lock order is `append` → `publish`, and `append` → `checkpoint`. No path takes
//! `append` while holding `checkpoint`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::Schema;

use super::block::BlockId;
use super::segment::SegmentId;

pub type TableId = u64;

/// Rollover state guarded by the append lock
#[derive(Debug, Default)]
pub(crate) struct AppendState {
    pub active_segment: Option<SegmentId>,
    pub active_block: Option<BlockId>,
    /// Op index of the last successful write; the next one must exceed it
    pub last_completed: Option<u64>,
}

/// Metadata of one table
pub struct Table {
    id: TableId,
    name: String,
    schema: Schema,
    create_index: u64,
    drop_index: RwLock<Option<u64>>,
    append: Mutex<AppendState>,
    publish: RwLock<()>,
    checkpoint: Mutex<()>,
    /// Published segment ids in table order
    segments: RwLock<Vec<SegmentId>>,
    /// Committed durability watermark (0 = none)
    durable_index: AtomicU64,
    /// Writes at or below this index were recovered from disk and are skipped.
    /// None for tables created in this process.
    replay_floor: Option<u64>,
    rows: AtomicU64,
    flush_pending: AtomicBool,
    open_snapshots: AtomicUsize,
}

impl Table {
    pub(crate) fn new(id: TableId, name: String, schema: Schema, create_index: u64) -> Self {
        Self {
            id,
            name,
            schema,
            create_index,
            drop_index: RwLock::new(None),
            append: Mutex::new(AppendState::default()),
            publish: RwLock::new(()),
            checkpoint: Mutex::new(()),
            segments: RwLock::new(Vec::new()),
            durable_index: AtomicU64::new(0),
            replay_floor: None,
            rows: AtomicU64::new(0),
            flush_pending: AtomicBool::new(false),
            open_snapshots: AtomicUsize::new(0),
        }
    }

    /// A table restored from its record
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn recovered(
        id: TableId,
        name: String,
        schema: Schema,
        create_index: u64,
        drop_index: Option<u64>,
        durable_index: Option<u64>,
        segments: Vec<SegmentId>,
        rows: u64,
    ) -> Self {
        let watermark = durable_index.unwrap_or(0);
        let state = AppendState {
            active_segment: None,
            active_block: None,
            last_completed: durable_index,
        };
        Self {
            id,
            name,
            schema,
            create_index,
            drop_index: RwLock::new(drop_index),
            append: Mutex::new(state),
            publish: RwLock::new(()),
            checkpoint: Mutex::new(()),
            segments: RwLock::new(segments),
            durable_index: AtomicU64::new(watermark),
            replay_floor: durable_index,
            rows: AtomicU64::new(rows),
            flush_pending: AtomicBool::new(false),
            open_snapshots: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn create_index(&self) -> u64 {
        self.create_index
    }

    pub fn drop_index(&self) -> Option<u64> {
        *self.drop_index.read()
    }

    pub fn is_dropped(&self) -> bool {
        self.drop_index().is_some()
    }

    pub(crate) fn set_drop_index(&self, index: Option<u64>) {
        *self.drop_index.write() = index;
    }

    /// Drop index once dropped, otherwise the committed durability watermark
    pub fn get_segmented_index(&self) -> Option<u64> {
        self.drop_index().or_else(|| self.durable_index())
    }

    /// Committed durability watermark, ignoring drop
    pub fn durable_index(&self) -> Option<u64> {
        match self.durable_index.load(Ordering::Acquire) {
            0 => None,
            index => Some(index),
        }
    }

    /// Raise the watermark; lower values are ignored
    pub(crate) fn advance_durable_index(&self, index: u64) -> u64 {
        self.durable_index.fetch_max(index, Ordering::AcqRel).max(index)
    }

    pub(crate) fn replay_floor(&self) -> Option<u64> {
        self.replay_floor
    }

    /// Published rows across all blocks
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Acquire)
    }

    pub(crate) fn add_rows(&self, rows: u64) {
        self.rows.fetch_add(rows, Ordering::AcqRel);
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.read().clone()
    }

    pub(crate) fn push_segment(&self, id: SegmentId) {
        self.segments.write().push(id);
    }

    // =========================================================================
    // Locks
    // =========================================================================

    pub(crate) fn lock_append(&self) -> MutexGuard<'_, AppendState> {
        self.append.lock()
    }

    pub(crate) fn publish_read(&self) -> RwLockReadGuard<'_, ()> {
        self.publish.read()
    }

    pub(crate) fn publish_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.publish.write()
    }

    pub(crate) fn lock_checkpoint(&self) -> MutexGuard<'_, ()> {
        self.checkpoint.lock()
    }

    // =========================================================================
    // Flush / Snapshot Bookkeeping
    // =========================================================================

    /// Mark a FlushTable as wanted; true if the caller should schedule it
    pub(crate) fn request_flush(&self) -> bool {
        !self.flush_pending.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_flush_request(&self) {
        self.flush_pending.store(false, Ordering::Release);
    }

    pub(crate) fn snapshot_opened(&self) {
        self.open_snapshots.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot_closed(&self) {
        self.open_snapshots.fetch_sub(1, Ordering::AcqRel);
    }

    /// Snapshots taken on this table and not yet closed
    pub fn open_snapshots(&self) -> usize {
        self.open_snapshots.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rows", &self.rows())
            .field("segments", &self.segment_ids())
            .field("durable_index", &self.durable_index())
            .field("drop_index", &self.drop_index())
            .finish()
    }
}
