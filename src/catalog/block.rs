//! Block metadata
//!
//! A block is the unit of row capacity, of flushing and of on-disk files.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::buffer::PageKey;

pub type BlockId = u64;

/// Lifecycle of a block
///
/// ```text
/// Mutable ──full/flush──► Sealed ──FlushBlock──► Flushed ──Commit──► Durable
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockState {
    /// Accepting appends
    Mutable,
    /// Full or forced closed; waiting for FlushBlock
    Sealed,
    /// Pages live in the flushed-cache tier; waiting for a table checkpoint
    Flushed,
    /// Block file committed
    Durable,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockState::Mutable => "mutable",
            BlockState::Sealed => "sealed",
            BlockState::Flushed => "flushed",
            BlockState::Durable => "durable",
        };
        f.write_str(name)
    }
}

/// Log-index bookkeeping of one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockIndex {
    /// Highest op index that wrote rows into this block
    pub applied: Option<u64>,
    /// Highest op index whose rows all lie in this block or earlier ones
    pub completed: Option<u64>,
    /// Rows of this block belonging to ops up to `completed`
    pub completed_rows: u32,
}

/// Metadata of one block
pub struct Block {
    id: BlockId,
    segment_id: u64,
    table_id: u64,
    capacity: u32,
    column_count: usize,
    /// Published (visible) rows
    rows: AtomicU32,
    state: Mutex<BlockState>,
    index: RwLock<BlockIndex>,
}

impl Block {
    pub(crate) fn new(
        id: BlockId,
        segment_id: u64,
        table_id: u64,
        capacity: u32,
        column_count: usize,
        index: BlockIndex,
    ) -> Self {
        Self {
            id,
            segment_id,
            table_id,
            capacity,
            column_count,
            rows: AtomicU32::new(0),
            state: Mutex::new(BlockState::Mutable),
            index: RwLock::new(index),
        }
    }

    /// A block restored from a table record
    pub(crate) fn recovered(
        id: BlockId,
        segment_id: u64,
        table_id: u64,
        capacity: u32,
        column_count: usize,
        rows: u32,
        index: BlockIndex,
    ) -> Self {
        Self {
            id,
            segment_id,
            table_id,
            capacity,
            column_count,
            rows: AtomicU32::new(rows),
            state: Mutex::new(BlockState::Durable),
            index: RwLock::new(index),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    pub fn table_id(&self) -> u64 {
        self.table_id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn rows(&self) -> u32 {
        self.rows.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.rows() >= self.capacity
    }

    pub(crate) fn set_rows(&self, rows: u32) {
        debug_assert!(rows <= self.capacity);
        self.rows.store(rows, Ordering::Release);
    }

    pub fn state(&self) -> BlockState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: BlockState) {
        *self.state.lock() = state;
    }

    /// Move from `from` to `to`; false if the block is in another state
    pub(crate) fn transition(&self, from: BlockState, to: BlockState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    pub fn index(&self) -> BlockIndex {
        *self.index.read()
    }

    pub fn applied_index(&self) -> Option<u64> {
        self.index.read().applied
    }

    pub(crate) fn update_index(&self, f: impl FnOnce(&mut BlockIndex)) {
        let mut index = self.index.write();
        let before = index.applied;
        f(&mut index);
        debug_assert!(index.applied >= before, "applied index regressed");
    }

    /// Page key of every column
    pub fn page_keys(&self) -> Vec<PageKey> {
        (0..self.column_count)
            .map(|column| PageKey::new(self.id, column))
            .collect()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("segment_id", &self.segment_id)
            .field("rows", &self.rows())
            .field("state", &self.state())
            .field("index", &self.index())
            .finish()
    }
}
