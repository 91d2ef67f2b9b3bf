//! Segment metadata

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::SegmentIndexPolicy;

use super::block::{Block, BlockId};

pub type SegmentId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Still receiving blocks
    Active,
    /// Holds `segment_max_blocks` blocks and the last one is sealed
    Closed,
    /// Closed and every block is durable
    Flushed,
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentState::Active => "active",
            SegmentState::Closed => "closed",
            SegmentState::Flushed => "flushed",
        };
        f.write_str(name)
    }
}

/// Ordered group of blocks of one table
pub struct Segment {
    id: SegmentId,
    table_id: u64,
    max_blocks: u32,
    /// Published block ids in append order
    blocks: RwLock<Vec<BlockId>>,
    state: Mutex<SegmentState>,
}

impl Segment {
    pub(crate) fn new(id: SegmentId, table_id: u64, max_blocks: u32) -> Self {
        Self {
            id,
            table_id,
            max_blocks,
            blocks: RwLock::new(Vec::new()),
            state: Mutex::new(SegmentState::Active),
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn table_id(&self) -> u64 {
        self.table_id
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.read().clone()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// No more blocks can be added
    pub fn is_full(&self) -> bool {
        self.block_count() >= self.max_blocks as usize
    }

    pub(crate) fn push_block(&self, id: BlockId) {
        let mut blocks = self.blocks.write();
        debug_assert!(blocks.len() < self.max_blocks as usize);
        blocks.push(id);
    }

    pub fn state(&self) -> SegmentState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SegmentState) {
        *self.state.lock() = state;
    }

    /// Fold the applied indices of `blocks` (this segment's blocks, in order)
    pub fn aggregated_index(&self, blocks: &[Arc<Block>], policy: SegmentIndexPolicy) -> Option<u64> {
        let applied = blocks.iter().filter_map(|b| b.applied_index());
        match policy {
            SegmentIndexPolicy::Minimum => applied.min(),
            SegmentIndexPolicy::Latest => applied.last(),
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("table_id", &self.table_id)
            .field("blocks", &self.block_ids())
            .field("state", &self.state())
            .finish()
    }
}
