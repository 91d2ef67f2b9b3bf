//! Table records
//!
//! The persisted form of a table: identity, schema, drop marker and the durable
//! block prefix. Rewritten by create, drop and every checkpoint commit.

use serde::{Deserialize, Serialize};

use crate::types::Schema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: u64,
    pub name: String,
    pub schema: Schema,
    pub create_index: u64,
    pub drop_index: Option<u64>,
    pub durable_index: Option<u64>,
    pub segments: Vec<SegmentRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: u64,
    pub blocks: Vec<BlockRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: u64,
    /// Rows in the block file
    pub rows: u32,
    pub applied: Option<u64>,
    pub completed: Option<u64>,
    pub completed_rows: u32,
}

impl TableRecord {
    pub fn blocks(&self) -> impl Iterator<Item = &BlockRecord> {
        self.segments.iter().flat_map(|s| s.blocks.iter())
    }

    /// Highest log index mentioned anywhere in the record
    pub fn max_index(&self) -> u64 {
        self.blocks()
            .filter_map(|b| b.applied)
            .chain(self.drop_index)
            .chain(std::iter::once(self.create_index))
            .max()
            .unwrap_or(0)
    }
}

/// Rows of each block (flattened, table order) that belong to completed writes.
///
/// A block's rows past `completed_rows` were written by a write that continued
/// into the next block. Those rows are kept only if that write finished inside
/// the durable prefix, i.e. some later block in the chain ends a write.
pub fn recoverable_rows(blocks: &[&BlockRecord]) -> Vec<u32> {
    let mut keep = vec![0; blocks.len()];
    // Whether the write spilling out of the current block finished in the prefix
    let mut spill_finished = false;
    for (idx, block) in blocks.iter().enumerate().rev() {
        keep[idx] = if spill_finished {
            block.rows
        } else {
            block.completed_rows.min(block.rows)
        };
        if block.completed_rows > 0 {
            // A write ends in this block, so the one spilling into it finished
            spill_finished = true;
        }
    }
    keep
}
