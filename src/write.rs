//! Write Path
//!
//! Routes an appended batch into the table's blocks.
//!
//! ## Phases (all under the table's append lock)
//! ```text
//!   plan     split rows over the active block and as many new blocks/segments
//!            as needed
//!   reserve  acquire every new page in the mutable pool; on failure release
//!            them and return, nothing is visible
//!   stage    copy column bytes into the pages past the published row counts
//!   publish  under the publish write lock: register new segments/blocks, bump
//!            row counts, stamp log indices, seal full blocks
//! ```
//!
//! Readers only ever look at published row counts, so staged bytes are invisible
//! until publish.
//!
//! Op indices must strictly increase per table. A write at or below the last
//! applied op fails with `InvalidOpIndex` before anything is staged, which keeps
//! every block's completed index at or below the ops it actually holds.

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::{BufferManagers, PageHandle, PageKey};
use crate::catalog::{
    Block, BlockId, BlockIndex, BlockState, Catalog, Segment, SegmentId, SegmentState, Table,
};
use crate::error::{Result, TierError};
use crate::types::RowBatch;

/// Result of one append
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows made visible
    pub rows: usize,
    /// Blocks sealed by this write, waiting for FlushBlock
    pub sealed: Vec<BlockId>,
    /// The op was at or below the recovered watermark and was not applied.
    /// Only ever set on tables restored from disk.
    pub skipped: bool,
}

struct Chunk {
    block: Arc<Block>,
    /// First batch row of this chunk
    start: usize,
    len: usize,
    /// Published rows of the block before this write
    base: usize,
}

/// Append `batch` to `table` under `op_index`
pub(crate) fn append(
    catalog: &Catalog,
    buffers: &BufferManagers,
    table: &Table,
    batch: &RowBatch,
    op_index: u64,
) -> Result<WriteOutcome> {
    let mut state = table.lock_append();

    if table.is_dropped() {
        return Err(TierError::NotFound(format!(
            "table '{}' (dropped)",
            table.name()
        )));
    }
    if op_index == 0 {
        return Err(TierError::InvalidOpIndex("op index 0 is reserved".to_string()));
    }
    if table.replay_floor().is_some_and(|floor| op_index <= floor) {
        tracing::debug!(table_id = table.id(), op_index, "Skipping write already durable");
        return Ok(WriteOutcome {
            skipped: true,
            ..Default::default()
        });
    }
    if let Some(last) = state.last_completed {
        if op_index <= last {
            tracing::warn!(table_id = table.id(), op_index, last, "Write rejected, op index out of order");
            return Err(TierError::InvalidOpIndex(format!(
                "op {} on table '{}' is not past last applied op {}",
                op_index,
                table.name(),
                last
            )));
        }
    }
    table.schema().check_batch(batch)?;

    let rows = batch.rows();
    if rows == 0 {
        return Ok(WriteOutcome::default());
    }

    let capacity = catalog.block_max_rows() as usize;
    let max_blocks = catalog.segment_max_blocks() as usize;
    let columns = table.schema().len();

    // -------------------------------------------------------------------------
    // Plan
    // -------------------------------------------------------------------------
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut offset = 0;

    if let Some(block_id) = state.active_block {
        let block = catalog.block(block_id)?;
        if block.state() == BlockState::Mutable && !block.is_full() {
            let base = block.rows() as usize;
            let len = (capacity - base).min(rows);
            chunks.push(Chunk {
                block,
                start: 0,
                len,
                base,
            });
            offset = len;
        }
    }
    let existing_chunks = chunks.len();

    // Segment receiving the next new block: the active one, or after recovery
    // the table's last segment if it still has room
    let mut cursor: Option<Arc<Segment>> = match state.active_segment {
        Some(id) => Some(catalog.segment(id)?),
        None => match table.segment_ids().last() {
            Some(id) => Some(catalog.segment(*id)?),
            None => None,
        },
    };

    let mut new_segments: Vec<Arc<Segment>> = Vec::new();
    let mut placements: HashMap<SegmentId, usize> = HashMap::new();
    while offset < rows {
        let segment = match cursor.take() {
            Some(seg) if seg.state() == SegmentState::Active && planned_count(&seg, &placements) < max_blocks => seg,
            _ => {
                let seg = Arc::new(Segment::new(
                    catalog.allocate_segment_id(),
                    table.id(),
                    catalog.segment_max_blocks(),
                ));
                new_segments.push(Arc::clone(&seg));
                seg
            }
        };
        *placements.entry(segment.id()).or_insert(0) += 1;

        let block = Arc::new(Block::new(
            catalog.allocate_block_id(),
            segment.id(),
            table.id(),
            capacity as u32,
            columns,
            BlockIndex {
                applied: None,
                completed: state.last_completed,
                completed_rows: 0,
            },
        ));
        let len = capacity.min(rows - offset);
        chunks.push(Chunk {
            block,
            start: offset,
            len,
            base: 0,
        });
        offset += len;
        cursor = Some(segment);
    }

    // -------------------------------------------------------------------------
    // Reserve
    // -------------------------------------------------------------------------
    let mut pages: HashMap<PageKey, PageHandle> = HashMap::new();
    for chunk in &chunks[..existing_chunks] {
        for key in chunk.block.page_keys() {
            let handle = buffers.mutable.pin(key).ok_or_else(|| {
                TierError::Storage(format!(
                    "active block {} lost its page for column {}",
                    key.block_id, key.column
                ))
            })?;
            pages.insert(key, handle);
        }
    }

    let mut reserved: Vec<PageKey> = Vec::new();
    for chunk in &chunks[existing_chunks..] {
        for (column, def) in table.schema().columns.iter().enumerate() {
            let key = PageKey::new(chunk.block.id(), column);
            match buffers.mutable.acquire_retained(key, capacity * def.ty.width()) {
                Ok(handle) => {
                    reserved.push(key);
                    pages.insert(key, handle);
                }
                Err(e) => {
                    drop(pages);
                    buffers.discard_mutable(&reserved);
                    tracing::warn!(table_id = table.id(), op_index, error = %e, "Write rejected, no page capacity");
                    return Err(e);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Stage
    // -------------------------------------------------------------------------
    for chunk in &chunks {
        for (column, def) in table.schema().columns.iter().enumerate() {
            let key = PageKey::new(chunk.block.id(), column);
            let (Some(handle), Some(vector)) = (pages.get(&key), batch.get_vector(column)) else {
                continue;
            };
            let width = def.ty.width();
            handle.page().append(|buf| {
                // Bytes past the published rows belong to no one
                buf.truncate(chunk.base * width);
                vector.encode_range(chunk.start..chunk.start + chunk.len, buf);
            });
        }
    }

    // -------------------------------------------------------------------------
    // Publish
    // -------------------------------------------------------------------------
    let completed = Some(op_index);
    let mut sealed = Vec::new();
    {
        let _publish = table.publish_write();

        for segment in &new_segments {
            catalog.register_segment(Arc::clone(segment));
            table.push_segment(segment.id());
        }

        let last = chunks.len() - 1;
        for (idx, chunk) in chunks.iter().enumerate() {
            let block = &chunk.block;
            if idx >= existing_chunks {
                catalog.register_block(Arc::clone(block));
                if let Ok(segment) = catalog.segment(block.segment_id()) {
                    segment.push_block(block.id());
                }
            }

            let filled = (chunk.base + chunk.len) as u32;
            block.set_rows(filled);
            block.update_index(|index| {
                index.applied = Some(op_index);
                if idx == last {
                    index.completed = completed;
                    index.completed_rows = filled;
                }
            });

            if block.is_full() && block.transition(BlockState::Mutable, BlockState::Sealed) {
                sealed.push(block.id());
                if let Ok(segment) = catalog.segment(block.segment_id()) {
                    if segment.is_full() {
                        segment.set_state(SegmentState::Closed);
                    }
                }
            }
        }

        table.add_rows(rows as u64);
        let tail = &chunks[last].block;
        state.active_block = Some(tail.id());
        state.active_segment = Some(tail.segment_id());
        state.last_completed = completed;
    }

    tracing::trace!(
        table_id = table.id(),
        op_index,
        rows,
        blocks = chunks.len(),
        sealed = sealed.len(),
        "Write published"
    );
    Ok(WriteOutcome {
        rows,
        sealed,
        skipped: false,
    })
}

/// Seal the active block so a flush can pick it up. Returns the sealed id.
pub(crate) fn seal_active(catalog: &Catalog, table: &Table) -> Result<Option<BlockId>> {
    let mut state = table.lock_append();
    let Some(block_id) = state.active_block else {
        return Ok(None);
    };
    let block = catalog.block(block_id)?;
    if block.rows() == 0 || !block.transition(BlockState::Mutable, BlockState::Sealed) {
        return Ok(None);
    }
    state.active_block = None;

    let segment = catalog.segment(block.segment_id())?;
    if segment.is_full() {
        segment.set_state(SegmentState::Closed);
    }
    tracing::debug!(table_id = table.id(), block_id, rows = block.rows(), "Sealed active block");
    Ok(Some(block_id))
}

/// Blocks a segment will hold once this write's planned blocks are added
fn planned_count(segment: &Segment, placements: &HashMap<SegmentId, usize>) -> usize {
    segment.block_count() + placements.get(&segment.id()).copied().unwrap_or(0)
}
