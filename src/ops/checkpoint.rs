//! Checkpointer
//!
//! Two-phase persistence of a table's flushed blocks.
//!
//! - `pre_commit` writes every block file and the new table record to temporary
//!   paths. Nothing visible changes; on failure the temporaries are removed.
//! - `commit` renames them into place, then marks the blocks durable, matures
//!   their pages to the durable tier and advances the watermark.
//!
//! Callers hold the table's checkpoint lock across both phases.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::BufferManagers;
use crate::catalog::{Block, BlockId, BlockState, Catalog, SegmentState, Table, TableId};
use crate::error::{Result, TierError};
use crate::storage::{write_record, BlockFileWriter};

struct PendingBlock {
    block: Arc<Block>,
    tmp: PathBuf,
    path: PathBuf,
}

struct PendingCheckpoint {
    blocks: Vec<PendingBlock>,
    record_tmp: PathBuf,
    record_path: PathBuf,
}

impl PendingCheckpoint {
    fn temp_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.blocks
            .iter()
            .map(|b| &b.tmp)
            .chain(std::iter::once(&self.record_tmp))
    }

    fn discard(&self) {
        for path in self.temp_paths() {
            let _ = fs::remove_file(path);
        }
    }
}

pub struct Checkpointer {
    catalog: Arc<Catalog>,
    buffers: Arc<BufferManagers>,
    pending: Mutex<HashMap<TableId, PendingCheckpoint>>,
}

impl Checkpointer {
    pub fn new(catalog: Arc<Catalog>, buffers: Arc<BufferManagers>) -> Self {
        Self {
            catalog,
            buffers,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Stage a checkpoint of every flushed block of `table`.
    ///
    /// Returns the blocks it covers, or `None` when there is nothing to do.
    pub fn pre_commit(&self, table: &Table) -> Result<Option<Vec<BlockId>>> {
        if let Some(stale) = self.pending.lock().remove(&table.id()) {
            stale.discard();
        }

        let blocks: Vec<Arc<Block>> = self
            .catalog
            .table_blocks(table)?
            .into_iter()
            .filter(|b| b.state() == BlockState::Flushed)
            .collect();
        if blocks.is_empty() {
            return Ok(None);
        }

        let layout = self.catalog.layout();
        let mut staged = PendingCheckpoint {
            blocks: Vec::with_capacity(blocks.len()),
            record_tmp: layout.table_record_tmp_path(table.id()),
            record_path: layout.table_record_path(table.id()),
        };

        let result = (|| -> Result<()> {
            for block in &blocks {
                let tmp = layout.block_tmp_path(table.id(), block.segment_id(), block.id());
                let path = layout.block_path(table.id(), block.segment_id(), block.id());
                fs::create_dir_all(layout.segment_dir(table.id(), block.segment_id()))?;
                staged.blocks.push(PendingBlock {
                    block: Arc::clone(block),
                    tmp: tmp.clone(),
                    path,
                });
                self.write_block_file(table, block, &tmp)?;
            }

            let committing: HashSet<BlockId> = blocks.iter().map(|b| b.id()).collect();
            let record = self.catalog.table_record(table, &committing)?;
            write_record(&staged.record_tmp, &record, layout.sync())
        })();

        if let Err(e) = result {
            staged.discard();
            tracing::warn!(table_id = table.id(), error = %e, "Checkpoint pre-commit failed");
            return Err(e);
        }

        let ids = blocks.iter().map(|b| b.id()).collect();
        self.pending.lock().insert(table.id(), staged);
        Ok(Some(ids))
    }

    /// Publish the staged checkpoint. Returns the table's watermark afterwards.
    pub fn commit(&self, table: &Table) -> Result<Option<u64>> {
        let Some(staged) = self.pending.lock().remove(&table.id()) else {
            return Ok(table.durable_index());
        };
        let layout = self.catalog.layout();

        // Files first; until every rename succeeds no block is durable
        let mut dirs = BTreeSet::new();
        for pending in &staged.blocks {
            if let Err(e) = fs::rename(&pending.tmp, &pending.path) {
                staged.discard();
                return Err(e.into());
            }
            dirs.insert(layout.segment_dir(table.id(), pending.block.segment_id()));
        }
        if let Err(e) = fs::rename(&staged.record_tmp, &staged.record_path) {
            staged.discard();
            return Err(e.into());
        }
        for dir in &dirs {
            layout.sync_dir(dir)?;
        }
        layout.sync_dir(&layout.table_dir(table.id()))?;

        let mut keys = Vec::new();
        let mut segments = BTreeSet::new();
        for pending in &staged.blocks {
            pending.block.set_state(BlockState::Durable);
            keys.extend(pending.block.page_keys());
            segments.insert(pending.block.segment_id());
        }
        self.buffers.mature_to_durable(&keys);

        for segment_id in segments {
            let segment = self.catalog.segment(segment_id)?;
            if segment.state() != SegmentState::Closed {
                continue;
            }
            let all_durable = self
                .catalog
                .segment_blocks(&segment)?
                .iter()
                .all(|b| b.state() == BlockState::Durable);
            if all_durable {
                segment.set_state(SegmentState::Flushed);
            }
        }

        if let Some(watermark) = self.catalog.prefix_watermark(table)? {
            table.advance_durable_index(watermark);
        }

        tracing::info!(
            table_id = table.id(),
            blocks = staged.blocks.len(),
            watermark = ?table.durable_index(),
            "Checkpoint committed"
        );
        Ok(table.durable_index())
    }

    fn write_block_file(&self, table: &Table, block: &Block, tmp: &std::path::Path) -> Result<()> {
        let rows = block.rows();
        let index = block.index();
        let mut writer = BlockFileWriter::new(tmp, block.id(), rows, index.applied.unwrap_or(0));

        for (key, def) in block.page_keys().into_iter().zip(&table.schema().columns) {
            let handle = self.buffers.locate(key).ok_or_else(|| {
                TierError::Storage(format!(
                    "page for block {} column {} is in no pool",
                    key.block_id, key.column
                ))
            })?;
            let len = rows as usize * def.ty.width();
            let data = handle.read(|bytes| bytes.get(..len).map(<[u8]>::to_vec));
            let data = data.ok_or_else(|| {
                TierError::Storage(format!(
                    "page for block {} column {} holds fewer than {} rows",
                    key.block_id, key.column, rows
                ))
            })?;
            writer.add_column(def.ty, data)?;
        }

        writer.finish(self.catalog.layout().sync())?;
        Ok(())
    }
}
