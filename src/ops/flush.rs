//! Flush ops

use std::sync::Arc;

use crate::catalog::{BlockState, TableId};
use crate::error::{Result, TierError};

use super::{Op, OpCtx};

/// Move a sealed block's pages from the mutable tier to the flushed-cache tier
#[derive(Clone)]
pub struct FlushBlockOp {
    ctx: OpCtx,
    table_id: TableId,
    block_id: u64,
}

impl FlushBlockOp {
    pub fn new(ctx: OpCtx, table_id: TableId, block_id: u64) -> Self {
        Self {
            ctx,
            table_id,
            block_id,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn block_id(&self) -> u64 {
        self.block_id
    }

    pub fn execute(&self) -> Result<()> {
        let opts = &self.ctx.opts;
        let table = opts.catalog.reference_table(self.table_id)?;
        let block = opts.catalog.block(self.block_id)?;

        match block.state() {
            BlockState::Sealed => {}
            BlockState::Flushed | BlockState::Durable => return Ok(()),
            BlockState::Mutable => {
                return Err(TierError::Storage(format!(
                    "block {} is still mutable",
                    self.block_id
                )))
            }
        }

        opts.buffers.mature_to_flushed(&block.page_keys())?;
        block.transition(BlockState::Sealed, BlockState::Flushed);
        tracing::debug!(table_id = self.table_id, block_id = self.block_id, rows = block.rows(), "Block flushed to cache");

        if table.request_flush() {
            opts.flusher
                .schedule(Op::flush_table(self.ctx.clone(), self.table_id))?;
        }
        Ok(())
    }
}

/// Checkpoint every flushed block of a table
#[derive(Clone)]
pub struct FlushTableOp {
    ctx: OpCtx,
    table_id: TableId,
}

impl FlushTableOp {
    pub fn new(ctx: OpCtx, table_id: TableId) -> Self {
        Self { ctx, table_id }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// PreCommit → Commit → re-validate through the catalog
    pub fn execute(&self) -> Result<()> {
        let opts = &self.ctx.opts;
        let table = opts.catalog.reference_table(self.table_id)?;

        // Blocks flushed after this point schedule a fresh FlushTable
        table.clear_flush_request();

        let _checkpoint = table.lock_checkpoint();
        let before = table.durable_index();

        let Some(committing) = opts.checkpointer.pre_commit(&table)? else {
            return Ok(());
        };
        let watermark = opts.checkpointer.commit(&table)?;

        let current = opts.catalog.reference_table(self.table_id).map_err(|e| {
            TierError::Corruption(format!(
                "table {} vanished after commit: {}",
                self.table_id, e
            ))
        })?;
        if !Arc::ptr_eq(&current, &table) {
            return Err(TierError::Corruption(format!(
                "table {} was replaced during commit",
                self.table_id
            )));
        }
        for block_id in &committing {
            let state = opts.catalog.block(*block_id)?.state();
            if state != BlockState::Durable {
                return Err(TierError::Corruption(format!(
                    "block {} is {} after commit",
                    block_id, state
                )));
            }
        }
        if current.durable_index() < before {
            return Err(TierError::Corruption(format!(
                "table {} watermark regressed from {:?} to {:?}",
                self.table_id,
                before,
                current.durable_index()
            )));
        }

        tracing::debug!(table_id = self.table_id, blocks = committing.len(), watermark = ?watermark, "Table flushed");
        Ok(())
    }
}
