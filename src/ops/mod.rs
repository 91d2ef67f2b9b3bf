//! Operation Pipeline
//!
//! Asynchronous one-shot work that matures data from memory to disk.
//!
//! ## Flow
//! ```text
//!   write seals block ──► FlushBlock ──► FlushTable ──► pre_commit ──► commit
//!                         (mutable →     (one per       (tmp files)    (rename,
//!                          flushed)       table cycle)                  durable tier,
//!                                                                       watermark)
//! ```
//!
//! Ops run on the `FlushExecutor`, never on the general worker pool.

mod checkpoint;
mod executor;
mod flush;

use std::sync::Arc;

use crate::buffer::BufferManagers;
use crate::catalog::{Catalog, TableId};
use crate::config::Config;
use crate::error::Result;
use crate::sequence::SequenceGenerator;

pub use checkpoint::Checkpointer;
pub use executor::{FlushExecutor, FlushStats};
pub use flush::{FlushBlockOp, FlushTableOp};

/// Shared state every op can reach
pub struct Options {
    pub config: Config,
    pub catalog: Arc<Catalog>,
    pub buffers: Arc<BufferManagers>,
    pub checkpointer: Arc<Checkpointer>,
    pub flusher: Arc<FlushExecutor>,
    pub sequence: Arc<SequenceGenerator>,
}

/// Handle to `Options` carried by each op
#[derive(Clone)]
pub struct OpCtx {
    pub opts: Arc<Options>,
}

impl OpCtx {
    pub fn new(opts: Arc<Options>) -> Self {
        Self { opts }
    }
}

/// One unit of asynchronous work
#[derive(Clone)]
pub enum Op {
    FlushBlock(FlushBlockOp),
    FlushTable(FlushTableOp),
}

impl Op {
    pub fn flush_block(ctx: OpCtx, table_id: TableId, block_id: u64) -> Self {
        Op::FlushBlock(FlushBlockOp::new(ctx, table_id, block_id))
    }

    pub fn flush_table(ctx: OpCtx, table_id: TableId) -> Self {
        Op::FlushTable(FlushTableOp::new(ctx, table_id))
    }

    pub fn execute(&self) -> Result<()> {
        match self {
            Op::FlushBlock(op) => op.execute(),
            Op::FlushTable(op) => op.execute(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::FlushBlock(_) => "flush-block",
            Op::FlushTable(_) => "flush-table",
        }
    }

    pub fn table_id(&self) -> TableId {
        match self {
            Op::FlushBlock(op) => op.table_id(),
            Op::FlushTable(op) => op.table_id(),
        }
    }
}

impl std::fmt::Debug for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::FlushBlock(op) => write!(f, "FlushBlock(table={}, block={})", op.table_id(), op.block_id()),
            Op::FlushTable(op) => write!(f, "FlushTable(table={})", op.table_id()),
        }
    }
}
