//! # TierDB
//!
//! An embedded, append-only columnar storage engine with:
//! - Tables of segments of fixed-capacity column blocks
//! - Three buffer pools (mutable, flushed, durable) pages move through
//! - Snapshot iterators with per-block page pinning
//! - Checkpoints that stamp each table with a durable log index
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Dispatcher (select! loop)                    │
//! │          append ──► write threads   search ──► workers       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Db / Relation                        │
//! └──────────┬──────────────────────┬──────────────────┬────────┘
//!            │                      │                  │
//!            ▼                      ▼                  ▼
//!   ┌─────────────────┐    ┌─────────────────┐  ┌─────────────┐
//!   │     Catalog     │    │  Buffer Pools   │  │  Snapshots  │
//!   │ table/seg/block │    │ mut → fl → dur  │  │ (iterators) │
//!   └────────┬────────┘    └────────▲────────┘  └─────────────┘
//!            │                      │
//!            ▼                      │
//!   ┌─────────────────┐    ┌────────┴────────┐
//!   │  Flush Executor │───►│   Checkpointer  │──► block files + table record
//!   │ (FlushBlock/Tbl)│    │ (pre_commit /   │
//!   └─────────────────┘    │  commit)        │
//!                          └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod types;
pub mod alloc;
pub mod sequence;
pub mod buffer;
pub mod scheduler;
pub mod storage;
pub mod catalog;
pub mod ctx;
mod write;
pub mod ops;
pub mod snapshot;
pub mod dispatch;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TierError};
pub use config::{Config, SegmentIndexPolicy, SyncStrategy};
pub use ctx::{AppendCtx, DropTableCtx, GetSegmentsCtx, GetSnapshotCtx, TableOpCtx};
pub use dispatch::Dispatcher;
pub use engine::{Db, Relation};
pub use snapshot::Snapshot;
pub use types::{ColumnDef, ColumnType, ColumnVector, RowBatch, Schema, Value};
pub use write::WriteOutcome;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TierDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
