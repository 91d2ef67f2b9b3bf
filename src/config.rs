//! Configuration for TierDB
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, TierError};

/// Main configuration for a TierDB instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── tables/
    ///         └── {table_id}/
    ///             ├── TABLE                 (table record)
    ///             └── seg_{id}/blk_{id}.blk (block files)
    pub data_dir: PathBuf,

    /// File sync strategy for checkpoints
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Catalog Configuration
    // -------------------------------------------------------------------------
    /// Row capacity of one block
    pub block_max_rows: u32,

    /// Maximum number of blocks in one segment
    pub segment_max_blocks: u32,

    /// How a segment folds its blocks' applied indices into one value
    pub segment_index_policy: SegmentIndexPolicy,

    // -------------------------------------------------------------------------
    // Buffer Pool Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the mutable tier (bytes)
    pub mutable_pool_capacity: usize,

    /// Capacity of the flushed-cache tier (bytes)
    pub flushed_pool_capacity: usize,

    /// Capacity of the durable tier (bytes)
    pub durable_pool_capacity: usize,

    /// Upper bound on page memory handed out by the allocator (bytes)
    pub allocator_limit: usize,

    /// How long `acquire` waits for eviction to free capacity (milliseconds)
    pub pool_acquire_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Scheduling Configuration
    // -------------------------------------------------------------------------
    /// Worker threads for scans and table creation
    pub worker_threads: usize,

    /// Queued tasks before `submit` blocks
    pub worker_queue_depth: usize,

    /// Threads of the dedicated flush executor
    pub flush_workers: usize,

    /// Attempts per flush op before it is abandoned
    pub flush_retry_limit: u32,
}

/// File sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync block files, table records and directories on every commit
    EveryCommit,

    /// Leave syncing to the OS (tests, benchmarks)
    Never,
}

/// Aggregation policy for a segment's durability index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentIndexPolicy {
    /// Lowest applied index among the segment's blocks
    Minimum,

    /// Applied index of the most recent block that has one
    Latest,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tierdb_data"),
            sync_strategy: SyncStrategy::EveryCommit,
            block_max_rows: 4096,
            segment_max_blocks: 4,
            segment_index_policy: SegmentIndexPolicy::Latest,
            mutable_pool_capacity: 64 * 1024 * 1024, // 64 MB
            flushed_pool_capacity: 64 * 1024 * 1024, // 64 MB
            durable_pool_capacity: 128 * 1024 * 1024, // 128 MB
            allocator_limit: 512 * 1024 * 1024,       // 512 MB
            pool_acquire_timeout_ms: 2000,
            worker_threads: 8,
            worker_queue_depth: 1024,
            flush_workers: 2,
            flush_retry_limit: 3,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.block_max_rows == 0 {
            return Err(TierError::Config("block_max_rows must be > 0".to_string()));
        }
        if self.segment_max_blocks == 0 {
            return Err(TierError::Config(
                "segment_max_blocks must be > 0".to_string(),
            ));
        }
        if self.worker_threads == 0 || self.flush_workers == 0 {
            return Err(TierError::Config(
                "worker_threads and flush_workers must be > 0".to_string(),
            ));
        }
        if self.worker_queue_depth == 0 {
            return Err(TierError::Config(
                "worker_queue_depth must be > 0".to_string(),
            ));
        }
        let pools = [
            ("mutable_pool_capacity", self.mutable_pool_capacity),
            ("flushed_pool_capacity", self.flushed_pool_capacity),
            ("durable_pool_capacity", self.durable_pool_capacity),
        ];
        for (name, capacity) in pools {
            if capacity == 0 {
                return Err(TierError::Config(format!("{} must be > 0", name)));
            }
            if capacity > self.allocator_limit {
                return Err(TierError::Config(format!(
                    "{} ({}) exceeds allocator_limit ({})",
                    name, capacity, self.allocator_limit
                )));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    pub fn block_max_rows(mut self, rows: u32) -> Self {
        self.config.block_max_rows = rows;
        self
    }

    pub fn segment_max_blocks(mut self, blocks: u32) -> Self {
        self.config.segment_max_blocks = blocks;
        self
    }

    pub fn segment_index_policy(mut self, policy: SegmentIndexPolicy) -> Self {
        self.config.segment_index_policy = policy;
        self
    }

    /// Set the mutable tier capacity (in bytes)
    pub fn mutable_pool_capacity(mut self, bytes: usize) -> Self {
        self.config.mutable_pool_capacity = bytes;
        self
    }

    /// Set the flushed-cache tier capacity (in bytes)
    pub fn flushed_pool_capacity(mut self, bytes: usize) -> Self {
        self.config.flushed_pool_capacity = bytes;
        self
    }

    /// Set the durable tier capacity (in bytes)
    pub fn durable_pool_capacity(mut self, bytes: usize) -> Self {
        self.config.durable_pool_capacity = bytes;
        self
    }

    pub fn allocator_limit(mut self, bytes: usize) -> Self {
        self.config.allocator_limit = bytes;
        self
    }

    /// Set the acquire timeout (in milliseconds)
    pub fn pool_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pool_acquire_timeout_ms = ms;
        self
    }

    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    pub fn worker_queue_depth(mut self, depth: usize) -> Self {
        self.config.worker_queue_depth = depth;
        self
    }

    pub fn flush_workers(mut self, count: usize) -> Self {
        self.config.flush_workers = count;
        self
    }

    pub fn flush_retry_limit(mut self, attempts: u32) -> Self {
        self.config.flush_retry_limit = attempts;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
