//! Storage Layout
//!
//! Maps catalog ids to paths and discovers tables written by earlier runs.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::config::SyncStrategy;
use crate::error::Result;

/// Paths of every on-disk artifact under one data directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    data_dir: PathBuf,
    sync: SyncStrategy,
}

impl StorageLayout {
    const TABLES_DIR: &'static str = "tables";
    const TABLE_RECORD: &'static str = "TABLE";
    const TMP_SUFFIX: &'static str = "tmp";

    pub fn new(data_dir: impl Into<PathBuf>, sync: SyncStrategy) -> Self {
        Self {
            data_dir: data_dir.into(),
            sync,
        }
    }

    /// Create the directory skeleton if missing
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(self.tables_dir())?;
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn sync(&self) -> SyncStrategy {
        self.sync
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join(Self::TABLES_DIR)
    }

    pub fn table_dir(&self, table_id: u64) -> PathBuf {
        self.tables_dir().join(format!("{:08}", table_id))
    }

    pub fn table_record_path(&self, table_id: u64) -> PathBuf {
        self.table_dir(table_id).join(Self::TABLE_RECORD)
    }

    pub fn table_record_tmp_path(&self, table_id: u64) -> PathBuf {
        Self::tmp_path(&self.table_record_path(table_id))
    }

    pub fn segment_dir(&self, table_id: u64, segment_id: u64) -> PathBuf {
        self.table_dir(table_id)
            .join(format!("seg_{:08}", segment_id))
    }

    pub fn block_path(&self, table_id: u64, segment_id: u64, block_id: u64) -> PathBuf {
        self.segment_dir(table_id, segment_id)
            .join(format!("blk_{:08}.blk", block_id))
    }

    pub fn block_tmp_path(&self, table_id: u64, segment_id: u64, block_id: u64) -> PathBuf {
        Self::tmp_path(&self.block_path(table_id, segment_id, block_id))
    }

    /// Ids of every table directory, ascending
    pub fn discover_tables(&self) -> Result<Vec<u64>> {
        let dir = self.tables_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if let Some(id) = Self::parse_table_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// fsync a directory so renames inside it survive a crash
    pub fn sync_dir(&self, dir: &Path) -> Result<()> {
        if self.sync == SyncStrategy::EveryCommit {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(Self::TMP_SUFFIX);
        PathBuf::from(name)
    }

    /// "00000042" → Some(42)
    fn parse_table_id(path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        name.parse().ok()
    }
}
