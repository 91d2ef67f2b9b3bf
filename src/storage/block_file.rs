//! Block Files
//!
//! One immutable file per durable block holding every column of the block.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncStrategy;
use crate::error::{Result, TierError};
use crate::types::ColumnType;

/// Magic bytes identifying a block file
const MAGIC: &[u8; 4] = b"TRBK";

/// Current block file format version
const VERSION: u16 = 1;

/// Magic (4) + Version (2) + Columns (2) + Rows (4) + BlockId (8) + AppliedIndex (8)
const HEADER_SIZE: usize = 28;

/// TypeTag (1) + Offset (8) + Length (8) + CRC32 (4)
const DIR_ENTRY_SIZE: usize = 21;

/// CRC32 over header + directory
const FOOTER_SIZE: usize = 4;

/// Header facts of a block file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFileMeta {
    pub path: PathBuf,
    pub block_id: u64,
    pub rows: u32,
    pub applied_index: u64,
    pub columns: Vec<ColumnType>,
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy)]
struct ColumnEntry {
    ty: ColumnType,
    offset: u64,
    len: u64,
    crc: u32,
}

// =============================================================================
// Writer
// =============================================================================

/// Collects the columns of one block and writes them out in `finish`
pub struct BlockFileWriter {
    path: PathBuf,
    block_id: u64,
    rows: u32,
    applied_index: u64,
    columns: Vec<(ColumnType, Vec<u8>)>,
}

impl BlockFileWriter {
    pub fn new(path: &Path, block_id: u64, rows: u32, applied_index: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            block_id,
            rows,
            applied_index,
            columns: Vec::new(),
        }
    }

    /// Add the next column; `data` must hold exactly `rows` encoded values
    pub fn add_column(&mut self, ty: ColumnType, data: Vec<u8>) -> Result<()> {
        let expected = self.rows as usize * ty.width();
        if data.len() != expected {
            return Err(TierError::Storage(format!(
                "block {} column {} has {} bytes, expected {}",
                self.block_id,
                self.columns.len(),
                data.len(),
                expected
            )));
        }
        self.columns.push((ty, data));
        Ok(())
    }

    /// Write header, directory, data and footer
    pub fn finish(self, sync: SyncStrategy) -> Result<BlockFileMeta> {
        let column_count = u16::try_from(self.columns.len()).map_err(|_| {
            TierError::Storage(format!("block {} has too many columns", self.block_id))
        })?;

        let mut header = Vec::with_capacity(HEADER_SIZE + self.columns.len() * DIR_ENTRY_SIZE);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&column_count.to_le_bytes());
        header.extend_from_slice(&self.rows.to_le_bytes());
        header.extend_from_slice(&self.block_id.to_le_bytes());
        header.extend_from_slice(&self.applied_index.to_le_bytes());

        // Column data starts right after the directory
        let mut offset = (HEADER_SIZE + self.columns.len() * DIR_ENTRY_SIZE) as u64;
        for (ty, data) in &self.columns {
            header.push(ty.tag());
            header.extend_from_slice(&offset.to_le_bytes());
            header.extend_from_slice(&(data.len() as u64).to_le_bytes());
            header.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
            offset += data.len() as u64;
        }
        let footer = crc32fast::hash(&header);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header)?;
        for (_, data) in &self.columns {
            writer.write_all(data)?;
        }
        writer.write_all(&footer.to_le_bytes())?;
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|e| TierError::Storage(format!("Failed to flush block file: {}", e)))?;
        if sync == SyncStrategy::EveryCommit {
            file.sync_all()?;
        }
        let file_size = file.metadata()?.len();

        Ok(BlockFileMeta {
            path: self.path,
            block_id: self.block_id,
            rows: self.rows,
            applied_index: self.applied_index,
            columns: self.columns.iter().map(|(ty, _)| *ty).collect(),
            file_size,
        })
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Validated view of a block file's header and directory
pub struct BlockFileReader {
    file: File,
    meta: BlockFileMeta,
    directory: Vec<ColumnEntry>,
}

impl BlockFileReader {
    /// Open a block file, checking magic, version and the header checksum
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let corrupt = |what: String| TierError::Corruption(format!("{}: {}", path.display(), what));

        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(corrupt(format!("file too short ({} bytes)", file_size)));
        }

        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(corrupt(format!("invalid magic {:?}", &header[0..4])));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(TierError::Storage(format!(
                "Unsupported block file version: {}",
                version
            )));
        }
        let column_count = u16::from_le_bytes([header[6], header[7]]) as usize;
        let rows = u32::from_le_bytes(read_array(&header[8..12]));
        let block_id = u64::from_le_bytes(read_array(&header[12..20]));
        let applied_index = u64::from_le_bytes(read_array(&header[20..28]));

        let dir_len = column_count * DIR_ENTRY_SIZE;
        if file_size < (HEADER_SIZE + dir_len + FOOTER_SIZE) as u64 {
            return Err(corrupt("directory truncated".to_string()));
        }
        let mut dir_bytes = vec![0u8; dir_len];
        file.read_exact(&mut dir_bytes)?;

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE];
        file.read_exact(&mut footer)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&dir_bytes);
        if hasher.finalize() != u32::from_le_bytes(footer) {
            return Err(corrupt("header checksum mismatch".to_string()));
        }

        let data_end = file_size - FOOTER_SIZE as u64;
        let mut directory = Vec::with_capacity(column_count);
        for entry in dir_bytes.chunks_exact(DIR_ENTRY_SIZE) {
            let ty = ColumnType::from_tag(entry[0])
                .ok_or_else(|| corrupt(format!("unknown column tag {}", entry[0])))?;
            let offset = u64::from_le_bytes(read_array(&entry[1..9]));
            let len = u64::from_le_bytes(read_array(&entry[9..17]));
            let crc = u32::from_le_bytes(read_array(&entry[17..21]));
            if offset.checked_add(len).map_or(true, |end| end > data_end) {
                return Err(corrupt(format!("column extent {}+{} out of bounds", offset, len)));
            }
            directory.push(ColumnEntry { ty, offset, len, crc });
        }

        let meta = BlockFileMeta {
            path: path.to_path_buf(),
            block_id,
            rows,
            applied_index,
            columns: directory.iter().map(|e| e.ty).collect(),
            file_size,
        };
        Ok(Self {
            file,
            meta,
            directory,
        })
    }

    pub fn meta(&self) -> &BlockFileMeta {
        &self.meta
    }

    pub fn column_count(&self) -> usize {
        self.directory.len()
    }

    /// Read one column, verifying its checksum
    pub fn read_column(&mut self, column: usize) -> Result<Vec<u8>> {
        let entry = *self.directory.get(column).ok_or_else(|| {
            TierError::NotFound(format!(
                "column {} in block {}",
                column, self.meta.block_id
            ))
        })?;

        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut data = vec![0u8; entry.len as usize];
        self.file.read_exact(&mut data)?;

        let actual = crc32fast::hash(&data);
        if actual != entry.crc {
            return Err(TierError::Corruption(format!(
                "{}: column {} checksum mismatch (expected {:08x}, got {:08x})",
                self.meta.path.display(),
                column,
                entry.crc,
                actual
            )));
        }
        Ok(data)
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
