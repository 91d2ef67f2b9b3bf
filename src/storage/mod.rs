//! Storage Module
//!
//! On-disk artifacts written by checkpoints and read back on durable misses and
//! at startup.
//!
//! ## Responsibilities
//! - Directory layout and discovery of existing tables (`StorageLayout`)
//! - Immutable columnar block files with per-column checksums
//! - Length-prefixed, checksummed table records replaced via rename
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//! └── tables/
//!     └── 00000001/
//!         ├── TABLE                    (table record)
//!         └── seg_00000003/
//!             ├── blk_00000007.blk
//!             └── blk_00000008.blk
//! ```
//!
//! ## Block File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (28 bytes)                                            │
//! │   Magic "TRBK" (4) | Version u16 | Columns u16 | Rows u32    │
//! │   BlockId u64 | AppliedIndex u64                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Column Directory (21 bytes per column)                       │
//! │   TypeTag u8 | Offset u64 | Length u64 | CRC32 u32           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Column Data (fixed-width little-endian values)               │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes): CRC32 over header + directory              │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod block_file;
mod layout;
mod record;

pub use block_file::{BlockFileMeta, BlockFileReader, BlockFileWriter};
pub use layout::StorageLayout;
pub use record::{decode_record, encode_record, read_record, write_record};
