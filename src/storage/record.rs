//! Record Framing
//!
//! `[len u32][crc32 u32][bincode payload]`. Records are replaced atomically: the
//! new content goes to a temporary path and is renamed over the old one.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SyncStrategy;
use crate::error::{Result, TierError};

const FRAME_HEADER: usize = 8;

/// Frame a serializable value
pub fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| TierError::Serialization(format!("record of {} bytes", payload.len())))?;
    let crc = crc32fast::hash(&payload);

    let mut buf = Vec::with_capacity(FRAME_HEADER + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Validate and decode a framed value
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < FRAME_HEADER {
        return Err(TierError::Corruption(format!(
            "record truncated: {} bytes",
            bytes.len()
        )));
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let crc = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

    let payload = bytes
        .get(FRAME_HEADER..FRAME_HEADER + len)
        .ok_or_else(|| {
            TierError::Corruption(format!(
                "record declares {} bytes, {} available",
                len,
                bytes.len() - FRAME_HEADER
            ))
        })?;
    let actual = crc32fast::hash(payload);
    if actual != crc {
        return Err(TierError::Corruption(format!(
            "record checksum mismatch: expected {:08x}, got {:08x}",
            crc, actual
        )));
    }
    Ok(bincode::deserialize(payload)?)
}

/// Write `value` to `tmp`, optionally fsync, and leave it there for a later rename.
/// The temporary file is removed if writing fails.
pub fn write_record<T: Serialize>(tmp: &Path, value: &T, sync: SyncStrategy) -> Result<()> {
    let bytes = encode_record(value)?;
    let result = (|| -> Result<()> {
        let mut file = File::create(tmp)?;
        file.write_all(&bytes)?;
        if sync == SyncStrategy::EveryCommit {
            file.sync_all()?;
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(tmp);
    }
    result
}

/// Read and decode a record file
pub fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    decode_record(&bytes)
}
