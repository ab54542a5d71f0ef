//! Chunk checksum helpers.
//!
//! Chunk payloads carry a crc32c in hex on the wire; both the datanode and
//! the client verify through these helpers so the encodings cannot drift.

use crate::error::{Error, Result};

/// Compute the wire-format checksum of a chunk payload.
pub fn chunk_checksum(data: &[u8]) -> String {
    format!("{:08x}", crc32c::crc32c(data))
}

/// Verify a chunk payload against its recorded checksum.
pub fn verify_chunk(data: &[u8], expected: &str) -> Result<()> {
    let actual = chunk_checksum(data);
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
