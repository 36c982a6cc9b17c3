//! # File Chunking
//!
//! Splits files into content-addressed chunks and verifies them on the way
//! back together.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         FILE CHUNKING                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Split into fixed-size chunks (256 KiB)                             │
//! │  2. SHA-256 hash each chunk                                            │
//! │  3. SHA-256 hash the whole file                                        │
//! │  4. Build a FileManifest with the ordered per-chunk digests            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Chunk size used throughout the wire protocol and chunk store. Fixed, not
/// negotiated: a peer observing a different value on the wire is a protocol
/// error.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Number of chunks a file of `file_size` bytes is split into, given
/// `chunk_size`.
pub fn chunk_count(file_size: u64, chunk_size: usize) -> u32 {
    if file_size == 0 {
        return 0;
    }
    ((file_size + chunk_size as u64 - 1) / chunk_size as u64) as u32
}

/// Hex-encoded SHA-256 digest of `data`.
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Split `data` into `chunk_size`-sized slices and compute both the
/// whole-file digest and each chunk's digest.
///
/// Returns `(file_digest, per_chunk_digests)`. Does not allocate owned
/// copies of the chunk bytes; callers read chunks back from disk when they
/// need them.
pub fn compute_digests(data: &[u8], chunk_size: usize) -> Result<(String, Vec<String>)> {
    if chunk_size == 0 {
        return Err(Error::InvalidManifest("chunk size must be > 0".into()));
    }

    let file_digest = digest_hex(data);
    let piece_hashes = data.chunks(chunk_size).map(digest_hex).collect();
    Ok((file_digest, piece_hashes))
}

/// Verify that `data` hashes to `expected_hex`.
pub fn verify_chunk_hash(data: &[u8], expected_hex: &str) -> bool {
    digest_hex(data) == expected_hex
}
