//! Chunk geometry, receipt tracking and whole-file checksums.
//!
//! A file of `size` bytes is cut into `chunk_count(size)` chunks of
//! `CHUNK_SIZE` bytes; the last one carries the remainder, or a full chunk
//! when the size divides evenly. A zero-byte file is a single empty chunk.

use crate::core::config::CHUNK_SIZE;
use sha3::{Digest, Sha3_256};

/// Number of chunks a file of `size` bytes is sent in. Never zero.
pub fn chunk_count(size: u64) -> u32 {
    let chunk = CHUNK_SIZE as u64;
    size.div_ceil(chunk).max(1) as u32
}

/// Expected byte length of chunk `index` for a file of `size` bytes, or
/// `None` when the index is outside the file.
pub fn chunk_len(size: u64, index: u32) -> Option<usize> {
    let total = chunk_count(size);
    if index >= total {
        return None;
    }
    let start = index as u64 * CHUNK_SIZE as u64;
    Some((size - start).min(CHUNK_SIZE as u64) as usize)
}

/// Whether a received `totalChunks` is consistent with `fileSize`.
/// Zero chunks is tolerated for empty files from older senders.
pub fn is_consistent(size: u64, total_chunks: u32) -> bool {
    total_chunks == chunk_count(size) || (size == 0 && total_chunks == 0)
}

/// Tracks which chunk indices of a transfer have been received.
#[derive(Debug, Clone)]
pub struct ChunkBitmap {
    total_chunks: u32,
    bits: Vec<u64>,
    received: u32,
}

impl ChunkBitmap {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            total_chunks,
            bits: vec![0u64; (total_chunks as usize).div_ceil(64)],
            received: 0,
        }
    }

    /// Mark `index` received. Returns `false` when it already was, or when
    /// it is out of range.
    pub fn set(&mut self, index: u32) -> bool {
        if index >= self.total_chunks {
            return false;
        }
        let word = (index / 64) as usize;
        let mask = 1u64 << (index % 64);
        if self.bits[word] & mask != 0 {
            return false;
        }
        self.bits[word] |= mask;
        self.received += 1;
        true
    }

    #[cfg(test)]
    pub fn is_set(&self, index: u32) -> bool {
        if index >= self.total_chunks {
            return false;
        }
        (self.bits[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    pub fn total(&self) -> u32 {
        self.total_chunks
    }

    pub fn received_count(&self) -> u32 {
        self.received
    }

    pub fn missing_count(&self) -> u32 {
        self.total_chunks - self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.total_chunks
    }
}

/// Incremental SHA3-256 over a file, rendered as lowercase hex.
#[derive(Default)]
pub struct Checksum(Sha3_256);

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }

    pub fn of(data: &[u8]) -> String {
        let mut c = Self::new();
        c.update(data);
        c.finish()
    }
}
