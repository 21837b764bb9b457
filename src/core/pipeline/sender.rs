//! Sender pipeline: streams a file from its source with read-ahead.
//!
//! ```text
//! ┌────────────┐  bounded chan  ┌───────────┐
//! │ reader     │ ──────────────►│ send loop │──► broadcast file-chunk
//! │ (async)    │                └───────────┘
//! └────────────┘
//! ```
//!
//! The reader stays `SENDER_READ_AHEAD_CHUNKS` chunks ahead of the send
//! loop and hashes every byte it reads, so the checksum for `file-complete`
//! is ready once the last chunk has been handed over.

use crate::core::config::SENDER_READ_AHEAD_CHUNKS;
use crate::core::pipeline::chunk::{Checksum, chunk_count, chunk_len};
use crate::core::error::Result;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// A chunk read from the source, ready to be sent.
pub struct ReadChunk {
    pub index: u32,
    pub data: Vec<u8>,
}

pub struct ReaderResult {
    /// Lowercase hex SHA3-256 of everything read.
    pub checksum: String,
    pub chunks_read: u32,
}

/// Spawn a reader that cuts `size` bytes of `source` into chunks.
///
/// The reader stops early, without error, when the receiving half is
/// dropped. A source shorter than `size` is an error.
pub fn spawn_reader<R>(
    mut source: R,
    size: u64,
) -> (
    mpsc::Receiver<ReadChunk>,
    tokio::task::JoinHandle<Result<ReaderResult>>,
)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SENDER_READ_AHEAD_CHUNKS);

    let handle = tokio::spawn(async move {
        let total = chunk_count(size);
        let mut checksum = Checksum::new();
        let mut chunks_read = 0;

        for index in 0..total {
            let len = chunk_len(size, index).unwrap_or(0);
            let mut buf = vec![0u8; len];
            source.read_exact(&mut buf).await?;
            checksum.update(&buf);
            chunks_read += 1;

            if tx.send(ReadChunk { index, data: buf }).await.is_err() {
                break;
            }
        }

        Ok(ReaderResult {
            checksum: checksum.finish(),
            chunks_read,
        })
    });

    (rx, handle)
}
