//! Centralized configuration constants for pastewire.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format names (message tags, channel labels)
//! stay in their respective modules.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Chunk size in bytes (64 KiB).
///
/// Every `file-chunk` carries exactly this many bytes except the last chunk
/// of a file, which carries the remainder (or a full chunk when the file
/// size is an exact multiple).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Largest file accepted for sending or receiving (100 MiB).
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Sender read-ahead buffer: max chunks prefetched from disk and queued
/// for the send loop.
pub const SENDER_READ_AHEAD_CHUNKS: usize = 16;

/// An incoming transfer that has not seen a chunk for this long is
/// released and reported as failed.
pub const TRANSFER_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// How often the dispatcher sweeps for idle incoming transfers.
pub const TRANSFER_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

// ── Backpressure ─────────────────────────────────────────────────────────────

/// High water mark for a channel's outbound buffer (bytes).
/// Above this the sender suspends chunk transmission.
pub const DC_BUFFERED_AMOUNT_HIGH: usize = 1024 * 1024;

/// Low water mark (bytes). A suspended sender resumes once the buffer has
/// drained to this level.
pub const DC_BUFFERED_AMOUNT_LOW: usize = 256 * 1024;

/// Polling interval while waiting for the outbound buffer to drain.
pub const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on a single backpressure wait. After this the sender
/// proceeds anyway and lets the transport queue the data.
pub const BACKPRESSURE_MAX_WAIT: Duration = Duration::from_secs(10);

// ── Connection / Network ─────────────────────────────────────────────────────

/// Upper bound on ICE candidate gathering. When it expires the local
/// descriptor is produced from whatever candidates were gathered so far.
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Label of the single ordered data channel used for chat and files.
pub const CHAT_CHANNEL_LABEL: &str = "chat";

/// SCTP max message size advertised and allowed for sending (1 MiB).
///
/// A 64 KiB chunk encoded as a JSON array of byte values can grow to about
/// 260 KB, well over the 64 KB default.
pub const SCTP_MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Default STUN servers used when none are configured.
pub const DEFAULT_STUN_SERVERS: [&str; 3] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

// ── Logging ──────────────────────────────────────────────────────────────────

/// File name of the persistent log inside `<data_dir>/logs/`.
pub const LOG_FILE_NAME: &str = "pastewire.log";
