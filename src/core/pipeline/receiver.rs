//! Reassembly of incoming transfers.
//!
//! The [`TransferTable`] holds one [`IncomingTransfer`] per
//! `(peer_id, transferId)`. It is owned by the dispatcher task and is never
//! shared, so it takes no lock. Transfers become visible to the rest of the
//! node only as a whole [`CompletedFile`].
//!
//! `file-complete` is the authoritative end of a transfer: it either yields
//! the file, or fails the transfer when slots are still empty or the
//! checksum disagrees. Chunk receipt is tracked in a [`ChunkBitmap`] so that
//! a resent chunk never counts twice.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::config::MAX_FILE_SIZE;
use crate::core::error::{CoreError, Result};
use crate::core::pipeline::chunk::{ChunkBitmap, Checksum, chunk_count, chunk_len, is_consistent};
use crate::core::protocol::message::{FileChunk, FileComplete, FileOffer};

type TransferKey = (String, String);

pub struct IncomingTransfer {
    pub transfer_id: String,
    pub peer_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub user_id: String,
    pub nickname: String,
    chunks: Vec<Option<Vec<u8>>>,
    received: ChunkBitmap,
    last_activity: Instant,
}

impl IncomingTransfer {
    fn new(peer_id: &str, offer: FileOffer) -> Self {
        // An empty file announced with zero chunks has nothing to wait for.
        let total = if offer.total_chunks == 0 {
            0
        } else {
            chunk_count(offer.file_size)
        };
        Self {
            transfer_id: offer.transfer_id,
            peer_id: peer_id.to_string(),
            file_name: offer.file_name,
            file_size: offer.file_size,
            file_type: offer.file_type,
            user_id: offer.user_id,
            nickname: offer.nickname,
            chunks: vec![None; total as usize],
            received: ChunkBitmap::new(total),
            last_activity: Instant::now(),
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.received.total()
    }

    pub fn received_chunks(&self) -> u32 {
        self.received.received_count()
    }
}

/// A fully reassembled file.
#[derive(Debug, Clone)]
pub struct CompletedFile {
    pub transfer_id: String,
    pub peer_id: String,
    pub file_name: String,
    pub mime: String,
    pub data: Bytes,
    pub user_id: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Created,
    /// An offer with the same key was already in flight; its state is gone.
    Replaced,
    Rejected(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Stored { received: u32, total: u32 },
    Duplicate,
    Unknown,
    Invalid(&'static str),
}

#[derive(Default)]
pub struct TransferTable {
    transfers: HashMap<TransferKey, IncomingTransfer>,
}

fn key(peer_id: &str, transfer_id: &str) -> TransferKey {
    (peer_id.to_string(), transfer_id.to_string())
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, peer_id: &str, transfer_id: &str) -> Option<&IncomingTransfer> {
        self.transfers.get(&key(peer_id, transfer_id))
    }

    pub fn offer(&mut self, peer_id: &str, offer: FileOffer) -> OfferOutcome {
        if offer.file_size > MAX_FILE_SIZE {
            return OfferOutcome::Rejected("file too large");
        }
        if !is_consistent(offer.file_size, offer.total_chunks) {
            return OfferOutcome::Rejected("chunk count does not match file size");
        }
        let transfer = IncomingTransfer::new(peer_id, offer);
        match self
            .transfers
            .insert(key(peer_id, &transfer.transfer_id), transfer)
        {
            Some(_) => OfferOutcome::Replaced,
            None => OfferOutcome::Created,
        }
    }

    pub fn chunk(&mut self, peer_id: &str, chunk: FileChunk) -> ChunkOutcome {
        let Some(t) = self.transfers.get_mut(&key(peer_id, &chunk.transfer_id)) else {
            return ChunkOutcome::Unknown;
        };
        let Some(expected) = chunk_len(t.file_size, chunk.chunk_index) else {
            return ChunkOutcome::Invalid("chunk index out of range");
        };
        if chunk.data.len() != expected {
            return ChunkOutcome::Invalid("chunk length does not match its index");
        }
        t.last_activity = Instant::now();
        if !t.received.set(chunk.chunk_index) {
            return ChunkOutcome::Duplicate;
        }
        t.chunks[chunk.chunk_index as usize] = Some(chunk.data);
        ChunkOutcome::Stored {
            received: t.received.received_count(),
            total: t.received.total(),
        }
    }

    /// Finish a transfer. `Ok(None)` for an unknown transfer. The state is
    /// discarded whether the file is produced or the transfer fails.
    pub fn complete(&mut self, peer_id: &str, msg: &FileComplete) -> Result<Option<CompletedFile>> {
        let Some(t) = self.transfers.remove(&key(peer_id, &msg.transfer_id)) else {
            return Ok(None);
        };
        if !t.received.is_complete() {
            warn!(
                event = "transfer_incomplete",
                transfer_id = %t.transfer_id,
                missing = t.received.missing_count(),
                "File complete received with missing chunks"
            );
            return Err(CoreError::IncompleteTransfer {
                transfer_id: t.transfer_id,
                missing: t.received.missing_count(),
            });
        }

        let mut data = Vec::with_capacity(t.file_size as usize);
        for slot in t.chunks.into_iter().flatten() {
            data.extend_from_slice(&slot);
        }

        if let Some(expected) = &msg.checksum {
            let actual = Checksum::of(&data);
            if !actual.eq_ignore_ascii_case(expected) {
                warn!(
                    event = "transfer_integrity_mismatch",
                    transfer_id = %t.transfer_id,
                    expected = %expected,
                    actual = %actual,
                    "Checksum mismatch on reassembled file"
                );
                return Err(CoreError::IntegrityMismatch {
                    transfer_id: t.transfer_id,
                });
            }
        }

        let mime = if t.file_type.is_empty() {
            mime_guess::from_path(&t.file_name)
                .first_or_octet_stream()
                .to_string()
        } else {
            t.file_type
        };

        debug!(
            event = "transfer_reassembled",
            transfer_id = %t.transfer_id,
            bytes = data.len(),
            "File reassembled"
        );

        Ok(Some(CompletedFile {
            transfer_id: t.transfer_id,
            peer_id: t.peer_id,
            file_name: t.file_name,
            mime,
            data: Bytes::from(data),
            user_id: t.user_id,
            nickname: t.nickname,
        }))
    }

    pub fn cancel(&mut self, peer_id: &str, transfer_id: &str) -> Option<IncomingTransfer> {
        self.transfers.remove(&key(peer_id, transfer_id))
    }

    /// Release every transfer originating from `peer_id`.
    pub fn drop_peer(&mut self, peer_id: &str) -> Vec<IncomingTransfer> {
        let keys: Vec<TransferKey> = self
            .transfers
            .keys()
            .filter(|(p, _)| p == peer_id)
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|k| self.transfers.remove(k))
            .collect()
    }

    /// Remove transfers with no activity for longer than `idle`.
    pub fn expire_idle(&mut self, now: Instant, idle: Duration) -> Vec<IncomingTransfer> {
        let stale: Vec<TransferKey> = self
            .transfers
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(t.last_activity) > idle)
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .iter()
            .filter_map(|k| self.transfers.remove(k))
            .collect()
    }

    /// Resolve a transfer id, or an unambiguous prefix of one, to its
    /// `(peer_id, transfer_id)` key.
    pub fn resolve(&self, id: &str) -> Option<(String, String)> {
        let mut hits = self
            .transfers
            .keys()
            .filter(|(_, t)| t == id || t.starts_with(id));
        let first = hits.next()?;
        if hits.next().is_some() {
            return self
                .transfers
                .keys()
                .find(|(_, t)| t == id)
                .cloned();
        }
        Some(first.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CHUNK_SIZE;

    fn offer(id: &str, size: u64) -> FileOffer {
        FileOffer {
            transfer_id: id.into(),
            file_name: "data.bin".into(),
            file_size: size,
            file_type: String::new(),
            total_chunks: chunk_count(size),
            user_id: "u1".into(),
            nickname: "Ann".into(),
            timestamp: chrono::Utc::now(),
        }
    }

    fn chunk(id: &str, index: u32, data: &[u8]) -> FileChunk {
        FileChunk {
            transfer_id: id.into(),
            chunk_index: index,
            data: data.to_vec(),
        }
    }

    fn complete(id: &str, checksum: Option<String>) -> FileComplete {
        FileComplete {
            transfer_id: id.into(),
            checksum,
        }
    }

    #[test]
    fn reassembles_in_index_order() {
        let mut table = TransferTable::new();
        let size = CHUNK_SIZE as u64 + 3;
        let mut payload = vec![1u8; CHUNK_SIZE];
        payload.extend_from_slice(&[2, 3, 4]);

        assert_eq!(table.offer("p1", offer("t1", size)), OfferOutcome::Created);
        // Arrive out of order; reassembly still follows indices.
        assert_eq!(
            table.chunk("p1", chunk("t1", 1, &[2, 3, 4])),
            ChunkOutcome::Stored { received: 1, total: 2 }
        );
        table.chunk("p1", chunk("t1", 0, &vec![1u8; CHUNK_SIZE]));

        let file = table
            .complete("p1", &complete("t1", Some(Checksum::of(&payload))))
            .unwrap()
            .unwrap();
        assert_eq!(&file.data[..], &payload[..]);
        assert_eq!(file.mime, "application/octet-stream");
        assert!(table.is_empty());
    }

    #[test]
    fn duplicates_do_not_complete_early() {
        let mut table = TransferTable::new();
        table.offer("p1", offer("t1", CHUNK_SIZE as u64 * 2));
        let full = vec![0u8; CHUNK_SIZE];
        table.chunk("p1", chunk("t1", 0, &full));
        assert_eq!(table.chunk("p1", chunk("t1", 0, &full)), ChunkOutcome::Duplicate);
        assert_eq!(table.get("p1", "t1").unwrap().received_chunks(), 1);

        let err = table.complete("p1", &complete("t1", None)).unwrap_err();
        assert!(matches!(err, CoreError::IncompleteTransfer { missing: 1, .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn multi_chunk_file_counts_each_chunk_once() {
        let mut table = TransferTable::new();
        let payload: Vec<u8> = (0..150_000u32).map(|i| (i % 241) as u8).collect();
        let o = offer("t1", payload.len() as u64);
        assert_eq!(o.total_chunks, 3);
        table.offer("p1", o);

        let slices: Vec<&[u8]> = payload.chunks(CHUNK_SIZE).collect();
        let lens: Vec<usize> = slices.iter().map(|s| s.len()).collect();
        assert_eq!(lens, vec![65536, 65536, 18928]);

        let mut reached_total = 0;
        for (i, part) in [(0, slices[0]), (2, slices[2]), (2, slices[2]), (1, slices[1]), (1, slices[1])] {
            match table.chunk("p1", chunk("t1", i, part)) {
                ChunkOutcome::Stored { received, total } => {
                    assert_eq!(total, 3);
                    if received == 3 {
                        reached_total += 1;
                    }
                }
                ChunkOutcome::Duplicate => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(reached_total, 1);
        assert_eq!(table.get("p1", "t1").unwrap().received_chunks(), 3);

        let file = table
            .complete("p1", &complete("t1", Some(Checksum::of(&payload))))
            .unwrap()
            .unwrap();
        assert_eq!(file.data.len(), 150_000);
        assert_eq!(&file.data[..], &payload[..]);
    }

    #[test]
    fn concurrent_transfers_from_one_peer_stay_apart() {
        let mut table = TransferTable::new();
        let first: Vec<u8> = (0..(CHUNK_SIZE * 2 + 100)).map(|i| i as u8).collect();
        let second: Vec<u8> = (0..(CHUNK_SIZE + 7)).map(|i| (i as u8).wrapping_mul(3)).collect();
        table.offer("p1", offer("a", first.len() as u64));
        table.offer("p1", offer("b", second.len() as u64));

        let a: Vec<&[u8]> = first.chunks(CHUNK_SIZE).collect();
        let b: Vec<&[u8]> = second.chunks(CHUNK_SIZE).collect();
        table.chunk("p1", chunk("b", 1, b[1]));
        table.chunk("p1", chunk("a", 2, a[2]));
        table.chunk("p1", chunk("a", 0, a[0]));
        table.chunk("p1", chunk("b", 0, b[0]));
        table.chunk("p1", chunk("a", 1, a[1]));

        let done_b = table
            .complete("p1", &complete("b", Some(Checksum::of(&second))))
            .unwrap()
            .unwrap();
        assert_eq!(table.len(), 1);
        let done_a = table
            .complete("p1", &complete("a", Some(Checksum::of(&first))))
            .unwrap()
            .unwrap();
        assert_eq!(&done_a.data[..], &first[..]);
        assert_eq!(&done_b.data[..], &second[..]);
        assert!(table.is_empty());
    }

    #[test]
    fn checksum_mismatch_fails() {
        let mut table = TransferTable::new();
        table.offer("p1", offer("t1", 3));
        table.chunk("p1", chunk("t1", 0, b"abc"));
        let err = table
            .complete("p1", &complete("t1", Some(Checksum::of(b"abd"))))
            .unwrap_err();
        assert!(matches!(err, CoreError::IntegrityMismatch { .. }));
    }

    #[test]
    fn unknown_and_invalid_chunks_are_dropped() {
        let mut table = TransferTable::new();
        assert_eq!(table.chunk("p1", chunk("nope", 0, b"x")), ChunkOutcome::Unknown);
        assert!(table.complete("p1", &complete("nope", None)).unwrap().is_none());

        table.offer("p1", offer("t1", 10));
        assert!(matches!(table.chunk("p1", chunk("t1", 1, b"x")), ChunkOutcome::Invalid(_)));
        assert!(matches!(table.chunk("p1", chunk("t1", 0, &[0u8; 11])), ChunkOutcome::Invalid(_)));
        // Same id from another peer is a different transfer.
        assert_eq!(table.chunk("p2", chunk("t1", 0, &[0u8; 10])), ChunkOutcome::Unknown);
        assert_eq!(table.get("p1", "t1").unwrap().received_chunks(), 0);
    }

    #[test]
    fn inconsistent_offers_are_rejected() {
        let mut table = TransferTable::new();
        let mut bad = offer("t1", 100);
        bad.total_chunks = 5;
        assert!(matches!(table.offer("p1", bad), OfferOutcome::Rejected(_)));
        assert!(matches!(
            table.offer("p1", offer("t2", MAX_FILE_SIZE + 1)),
            OfferOutcome::Rejected(_)
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_offer_resets_state() {
        let mut table = TransferTable::new();
        table.offer("p1", offer("t1", 4));
        table.chunk("p1", chunk("t1", 0, b"abcd"));
        assert_eq!(table.offer("p1", offer("t1", 4)), OfferOutcome::Replaced);
        assert_eq!(table.get("p1", "t1").unwrap().received_chunks(), 0);
    }

    #[test]
    fn empty_file_completes() {
        let mut table = TransferTable::new();
        let mut legacy = offer("t0", 0);
        legacy.total_chunks = 0;
        table.offer("p1", legacy);
        table.offer("p1", offer("t1", 0));

        // A sender counting zero chunks never sends one.
        let file = table.complete("p1", &complete("t0", None)).unwrap().unwrap();
        assert!(file.data.is_empty());

        table.chunk("p1", chunk("t1", 0, b""));
        let file = table.complete("p1", &complete("t1", None)).unwrap().unwrap();
        assert!(file.data.is_empty());
    }

    #[test]
    fn drop_peer_releases_only_that_peer() {
        let mut table = TransferTable::new();
        table.offer("p1", offer("a", 10));
        table.offer("p1", offer("b", 10));
        table.offer("p2", offer("c", 10));
        let dropped = table.drop_peer("p1");
        assert_eq!(dropped.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.get("p2", "c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_transfers_expire() {
        let mut table = TransferTable::new();
        table.offer("p1", offer("old", 10));
        tokio::time::advance(Duration::from_secs(90)).await;
        table.offer("p1", offer("new", 10));
        tokio::time::advance(Duration::from_secs(40)).await;

        let expired = table.expire_idle(Instant::now(), Duration::from_secs(120));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].transfer_id, "old");
        assert!(table.get("p1", "new").is_some());
    }

    #[test]
    fn resolve_prefix() {
        let mut table = TransferTable::new();
        table.offer("p1", offer("abc123", 1));
        table.offer("p1", offer("abd456", 1));
        assert_eq!(table.resolve("abc"), Some(("p1".into(), "abc123".into())));
        assert_eq!(table.resolve("ab"), None);
        assert_eq!(table.resolve("zzz"), None);
    }
}
