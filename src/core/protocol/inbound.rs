//! Inbound half of the transfer protocol: turns channel messages into
//! application events.
//!
//! Runs on the dispatcher task only, which owns the [`TransferTable`].
//! Anything that does not decode, or refers to a transfer we do not know,
//! is dropped with a debug log and never reaches the user.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::core::config::TRANSFER_IDLE_TIMEOUT;
use crate::core::initializer::{AppEvent, ChatLine};
use crate::core::pipeline::receiver::{ChunkOutcome, OfferOutcome, TransferTable};
use crate::core::protocol::message::{FileCancel, Message};
use crate::core::protocol::outbound::Outbound;

pub struct Inbound {
    table: TransferTable,
    outbound: Outbound,
    app_tx: mpsc::UnboundedSender<AppEvent>,
}

impl Inbound {
    pub fn new(outbound: Outbound, app_tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            table: TransferTable::new(),
            outbound,
            app_tx,
        }
    }

    fn notify(&self, event: AppEvent) {
        let _ = self.app_tx.send(event);
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    pub async fn handle(&mut self, peer_id: &str, data: &str) {
        let message = match Message::decode(data) {
            Ok(m) => m,
            Err(e) => {
                debug!(event = "inbound_malformed", peer_id = %peer_id, error = %e, bytes = data.len(), "Dropping undecodable message");
                return;
            }
        };
        trace!(
            event = "inbound_message",
            peer_id = %peer_id,
            kind = message.kind(),
            transfer_id = message.transfer_id().unwrap_or("-"),
            "Message received"
        );

        match message {
            Message::Text(text) => {
                self.notify(AppEvent::Chat(ChatLine::remote(peer_id, text)));
            }
            Message::FileOffer(offer) => {
                let (transfer_id, file_name, file_size, nickname) = (
                    offer.transfer_id.clone(),
                    offer.file_name.clone(),
                    offer.file_size,
                    offer.nickname.clone(),
                );
                match self.table.offer(peer_id, offer) {
                    OfferOutcome::Rejected(reason) => {
                        debug!(event = "offer_rejected", peer_id = %peer_id, transfer_id = %transfer_id, reason, "Dropping file offer");
                        self.decline(peer_id, &transfer_id, reason).await;
                    }
                    outcome => {
                        if outcome == OfferOutcome::Replaced {
                            debug!(event = "offer_replaced", transfer_id = %transfer_id, "Duplicate offer resets transfer");
                        }
                        info!(event = "file_incoming", peer_id = %peer_id, transfer_id = %transfer_id, file = %file_name, size = file_size, "Incoming file");
                        self.notify(AppEvent::FileIncoming {
                            peer_id: peer_id.to_string(),
                            transfer_id,
                            file_name,
                            file_size,
                            nickname,
                        });
                    }
                }
            }
            Message::FileChunk(chunk) => {
                let transfer_id = chunk.transfer_id.clone();
                match self.table.chunk(peer_id, chunk) {
                    ChunkOutcome::Stored { received, total } => {
                        self.notify(AppEvent::FileProgress {
                            peer_id: peer_id.to_string(),
                            transfer_id,
                            received,
                            total,
                        });
                    }
                    other => {
                        debug!(event = "chunk_dropped", peer_id = %peer_id, transfer_id = %transfer_id, outcome = ?other, "Chunk not stored");
                    }
                }
            }
            Message::FileComplete(complete) => match self.table.complete(peer_id, &complete) {
                Ok(Some(file)) => {
                    info!(event = "file_received", peer_id = %peer_id, transfer_id = %file.transfer_id, bytes = file.data.len(), "File received");
                    self.notify(AppEvent::FileReceived(file));
                }
                Ok(None) => {
                    debug!(event = "complete_unknown", transfer_id = %complete.transfer_id, "Completion for unknown transfer");
                }
                Err(e) => {
                    self.notify(AppEvent::TransferFailed {
                        transfer_id: complete.transfer_id,
                        reason: e.to_string(),
                    });
                }
            },
            Message::FileCancel(cancel) => self.handle_cancel(peer_id, cancel).await,
        }
    }

    async fn handle_cancel(&mut self, peer_id: &str, cancel: FileCancel) {
        if let Some(t) = self.table.cancel(peer_id, &cancel.transfer_id) {
            info!(event = "incoming_cancelled", peer_id = %peer_id, transfer_id = %t.transfer_id, "Sender cancelled transfer");
            self.notify(AppEvent::TransferCancelled {
                transfer_id: t.transfer_id,
                file_name: t.file_name,
                reason: cancel
                    .reason
                    .unwrap_or_else(|| "cancelled by sender".to_string()),
            });
            return;
        }
        if let Some(file_name) = self
            .outbound
            .remove_target(&cancel.transfer_id, peer_id)
            .await
        {
            info!(event = "recipient_declined", peer_id = %peer_id, transfer_id = %cancel.transfer_id, "Recipient declined transfer");
            self.notify(AppEvent::RecipientDeclined {
                peer_id: peer_id.to_string(),
                transfer_id: cancel.transfer_id,
                file_name,
            });
            return;
        }
        debug!(event = "cancel_unknown", transfer_id = %cancel.transfer_id, "Cancel for unknown transfer");
    }

    async fn decline(&self, peer_id: &str, transfer_id: &str, reason: &str) {
        let msg = Message::FileCancel(FileCancel {
            transfer_id: transfer_id.to_string(),
            reason: Some(reason.to_string()),
        });
        if let Err(e) = self.outbound.send_to(peer_id, &msg).await {
            debug!(event = "decline_send_failure", peer_id = %peer_id, error = %e, "Could not send file-cancel");
        }
    }

    /// Stop receiving a transfer (by id or id prefix) and tell its sender.
    /// Returns the file name when a transfer matched.
    pub async fn cancel_incoming(&mut self, id: &str) -> Option<String> {
        let (peer_id, transfer_id) = self.table.resolve(id)?;
        let t = self.table.cancel(&peer_id, &transfer_id)?;
        self.decline(&peer_id, &transfer_id, "cancelled by recipient")
            .await;
        self.notify(AppEvent::TransferCancelled {
            transfer_id,
            file_name: t.file_name.clone(),
            reason: "cancelled locally".into(),
        });
        Some(t.file_name)
    }

    /// Release everything a disconnected peer had in flight, both ways.
    pub async fn drop_peer(&mut self, peer_id: &str) -> usize {
        self.outbound.drop_peer(peer_id).await;
        let dropped = self.table.drop_peer(peer_id);
        for t in &dropped {
            self.notify(AppEvent::TransferFailed {
                transfer_id: t.transfer_id.clone(),
                reason: format!("{} disconnected", t.nickname),
            });
        }
        dropped.len()
    }

    /// Expire transfers that saw no chunk for `TRANSFER_IDLE_TIMEOUT`.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired = self.table.expire_idle(now, TRANSFER_IDLE_TIMEOUT);
        for t in &expired {
            warn!(event = "transfer_expired", transfer_id = %t.transfer_id, received = t.received_chunks(), total = t.total_chunks(), "Incoming transfer timed out");
            self.notify(AppEvent::TransferFailed {
                transfer_id: t.transfer_id.clone(),
                reason: format!(
                    "timed out after {}s without data",
                    TRANSFER_IDLE_TIMEOUT.as_secs()
                ),
            });
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::ChannelRef;
    use crate::core::channel::memory::MemoryChannel;
    use crate::core::connection::Transport;
    use crate::core::connection::memory::MemoryTransport;
    use crate::core::identity::LocalIdentity;
    use crate::core::peer_registry::{PeerEntry, PeerRegistry};
    use crate::core::pipeline::chunk::Checksum;
    use crate::core::protocol::message::{FileChunk, FileComplete, FileOffer, TextMessage};
    use crate::core::signaling::state::SignalingState;
    use std::sync::Arc;
    use std::time::Duration;

    async fn inbound_with(peer: &str) -> (Inbound, Arc<MemoryChannel>, mpsc::UnboundedReceiver<AppEvent>) {
        let registry = PeerRegistry::shared();
        let ch = MemoryChannel::open_detached(peer);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.write().await.insert(PeerEntry {
            peer_id: peer.into(),
            link: MemoryTransport::new().open_link(peer, tx).await.unwrap(),
            channel: Some(ch.clone() as ChannelRef),
            signaling: SignalingState::Connected,
            connection_id: peer.into(),
            remote: None,
        });
        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(registry, LocalIdentity::generate(None).shared(), app_tx.clone());
        (Inbound::new(outbound, app_tx), ch, app_rx)
    }

    fn encode(m: Message) -> String {
        m.encode().unwrap()
    }

    fn offer(id: &str, size: u64) -> String {
        encode(Message::FileOffer(FileOffer {
            transfer_id: id.into(),
            file_name: "a.txt".into(),
            file_size: size,
            file_type: "text/plain".into(),
            total_chunks: crate::core::pipeline::chunk::chunk_count(size),
            user_id: "u2".into(),
            nickname: "Bob".into(),
            timestamp: chrono::Utc::now(),
        }))
    }

    fn chunk(id: &str, index: u32, data: &[u8]) -> String {
        encode(Message::FileChunk(FileChunk {
            transfer_id: id.into(),
            chunk_index: index,
            data: data.to_vec(),
        }))
    }

    fn complete(id: &str, checksum: Option<String>) -> String {
        encode(Message::FileComplete(FileComplete {
            transfer_id: id.into(),
            checksum,
        }))
    }

    fn events(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn text_becomes_chat_line() {
        let (mut inbound, _ch, mut rx) = inbound_with("p1").await;
        let text = encode(Message::Text(TextMessage {
            content: "hey".into(),
            user_id: "u2".into(),
            nickname: "Bob".into(),
            timestamp: chrono::Utc::now(),
        }));
        inbound.handle("p1", &text).await;
        inbound.handle("p1", &text).await;
        let evs = events(&mut rx);
        assert_eq!(evs.len(), 2);
        assert!(matches!(&evs[0], AppEvent::Chat(l) if !l.own && l.nickname == "Bob" && l.peer_id.as_deref() == Some("p1")));
    }

    #[tokio::test]
    async fn garbage_is_dropped_silently() {
        let (mut inbound, _ch, mut rx) = inbound_with("p1").await;
        inbound.handle("p1", "{not json").await;
        inbound.handle("p1", r#"{"type":"mystery"}"#).await;
        inbound.handle("p1", &chunk("nope", 0, b"x")).await;
        inbound.handle("p1", &complete("nope", None)).await;
        assert!(events(&mut rx).is_empty());
        assert_eq!(inbound.in_flight(), 0);
    }

    #[tokio::test]
    async fn offer_chunks_complete_yields_file() {
        let (mut inbound, _ch, mut rx) = inbound_with("p1").await;
        inbound.handle("p1", &offer("t1", 5)).await;
        inbound.handle("p1", &chunk("t1", 0, b"hello")).await;
        inbound.handle("p1", &chunk("t1", 0, b"hello")).await;
        inbound
            .handle("p1", &complete("t1", Some(Checksum::of(b"hello"))))
            .await;

        let evs = events(&mut rx);
        assert!(matches!(&evs[0], AppEvent::FileIncoming { file_size: 5, .. }));
        assert!(matches!(&evs[1], AppEvent::FileProgress { received: 1, total: 1, .. }));
        assert_eq!(evs.len(), 3, "duplicate chunk must not report progress");
        let AppEvent::FileReceived(file) = &evs[2] else {
            panic!("expected file");
        };
        assert_eq!(&file.data[..], b"hello");
        assert_eq!(file.mime, "text/plain");
        assert_eq!(inbound.in_flight(), 0);
    }

    #[tokio::test]
    async fn premature_complete_fails_transfer() {
        let (mut inbound, _ch, mut rx) = inbound_with("p1").await;
        inbound.handle("p1", &offer("t1", 70_000)).await;
        inbound.handle("p1", &complete("t1", None)).await;
        let evs = events(&mut rx);
        assert!(matches!(&evs[1], AppEvent::TransferFailed { reason, .. } if reason.contains("2 chunk(s) missing")));
    }

    #[tokio::test]
    async fn oversized_offer_is_declined() {
        let (mut inbound, ch, mut rx) = inbound_with("p1").await;
        inbound
            .handle("p1", &offer("t1", crate::core::config::MAX_FILE_SIZE + 1))
            .await;
        assert!(events(&mut rx).is_empty());
        assert_eq!(inbound.in_flight(), 0);
        assert!(matches!(&ch.sent_messages()[..], [Message::FileCancel(c)] if c.transfer_id == "t1"));
    }

    #[tokio::test]
    async fn sender_cancel_discards_state() {
        let (mut inbound, _ch, mut rx) = inbound_with("p1").await;
        inbound.handle("p1", &offer("t1", 5)).await;
        let cancel = encode(Message::FileCancel(FileCancel {
            transfer_id: "t1".into(),
            reason: None,
        }));
        // Another peer cannot cancel it.
        inbound.handle("p2", &cancel).await;
        assert_eq!(inbound.in_flight(), 1);
        inbound.handle("p1", &cancel).await;
        assert_eq!(inbound.in_flight(), 0);
        let evs = events(&mut rx);
        assert!(matches!(evs.last(), Some(AppEvent::TransferCancelled { reason, .. }) if reason == "cancelled by sender"));
    }

    #[tokio::test]
    async fn local_cancel_notifies_sender() {
        let (mut inbound, ch, _rx) = inbound_with("p1").await;
        inbound.handle("p1", &offer("abcdef", 5)).await;
        assert_eq!(inbound.cancel_incoming("abc").await.as_deref(), Some("a.txt"));
        assert_eq!(inbound.in_flight(), 0);
        assert!(matches!(&ch.sent_messages()[..], [Message::FileCancel(c)] if c.transfer_id == "abcdef"));
        assert!(inbound.cancel_incoming("abc").await.is_none());
    }

    #[tokio::test]
    async fn disconnect_releases_transfers() {
        let (mut inbound, _ch, mut rx) = inbound_with("p1").await;
        inbound.handle("p1", &offer("t1", 5)).await;
        inbound.handle("p1", &offer("t2", 5)).await;
        assert_eq!(inbound.drop_peer("p1").await, 2);
        assert_eq!(inbound.in_flight(), 0);
        let failed = events(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AppEvent::TransferFailed { .. }))
            .count();
        assert_eq!(failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_stalled_transfers() {
        let (mut inbound, _ch, mut rx) = inbound_with("p1").await;
        inbound.handle("p1", &offer("t1", 70_000)).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(inbound.sweep(Instant::now()), 0);
        tokio::time::advance(TRANSFER_IDLE_TIMEOUT).await;
        assert_eq!(inbound.sweep(Instant::now()), 1);
        assert!(matches!(events(&mut rx).last(), Some(AppEvent::TransferFailed { .. })));
    }
}
