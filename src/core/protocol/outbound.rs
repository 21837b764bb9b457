//! Outbound half of the transfer protocol.
//!
//! Text is broadcast to every open channel. Files are announced with a
//! `file-offer`, streamed as `file-chunk`s in index order and closed with a
//! `file-complete` carrying the whole-file checksum. The peers with an open
//! channel at offer time are the transfer's targets; a target leaves when
//! it declines with `file-cancel` or disconnects, and the send stops once
//! none are left.

#[cfg(test)]
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::channel::{ChannelRef, ReadyState};
use crate::core::config::{
    BACKPRESSURE_MAX_WAIT, BACKPRESSURE_POLL_INTERVAL, DC_BUFFERED_AMOUNT_HIGH,
    DC_BUFFERED_AMOUNT_LOW, MAX_FILE_SIZE,
};
use crate::core::error::{CoreError, Result};
use crate::core::identity::SharedIdentity;
use crate::core::initializer::{AppEvent, ChatLine};
use crate::core::peer_registry::SharedRegistry;
use crate::core::pipeline::chunk::chunk_count;
use crate::core::pipeline::sender::spawn_reader;
use crate::core::protocol::message::{
    FileCancel, FileChunk, FileComplete, FileOffer, Message, TextMessage,
};
use crate::utils::sos::SignalOfStop;

type Target = (String, ChannelRef);

enum FileSource {
    Path(PathBuf),
    #[cfg(test)]
    Bytes(Bytes),
}

/// A file queued for sending.
pub struct OutgoingFile {
    pub name: String,
    pub size: u64,
    pub mime: String,
    source: FileSource,
}

impl OutgoingFile {
    pub async fn from_path(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            mime: guess_mime(&name),
            name,
            size: meta.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    #[cfg(test)]
    pub fn from_bytes(name: &str, data: Bytes) -> Self {
        Self {
            name: name.to_string(),
            size: data.len() as u64,
            mime: guess_mime(name),
            source: FileSource::Bytes(data),
        }
    }

    async fn open(&self) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        Ok(match &self.source {
            FileSource::Path(p) => Box::new(tokio::fs::File::open(p).await?),
            #[cfg(test)]
            FileSource::Bytes(b) => Box::new(std::io::Cursor::new(b.clone())),
        })
    }
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    /// Stopped locally; remaining targets were told with `file-cancel`.
    Cancelled,
    /// Every target declined or went away.
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct SendReport {
    pub transfer_id: String,
    pub outcome: SendOutcome,
    pub chunks_sent: u32,
    pub targets_left: usize,
}

struct OutgoingTransfer {
    file_name: String,
    stop: SignalOfStop,
    targets: Vec<String>,
}

/// Sender for text and files. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Outbound {
    registry: SharedRegistry,
    identity: SharedIdentity,
    app_tx: mpsc::UnboundedSender<AppEvent>,
    outgoing: Arc<Mutex<HashMap<String, OutgoingTransfer>>>,
}

impl Outbound {
    pub fn new(
        registry: SharedRegistry,
        identity: SharedIdentity,
        app_tx: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            registry,
            identity,
            app_tx,
            outgoing: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn notify(&self, event: AppEvent) {
        let _ = self.app_tx.send(event);
    }

    /// Send `message` to every open channel. Returns the number of
    /// channels that accepted it.
    pub async fn broadcast(&self, message: &Message) -> Result<usize> {
        let text = message.encode()?;
        let targets = self.registry.read().await.open_channels();
        Ok(broadcast_to(&targets, &text).await)
    }

    /// Send to one peer only.
    pub async fn send_to(&self, peer_id: &str, message: &Message) -> Result<()> {
        let channel = self
            .registry
            .read()
            .await
            .open_channel(peer_id)
            .ok_or(CoreError::NoChannelsOpen)?;
        channel.send_text(&message.encode()?).await
    }

    /// Broadcast a chat line. Blank input is ignored and yields `None`.
    /// The local echo is emitted whether or not any peer accepted it.
    pub async fn send_text(&self, content: &str) -> Result<Option<ChatLine>> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        if self.registry.read().await.open_count() == 0 {
            return Err(CoreError::NoChannelsOpen);
        }

        let (user_id, nickname) = self.whoami().await;
        let msg = TextMessage {
            content: content.to_string(),
            user_id,
            nickname,
            timestamp: Utc::now(),
        };
        let delivered = self.broadcast(&Message::Text(msg.clone())).await?;
        debug!(event = "text_sent", delivered, "Chat message broadcast");

        let line = ChatLine::own(msg);
        self.notify(AppEvent::Chat(line.clone()));
        Ok(Some(line))
    }

    /// Send a file and wait until the transfer ends.
    #[cfg(test)]
    pub async fn send_file(&self, file: OutgoingFile) -> Result<SendReport> {
        let prepared = self.prepare(file).await?;
        self.stream(prepared).await
    }

    /// Validate and register a file send, then run it in the background.
    pub async fn start_file(
        &self,
        file: OutgoingFile,
    ) -> Result<(String, JoinHandle<Result<SendReport>>)> {
        let prepared = self.prepare(file).await?;
        let transfer_id = prepared.transfer_id.clone();
        let this = self.clone();
        let handle = tokio::spawn(async move { this.stream(prepared).await });
        Ok((transfer_id, handle))
    }

    async fn prepare(&self, file: OutgoingFile) -> Result<PreparedSend> {
        if file.size > MAX_FILE_SIZE {
            return Err(CoreError::FileTooLarge {
                name: file.name,
                size: file.size,
                max: MAX_FILE_SIZE,
            });
        }
        let targets = self.registry.read().await.open_channels();
        if targets.is_empty() {
            return Err(CoreError::NoChannelsOpen);
        }

        let transfer_id = Uuid::new_v4().to_string();
        let stop = SignalOfStop::new();
        self.outgoing.lock().await.insert(
            transfer_id.clone(),
            OutgoingTransfer {
                file_name: file.name.clone(),
                stop: stop.clone(),
                targets: targets.iter().map(|(p, _)| p.clone()).collect(),
            },
        );
        Ok(PreparedSend {
            transfer_id,
            file,
            stop,
            targets,
        })
    }

    async fn stream(&self, prepared: PreparedSend) -> Result<SendReport> {
        let transfer_id = prepared.transfer_id.clone();
        let result = self.stream_inner(prepared).await;
        self.outgoing.lock().await.remove(&transfer_id);
        match &result {
            Ok(report) => debug!(
                event = "send_finished",
                transfer_id = %report.transfer_id,
                outcome = ?report.outcome,
                chunks_sent = report.chunks_sent,
                targets_left = report.targets_left,
                "File send finished"
            ),
            Err(e) => {
                warn!(event = "send_failed", transfer_id = %transfer_id, error = %e, "File send failed");
                self.notify(AppEvent::TransferFailed {
                    transfer_id,
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    async fn stream_inner(&self, prepared: PreparedSend) -> Result<SendReport> {
        let PreparedSend {
            transfer_id,
            file,
            stop,
            targets: all_targets,
        } = prepared;
        let total = chunk_count(file.size);
        // Nothing goes on the wire until the source is readable.
        let source = file.open().await?;
        let (user_id, nickname) = self.whoami().await;

        let offer = Message::FileOffer(FileOffer {
            transfer_id: transfer_id.clone(),
            file_name: file.name.clone(),
            file_size: file.size,
            file_type: file.mime.clone(),
            total_chunks: total,
            user_id,
            nickname,
            timestamp: Utc::now(),
        });
        let offered = broadcast_to(&all_targets, &offer.encode()?).await;
        if offered == 0 {
            return Err(CoreError::NoChannelsOpen);
        }
        info!(
            event = "send_started",
            transfer_id = %transfer_id,
            file = %file.name,
            size = file.size,
            chunks = total,
            peers = offered,
            "File offer sent"
        );
        self.notify(AppEvent::SendStarted {
            transfer_id: transfer_id.clone(),
            file_name: file.name.clone(),
            file_size: file.size,
            peers: offered,
        });

        let (mut rx, reader) = spawn_reader(source, file.size);
        let mut chunks_sent = 0u32;

        let outcome = loop {
            let chunk = tokio::select! {
                biased;
                _ = stop.wait() => break SendOutcome::Cancelled,
                chunk = rx.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                break SendOutcome::Completed;
            };

            for (_, channel) in &self.live_targets(&transfer_id, &all_targets).await {
                wait_for_buffer_space(channel, &stop).await;
            }
            if stop.cancelled() {
                break SendOutcome::Cancelled;
            }
            // Targets may have declined while we waited.
            let targets = self.live_targets(&transfer_id, &all_targets).await;
            if targets.is_empty() {
                break SendOutcome::Abandoned;
            }

            let msg = Message::FileChunk(FileChunk {
                transfer_id: transfer_id.clone(),
                chunk_index: chunk.index,
                data: chunk.data,
            });
            broadcast_to(&targets, &msg.encode()?).await;
            chunks_sent += 1;
            self.notify(AppEvent::SendProgress {
                transfer_id: transfer_id.clone(),
                sent: chunk.index + 1,
                total,
            });
        };
        drop(rx);

        let targets = self.live_targets(&transfer_id, &all_targets).await;
        match outcome {
            SendOutcome::Completed => {
                let read = reader
                    .await
                    .map_err(|e| CoreError::Transport(format!("reader task failed: {e}")));
                let read = match read.and_then(|r| r) {
                    Ok(r) => r,
                    Err(e) => {
                        self.send_cancel(&targets, &transfer_id, "sender failed to read the file")
                            .await;
                        return Err(e);
                    }
                };
                let complete = Message::FileComplete(FileComplete {
                    transfer_id: transfer_id.clone(),
                    checksum: Some(read.checksum),
                });
                let delivered = broadcast_to(&targets, &complete.encode()?).await;
                info!(
                    event = "send_complete",
                    transfer_id = %transfer_id,
                    chunks = read.chunks_read,
                    delivered,
                    "File sent"
                );
                self.notify(AppEvent::SendComplete {
                    transfer_id: transfer_id.clone(),
                    file_name: file.name,
                    delivered,
                });
            }
            SendOutcome::Cancelled => {
                reader.abort();
                self.send_cancel(&targets, &transfer_id, "cancelled by sender")
                    .await;
                info!(event = "send_cancelled", transfer_id = %transfer_id, "File send cancelled");
                self.notify(AppEvent::TransferCancelled {
                    transfer_id: transfer_id.clone(),
                    file_name: file.name,
                    reason: "cancelled locally".into(),
                });
            }
            SendOutcome::Abandoned => {
                reader.abort();
                info!(event = "send_abandoned", transfer_id = %transfer_id, "No recipients left");
                self.notify(AppEvent::TransferCancelled {
                    transfer_id: transfer_id.clone(),
                    file_name: file.name,
                    reason: "declined by every recipient".into(),
                });
            }
        }

        Ok(SendReport {
            transfer_id,
            outcome,
            chunks_sent,
            targets_left: targets.len(),
        })
    }

    async fn send_cancel(&self, targets: &[Target], transfer_id: &str, reason: &str) {
        let cancel = Message::FileCancel(FileCancel {
            transfer_id: transfer_id.to_string(),
            reason: Some(reason.to_string()),
        });
        if let Ok(text) = cancel.encode() {
            broadcast_to(targets, &text).await;
        }
    }

    /// Targets still subscribed to `transfer_id` whose channel is open.
    async fn live_targets(&self, transfer_id: &str, all: &[Target]) -> Vec<Target> {
        let outgoing = self.outgoing.lock().await;
        let Some(t) = outgoing.get(transfer_id) else {
            return Vec::new();
        };
        all.iter()
            .filter(|(peer, ch)| t.targets.contains(peer) && ch.ready_state() == ReadyState::Open)
            .cloned()
            .collect()
    }

    async fn whoami(&self) -> (String, String) {
        let id = self.identity.read().await;
        (id.user_id.clone(), id.nickname())
    }

    /// Stop an outgoing transfer by id or unambiguous id prefix.
    pub async fn cancel_outgoing(&self, id: &str) -> bool {
        let outgoing = self.outgoing.lock().await;
        let mut hits = outgoing
            .iter()
            .filter(|(tid, _)| tid.as_str() == id || tid.starts_with(id));
        match (hits.next(), hits.next()) {
            (Some((_, t)), None) => {
                t.stop.cancel();
                true
            }
            _ => match outgoing.get(id) {
                Some(t) => {
                    t.stop.cancel();
                    true
                }
                None => false,
            },
        }
    }

    /// A recipient declined: stop sending it chunks. Returns the file name
    /// when `peer_id` was a target.
    pub async fn remove_target(&self, transfer_id: &str, peer_id: &str) -> Option<String> {
        let mut outgoing = self.outgoing.lock().await;
        let t = outgoing.get_mut(transfer_id)?;
        let before = t.targets.len();
        t.targets.retain(|p| p != peer_id);
        (t.targets.len() < before).then(|| t.file_name.clone())
    }

    /// Remove a disconnected peer from every outgoing transfer.
    pub async fn drop_peer(&self, peer_id: &str) {
        for t in self.outgoing.lock().await.values_mut() {
            t.targets.retain(|p| p != peer_id);
        }
    }

    pub async fn active_sends(&self) -> Vec<(String, String)> {
        self.outgoing
            .lock()
            .await
            .iter()
            .map(|(id, t)| (id.clone(), t.file_name.clone()))
            .collect()
    }

    /// Stop every outgoing transfer, for shutdown.
    pub async fn cancel_all(&self) {
        for t in self.outgoing.lock().await.values() {
            t.stop.cancel();
        }
    }
}

struct PreparedSend {
    transfer_id: String,
    file: OutgoingFile,
    stop: SignalOfStop,
    targets: Vec<Target>,
}

/// Send `text` to each target in turn. A failing channel is logged and
/// skipped; the rest still receive the message.
async fn broadcast_to(targets: &[Target], text: &str) -> usize {
    let mut delivered = 0;
    for (peer_id, channel) in targets {
        match channel.send_text(text).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                let err = CoreError::SendFailure {
                    peer_id: peer_id.clone(),
                    reason: e.to_string(),
                };
                warn!(event = "broadcast_send_failure", peer_id = %peer_id, error = %err, "Broadcast send failed");
            }
        }
    }
    delivered
}

/// Suspend while the channel holds more than the high-water mark, until it
/// drains to the low-water mark. Gives up after `BACKPRESSURE_MAX_WAIT` and
/// lets the caller send anyway.
async fn wait_for_buffer_space(channel: &ChannelRef, stop: &SignalOfStop) {
    if channel.buffered_amount().await <= DC_BUFFERED_AMOUNT_HIGH {
        return;
    }
    let deadline = Instant::now() + BACKPRESSURE_MAX_WAIT;
    loop {
        sleep(BACKPRESSURE_POLL_INTERVAL).await;
        if stop.cancelled() || channel.ready_state() != ReadyState::Open {
            return;
        }
        let buffered = channel.buffered_amount().await;
        if buffered <= DC_BUFFERED_AMOUNT_LOW {
            return;
        }
        if Instant::now() >= deadline {
            warn!(
                event = "backpressure_timeout",
                channel = %channel.label(),
                buffered,
                "Buffer drain timeout, proceeding anyway"
            );
            return;
        }
    }
}
