//! In-memory channel used by the test suites.
//!
//! Two channels can be wired back to back with [`MemoryChannel::connect`];
//! a send on one side is delivered as a `ChannelMessage` on the other
//! side's event sender, tagged with the peer id that side uses.

use super::{Channel, ReadyState};
use crate::core::connection::{EventSender, TransportEvent};
use crate::core::error::{CoreError, Result};
use crate::core::protocol::message::Message;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct MemoryChannel {
    label: String,
    peer_id: String,
    state: Mutex<ReadyState>,
    events: Option<EventSender>,
    remote: Mutex<Option<(String, EventSender)>>,
    sent: Mutex<Vec<String>>,
    failing: AtomicBool,
    buffered: AtomicUsize,
}

impl MemoryChannel {
    pub fn new(label: &str, peer_id: &str, events: Option<EventSender>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            peer_id: peer_id.to_string(),
            state: Mutex::new(ReadyState::Connecting),
            events,
            remote: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
        })
    }

    /// A channel that is already open and delivers nowhere.
    pub fn open_detached(peer_id: &str) -> Arc<Self> {
        let ch = Self::new("chat", peer_id, None);
        ch.set_state(ReadyState::Open);
        ch
    }

    /// Wire `a` and `b` back to back.
    pub fn connect(a: &Arc<Self>, b: &Arc<Self>) {
        if let Some(tx) = &b.events {
            *a.remote.lock().unwrap() = Some((b.peer_id.clone(), tx.clone()));
        }
        if let Some(tx) = &a.events {
            *b.remote.lock().unwrap() = Some((a.peer_id.clone(), tx.clone()));
        }
    }

    pub fn set_state(&self, state: ReadyState) {
        *self.state.lock().unwrap() = state;
    }

    /// Mark open and emit `ChannelOpen` on the local event sender.
    pub fn open(&self) {
        self.set_state(ReadyState::Open);
        if let Some(tx) = &self.events {
            let _ = tx.send(TransportEvent::ChannelOpen {
                peer_id: self.peer_id.clone(),
            });
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_buffered(&self, amount: usize) {
        self.buffered.store(amount, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent()
            .iter()
            .map(|s| Message::decode(s).unwrap())
            .collect()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(CoreError::Transport(format!(
                "channel {} is {}",
                self.label,
                self.ready_state()
            )));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Transport("injected send failure".into()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        if let Some((remote_peer, tx)) = self.remote.lock().unwrap().as_ref() {
            let _ = tx.send(TransportEvent::ChannelMessage {
                peer_id: remote_peer.clone(),
                data: text.to_string(),
            });
        }
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.set_state(ReadyState::Closed);
        if let Some(tx) = &self.events {
            let _ = tx.send(TransportEvent::ChannelClosed {
                peer_id: self.peer_id.clone(),
            });
        }
    }
}
