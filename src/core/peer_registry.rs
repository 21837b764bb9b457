//! Registry of live peer connections.
//!
//! One [`PeerEntry`] per connection attempt, keyed by a locally generated
//! `peer_id` and kept in insertion order so that "first pending offer"
//! lookups are deterministic. Shared between the signaling coordinator,
//! the outbound sender and the dispatcher behind a tokio `RwLock`; callers
//! clone channel and link handles out of the guard before awaiting on them.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::channel::{ChannelRef, ReadyState};
use crate::core::connection::LinkRef;
use crate::core::signaling::state::SignalingState;

/// Who is on the other end, as announced in their descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub user_id: String,
    pub nickname: String,
}

pub struct PeerEntry {
    pub peer_id: String,
    pub link: LinkRef,
    pub channel: Option<ChannelRef>,
    pub signaling: SignalingState,
    pub connection_id: String,
    pub remote: Option<RemoteIdentity>,
}

impl PeerEntry {
    pub fn is_open(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|c| c.ready_state() == ReadyState::Open)
    }
}

/// Read-only view of an entry for display.
#[derive(Debug, Clone)]
pub struct PeerSummary {
    pub peer_id: String,
    pub signaling: SignalingState,
    pub channel: Option<ReadyState>,
    pub remote: Option<RemoteIdentity>,
}

#[derive(Default)]
pub struct PeerRegistry {
    entries: Vec<PeerEntry>,
}

pub type SharedRegistry = Arc<RwLock<PeerRegistry>>;

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn insert(&mut self, entry: PeerEntry) {
        debug!(event = "peer_registered", peer_id = %entry.peer_id, "Peer entry added");
        self.entries.retain(|e| e.peer_id != entry.peer_id);
        self.entries.push(entry);
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerEntry> {
        self.entries.iter().find(|e| e.peer_id == peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerEntry> {
        self.entries.iter_mut().find(|e| e.peer_id == peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.get(peer_id).is_some()
    }

    /// Take the entry out of the registry. The caller closes its channel
    /// and link outside the lock.
    pub fn remove(&mut self, peer_id: &str) -> Option<PeerEntry> {
        let pos = self.entries.iter().position(|e| e.peer_id == peer_id)?;
        debug!(event = "peer_unregistered", peer_id = %peer_id, "Peer entry removed");
        Some(self.entries.remove(pos))
    }

    /// Attach `channel`, replacing any previous one. Returns `false` when the
    /// peer is unknown.
    pub fn attach_channel(&mut self, peer_id: &str, channel: ChannelRef) -> bool {
        match self.get_mut(peer_id) {
            Some(entry) => {
                entry.channel = Some(channel);
                true
            }
            None => false,
        }
    }

    /// Forget the channel of a peer; the entry itself stays.
    pub fn detach_channel(&mut self, peer_id: &str) -> Option<ChannelRef> {
        self.get_mut(peer_id)?.channel.take()
    }

    pub fn set_signaling(&mut self, peer_id: &str, state: SignalingState) -> bool {
        match self.get_mut(peer_id) {
            Some(entry) if entry.signaling.can_advance_to(state) => {
                entry.signaling = state;
                true
            }
            _ => false,
        }
    }

    pub fn set_remote(&mut self, peer_id: &str, remote: RemoteIdentity) {
        if let Some(entry) = self.get_mut(peer_id) {
            entry.remote = Some(remote);
        }
    }

    pub fn first_in_state(&self, state: SignalingState) -> Option<&PeerEntry> {
        self.entries.iter().find(|e| e.signaling == state)
    }

    pub fn find_by_connection_id(&self, connection_id: &str) -> Option<&PeerEntry> {
        self.entries.iter().find(|e| e.connection_id == connection_id)
    }

    /// `(peer_id, channel)` for every open channel, in insertion order.
    pub fn open_channels(&self) -> Vec<(String, ChannelRef)> {
        self.entries
            .iter()
            .filter(|e| e.is_open())
            .filter_map(|e| e.channel.clone().map(|c| (e.peer_id.clone(), c)))
            .collect()
    }

    pub fn open_channel(&self, peer_id: &str) -> Option<ChannelRef> {
        self.get(peer_id)
            .filter(|e| e.is_open())
            .and_then(|e| e.channel.clone())
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_open()).count()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PeerSummary> {
        self.entries
            .iter()
            .map(|e| PeerSummary {
                peer_id: e.peer_id.clone(),
                signaling: e.signaling,
                channel: e.channel.as_ref().map(|c| c.ready_state()),
                remote: e.remote.clone(),
            })
            .collect()
    }

    /// Remove every entry, for shutdown.
    pub fn drain(&mut self) -> Vec<PeerEntry> {
        std::mem::take(&mut self.entries)
    }
}
