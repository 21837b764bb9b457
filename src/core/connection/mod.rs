//! Connection establishment boundary.
//!
//! A [`Transport`] builds [`Link`]s; a link is one peer connection that can
//! produce a local descriptor, apply a remote one and create channels.
//! Everything asynchronous the transport observes (link state, incoming
//! channels, channel lifecycle, messages) is funneled into a single
//! [`TransportEvent`] stream consumed by the dispatcher.

#[cfg(test)]
pub mod memory;
pub mod webrtc;

use crate::core::channel::ChannelRef;
use crate::core::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which half of the offer/answer exchange a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpRole {
    Offer,
    Answer,
}

impl fmt::Display for SdpRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        })
    }
}

/// Connectivity of the underlying link as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// The link carries traffic.
    pub fn is_up(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }

    /// The link is gone and its connection should be torn down.
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Events emitted by transports, links and channels.
pub enum TransportEvent {
    ChannelOpen { peer_id: String },
    ChannelClosed { peer_id: String },
    ChannelMessage { peer_id: String, data: String },
    ChannelError { peer_id: String, error: String },
    LinkStateChanged { peer_id: String, state: LinkState },
    /// The remote side opened a channel on this link (answering role).
    IncomingChannel { peer_id: String, channel: ChannelRef },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelOpen { peer_id } => write!(f, "ChannelOpen({peer_id})"),
            Self::ChannelClosed { peer_id } => write!(f, "ChannelClosed({peer_id})"),
            Self::ChannelMessage { peer_id, data } => {
                write!(f, "ChannelMessage({peer_id}, {} bytes)", data.len())
            }
            Self::ChannelError { peer_id, error } => write!(f, "ChannelError({peer_id}, {error})"),
            Self::LinkStateChanged { peer_id, state } => {
                write!(f, "LinkStateChanged({peer_id}, {state:?})")
            }
            Self::IncomingChannel { peer_id, channel } => {
                write!(f, "IncomingChannel({peer_id}, {})", channel.label())
            }
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// One peer connection owned by the peer registry.
#[async_trait]
pub trait Link: Send + Sync {
    /// Create an ordered, reliable channel (offering role).
    async fn create_channel(&self, label: &str) -> Result<ChannelRef>;

    /// Create the local offer or answer and start candidate gathering.
    async fn create_local_descriptor(&self, role: SdpRole) -> Result<()>;

    /// Resolves once candidate gathering has finished. May never resolve;
    /// callers bound it with a timeout.
    async fn wait_gathering_complete(&self);

    /// The local descriptor with every candidate gathered so far, as an
    /// opaque JSON object.
    async fn local_descriptor(&self) -> Result<serde_json::Value>;

    async fn apply_remote_descriptor(&self, sdp: serde_json::Value) -> Result<()>;

    async fn close(&self);
}

pub type LinkRef = Arc<dyn Link>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Build a new link whose events are tagged with `peer_id`.
    async fn open_link(&self, peer_id: &str, events: EventSender) -> Result<LinkRef>;
}
