//! Channel abstraction: an ordered, reliable, message-oriented duplex link
//! between two connected peers.
//!
//! Implementations report their lifecycle (`open`, `close`, `message`,
//! `error`) as [`TransportEvent`]s on the event sender they were created
//! with; the core never polls a channel for incoming data.
//!
//! [`TransportEvent`]: crate::core::connection::TransportEvent

#[cfg(test)]
pub mod memory;

use crate::core::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a channel. Only [`ReadyState::Open`] channels may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ReadyState;

    /// Send one UTF-8 text message. Delivery order matches send order.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Bytes queued inside the transport and not yet handed to the network.
    async fn buffered_amount(&self) -> usize;

    async fn close(&self);
}

pub type ChannelRef = Arc<dyn Channel>;
