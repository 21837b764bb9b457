//! Application protocol multiplexed over chat channels: chat text and
//! chunked file transfer.

pub mod inbound;
pub mod message;
pub mod outbound;
