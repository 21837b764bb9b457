pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod initializer;
pub mod peer_registry;
pub mod pipeline;
pub mod protocol;
pub mod signaling;
