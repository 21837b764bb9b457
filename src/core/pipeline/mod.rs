//! Transfer pipeline: chunk geometry, the streaming sender-side reader and
//! receiver-side reassembly.

pub mod chunk;
pub mod receiver;
pub mod sender;
