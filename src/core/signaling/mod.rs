//! Manual signaling: offer/answer exchange by copy and paste.

pub mod coordinator;
pub mod descriptor;
pub mod state;

pub use coordinator::{LinkOutcome, SignalingCoordinator};
