//! Error taxonomy for the connection and transfer core.
//!
//! No variant is fatal. Each one either leaves state untouched (so the
//! user can retry) or is isolated to a single peer or transfer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Descriptor or channel construction failed inside the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A pasted descriptor could not be parsed.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("No pending connection found. Please create an offer first.")]
    NoPendingOffer,

    #[error("No peers connected")]
    NoChannelsOpen,

    #[error("File \"{name}\" is too large ({size} bytes, maximum is {max})")]
    FileTooLarge { name: String, size: u64, max: u64 },

    /// One channel rejected a send during a broadcast.
    #[error("Failed to send to {peer_id}: {reason}")]
    SendFailure { peer_id: String, reason: String },

    #[error("Transfer {transfer_id} incomplete: {missing} chunk(s) missing")]
    IncompleteTransfer { transfer_id: String, missing: u32 },

    #[error("Transfer {transfer_id} failed integrity check")]
    IntegrityMismatch { transfer_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_user_readable() {
        let err = CoreError::FileTooLarge {
            name: "movie.mkv".into(),
            size: 200,
            max: 100,
        };
        assert_eq!(
            err.to_string(),
            "File \"movie.mkv\" is too large (200 bytes, maximum is 100)"
        );
        assert_eq!(CoreError::NoChannelsOpen.to_string(), "No peers connected");
    }

    #[test]
    fn json_errors_convert() {
        let err: CoreError = serde_json::from_str::<u8>("nope").unwrap_err().into();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
