//! Wire error types

use thiserror::Error;

/// Errors raised by framing and message codecs
#[derive(Error, Debug)]
pub enum WireError {
    /// Socket failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Body failed to encode/decode
    #[error("Codec error: {0}")]
    Codec(String),

    /// Frame exceeds the body size cap
    #[error("Message of {0} bytes exceeds the size cap")]
    MessageTooLarge(usize),

    /// Peer closed the stream mid-frame
    #[error("Connection closed by peer")]
    ConnectionClosed,
}
