//! 2PC error types

use thiserror::Error;

/// Errors raised by circuit construction and garbled execution
#[derive(Error, Debug)]
pub enum GcError {
    /// Transport failure
    #[error("Channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer did not answer within the configured window
    #[error("Timed out waiting for 2PC peer")]
    Timeout,

    /// Peer hung up mid-protocol
    #[error("2PC channel closed by peer")]
    ChannelClosed,

    /// Transport frame exceeded the size cap
    #[error("2PC message of {0} bytes exceeds the frame cap")]
    FrameTooLarge(usize),

    /// Malformed payload from the peer
    #[error("Failed to decode 2PC message: {0}")]
    Decode(String),

    /// Invalid curve point in an oblivious-transfer message
    #[error("Malformed oblivious-transfer point")]
    MalformedPoint,

    /// Circuit construction rejected
    #[error("Invalid circuit: {0}")]
    Circuit(String),

    /// Count/range mismatch between circuit and supplied data; indicates an
    /// upstream bug, never recoverable
    #[error("Circuit contract violation: {0}")]
    ContractViolation(String),

    /// Input value does not fit the circuit bit width
    #[error("Input value {value} does not fit in {bits} bits")]
    ValueTooWide { value: u64, bits: u32 },

    /// Protocol name recognized but not built into this engine
    #[error("Unsupported 2PC protocol '{0}', only 'yao' is available")]
    UnsupportedProtocol(String),

    /// Unknown protocol name
    #[error("Unknown 2PC protocol '{0}'")]
    UnknownProtocol(String),

    /// Unsupported security level
    #[error("Unsupported security level {0}, only 128 is supported")]
    UnsupportedSecurityLevel(u64),

    /// A party was reused without discarding the previous execution state
    #[error("2PC session must be reset between circuit executions")]
    SessionNotReset,
}
