//! CIPHERNET Wire Protocol
//!
//! Message schema and length-prefixed framing for the client/server
//! session. Bodies are bincode; the frame header is a 4-byte big-endian
//! length with a hard size cap. The session layer owns sequencing; this
//! crate owns bytes.

pub mod errors;
pub mod framing;
pub mod message;

pub use errors::WireError;
pub use framing::{read_message, write_message, MAX_BODY_SIZE};
pub use message::{Message, RoundHeader};

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;
