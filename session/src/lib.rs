//! CIPHERNET Session State Machine
//!
//! One session per inference run between exactly one client and one server.
//! The server's network I/O runs on tokio tasks; the evaluation loop (the
//! tensor-compiler driver's thread) is synchronous and blocks on
//! per-purpose channels when it needs data the network side has not yet
//! delivered. Each suspension point — handshake, encrypted inputs,
//! non-linear round replies — is one single-producer/single-consumer
//! channel carrying the ready event together with its payload.
//!
//! Sequencing: messages from one peer are processed in arrival order, and
//! the evaluation loop is strictly sequential per compiled function, so a
//! non-linear round never begins before the previous one has been applied.

pub mod client;
pub mod config;
pub mod errors;
pub mod server;

pub use ciphernet_gc::MpcProtocol;
pub use client::HeClient;
pub use config::{ClientConfig, GcOptions, InputMode, RetrySchedule, Role, ServerConfig};
pub use errors::SessionError;
pub use server::{HeServer, ServerSession};

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Elements per non-linear request message; larger batches are chunked and
/// the completed count accumulated across replies.
pub const MAX_ROUND_ELEMENTS: usize = 1000;
