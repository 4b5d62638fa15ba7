//! Session error types

use thiserror::Error;

/// Errors surfaced by the session layer
#[derive(Error, Debug)]
pub enum SessionError {
    /// Setup-time configuration error; abort startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend error
    #[error("Backend error: {0}")]
    He(#[from] ciphernet_he::HeError),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ciphernet_ledger::LedgerError),

    /// Bridge error
    #[error("Bridge error: {0}")]
    Bridge(#[from] ciphernet_bridge::BridgeError),

    /// 2PC engine error
    #[error("2PC error: {0}")]
    Gc(#[from] ciphernet_gc::GcError),

    /// Wire protocol error
    #[error("Wire error: {0}")]
    Wire(#[from] ciphernet_wire::WireError),

    /// Socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer did not answer within the configured window
    #[error("Timed out waiting for peer")]
    PeerTimeout,

    /// The established session was torn down (peer disconnect or shutdown)
    #[error("Session aborted")]
    SessionAborted,

    /// Peer violated the message sequencing contract
    #[error("Protocol violation: {0}")]
    Protocol(String),
}
