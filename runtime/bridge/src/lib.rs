//! CIPHERNET Non-linear Circuit Bridge
//!
//! The only path between the homomorphic domain (reals at a floating scale
//! inside ciphertexts) and the garbled-circuit domain (unsigned integers
//! modulo the base coefficient modulus).
//!
//! Per non-linear operator the server aligns the batch to one modulus,
//! subtracts a fresh additive input mask from every ciphertext, and ships
//! the masked batch to the client. The client decrypts its share, both
//! parties run the garbled circuit, and the client re-encrypts the
//! mask-protected result. The server finally subtracts its output mask in
//! the coefficient domain. Masks are generated per invocation and consumed
//! exactly once.

pub mod client;
pub mod codec;
pub mod errors;
pub mod server;

pub use client::ClientBridge;
pub use codec::{decode_centered, encode_centered, reduce_zero_centered};
pub use errors::BridgeError;
pub use server::{BridgeConfig, ServerBridge};

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
