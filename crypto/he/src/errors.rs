//! Backend error types

use thiserror::Error;

/// Errors that can occur inside the encryption backend
#[derive(Error, Debug)]
pub enum HeError {
    /// Parameter validation failed
    #[error("Invalid encryption parameters: {0}")]
    InvalidParameters(String),

    /// Unsupported security level
    #[error("Unsupported security level {0}, only 128 is supported")]
    UnsupportedSecurityLevel(u64),

    /// No multiplicative depth remains at level 0
    #[error("Multiplicative depth exhausted: operation requires level > 0")]
    DepthExhausted,

    /// Level transition in the wrong direction
    #[error("Cannot switch from level {from} to level {to}")]
    InvalidLevelTransition { from: usize, to: usize },

    /// Two operands sit at different levels
    #[error("Level mismatch: {0} != {1}")]
    LevelMismatch(usize, usize),

    /// Two operands disagree on scale beyond tolerance
    #[error("Scale mismatch: {0} vs {1}")]
    ScaleMismatch(f64, f64),

    /// Operand slot counts disagree
    #[error("Slot count mismatch: {0} != {1}")]
    SlotMismatch(usize, usize),

    /// Too many values for the slot capacity
    #[error("Value count {count} exceeds slot capacity {capacity}")]
    SlotOverflow { count: usize, capacity: usize },

    /// Encoded value does not fit the modulus window
    #[error("Encoded value {0} outside the valid coefficient window")]
    ValueOutOfRange(i128),

    /// Complex packing is carried as metadata but never produced here
    #[error("Complex packing is not supported by this backend")]
    UnsupportedPacking,

    /// Ciphertext metadata is inconsistent with the context
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),
}
