//! Ledger error types

use thiserror::Error;

/// Errors raised by tensor handling and level/scale maintenance
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Backend operation failed
    #[error("Backend error: {0}")]
    He(#[from] ciphernet_he::HeError),

    /// Alignment post-condition violated; indicates a ledger bug
    #[error("Levels still differ after alignment: {a} != {b}")]
    LevelMismatch { a: usize, b: usize },

    /// Scale post-condition violated; indicates a ledger bug
    #[error("Scales {s0} and {s1} outside rescale tolerance after alignment")]
    ScaleDrift { s0: f64, s1: f64 },

    /// Multiplication requested with an exhausted operand
    #[error("Multiplicative depth exhausted: operand at level 0")]
    DepthExhausted,

    /// A batch operation received no elements
    #[error("Empty batch")]
    EmptyBatch,

    /// Parameter chain too shallow for the compiled function
    #[error("Parameter chain supports depth {available}, function needs {needed}")]
    DepthBudgetTooShallow { needed: usize, available: usize },

    /// Tensor shape does not match its element count
    #[error("Shape {shape:?} incompatible with {elements} elements (packed={packed})")]
    ShapeMismatch {
        shape: Vec<usize>,
        elements: usize,
        packed: bool,
    },

    /// Expected a ciphertext element
    #[error("Tensor element {0} is not a ciphertext")]
    NotCiphertext(usize),
}
