//! Bridge error types

use thiserror::Error;

/// Errors raised while converting between the HE and 2PC domains
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Backend operation failed
    #[error("Backend error: {0}")]
    He(#[from] ciphernet_he::HeError),

    /// Ledger operation failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] ciphernet_ledger::LedgerError),

    /// Circuit engine failed
    #[error("2PC error: {0}")]
    Gc(#[from] ciphernet_gc::GcError),

    /// Ring value outside `[0, q)` presented to the codec
    #[error("Value {value} outside ring [0, {modulus})")]
    RangeError { value: u64, modulus: u64 },

    /// A converted share fell outside the ring; levels were misaligned
    #[error("Scaled value {value} cannot be represented in [0, {modulus})")]
    ShareOutOfRange { value: i128, modulus: u64 },

    /// `reduce_zero_centered` post-condition violated; internal bug
    #[error("Reduced value {value} escaped [-{half}, {half}]")]
    CodecPostCondition { value: f64, half: f64 },

    /// Batch element that must be a ciphertext is not
    #[error("Batch element {0} is not a ciphertext")]
    NotCiphertext(usize),

    /// Element counts disagree between request, masks, and circuit
    #[error("Batch mismatch: {0}")]
    BatchMismatch(String),

    /// Scales disagree across one batch
    #[error("Scale {s0} does not match batch scale {s1}")]
    ScaleDisagreement { s0: f64, s1: f64 },

    /// The base modulus does not fit the circuit bit width
    #[error("Base modulus of {bits} bits does not fit the circuit width")]
    ModulusTooWide { bits: u32 },

    /// A round arrived at the wrong level
    #[error("Expected batch at level {expected}, found level {got}")]
    WrongLevel { expected: usize, got: usize },

    /// Complex-packed tensors cannot cross the bridge
    #[error("Complex packing is not supported by the non-linear bridge")]
    ComplexPackingUnsupported,

    /// `prepare` called while a previous round's masks are unconsumed
    #[error("Previous non-linear round still has pending masks")]
    MaskStillPending,

    /// `post_process` called with no pending masks
    #[error("No pending masks for this round")]
    NoPendingMask,
}
