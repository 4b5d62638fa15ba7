//! CIPHERNET Tensor Model and Level/Scale Ledger
//!
//! Every tensor element the engine moves around is an [`HeValue`]: either a
//! plaintext or a ciphertext, never both. The ledger keeps the metadata
//! invariant that makes binary homomorphic operators sound: both operands at
//! an identical encryption level, with scales agreeing within a small
//! relative tolerance. The ledger enforces this itself rather than trusting
//! callers; a post-alignment mismatch is an internal bug and surfaces as a
//! fatal error.

pub mod align;
pub mod errors;
pub mod tensor;
pub mod value;

pub use align::{align, guard_multiply, require_depth, smallest_level, SCALE_ALIGN_TOLERANCE};
pub use errors::LedgerError;
pub use tensor::HeTensor;
pub use value::HeValue;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
