//! CIPHERNET Garbled Two-Party Computation
//!
//! Boolean-circuit secure two-party execution for the non-polynomial
//! operators the homomorphic backend cannot evaluate. The word-level gate
//! surface (SIMD input/constant/add/sub/greater-than/mux/subset/output)
//! matches what the non-linear bridge builds; execution lowers it to a
//! free-XOR bit circuit, garbles with point-and-permute, and transfers the
//! evaluator's input labels through Chou-Orlandi base oblivious transfer.
//!
//! Roles are fixed by the protocol: the model owner (server) garbles, the
//! data owner (client) evaluates and owns the output gates.

pub mod boolean;
pub mod channel;
pub mod circuit;
pub mod errors;
pub mod garble;
pub mod kernels;
pub mod ot;
pub mod party;

pub use channel::{memory_pair, GcChannel, MemoryChannel, TcpChannel};
pub use circuit::{CircuitBuilder, GateParty, WireId, WordCircuit};
pub use errors::GcError;
pub use party::{GcConfig, GcParty, GcRole, MpcProtocol};

/// Result type for 2PC operations
pub type GcResult<T> = Result<T, GcError>;

/// The only security level the engine is parameterized for.
pub const SUPPORTED_SECURITY_LEVEL: u64 = 128;
