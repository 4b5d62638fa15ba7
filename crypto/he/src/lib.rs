//! CIPHERNET Leveled Homomorphic Encryption Backend
//!
//! Single-scheme leveled encryption with a CKKS-style metadata contract:
//! ciphertexts carry an encryption level (an index into an ordered modulus
//! chain that shrinks as multiplications consume it) and a fixed-point scale.
//!
//! # Supported operations
//! - Encode/Decode (fixed-point, centered representation)
//! - Encrypt/Decrypt (secret-key and public-key)
//! - ct + ct, ct - ct, ct ± plaintext, ct × plaintext
//! - `rescale_to_next` (drops one level, divides the scale)
//! - `mod_switch_to` (drops levels, scale unchanged)
//! - Raw coefficient-domain plaintext arithmetic for protocol masks
//!
//! NOT implemented (by design — the evaluated networks keep model weights in
//! plaintext, so no degree-2 ciphertexts are ever formed):
//! - ct × ct multiplication
//! - Relinearization / key switching
//! - Bootstrapping
//!
//! # Architecture
//! - `SecretKey`: encryption/decryption (held by the data owner)
//! - `PublicKey`: encryption only (shared with the model owner)
//! - `HeBackend`: parameter context plus every homomorphic operation

pub mod backend;
pub mod ciphertext;
pub mod encoding;
pub mod errors;
pub mod keys;
pub mod params;
pub mod rns;
pub mod sampling;

pub use backend::HeBackend;
pub use ciphertext::Ciphertext;
pub use encoding::Plaintext;
pub use errors::HeError;
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use params::EncryptionParameters;

/// Result type for backend operations
pub type HeResult<T> = Result<T, HeError>;

/// The only security level this scheme is parameterized for.
pub const SUPPORTED_SECURITY_LEVEL: u64 = 128;
