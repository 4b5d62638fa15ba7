//! Key material.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ciphertext::Limb;

/// Ternary secret key. Never serialized; zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    pub(crate) coeffs: Vec<i8>,
}

impl SecretKey {
    pub fn dimension(&self) -> usize {
        self.coeffs.len()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("dimension", &self.coeffs.len())
            .finish_non_exhaustive()
    }
}

/// One public encryption of zero, all limbs of the top level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ZeroSample {
    pub limbs: Vec<Limb>,
}

/// Public key: a batch of zero encryptions combined by subset sum.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicKey {
    pub(crate) samples: Vec<ZeroSample>,
}

impl PublicKey {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Secret/public pair produced by the data owner.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}
