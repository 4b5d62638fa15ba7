//! Encryption parameter sets.
//!
//! The chain is ordered ascending by level: `coeff_moduli[0]` is the base
//! modulus a ciphertext ends up with once every rescale has been consumed,
//! and fresh ciphertexts start at `coeff_moduli.len() - 1`. Level 0 means no
//! further multiplication is possible.

use serde::{Deserialize, Serialize};

use crate::errors::HeError;
use crate::rns::RnsContext;
use crate::{HeResult, SUPPORTED_SECURITY_LEVEL};

/// Parameter set for the leveled scheme.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptionParameters {
    /// Lattice dimension; also bounds the slot capacity at `poly_degree / 2`.
    pub poly_degree: usize,
    /// Coefficient modulus chain, base first.
    pub coeff_moduli: Vec<u64>,
    /// Default fixed-point encoding factor.
    pub scale: f64,
    /// Security level parameter; only 128 is accepted.
    pub security_level: u64,
}

impl EncryptionParameters {
    pub fn new(
        poly_degree: usize,
        coeff_moduli: Vec<u64>,
        scale: f64,
        security_level: u64,
    ) -> HeResult<Self> {
        let params = Self {
            poly_degree,
            coeff_moduli,
            scale,
            security_level,
        };
        params.validate()?;
        Ok(params)
    }

    /// Reference set used by the integration scenarios: dimension 1024 with a
    /// 54-bit base modulus (the decoding window) and three NTT rescale primes,
    /// fixed-point scale 2^30.
    pub fn reference() -> Self {
        Self {
            poly_degree: 1024,
            coeff_moduli: vec![18_014_398_509_404_161, 23_068_673, 13_631_489, 7_340_033],
            scale: (1u64 << 30) as f64,
            security_level: SUPPORTED_SECURITY_LEVEL,
        }
    }

    /// Deeper chain for wider networks: dimension 2048, depth 4.
    pub fn medium() -> Self {
        Self {
            poly_degree: 2048,
            coeff_moduli: vec![2_147_483_647, 786_433, 7_340_033, 23_068_673, 13_631_489],
            scale: (1u64 << 20) as f64,
            security_level: SUPPORTED_SECURITY_LEVEL,
        }
    }

    /// Tiny set for unit tests and demos. Not secure. The scale matches the
    /// top rescale modulus so a multiply-then-rescale lands back on it.
    pub fn toy() -> Self {
        Self {
            poly_degree: 64,
            coeff_moduli: vec![65_537, 40_961, 12_289],
            scale: 12_289.0,
            security_level: SUPPORTED_SECURITY_LEVEL,
        }
    }

    pub fn validate(&self) -> HeResult<()> {
        if self.security_level != SUPPORTED_SECURITY_LEVEL {
            return Err(HeError::UnsupportedSecurityLevel(self.security_level));
        }
        if !self.poly_degree.is_power_of_two() || self.poly_degree < 16 {
            return Err(HeError::InvalidParameters(format!(
                "poly_degree {} must be a power of two >= 16",
                self.poly_degree
            )));
        }
        if !(self.scale.is_finite() && self.scale >= 2.0) {
            return Err(HeError::InvalidParameters(format!(
                "scale {} must be a finite value >= 2",
                self.scale
            )));
        }
        // Chain structure (coprimality, chain product bound) is checked here
        // so a bad config fails at setup time, not mid-inference.
        RnsContext::new(&self.coeff_moduli).map(|_| ())
    }

    /// Highest level a fresh ciphertext carries.
    pub fn max_level(&self) -> usize {
        self.coeff_moduli.len() - 1
    }

    /// Multiplicative depth budget of this chain.
    pub fn depth_budget(&self) -> usize {
        self.max_level()
    }

    /// Values packable into one ciphertext.
    pub fn slot_capacity(&self) -> usize {
        self.poly_degree / 2
    }
}
