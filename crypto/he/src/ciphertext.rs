//! Ciphertext representation.
//!
//! A ciphertext packs up to `poly_degree / 2` independent slots. Each slot is
//! an LWE pair stored in residue form, one limb per chain modulus up to the
//! ciphertext's current level. The engine never inspects slot internals
//! outside this crate; it only reads the metadata (level, scale, packing).

use serde::{Deserialize, Serialize};

/// One residue limb of an LWE sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Limb {
    pub a: Vec<u64>,
    pub b: u64,
}

/// One encrypted slot: limbs `0..=level`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LweSlot {
    pub(crate) limbs: Vec<Limb>,
}

/// Encrypted vector of fixed-point values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ciphertext {
    pub(crate) slots: Vec<LweSlot>,
    pub(crate) level: usize,
    pub(crate) scale: f64,
    pub(crate) complex_packing: bool,
}

impl Ciphertext {
    /// Chain index; 0 means the multiplicative budget is exhausted.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Fixed-point encoding factor of the payload.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Overwrite the scale metadata. Callers must have verified the new
    /// scale is within rescale tolerance of the old one.
    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    /// Number of packed values.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether two real lanes share a slot. Carried as metadata only; this
    /// backend never produces complex-packed ciphertexts.
    pub fn complex_packing(&self) -> bool {
        self.complex_packing
    }
}
