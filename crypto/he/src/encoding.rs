//! Fixed-point encoding between reals and scaled integers.

use serde::{Deserialize, Serialize};

/// Unencoded plaintext values, mirroring the tensor element type the engine
/// moves around before anything touches the coefficient domain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plaintext {
    pub values: Vec<f64>,
}

impl Plaintext {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<f64>> for Plaintext {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// Scale reals into centered integers.
pub fn encode_values(values: &[f64], scale: f64) -> Vec<i128> {
    values.iter().map(|&v| (v * scale).round() as i128).collect()
}

/// Invert `encode_values`.
pub fn decode_values(raw: &[i128], scale: f64) -> Vec<f64> {
    raw.iter().map(|&v| v as f64 / scale).collect()
}
