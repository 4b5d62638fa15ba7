//! The tagged tensor element.

use ciphernet_he::{Ciphertext, Plaintext};
use serde::{Deserialize, Serialize};

/// One tensor element: plaintext or ciphertext. The tag may change at
/// runtime (a plaintext operand can be materialized as a ciphertext for
/// uniform handling) but a value is never both at once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum HeValue {
    Plain(Plaintext),
    Cipher(Ciphertext),
}

impl HeValue {
    pub fn is_plaintext(&self) -> bool {
        matches!(self, HeValue::Plain(_))
    }

    pub fn is_ciphertext(&self) -> bool {
        matches!(self, HeValue::Cipher(_))
    }

    pub fn as_plain(&self) -> Option<&Plaintext> {
        match self {
            HeValue::Plain(p) => Some(p),
            HeValue::Cipher(_) => None,
        }
    }

    pub fn as_cipher(&self) -> Option<&Ciphertext> {
        match self {
            HeValue::Cipher(c) => Some(c),
            HeValue::Plain(_) => None,
        }
    }

    pub fn as_cipher_mut(&mut self) -> Option<&mut Ciphertext> {
        match self {
            HeValue::Cipher(c) => Some(c),
            HeValue::Plain(_) => None,
        }
    }

    /// Retag as ciphertext.
    pub fn set_ciphertext(&mut self, ct: Ciphertext) {
        *self = HeValue::Cipher(ct);
    }

    /// Retag as plaintext.
    pub fn set_plaintext(&mut self, plain: Plaintext) {
        *self = HeValue::Plain(plain);
    }

    /// Number of packed values this element carries.
    pub fn batch_size(&self) -> usize {
        match self {
            HeValue::Plain(p) => p.len(),
            HeValue::Cipher(c) => c.slot_count(),
        }
    }

    pub fn complex_packing(&self) -> bool {
        match self {
            HeValue::Plain(_) => false,
            HeValue::Cipher(c) => c.complex_packing(),
        }
    }

    pub fn scale(&self) -> Option<f64> {
        match self {
            HeValue::Plain(_) => None,
            HeValue::Cipher(c) => Some(c.scale()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_transitions() {
        let mut v = HeValue::Plain(Plaintext::new(vec![1.0, 2.0]));
        assert!(v.is_plaintext());
        assert!(!v.is_ciphertext());
        assert_eq!(v.batch_size(), 2);

        // Retagging to plaintext keeps exactly one representation.
        v.set_plaintext(Plaintext::new(vec![3.0]));
        assert!(v.is_plaintext());
        assert_eq!(v.batch_size(), 1);
        assert!(v.as_cipher().is_none());
        assert_eq!(v.scale(), None);
    }
}
