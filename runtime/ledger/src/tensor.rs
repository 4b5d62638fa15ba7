//! Batch-packed tensors of HE values.
//!
//! With batch packing enabled, the leading shape dimension is folded into
//! ciphertext slots: a `[batch, d1, d2]` tensor holds `d1 * d2` elements,
//! each carrying `batch` packed values. Slot `f` of element `j` corresponds
//! to flat value index `f * element_count + j`.

use serde::{Deserialize, Serialize};

use ciphernet_he::Plaintext;

use crate::errors::LedgerError;
use crate::value::HeValue;
use crate::LedgerResult;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeTensor {
    shape: Vec<usize>,
    packed: bool,
    elements: Vec<HeValue>,
}

impl HeTensor {
    pub fn new(shape: Vec<usize>, packed: bool, elements: Vec<HeValue>) -> LedgerResult<Self> {
        let expected = Self::expected_elements(&shape, packed);
        if elements.is_empty() || elements.len() != expected {
            return Err(LedgerError::ShapeMismatch {
                shape,
                elements: elements.len(),
                packed,
            });
        }
        Ok(Self {
            shape,
            packed,
            elements,
        })
    }

    fn expected_elements(shape: &[usize], packed: bool) -> usize {
        if packed {
            shape.iter().skip(1).product::<usize>().max(1)
        } else {
            shape.iter().product::<usize>().max(1)
        }
    }

    /// Build a plaintext tensor from flat row-major values.
    pub fn from_plain_values(
        shape: Vec<usize>,
        packed: bool,
        values: &[f64],
    ) -> LedgerResult<Self> {
        let total: usize = shape.iter().product::<usize>().max(1);
        if values.len() != total {
            return Err(LedgerError::ShapeMismatch {
                shape,
                elements: values.len(),
                packed,
            });
        }
        let element_count = Self::expected_elements(&shape, packed);
        let batch = total / element_count;
        let elements = (0..element_count)
            .map(|j| {
                let packed_vals: Vec<f64> =
                    (0..batch).map(|f| values[f * element_count + j]).collect();
                HeValue::Plain(Plaintext::new(packed_vals))
            })
            .collect();
        Self::new(shape, packed, elements)
    }

    /// Flatten per-element batches back to row-major values.
    pub fn to_plain_values(&self) -> Option<Vec<f64>> {
        let element_count = self.elements.len();
        let batch = self.batch_size();
        let mut out = vec![0.0; element_count * batch];
        for (j, v) in self.elements.iter().enumerate() {
            let p = v.as_plain()?;
            if p.len() != batch {
                return None;
            }
            for (f, &x) in p.values.iter().enumerate() {
                out[f * element_count + j] = x;
            }
        }
        Some(out)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// Packed values per element.
    pub fn batch_size(&self) -> usize {
        self.elements.first().map(HeValue::batch_size).unwrap_or(1)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn data(&self) -> &[HeValue] {
        &self.elements
    }

    pub fn data_mut(&mut self) -> &mut [HeValue] {
        &mut self.elements
    }

    pub fn into_data(self) -> Vec<HeValue> {
        self.elements
    }

    pub fn get(&self, index: usize) -> Option<&HeValue> {
        self.elements.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut HeValue> {
        self.elements.get_mut(index)
    }

    /// Replace an element, keeping the tensor's shape metadata.
    pub fn set(&mut self, index: usize, value: HeValue) {
        self.elements[index] = value;
    }
}
