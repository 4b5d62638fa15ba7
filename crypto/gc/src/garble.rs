//! Yao garbling with free-XOR and point-and-permute.
//!
//! Wire labels are 128-bit; the global offset `delta` has its permute bit
//! forced so the least-significant label bit indexes garbled-table rows.
//! XOR and INV gates are free; each AND gate costs a four-row table keyed by
//! the operand permute bits. Row encryption is SHA-256 over both operand
//! labels and the gate ordinal.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::boolean::{BitCircuit, BitGate, CONST_TRUE};

pub(crate) const LABEL_BYTES: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub(crate) struct Label(pub [u8; LABEL_BYTES]);

impl Label {
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; LABEL_BYTES];
        rng.fill_bytes(&mut bytes);
        Label(bytes)
    }

    pub fn xor(&self, other: &Label) -> Label {
        let mut out = [0u8; LABEL_BYTES];
        for (o, (a, b)) in out.iter_mut().zip(self.0.iter().zip(&other.0)) {
            *o = a ^ b;
        }
        Label(out)
    }

    /// Permute bit.
    pub fn lsb(&self) -> bool {
        self.0[0] & 1 == 1
    }
}

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Label(..)")
    }
}

/// Garbler-side secrets for one execution. Dropped (and zeroized) on reset.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct GarbleSecrets {
    pub delta: Label,
    /// `W^0` per wire.
    pub labels0: Vec<Label>,
}

impl GarbleSecrets {
    pub fn label_for(&self, wire: usize, bit: bool) -> Label {
        if bit {
            self.labels0[wire].xor(&self.delta)
        } else {
            self.labels0[wire]
        }
    }
}

/// The transferable part of a garbling: one row quad per AND gate.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct GarbledTables {
    pub rows: Vec<[[u8; LABEL_BYTES]; 4]>,
}

fn row_key(a: &Label, b: &Label, gate_index: u64) -> Label {
    let mut hasher = Sha256::new();
    hasher.update(a.0);
    hasher.update(b.0);
    hasher.update(gate_index.to_le_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; LABEL_BYTES];
    out.copy_from_slice(&digest[..LABEL_BYTES]);
    Label(out)
}

/// Garble a lowered circuit. Returns the secrets and the tables to ship.
pub(crate) fn garble<R: RngCore>(bc: &BitCircuit, rng: &mut R) -> (GarbleSecrets, GarbledTables) {
    let mut delta = Label::random(rng);
    delta.0[0] |= 1;

    // Inputs and constants get fresh labels; gate outputs are overwritten in
    // topological order below.
    let mut labels0: Vec<Label> = (0..bc.wire_count).map(|_| Label::random(rng)).collect();
    let mut rows = Vec::with_capacity(bc.and_count);

    for (gate_index, gate) in bc.gates.iter().enumerate() {
        match *gate {
            BitGate::Xor(a, b, o) => {
                labels0[o] = labels0[a].xor(&labels0[b]);
            }
            BitGate::Inv(a, o) => {
                labels0[o] = labels0[a].xor(&delta);
            }
            BitGate::And(a, b, o) => {
                labels0[o] = Label::random(rng);
                let mut quad = [[0u8; LABEL_BYTES]; 4];
                for va in 0..2u8 {
                    for vb in 0..2u8 {
                        let la = if va == 1 {
                            labels0[a].xor(&delta)
                        } else {
                            labels0[a]
                        };
                        let lb = if vb == 1 {
                            labels0[b].xor(&delta)
                        } else {
                            labels0[b]
                        };
                        let idx = ((la.lsb() as usize) << 1) | lb.lsb() as usize;
                        let out_label = if va == 1 && vb == 1 {
                            labels0[o].xor(&delta)
                        } else {
                            labels0[o]
                        };
                        let enc = row_key(&la, &lb, gate_index as u64).xor(&out_label);
                        quad[idx] = enc.0;
                    }
                }
                rows.push(quad);
            }
        }
    }

    (GarbleSecrets { delta, labels0 }, GarbledTables { rows })
}

fn missing() -> crate::GcError {
    crate::GcError::Decode("active label missing during evaluation".into())
}

/// Evaluate a garbled circuit given active labels for the constants and all
/// inputs. `active` must be pre-populated at those wires.
pub(crate) fn evaluate_garbled(
    bc: &BitCircuit,
    tables: &GarbledTables,
    active: &mut [Option<Label>],
) -> Result<(), crate::GcError> {
    let mut and_seen = 0usize;
    for (gate_index, gate) in bc.gates.iter().enumerate() {
        match *gate {
            BitGate::Xor(a, b, o) => {
                let la = active[a].ok_or_else(missing)?;
                let lb = active[b].ok_or_else(missing)?;
                active[o] = Some(la.xor(&lb));
            }
            BitGate::Inv(a, o) => {
                active[o] = active[a];
                if active[o].is_none() {
                    return Err(missing());
                }
            }
            BitGate::And(a, b, o) => {
                let la = active[a].ok_or_else(missing)?;
                let lb = active[b].ok_or_else(missing)?;
                let quad = tables
                    .rows
                    .get(and_seen)
                    .ok_or_else(|| crate::GcError::Decode("garbled table underrun".into()))?;
                and_seen += 1;
                let idx = ((la.lsb() as usize) << 1) | lb.lsb() as usize;
                let enc = Label(quad[idx]);
                active[o] = Some(row_key(&la, &lb, gate_index as u64).xor(&enc));
            }
        }
    }
    if and_seen != tables.rows.len() {
        return Err(crate::GcError::Decode(
            "garbled table count does not match circuit".into(),
        ));
    }
    Ok(())
}

/// Decode bits for a set of output wires: the garbler publishes `lsb(W^0)`,
/// the evaluator XORs it with its active label's permute bit.
pub(crate) fn decode_bit(active: &Label, decode: bool) -> bool {
    active.lsb() ^ decode
}

/// Convenience used on the garbler side to reveal evaluator-returned labels.
pub(crate) fn decode_with_secrets(secrets: &GarbleSecrets, wire: usize, active: &Label) -> bool {
    active.lsb() ^ secrets.labels0[wire].lsb()
}

/// Constants are garbler-known values: wire 0 carries false, wire 1 true.
pub(crate) fn const_active_labels(secrets: &GarbleSecrets) -> [Label; 2] {
    [
        secrets.labels0[0],
        secrets.label_for(CONST_TRUE, true),
    ]
}
