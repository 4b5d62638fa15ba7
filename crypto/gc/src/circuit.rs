//! Word-level SIMD circuit description.
//!
//! Every gate operates on a vector of `lanes` parallel unsigned words at a
//! fixed bit width. Greater-than produces a 0/1 word per lane; mux consumes
//! one of those as its selector. Both parties must build the identical
//! description independently — the builder is deterministic in its inputs.

use crate::errors::GcError;
use crate::GcResult;

pub type WireId = usize;

/// Which party privately supplies a value or learns an output.
/// The server always garbles; the client always evaluates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateParty {
    Server,
    Client,
}

#[derive(Clone, Debug)]
pub enum WordGate {
    Input { party: GateParty },
    Constant { values: Vec<u64> },
    Add(WireId, WireId),
    Sub(WireId, WireId),
    Gt(WireId, WireId),
    Mux {
        on_true: WireId,
        on_false: WireId,
        sel: WireId,
    },
    Subset { src: WireId, indices: Vec<usize> },
    Output { src: WireId, owner: GateParty },
}

#[derive(Clone, Debug)]
pub struct WordCircuit {
    pub(crate) bit_length: u32,
    pub(crate) gates: Vec<WordGate>,
    /// Lanes per wire; wire id == gate index.
    pub(crate) lanes: Vec<usize>,
    pub(crate) inputs: Vec<WireId>,
    pub(crate) outputs: Vec<WireId>,
}

impl WordCircuit {
    pub fn bit_length(&self) -> u32 {
        self.bit_length
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub fn lanes_of(&self, wire: WireId) -> usize {
        self.lanes[wire]
    }

    /// Input wires owned by `party`, in creation order.
    pub fn inputs_of(&self, party: GateParty) -> Vec<WireId> {
        self.inputs
            .iter()
            .copied()
            .filter(|&w| matches!(&self.gates[w], WordGate::Input { party: p } if *p == party))
            .collect()
    }

    /// Output wires owned by `party`, in creation order.
    pub fn outputs_of(&self, party: GateParty) -> Vec<WireId> {
        self.outputs
            .iter()
            .copied()
            .filter(|&w| matches!(&self.gates[w], WordGate::Output { owner, .. } if *owner == party))
            .collect()
    }

    fn word_mask(&self) -> u64 {
        if self.bit_length == 64 {
            u64::MAX
        } else {
            (1u64 << self.bit_length) - 1
        }
    }

    /// Plaintext reference evaluation. Inputs are consumed per party in
    /// creation order; returns the outputs each party would learn.
    pub fn evaluate_clear(
        &self,
        server_inputs: &[Vec<u64>],
        client_inputs: &[Vec<u64>],
    ) -> GcResult<Vec<(GateParty, Vec<u64>)>> {
        let mask = self.word_mask();
        let mut server_iter = server_inputs.iter();
        let mut client_iter = client_inputs.iter();
        let mut values: Vec<Vec<u64>> = Vec::with_capacity(self.gates.len());
        let mut outputs = Vec::new();

        for (id, gate) in self.gates.iter().enumerate() {
            let lanes = self.lanes[id];
            let out = match gate {
                WordGate::Input { party } => {
                    let supplied = match party {
                        GateParty::Server => server_iter.next(),
                        GateParty::Client => client_iter.next(),
                    }
                    .ok_or_else(|| {
                        GcError::ContractViolation(format!(
                            "missing {party:?} input for wire {id}"
                        ))
                    })?;
                    if supplied.len() != lanes {
                        return Err(GcError::ContractViolation(format!(
                            "input wire {id} expects {lanes} lanes, got {}",
                            supplied.len()
                        )));
                    }
                    for &v in supplied {
                        if v & !mask != 0 {
                            return Err(GcError::ValueTooWide {
                                value: v,
                                bits: self.bit_length,
                            });
                        }
                    }
                    supplied.clone()
                }
                WordGate::Constant { values: v } => v.clone(),
                WordGate::Add(a, b) => values[*a]
                    .iter()
                    .zip(&values[*b])
                    .map(|(&x, &y)| x.wrapping_add(y) & mask)
                    .collect(),
                WordGate::Sub(a, b) => values[*a]
                    .iter()
                    .zip(&values[*b])
                    .map(|(&x, &y)| x.wrapping_sub(y) & mask)
                    .collect(),
                WordGate::Gt(a, b) => values[*a]
                    .iter()
                    .zip(&values[*b])
                    .map(|(&x, &y)| u64::from(x > y))
                    .collect(),
                WordGate::Mux {
                    on_true,
                    on_false,
                    sel,
                } => values[*on_true]
                    .iter()
                    .zip(&values[*on_false])
                    .zip(&values[*sel])
                    .map(|((&t, &f), &s)| if s & 1 == 1 { t } else { f })
                    .collect(),
                WordGate::Subset { src, indices } => {
                    indices.iter().map(|&i| values[*src][i]).collect()
                }
                WordGate::Output { src, owner } => {
                    outputs.push((*owner, values[*src].clone()));
                    values[*src].clone()
                }
            };
            values.push(out);
        }

        if server_iter.next().is_some() || client_iter.next().is_some() {
            return Err(GcError::ContractViolation(
                "more inputs supplied than the circuit declares".into(),
            ));
        }
        Ok(outputs)
    }
}

/// Deterministic builder for [`WordCircuit`].
pub struct CircuitBuilder {
    bit_length: u32,
    gates: Vec<WordGate>,
    lanes: Vec<usize>,
    inputs: Vec<WireId>,
    outputs: Vec<WireId>,
}

impl CircuitBuilder {
    /// `reserve_gates` is a capacity hint for the gate vector.
    pub fn new(bit_length: u32, reserve_gates: usize) -> GcResult<Self> {
        if !(2..=64).contains(&bit_length) {
            return Err(GcError::Circuit(format!(
                "bit length {bit_length} outside 2..=64"
            )));
        }
        Ok(Self {
            bit_length,
            gates: Vec::with_capacity(reserve_gates),
            lanes: Vec::with_capacity(reserve_gates),
            inputs: Vec::new(),
            outputs: Vec::new(),
        })
    }

    fn push(&mut self, gate: WordGate, lanes: usize) -> GcResult<WireId> {
        if lanes == 0 {
            return Err(GcError::Circuit("gate with zero lanes".into()));
        }
        let id = self.gates.len();
        self.gates.push(gate);
        self.lanes.push(lanes);
        Ok(id)
    }

    pub fn input(&mut self, party: GateParty, lanes: usize) -> GcResult<WireId> {
        let id = self.push(WordGate::Input { party }, lanes)?;
        self.inputs.push(id);
        Ok(id)
    }

    pub fn constant(&mut self, values: Vec<u64>) -> GcResult<WireId> {
        let mask = if self.bit_length == 64 {
            u64::MAX
        } else {
            (1u64 << self.bit_length) - 1
        };
        if let Some(&v) = values.iter().find(|&&v| v & !mask != 0) {
            return Err(GcError::ValueTooWide {
                value: v,
                bits: self.bit_length,
            });
        }
        let lanes = values.len();
        self.push(WordGate::Constant { values }, lanes)
    }

    fn binary(&mut self, a: WireId, b: WireId, make: impl Fn(WireId, WireId) -> WordGate) -> GcResult<WireId> {
        self.check_wire(a)?;
        self.check_wire(b)?;
        if self.lanes[a] != self.lanes[b] {
            return Err(GcError::Circuit(format!(
                "lane mismatch: wire {a} has {}, wire {b} has {}",
                self.lanes[a], self.lanes[b]
            )));
        }
        let lanes = self.lanes[a];
        self.push(make(a, b), lanes)
    }

    pub fn add(&mut self, a: WireId, b: WireId) -> GcResult<WireId> {
        self.binary(a, b, WordGate::Add)
    }

    pub fn sub(&mut self, a: WireId, b: WireId) -> GcResult<WireId> {
        self.binary(a, b, WordGate::Sub)
    }

    pub fn gt(&mut self, a: WireId, b: WireId) -> GcResult<WireId> {
        self.binary(a, b, WordGate::Gt)
    }

    pub fn mux(&mut self, on_true: WireId, on_false: WireId, sel: WireId) -> GcResult<WireId> {
        self.check_wire(on_true)?;
        self.check_wire(on_false)?;
        self.check_wire(sel)?;
        let lanes = self.lanes[on_true];
        if self.lanes[on_false] != lanes || self.lanes[sel] != lanes {
            return Err(GcError::Circuit("mux lane mismatch".into()));
        }
        self.push(
            WordGate::Mux {
                on_true,
                on_false,
                sel,
            },
            lanes,
        )
    }

    pub fn subset(&mut self, src: WireId, indices: Vec<usize>) -> GcResult<WireId> {
        self.check_wire(src)?;
        let src_lanes = self.lanes[src];
        if let Some(&bad) = indices.iter().find(|&&i| i >= src_lanes) {
            return Err(GcError::Circuit(format!(
                "subset index {bad} outside {src_lanes} lanes"
            )));
        }
        let lanes = indices.len();
        self.push(WordGate::Subset { src, indices }, lanes)
    }

    pub fn output(&mut self, src: WireId, owner: GateParty) -> GcResult<WireId> {
        self.check_wire(src)?;
        let lanes = self.lanes[src];
        let id = self.push(WordGate::Output { src, owner }, lanes)?;
        self.outputs.push(id);
        Ok(id)
    }

    pub fn build(self) -> GcResult<WordCircuit> {
        if self.outputs.is_empty() {
            return Err(GcError::Circuit("circuit has no outputs".into()));
        }
        Ok(WordCircuit {
            bit_length: self.bit_length,
            gates: self.gates,
            lanes: self.lanes,
            inputs: self.inputs,
            outputs: self.outputs,
        })
    }

    fn check_wire(&self, w: WireId) -> GcResult<()> {
        if w >= self.gates.len() {
            return Err(GcError::Circuit(format!("wire {w} does not exist")));
        }
        Ok(())
    }
}
