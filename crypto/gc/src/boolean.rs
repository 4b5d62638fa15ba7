//! Lowering from word gates to a free-XOR-compatible bit circuit.
//!
//! Wire 0 is constant false and wire 1 constant true; both are materialized
//! by the garbler like ordinary garbler inputs. Word wires become
//! lane-major, LSB-first bit-wire vectors. Add/sub use a ripple-carry
//! adder, greater-than the carry chain of `a + !b`, mux one AND per bit.

use crate::circuit::{GateParty, WordCircuit, WordGate};
use crate::errors::GcError;
use crate::GcResult;

pub(crate) const CONST_FALSE: usize = 0;
pub(crate) const CONST_TRUE: usize = 1;

#[derive(Clone, Copy, Debug)]
pub(crate) enum BitGate {
    Xor(usize, usize, usize),
    And(usize, usize, usize),
    Inv(usize, usize),
}

#[derive(Clone, Debug)]
pub(crate) struct BitInputGroup {
    pub party: GateParty,
    /// Lane-major, LSB-first.
    pub wires: Vec<usize>,
    pub lanes: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct BitOutputGroup {
    pub owner: GateParty,
    pub wires: Vec<usize>,
    pub lanes: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct BitCircuit {
    pub wire_count: usize,
    pub gates: Vec<BitGate>,
    pub inputs: Vec<BitInputGroup>,
    pub outputs: Vec<BitOutputGroup>,
    pub and_count: usize,
}

impl BitCircuit {
    pub fn input_wires_of(&self, party: GateParty) -> Vec<usize> {
        self.inputs
            .iter()
            .filter(|g| g.party == party)
            .flat_map(|g| g.wires.iter().copied())
            .collect()
    }

    pub fn output_wires_of(&self, owner: GateParty) -> Vec<usize> {
        self.outputs
            .iter()
            .filter(|g| g.owner == owner)
            .flat_map(|g| g.wires.iter().copied())
            .collect()
    }
}

struct Lowerer {
    width: usize,
    gates: Vec<BitGate>,
    next_wire: usize,
    and_count: usize,
}

impl Lowerer {
    fn fresh(&mut self) -> usize {
        let w = self.next_wire;
        self.next_wire += 1;
        w
    }

    fn xor(&mut self, a: usize, b: usize) -> usize {
        let out = self.fresh();
        self.gates.push(BitGate::Xor(a, b, out));
        out
    }

    fn and(&mut self, a: usize, b: usize) -> usize {
        let out = self.fresh();
        self.gates.push(BitGate::And(a, b, out));
        self.and_count += 1;
        out
    }

    fn inv(&mut self, a: usize) -> usize {
        let out = self.fresh();
        self.gates.push(BitGate::Inv(a, out));
        out
    }

    /// Ripple-carry sum of two lanes, modulo 2^width.
    fn adder(&mut self, a: &[usize], b: &[usize], carry_in: usize) -> Vec<usize> {
        let mut c = carry_in;
        let mut sum = Vec::with_capacity(self.width);
        for i in 0..self.width {
            let axb = self.xor(a[i], b[i]);
            sum.push(self.xor(axb, c));
            if i + 1 < self.width {
                let axc = self.xor(a[i], c);
                let bxc = self.xor(b[i], c);
                let t = self.and(axc, bxc);
                c = self.xor(t, c);
            }
        }
        sum
    }

    /// Carry-out of `a + !b`, which is set exactly when `a > b` unsigned.
    fn greater_than(&mut self, a: &[usize], b: &[usize]) -> usize {
        let mut c = CONST_FALSE;
        for i in 0..self.width {
            let nb = self.inv(b[i]);
            let axc = self.xor(a[i], c);
            let nbxc = self.xor(nb, c);
            let t = self.and(axc, nbxc);
            c = self.xor(t, c);
        }
        c
    }

    fn mux(&mut self, on_true: &[usize], on_false: &[usize], sel: usize) -> Vec<usize> {
        (0..self.width)
            .map(|i| {
                let d = self.xor(on_true[i], on_false[i]);
                let m = self.and(d, sel);
                self.xor(m, on_false[i])
            })
            .collect()
    }
}

pub(crate) fn lower(circuit: &WordCircuit) -> GcResult<BitCircuit> {
    let width = circuit.bit_length as usize;
    let mut lw = Lowerer {
        width,
        gates: Vec::new(),
        next_wire: 2, // 0 = false, 1 = true
        and_count: 0,
    };
    // Bit wires per word wire, lane-major LSB-first.
    let mut bits: Vec<Vec<usize>> = Vec::with_capacity(circuit.gates.len());
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for (id, gate) in circuit.gates.iter().enumerate() {
        let lanes = circuit.lanes[id];
        let wires = match gate {
            WordGate::Input { party } => {
                let wires: Vec<usize> = (0..lanes * width).map(|_| lw.fresh()).collect();
                inputs.push(BitInputGroup {
                    party: *party,
                    wires: wires.clone(),
                    lanes,
                });
                wires
            }
            WordGate::Constant { values } => values
                .iter()
                .flat_map(|&v| {
                    (0..width).map(move |i| {
                        if (v >> i) & 1 == 1 {
                            CONST_TRUE
                        } else {
                            CONST_FALSE
                        }
                    })
                })
                .collect(),
            WordGate::Add(a, b) => {
                let mut out = Vec::with_capacity(lanes * width);
                for lane in 0..lanes {
                    let al = &bits[*a][lane * width..(lane + 1) * width];
                    let bl = &bits[*b][lane * width..(lane + 1) * width];
                    let (al, bl) = (al.to_vec(), bl.to_vec());
                    out.extend(lw.adder(&al, &bl, CONST_FALSE));
                }
                out
            }
            WordGate::Sub(a, b) => {
                let mut out = Vec::with_capacity(lanes * width);
                for lane in 0..lanes {
                    let al: Vec<usize> =
                        bits[*a][lane * width..(lane + 1) * width].to_vec();
                    let bl: Vec<usize> = bits[*b][lane * width..(lane + 1) * width]
                        .to_vec()
                        .iter()
                        .map(|&w| lw.inv(w))
                        .collect();
                    out.extend(lw.adder(&al, &bl, CONST_TRUE));
                }
                out
            }
            WordGate::Gt(a, b) => {
                let mut out = Vec::with_capacity(lanes * width);
                for lane in 0..lanes {
                    let al: Vec<usize> =
                        bits[*a][lane * width..(lane + 1) * width].to_vec();
                    let bl: Vec<usize> =
                        bits[*b][lane * width..(lane + 1) * width].to_vec();
                    let g = lw.greater_than(&al, &bl);
                    out.push(g);
                    out.extend(std::iter::repeat(CONST_FALSE).take(width - 1));
                }
                out
            }
            WordGate::Mux {
                on_true,
                on_false,
                sel,
            } => {
                let mut out = Vec::with_capacity(lanes * width);
                for lane in 0..lanes {
                    let tl: Vec<usize> =
                        bits[*on_true][lane * width..(lane + 1) * width].to_vec();
                    let fl: Vec<usize> =
                        bits[*on_false][lane * width..(lane + 1) * width].to_vec();
                    let sel_bit = bits[*sel][lane * width];
                    out.extend(lw.mux(&tl, &fl, sel_bit));
                }
                out
            }
            WordGate::Subset { src, indices } => {
                let mut out = Vec::with_capacity(lanes * width);
                for &i in indices {
                    out.extend_from_slice(&bits[*src][i * width..(i + 1) * width]);
                }
                out
            }
            WordGate::Output { src, owner } => {
                let wires = bits[*src].clone();
                outputs.push(BitOutputGroup {
                    owner: *owner,
                    wires: wires.clone(),
                    lanes,
                });
                wires
            }
        };
        bits.push(wires);
    }

    if outputs.is_empty() {
        return Err(GcError::Circuit("lowered circuit has no outputs".into()));
    }
    Ok(BitCircuit {
        wire_count: lw.next_wire,
        gates: lw.gates,
        inputs,
        outputs,
        and_count: lw.and_count,
    })
}

/// Reference bit-level evaluation, used to cross-check the lowering and the
/// garbled path. `assignments` maps input wires (in `inputs` group order) to
/// bits.
pub(crate) fn evaluate_bits(bc: &BitCircuit, assignments: &[(usize, bool)]) -> Vec<Vec<bool>> {
    let mut values = vec![false; bc.wire_count];
    values[CONST_TRUE] = true;
    for &(wire, bit) in assignments {
        values[wire] = bit;
    }
    for gate in &bc.gates {
        match *gate {
            BitGate::Xor(a, b, o) => values[o] = values[a] ^ values[b],
            BitGate::And(a, b, o) => values[o] = values[a] && values[b],
            BitGate::Inv(a, o) => values[o] = !values[a],
        }
    }
    bc.outputs
        .iter()
        .map(|g| g.wires.iter().map(|&w| values[w]).collect())
        .collect()
}

/// Split a value into LSB-first bits.
pub(crate) fn value_bits(value: u64, width: usize) -> Vec<bool> {
    (0..width).map(|i| (value >> i) & 1 == 1).collect()
}

/// Reassemble LSB-first bits into a value.
pub(crate) fn bits_value(bits: &[bool]) -> u64 {
    bits.iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    /// Run a word circuit through the lowering + bit evaluator and compare
    /// with the word-level reference.
    fn cross_check(
        circuit: &WordCircuit,
        server_inputs: &[Vec<u64>],
        client_inputs: &[Vec<u64>],
    ) {
        let expected = circuit
            .evaluate_clear(server_inputs, client_inputs)
            .unwrap();
        let bc = lower(circuit).unwrap();
        let width = circuit.bit_length() as usize;

        let mut assignments = Vec::new();
        let mut s_iter = server_inputs.iter();
        let mut c_iter = client_inputs.iter();
        for group in &bc.inputs {
            let vals = match group.party {
                GateParty::Server => s_iter.next().unwrap(),
                GateParty::Client => c_iter.next().unwrap(),
            };
            for (lane, &v) in vals.iter().enumerate() {
                for (i, bit) in value_bits(v, width).into_iter().enumerate() {
                    assignments.push((group.wires[lane * width + i], bit));
                }
            }
        }

        let out_bits = evaluate_bits(&bc, &assignments);
        for (group_bits, (_, expected_vals)) in out_bits.iter().zip(&expected) {
            let got: Vec<u64> = group_bits
                .chunks(width)
                .map(bits_value)
                .collect();
            assert_eq!(&got, expected_vals);
        }
    }

    #[test]
    fn test_lowered_add_sub_gt_mux_match_words() {
        let mut b = CircuitBuilder::new(16, 16).unwrap();
        let x = b.input(GateParty::Server, 4).unwrap();
        let y = b.input(GateParty::Client, 4).unwrap();
        let s = b.add(x, y).unwrap();
        let d = b.sub(x, y).unwrap();
        let g = b.gt(x, y).unwrap();
        let m = b.mux(s, d, g).unwrap();
        b.output(m, GateParty::Client).unwrap();
        let c = b.build().unwrap();

        let mut rng = ChaCha20Rng::seed_from_u64(3);
        for _ in 0..50 {
            let xs: Vec<u64> = (0..4).map(|_| rng.gen_range(0..65536)).collect();
            let ys: Vec<u64> = (0..4).map(|_| rng.gen_range(0..65536)).collect();
            cross_check(&c, &[xs], &[ys]);
        }
    }

    #[test]
    fn test_lowered_gt_boundaries() {
        let mut b = CircuitBuilder::new(8, 8).unwrap();
        let x = b.input(GateParty::Server, 1).unwrap();
        let y = b.input(GateParty::Client, 1).unwrap();
        let g = b.gt(x, y).unwrap();
        b.output(g, GateParty::Client).unwrap();
        let c = b.build().unwrap();
        for (a, bb) in [(0u64, 0u64), (1, 0), (0, 1), (255, 255), (255, 254), (127, 128)] {
            cross_check(&c, &[vec![a]], &[vec![bb]]);
        }
    }

    #[test]
    fn test_lowered_constant_and_subset() {
        let mut b = CircuitBuilder::new(8, 8).unwrap();
        let x = b.input(GateParty::Server, 3).unwrap();
        let k = b.constant(vec![10, 20, 30]).unwrap();
        let s = b.add(x, k).unwrap();
        let sub = b.subset(s, vec![2, 1]).unwrap();
        b.output(sub, GateParty::Client).unwrap();
        let c = b.build().unwrap();
        cross_check(&c, &[vec![1, 2, 3]], &[]);
    }

    #[test]
    fn test_and_count_positive() {
        let mut b = CircuitBuilder::new(8, 8).unwrap();
        let x = b.input(GateParty::Server, 1).unwrap();
        let y = b.input(GateParty::Client, 1).unwrap();
        let g = b.gt(x, y).unwrap();
        b.output(g, GateParty::Client).unwrap();
        let c = b.build().unwrap();
        let bc = lower(&c).unwrap();
        assert_eq!(bc.and_count, 8);
    }
}
