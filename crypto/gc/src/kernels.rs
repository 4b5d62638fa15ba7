//! Non-linear operator circuits.
//!
//! Each kernel reconstructs `x = (xs + xc) mod q` from the two parties'
//! additive shares, applies the operator in the centered representation
//! (`x > q/2` reads as negative), masks the result with the server's output
//! mask `r`, and reveals it to the client only. Share and mask values must
//! already lie in `[0, q)`; the sum fits because the circuit bit width is
//! required to exceed `log2(q) + 1`.

use crate::circuit::{CircuitBuilder, GateParty, WireId, WordCircuit};
use crate::errors::GcError;
use crate::GcResult;

/// Require every value in `[0, q)`. Out-of-range shares mean the levels were
/// misaligned upstream; this is fatal, not recoverable.
pub fn check_share_range(values: &[u64], q: u64) -> GcResult<()> {
    for (i, &v) in values.iter().enumerate() {
        if v >= q {
            return Err(GcError::ContractViolation(format!(
                "share[{i}] = {v} outside [0, {q})"
            )));
        }
    }
    Ok(())
}

/// Require the circuit bit width to hold `q` plus one carry bit.
fn check_modulus_width(q: u64, bit_length: u32) -> GcResult<()> {
    let q_bits = 64 - q.leading_zeros();
    if u32::from(q_bits) >= bit_length {
        return Err(GcError::ContractViolation(format!(
            "modulus of {q_bits} bits does not fit circuit width {bit_length}"
        )));
    }
    Ok(())
}

/// If `x >= q`, take `x - q`; otherwise keep `x`.
fn reduce_mod(b: &mut CircuitBuilder, x: WireId, q: WireId) -> GcResult<WireId> {
    let keep = b.gt(q, x)?;
    let reduced = b.sub(x, q)?;
    b.mux(x, reduced, keep)
}

/// ReLU over a batch of shares.
///
/// Server inputs: `xs` (its additive shares), `r` (output masks).
/// Client input: `xc`. Client output per lane:
/// `r` if `x > q/2` (centered negative), else `(x + r) mod q`.
pub fn relu_circuit(
    num_vals: usize,
    bit_length: u32,
    q: u64,
    reserve_gates: usize,
) -> GcResult<WordCircuit> {
    check_modulus_width(q, bit_length)?;
    let mut b = CircuitBuilder::new(bit_length, reserve_gates)?;
    let xs = b.input(GateParty::Server, num_vals)?;
    let xc = b.input(GateParty::Client, num_vals)?;
    let r = b.input(GateParty::Server, num_vals)?;
    let qw = b.constant(vec![q; num_vals])?;
    let half = b.constant(vec![q / 2; num_vals])?;
    let zero = b.constant(vec![0; num_vals])?;

    let sum = b.add(xs, xc)?;
    let x = reduce_mod(&mut b, sum, qw)?;

    let is_neg = b.gt(x, half)?;
    let kept = b.mux(zero, x, is_neg)?;

    let masked = b.add(kept, r)?;
    let out = reduce_mod(&mut b, masked, qw)?;
    b.output(out, GateParty::Client)?;
    b.build()
}

/// Bounded ReLU: zero out centered negatives, clip the rest to the bound.
///
/// Server inputs: `xs`, `r`, and the scaled bound values.
pub fn bounded_relu_circuit(
    num_vals: usize,
    bit_length: u32,
    q: u64,
    reserve_gates: usize,
) -> GcResult<WordCircuit> {
    check_modulus_width(q, bit_length)?;
    let mut b = CircuitBuilder::new(bit_length, reserve_gates)?;
    let xs = b.input(GateParty::Server, num_vals)?;
    let xc = b.input(GateParty::Client, num_vals)?;
    let r = b.input(GateParty::Server, num_vals)?;
    let bounds = b.input(GateParty::Server, num_vals)?;
    let qw = b.constant(vec![q; num_vals])?;
    let half = b.constant(vec![q / 2; num_vals])?;
    let zero = b.constant(vec![0; num_vals])?;

    let sum = b.add(xs, xc)?;
    let x = reduce_mod(&mut b, sum, qw)?;

    let is_neg = b.gt(x, half)?;
    let kept = b.mux(zero, x, is_neg)?;

    let below_bound = b.gt(bounds, kept)?;
    let clipped = b.mux(kept, bounds, below_bound)?;

    let masked = b.add(clipped, r)?;
    let out = reduce_mod(&mut b, masked, qw)?;
    b.output(out, GateParty::Client)?;
    b.build()
}

/// Vectorized max-pool: `num_windows` windows of `window` elements each,
/// laid out element-major (`lane = elem * num_windows + window`). One output
/// mask per window. Ties keep the first-seen maximum; comparison is on ring
/// representatives in `[0, q)`.
pub fn max_pool_circuit(
    window: usize,
    num_windows: usize,
    bit_length: u32,
    q: u64,
    reserve_gates: usize,
) -> GcResult<WordCircuit> {
    check_modulus_width(q, bit_length)?;
    if window == 0 || num_windows == 0 {
        return Err(GcError::Circuit("empty max-pool window".into()));
    }
    let lanes_in = window * num_windows;
    let mut b = CircuitBuilder::new(bit_length, reserve_gates)?;
    let xs = b.input(GateParty::Server, lanes_in)?;
    let xc = b.input(GateParty::Client, lanes_in)?;
    let r = b.input(GateParty::Server, num_windows)?;
    let qw_in = b.constant(vec![q; lanes_in])?;
    let qw_out = b.constant(vec![q; num_windows])?;

    let sum = b.add(xs, xc)?;
    let x = reduce_mod(&mut b, sum, qw_in)?;

    let mut acc = b.subset(x, (0..num_windows).collect())?;
    for elem in 1..window {
        let lanes = (elem * num_windows..(elem + 1) * num_windows).collect();
        let candidate = b.subset(x, lanes)?;
        let bigger = b.gt(candidate, acc)?;
        acc = b.mux(candidate, acc, bigger)?;
    }

    let masked = b.add(acc, r)?;
    let out = reduce_mod(&mut b, masked, qw_out)?;
    b.output(out, GateParty::Client)?;
    b.build()
}
