//! Server side of the non-linear rounds.
//!
//! `prepare_*` aligns the batch, draws the round's masks, and subtracts the
//! input masks from every ciphertext in the coefficient domain — the result
//! is what goes on the wire. `execute_*` feeds the masks into the garbled
//! circuit as the server's private inputs. `post_process` consumes the
//! pending output masks by subtracting them from the client's reply.

use rand::Rng;
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use ciphernet_gc::kernels::{
    bounded_relu_circuit, check_share_range, max_pool_circuit, relu_circuit,
};
use ciphernet_gc::GcParty;
use ciphernet_he::HeBackend;
use ciphernet_ledger::{smallest_level, HeValue};

use crate::errors::BridgeError;
use crate::BridgeResult;

/// Scales within one batch must agree this tightly (absolute).
const BATCH_SCALE_EPSILON: f64 = 1e-3;

/// Bridge configuration; one per session.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Circuit word width; must exceed `log2(q) + 1`.
    pub bit_length: u32,
    /// Worker threads for per-element mask application.
    pub threads: usize,
    /// Draw input masks uniformly; when disabled every input mask is 0.
    pub mask_inputs: bool,
    /// Draw output masks uniformly; when disabled every output mask is q/2.
    pub mask_outputs: bool,
    /// Gate-reservation hint forwarded to circuit builders.
    pub reserve_gates: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bit_length: 64,
            threads: 1,
            mask_inputs: true,
            mask_outputs: true,
            reserve_gates: 4096,
        }
    }
}

/// The round kind a prepared batch belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RoundKind {
    Relu,
    BoundedRelu,
    MaxPool { window: usize },
}

struct PendingRound {
    kind: RoundKind,
    input_masks: Zeroizing<Vec<u64>>,
    output_masks: Zeroizing<Vec<u64>>,
    q: u64,
    scale: f64,
    batch_size: usize,
    /// Lanes covered by the output masks (windows for max-pool).
    output_elements: usize,
    executed: bool,
}

/// Server-side executor for one session.
pub struct ServerBridge {
    cfg: BridgeConfig,
    pending: Option<PendingRound>,
}

impl ServerBridge {
    pub fn new(cfg: BridgeConfig) -> Self {
        Self { cfg, pending: None }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    /// Mask a ReLU / bounded-ReLU batch in place.
    pub fn prepare_relu<R: Rng>(
        &mut self,
        backend: &HeBackend,
        batch: &mut [HeValue],
        bounded: bool,
        rng: &mut R,
    ) -> BridgeResult<()> {
        let kind = if bounded {
            RoundKind::BoundedRelu
        } else {
            RoundKind::Relu
        };
        let lanes = self.mask_batch(backend, batch, rng)?;
        let pending = self.pending.as_mut().expect("mask_batch sets pending");
        pending.kind = kind;
        pending.output_elements = lanes;
        Ok(())
    }

    /// Mask a flattened max-pool batch (element-major windows) in place.
    pub fn prepare_max_pool<R: Rng>(
        &mut self,
        backend: &HeBackend,
        batch: &mut [HeValue],
        window: usize,
        num_windows: usize,
        rng: &mut R,
    ) -> BridgeResult<()> {
        if window == 0 || batch.len() != window * num_windows {
            return Err(BridgeError::BatchMismatch(format!(
                "{} elements cannot form {num_windows} windows of {window}",
                batch.len()
            )));
        }
        let lanes = self.mask_batch(backend, batch, rng)?;
        let pending = self.pending.as_mut().expect("mask_batch sets pending");
        pending.kind = RoundKind::MaxPool { window };
        // One output mask per window instance (window x packed slot).
        pending.output_elements = lanes / window;
        let q = pending.q;
        let fill = if self.cfg.mask_outputs {
            None
        } else {
            Some(q / 2)
        };
        pending.output_masks = Zeroizing::new(match fill {
            Some(v) => vec![v; pending.output_elements],
            None => (0..pending.output_elements)
                .map(|_| rng.gen_range(0..q))
                .collect(),
        });
        Ok(())
    }

    /// Run this round's circuit; the server supplies its shares (the input
    /// masks) and the output masks as private inputs.
    pub fn execute(
        &mut self,
        party: &mut GcParty,
        bound: Option<f64>,
    ) -> BridgeResult<()> {
        let pending = self.pending.as_mut().ok_or(BridgeError::NoPendingMask)?;
        if pending.executed {
            return Err(BridgeError::MaskStillPending);
        }
        let q = pending.q;
        let lanes = pending.input_masks.len();
        check_share_range(&pending.input_masks, q)?;
        check_share_range(&pending.output_masks, q)?;

        let (circuit, inputs) = match pending.kind {
            RoundKind::Relu => {
                let circuit = relu_circuit(lanes, self.cfg.bit_length, q, self.cfg.reserve_gates)?;
                (
                    circuit,
                    vec![pending.input_masks.to_vec(), pending.output_masks.to_vec()],
                )
            }
            RoundKind::BoundedRelu => {
                let bound = bound.ok_or_else(|| {
                    BridgeError::BatchMismatch("bounded relu round without a bound".into())
                })?;
                let mut bound_val = (bound * pending.scale).round();
                if bound_val >= q as f64 {
                    warn!(bound_val, q, "bound too large for coefficient modulus; clipping");
                    bound_val = (q - 1) as f64;
                }
                let bounds = vec![bound_val as u64; lanes];
                let circuit =
                    bounded_relu_circuit(lanes, self.cfg.bit_length, q, self.cfg.reserve_gates)?;
                (
                    circuit,
                    vec![
                        pending.input_masks.to_vec(),
                        pending.output_masks.to_vec(),
                        bounds,
                    ],
                )
            }
            RoundKind::MaxPool { window } => {
                let num_windows = pending.output_elements;
                let circuit = max_pool_circuit(
                    window,
                    num_windows,
                    self.cfg.bit_length,
                    q,
                    self.cfg.reserve_gates,
                )?;
                (
                    circuit,
                    vec![pending.input_masks.to_vec(), pending.output_masks.to_vec()],
                )
            }
        };

        trace!(gates = circuit.gate_count(), lanes, "server executing circuit");
        let outputs = party.execute(&circuit, &inputs)?;
        party.reset();
        debug_assert!(outputs.is_empty(), "server owns no outputs");
        pending.executed = true;
        Ok(())
    }

    /// Consume the pending output masks: switch each reply ciphertext to the
    /// base level and subtract its mask in the coefficient domain.
    pub fn post_process(
        &mut self,
        backend: &HeBackend,
        replies: &mut [HeValue],
    ) -> BridgeResult<()> {
        let pending = self.pending.take().ok_or(BridgeError::NoPendingMask)?;
        let expected = pending.output_elements;
        let got = replies.len() * pending.batch_size;
        if got != expected {
            // Put nothing back: a count mismatch is fatal to the session.
            return Err(BridgeError::BatchMismatch(format!(
                "reply covers {got} lanes, round expected {expected}"
            )));
        }

        let masks = &pending.output_masks;
        let batch_size = pending.batch_size;
        let threads = self.cfg.threads.max(1);
        let chunk = replies.len().div_ceil(threads);

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (c, slice) in replies.chunks_mut(chunk).enumerate() {
                let offset = c * chunk;
                handles.push(scope.spawn(move || -> BridgeResult<()> {
                    for (i, value) in slice.iter_mut().enumerate() {
                        let idx = offset + i;
                        let ct = value
                            .as_cipher()
                            .ok_or(BridgeError::NotCiphertext(idx))?;
                        let lowered = backend.mod_switch_to_lowest(ct)?;
                        let mask_slice: Vec<u128> = masks
                            [idx * batch_size..(idx + 1) * batch_size]
                            .iter()
                            .map(|&m| m as u128)
                            .collect();
                        let unmasked = backend.sub_raw_plain(&lowered, &mask_slice)?;
                        value.set_ciphertext(unmasked);
                    }
                    Ok(())
                }));
            }
            for h in handles {
                h.join().expect("mask worker panicked")?;
            }
            Ok(())
        })
    }

    /// Whether a round is waiting for its reply.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Align, draw masks, subtract input masks. Returns the lane count.
    fn mask_batch<R: Rng>(
        &mut self,
        backend: &HeBackend,
        batch: &mut [HeValue],
        rng: &mut R,
    ) -> BridgeResult<usize> {
        if self.pending.is_some() {
            return Err(BridgeError::MaskStillPending);
        }
        if batch.is_empty() {
            return Err(BridgeError::BatchMismatch("empty batch".into()));
        }

        // Common level for the whole batch, then down to the base modulus:
        // mask values are drawn from the base coefficient modulus, and the
        // circuit word width only fits that one.
        smallest_level(backend, batch)?;
        let q_wide = backend.modulus_value_at(0);
        let q_bits = 128 - q_wide.leading_zeros();
        if q_bits >= self.cfg.bit_length {
            return Err(BridgeError::ModulusTooWide { bits: q_bits });
        }
        let q = q_wide as u64;

        let batch_size = batch[0].batch_size();
        let mut scale = None;
        for (idx, value) in batch.iter_mut().enumerate() {
            let ct = value.as_cipher_mut().ok_or(BridgeError::NotCiphertext(idx))?;
            if ct.complex_packing() {
                return Err(BridgeError::ComplexPackingUnsupported);
            }
            if ct.slot_count() != batch_size {
                return Err(BridgeError::BatchMismatch(format!(
                    "element {idx} packs {} values, batch packs {batch_size}",
                    ct.slot_count()
                )));
            }
            *ct = backend.mod_switch_to_lowest(ct)?;
            match scale {
                None => scale = Some(ct.scale()),
                Some(s0) => {
                    if (ct.scale() - s0).abs() > BATCH_SCALE_EPSILON {
                        return Err(BridgeError::ScaleDisagreement {
                            s0: ct.scale(),
                            s1: s0,
                        });
                    }
                }
            }
        }
        let scale = scale.expect("non-empty batch");
        let lanes = batch.len() * batch_size;

        let input_masks: Vec<u64> = if self.cfg.mask_inputs {
            (0..lanes).map(|_| rng.gen_range(0..q)).collect()
        } else {
            vec![0; lanes]
        };
        let output_masks: Vec<u64> = if self.cfg.mask_outputs {
            (0..lanes).map(|_| rng.gen_range(0..q)).collect()
        } else {
            vec![q / 2; lanes]
        };
        debug!(lanes, q, "masking non-linear batch");

        // Disjoint per-element mask application (arena + index ranges).
        let threads = self.cfg.threads.max(1);
        let chunk = batch.len().div_ceil(threads);
        let masks_ref = &input_masks;
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (c, slice) in batch.chunks_mut(chunk).enumerate() {
                let offset = c * chunk;
                handles.push(scope.spawn(move || -> BridgeResult<()> {
                    for (i, value) in slice.iter_mut().enumerate() {
                        let idx = offset + i;
                        let ct = value
                            .as_cipher()
                            .ok_or(BridgeError::NotCiphertext(idx))?;
                        let mask_slice: Vec<u128> = masks_ref
                            [idx * batch_size..(idx + 1) * batch_size]
                            .iter()
                            .map(|&m| m as u128)
                            .collect();
                        let masked = backend.sub_raw_plain(ct, &mask_slice)?;
                        value.set_ciphertext(masked);
                    }
                    Ok(())
                }));
            }
            for h in handles {
                h.join().expect("mask worker panicked")?;
            }
            Ok::<(), BridgeError>(())
        })?;

        self.pending = Some(PendingRound {
            kind: RoundKind::Relu,
            input_masks: Zeroizing::new(input_masks),
            output_masks: Zeroizing::new(output_masks),
            q,
            scale,
            batch_size,
            output_elements: lanes,
            executed: false,
        });
        Ok(lanes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciphernet_he::EncryptionParameters;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn setup() -> (HeBackend, ciphernet_he::KeyPair, ChaCha20Rng) {
        let backend = HeBackend::new(EncryptionParameters::toy()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(71);
        let keys = backend.generate_keys(&mut rng);
        (backend, keys, rng)
    }

    fn cipher_batch(
        backend: &HeBackend,
        keys: &ciphernet_he::KeyPair,
        rng: &mut ChaCha20Rng,
        values: &[f64],
    ) -> Vec<HeValue> {
        let scale = backend.params().scale;
        values
            .iter()
            .map(|&v| {
                HeValue::Cipher(
                    backend
                        .encrypt(&keys.secret, &[v], scale, false, rng)
                        .unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_prepare_masks_and_levels() {
        let (backend, keys, mut rng) = setup();
        let mut batch = cipher_batch(&backend, &keys, &mut rng, &[1.0, -0.5, 2.0]);
        let mut bridge = ServerBridge::new(BridgeConfig::default());
        bridge
            .prepare_relu(&backend, &mut batch, false, &mut rng)
            .unwrap();
        assert!(bridge.has_pending());
        for v in &batch {
            assert_eq!(v.as_cipher().unwrap().level(), 0);
        }
        // Masked values decrypt to garbage spread over the ring, not the
        // original payload.
        let masked = backend
            .decrypt_raw(&keys.secret, batch[0].as_cipher().unwrap())
            .unwrap()[0];
        let original = (1.0 * backend.params().scale).round() as i128;
        assert_ne!(masked, original);
    }

    #[test]
    fn test_prepare_twice_rejected() {
        let (backend, keys, mut rng) = setup();
        let mut batch = cipher_batch(&backend, &keys, &mut rng, &[1.0]);
        let mut bridge = ServerBridge::new(BridgeConfig::default());
        bridge
            .prepare_relu(&backend, &mut batch, false, &mut rng)
            .unwrap();
        let mut batch2 = cipher_batch(&backend, &keys, &mut rng, &[1.0]);
        assert!(matches!(
            bridge.prepare_relu(&backend, &mut batch2, false, &mut rng),
            Err(BridgeError::MaskStillPending)
        ));
    }

    #[test]
    fn test_unmasked_mode_uses_defaults() {
        let (backend, keys, mut rng) = setup();
        let mut batch = cipher_batch(&backend, &keys, &mut rng, &[1.5]);
        let cfg = BridgeConfig {
            mask_inputs: false,
            mask_outputs: false,
            ..BridgeConfig::default()
        };
        let mut bridge = ServerBridge::new(cfg);
        bridge
            .prepare_relu(&backend, &mut batch, false, &mut rng)
            .unwrap();
        // Input mask 0 leaves the payload untouched.
        let raw = backend
            .decrypt_raw(&keys.secret, batch[0].as_cipher().unwrap())
            .unwrap()[0];
        let expected = (1.5 * backend.params().scale).round() as i128;
        assert!((raw - expected).abs() <= 8, "raw={raw} expected={expected}");
    }

    #[test]
    fn test_post_process_without_round() {
        let (backend, _keys, _rng) = setup();
        let mut bridge = ServerBridge::new(BridgeConfig::default());
        assert!(matches!(
            bridge.post_process(&backend, &mut []),
            Err(BridgeError::NoPendingMask)
        ));
    }

    #[test]
    fn test_plaintext_element_rejected() {
        let (backend, _keys, mut rng) = setup();
        let mut batch = vec![HeValue::Plain(ciphernet_he::Plaintext::new(vec![1.0]))];
        let mut bridge = ServerBridge::new(BridgeConfig::default());
        assert!(bridge
            .prepare_relu(&backend, &mut batch, false, &mut rng)
            .is_err());
    }

    #[test]
    fn test_max_pool_window_mismatch() {
        let (backend, keys, mut rng) = setup();
        let mut batch = cipher_batch(&backend, &keys, &mut rng, &[1.0, 2.0, 0.5]);
        let mut bridge = ServerBridge::new(BridgeConfig::default());
        assert!(matches!(
            bridge.prepare_max_pool(&backend, &mut batch, 2, 2, &mut rng),
            Err(BridgeError::BatchMismatch(_))
        ));
    }
}
