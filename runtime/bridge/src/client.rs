//! Client side of the non-linear rounds.
//!
//! The client never sees plaintext activations: it decrypts the *masked*
//! batch, folds the values onto the ring, runs the circuit with those
//! shares, and re-encrypts the still-masked result at the agreed scale.

use rand::Rng;
use tracing::{debug, trace};

use ciphernet_gc::kernels::{
    bounded_relu_circuit, check_share_range, max_pool_circuit, relu_circuit,
};
use ciphernet_gc::GcParty;
use ciphernet_he::{Ciphertext, HeBackend, SecretKey};
use ciphernet_ledger::HeValue;

use crate::codec::{decode_centered, encode_centered, reduce_zero_centered};
use crate::errors::BridgeError;
use crate::server::BridgeConfig;
use crate::BridgeResult;

/// Client-side executor for one session.
pub struct ClientBridge {
    cfg: BridgeConfig,
}

impl ClientBridge {
    pub fn new(cfg: BridgeConfig) -> Self {
        Self { cfg }
    }

    /// Run a ReLU or bounded-ReLU round over a masked batch, replacing every
    /// element with a fresh ciphertext of the masked result.
    pub fn run_relu<R: Rng>(
        &self,
        backend: &HeBackend,
        sk: &SecretKey,
        batch: &mut [HeValue],
        bounded: bool,
        party: &mut GcParty,
        rng: &mut R,
    ) -> BridgeResult<()> {
        let (shares, q, scale, batch_size) = self.collect_shares(backend, sk, batch)?;
        let lanes = shares.len();

        let circuit = if bounded {
            bounded_relu_circuit(lanes, self.cfg.bit_length, q, self.cfg.reserve_gates)?
        } else {
            relu_circuit(lanes, self.cfg.bit_length, q, self.cfg.reserve_gates)?
        };
        trace!(lanes, q, "client executing relu circuit");
        let outputs = party.execute(&circuit, &[shares])?;
        party.reset();
        let masked = single_output(outputs, lanes)?;

        self.reencrypt(backend, sk, batch, &masked, q, scale, batch_size, rng)
    }

    /// Run a max-pool round over a flattened element-major window batch.
    /// Replaces `batch` with `num_windows` fresh result ciphertexts.
    pub fn run_max_pool<R: Rng>(
        &self,
        backend: &HeBackend,
        sk: &SecretKey,
        batch: &mut Vec<HeValue>,
        window: usize,
        party: &mut GcParty,
        rng: &mut R,
    ) -> BridgeResult<()> {
        if window == 0 || batch.len() % window != 0 {
            return Err(BridgeError::BatchMismatch(format!(
                "{} elements do not divide into windows of {window}",
                batch.len()
            )));
        }
        let (shares, q, scale, batch_size) = self.collect_shares(backend, sk, batch)?;
        let lanes = shares.len();
        let window_instances = lanes / window;

        let circuit = max_pool_circuit(
            window,
            window_instances,
            self.cfg.bit_length,
            q,
            self.cfg.reserve_gates,
        )?;
        trace!(lanes, window, q, "client executing max-pool circuit");
        let outputs = party.execute(&circuit, &[shares])?;
        party.reset();
        let masked = single_output(outputs, window_instances)?;

        let num_windows = window_instances / batch_size;
        let mut results = Vec::with_capacity(num_windows);
        for w in 0..num_windows {
            let slots = &masked[w * batch_size..(w + 1) * batch_size];
            results.push(HeValue::Cipher(self.encrypt_masked(
                backend, sk, slots, q, scale, rng,
            )?));
        }
        *batch = results;
        Ok(())
    }

    /// Decrypt a masked batch into ring shares, lane = element * batch + slot.
    fn collect_shares(
        &self,
        backend: &HeBackend,
        sk: &SecretKey,
        batch: &[HeValue],
    ) -> BridgeResult<(Vec<u64>, u64, f64, usize)> {
        if batch.is_empty() {
            return Err(BridgeError::BatchMismatch("empty round batch".into()));
        }
        let q_wide = backend.modulus_value_at(0);
        let q_bits = 128 - q_wide.leading_zeros();
        if q_bits >= self.cfg.bit_length {
            return Err(BridgeError::ModulusTooWide { bits: q_bits });
        }
        let q = q_wide as u64;

        let batch_size = batch[0].batch_size();
        let mut scale = None;
        let mut shares = Vec::with_capacity(batch.len() * batch_size);
        for (idx, value) in batch.iter().enumerate() {
            let ct = value.as_cipher().ok_or(BridgeError::NotCiphertext(idx))?;
            if ct.complex_packing() {
                return Err(BridgeError::ComplexPackingUnsupported);
            }
            if ct.level() != 0 {
                return Err(BridgeError::WrongLevel {
                    expected: 0,
                    got: ct.level(),
                });
            }
            if ct.slot_count() != batch_size {
                return Err(BridgeError::BatchMismatch(format!(
                    "element {idx} packs {} values, batch packs {batch_size}",
                    ct.slot_count()
                )));
            }
            match scale {
                None => scale = Some(ct.scale()),
                Some(s0) => {
                    if (ct.scale() - s0).abs() > 1e-3 {
                        return Err(BridgeError::ScaleDisagreement {
                            s0: ct.scale(),
                            s1: s0,
                        });
                    }
                }
            }
            let decrypted = backend.decrypt(sk, ct)?;
            let s = scale.expect("just set");
            for d in decrypted {
                let reduced = reduce_zero_centered(d, q as f64 / s)?;
                shares.push(encode_centered(reduced, q, s)?);
            }
        }
        let scale = scale.expect("non-empty batch");
        check_share_range(&shares, q)?;
        debug!(
            lanes = shares.len(),
            q, "client produced ring shares for round"
        );
        Ok((shares, q, scale, batch_size))
    }

    /// Decode circuit outputs and re-encrypt them per element.
    #[allow(clippy::too_many_arguments)]
    fn reencrypt<R: Rng>(
        &self,
        backend: &HeBackend,
        sk: &SecretKey,
        batch: &mut [HeValue],
        masked: &[u64],
        q: u64,
        scale: f64,
        batch_size: usize,
        rng: &mut R,
    ) -> BridgeResult<()> {
        if masked.len() != batch.len() * batch_size {
            return Err(BridgeError::BatchMismatch(format!(
                "circuit returned {} lanes for {} elements",
                masked.len(),
                batch.len()
            )));
        }
        for (idx, value) in batch.iter_mut().enumerate() {
            let slots = &masked[idx * batch_size..(idx + 1) * batch_size];
            value.set_ciphertext(self.encrypt_masked(backend, sk, slots, q, scale, rng)?);
        }
        Ok(())
    }

    /// Fresh top-level encryption of masked ring values at the agreed scale.
    fn encrypt_masked<R: Rng>(
        &self,
        backend: &HeBackend,
        sk: &SecretKey,
        slots: &[u64],
        q: u64,
        scale: f64,
        rng: &mut R,
    ) -> BridgeResult<Ciphertext> {
        let values: Vec<f64> = slots
            .iter()
            .map(|&y| decode_centered(y, q, scale))
            .collect::<BridgeResult<_>>()?;
        Ok(backend.encrypt(sk, &values, scale, false, rng)?)
    }
}

fn single_output(outputs: Vec<Vec<u64>>, expected_lanes: usize) -> BridgeResult<Vec<u64>> {
    let mut iter = outputs.into_iter();
    let (Some(first), None) = (iter.next(), iter.next()) else {
        return Err(BridgeError::BatchMismatch(
            "circuit returned an unexpected number of outputs".into(),
        ));
    };
    if first.len() != expected_lanes {
        return Err(BridgeError::BatchMismatch(format!(
            "circuit returned {} lanes, expected {expected_lanes}",
            first.len()
        )));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerBridge;
    use ciphernet_gc::{memory_pair, GcConfig, GcParty, GcRole};
    use ciphernet_he::{EncryptionParameters, KeyPair};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn setup() -> (HeBackend, KeyPair, ChaCha20Rng) {
        let backend = HeBackend::new(EncryptionParameters::toy()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(81);
        let keys = backend.generate_keys(&mut rng);
        (backend, keys, rng)
    }

    fn encrypt_batch(
        backend: &HeBackend,
        keys: &KeyPair,
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

    /// Full masked round over the in-memory transport: server prepares and
    /// executes while the client decrypts shares, evaluates, re-encrypts;
    /// then the server unmasks the replies.
    fn masked_relu_roundtrip(values: &[f64], bounded: bool, bound: Option<f64>) -> Vec<f64> {
        let (backend, keys, mut rng) = setup();
        let mut batch = encrypt_batch(&backend, &keys, &mut rng, values);

        let cfg = BridgeConfig::default();
        let mut server_bridge = ServerBridge::new(cfg.clone());
        server_bridge
            .prepare_relu(&backend, &mut batch, bounded, &mut rng)
            .unwrap();

        // Ship the masked batch to the client side.
        let mut client_batch = batch.clone();
        let (server_chan, client_chan) = memory_pair();

        let server_handle = std::thread::spawn(move || {
            let mut party = GcParty::new(
                GcRole::Garbler,
                GcConfig::default(),
                Box::new(server_chan),
            )
            .unwrap();
            server_bridge.execute(&mut party, bound).unwrap();
            server_bridge
        });

        let client_backend = backend.clone();
        let client_cfg = cfg.clone();
        let client_sk = keys.secret.clone();
        let client_handle = std::thread::spawn(move || {
            let mut party = GcParty::new(
                GcRole::Evaluator,
                GcConfig::default(),
                Box::new(client_chan),
            )
            .unwrap();
            let bridge = ClientBridge::new(client_cfg);
            let mut rng = ChaCha20Rng::seed_from_u64(82);
            bridge
                .run_relu(
                    &client_backend,
                    &client_sk,
                    &mut client_batch,
                    bounded,
                    &mut party,
                    &mut rng,
                )
                .unwrap();
            client_batch
        });

        let mut server_bridge = server_handle.join().unwrap();
        let mut replies = client_handle.join().unwrap();
        server_bridge.post_process(&backend, &mut replies).unwrap();

        replies
            .iter()
            .map(|v| backend.decrypt(&keys.secret, v.as_cipher().unwrap()).unwrap()[0])
            .collect()
    }

    #[test]
    fn test_masked_relu_round() {
        let out = masked_relu_roundtrip(&[1.0, -1.5, 0.5, -0.25, 2.0], false, None);
        let expected = [1.0, 0.0, 0.5, 0.0, 2.0];
        for (o, e) in out.iter().zip(&expected) {
            assert!((o - e).abs() < 1e-2, "{o} vs {e}");
        }
    }

    #[test]
    fn test_masked_bounded_relu_round() {
        let out = masked_relu_roundtrip(&[1.0, -1.5, 0.5, 2.0], true, Some(0.75));
        let expected = [0.75, 0.0, 0.5, 0.75];
        for (o, e) in out.iter().zip(&expected) {
            assert!((o - e).abs() < 1e-2, "{o} vs {e}");
        }
    }

    #[test]
    fn test_masked_max_pool_round() {
        let (backend, keys, mut rng) = setup();
        // Two windows of two elements, element-major: [w0e0, w1e0, w0e1, w1e1]
        let mut batch = encrypt_batch(&backend, &keys, &mut rng, &[0.5, -1.0, 1.5, 0.25]);

        let cfg = BridgeConfig::default();
        let mut server_bridge = ServerBridge::new(cfg.clone());
        server_bridge
            .prepare_max_pool(&backend, &mut batch, 2, 2, &mut rng)
            .unwrap();

        let mut client_batch = batch.clone();
        let (server_chan, client_chan) = memory_pair();

        let server_handle = std::thread::spawn(move || {
            let mut party =
                GcParty::new(GcRole::Garbler, GcConfig::default(), Box::new(server_chan))
                    .unwrap();
            server_bridge.execute(&mut party, None).unwrap();
            server_bridge
        });

        let client_backend = backend.clone();
        let client_sk = keys.secret.clone();
        let client_handle = std::thread::spawn(move || {
            let mut party =
                GcParty::new(GcRole::Evaluator, GcConfig::default(), Box::new(client_chan))
                    .unwrap();
            let bridge = ClientBridge::new(cfg);
            let mut rng = ChaCha20Rng::seed_from_u64(83);
            bridge
                .run_max_pool(
                    &client_backend,
                    &client_sk,
                    &mut client_batch,
                    2,
                    &mut party,
                    &mut rng,
                )
                .unwrap();
            client_batch
        });

        let mut server_bridge = server_handle.join().unwrap();
        let mut replies = client_handle.join().unwrap();
        assert_eq!(replies.len(), 2);
        server_bridge.post_process(&backend, &mut replies).unwrap();

        let out: Vec<f64> = replies
            .iter()
            .map(|v| backend.decrypt(&keys.secret, v.as_cipher().unwrap()).unwrap()[0])
            .collect();
        // Ring-order max: window 0 over {0.5, 1.5} -> 1.5;
        // window 1 over {-1.0, 0.25}: the negative wraps high -> -1.0.
        assert!((out[0] - 1.5).abs() < 1e-2, "{}", out[0]);
        assert!((out[1] + 1.0).abs() < 1e-2, "{}", out[1]);
    }

    #[test]
    fn test_client_rejects_unswitched_batch() {
        let (backend, keys, mut rng) = setup();
        let batch = encrypt_batch(&backend, &keys, &mut rng, &[1.0]);
        let bridge = ClientBridge::new(BridgeConfig::default());
        let (_sc, cc) = memory_pair();
        let mut party =
            GcParty::new(GcRole::Evaluator, GcConfig::default(), Box::new(cc)).unwrap();
        let mut batch = batch;
        let err = bridge.run_relu(
            &backend,
            &keys.secret,
            &mut batch,
            false,
            &mut party,
            &mut rng,
        );
        assert!(matches!(err, Err(BridgeError::WrongLevel { .. })));
    }
}
