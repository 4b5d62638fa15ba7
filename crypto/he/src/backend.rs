//! The concrete backend: key generation, encryption, and every homomorphic
//! operation the engine consumes.
//!
//! Operations are functional — they never mutate their ciphertext arguments.
//! A failed operation therefore leaves no partial state behind, which is what
//! the depth-exhaustion contract requires.

use rand::Rng;
use tracing::debug;

use crate::ciphertext::{Ciphertext, Limb, LweSlot};
use crate::encoding::{decode_values, encode_values, Plaintext};
use crate::errors::HeError;
use crate::keys::{KeyPair, PublicKey, SecretKey, ZeroSample};
use crate::params::EncryptionParameters;
use crate::rns::{add_mod, mul_mod, reduce_signed, sub_mod, RnsContext};
use crate::sampling;
use crate::HeResult;

/// Number of zero encryptions in a public key.
const PUBLIC_KEY_SAMPLES: usize = 32;

/// Relative scale tolerance accepted by binary operations.
const SCALE_TOLERANCE: f64 = 1.05;

/// Parameter context plus precomputed chain data.
#[derive(Clone, Debug)]
pub struct HeBackend {
    params: EncryptionParameters,
    ctx: RnsContext,
}

impl HeBackend {
    pub fn new(params: EncryptionParameters) -> HeResult<Self> {
        params.validate()?;
        let ctx = RnsContext::new(&params.coeff_moduli)?;
        debug!(
            degree = params.poly_degree,
            levels = params.coeff_moduli.len(),
            scale = params.scale,
            "backend context ready"
        );
        Ok(Self { params, ctx })
    }

    pub fn params(&self) -> &EncryptionParameters {
        &self.params
    }

    pub fn max_level(&self) -> usize {
        self.params.max_level()
    }

    /// Chain product at `level`; the modulus the decrypted payload lives in.
    pub fn modulus_value_at(&self, level: usize) -> u128 {
        self.ctx.product_at(level)
    }

    pub fn level_of(&self, ct: &Ciphertext) -> usize {
        ct.level
    }

    // ------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------

    pub fn generate_keys<R: Rng>(&self, rng: &mut R) -> KeyPair {
        let n = self.params.poly_degree;
        let secret = SecretKey {
            coeffs: sampling::sample_ternary(rng, n),
        };

        let top = self.max_level();
        let samples = (0..PUBLIC_KEY_SAMPLES)
            .map(|_| {
                let e = sampling::sample_noise(rng);
                let limbs = (0..=top)
                    .map(|j| {
                        let q = self.ctx.modulus_at(j);
                        let a: Vec<u64> =
                            (0..n).map(|_| sampling::sample_uniform(rng, q)).collect();
                        let b = add_mod(
                            inner_product(&a, &secret.coeffs, q),
                            reduce_signed(e as i128, q),
                            q,
                        );
                        Limb { a, b }
                    })
                    .collect();
                ZeroSample { limbs }
            })
            .collect();

        KeyPair {
            secret,
            public: PublicKey { samples },
        }
    }

    // ------------------------------------------------------------------
    // Encryption / decryption
    // ------------------------------------------------------------------

    /// Encrypt reals at `scale`, fresh at the top level.
    pub fn encrypt<R: Rng>(
        &self,
        sk: &SecretKey,
        values: &[f64],
        scale: f64,
        complex_packing: bool,
        rng: &mut R,
    ) -> HeResult<Ciphertext> {
        if complex_packing {
            return Err(HeError::UnsupportedPacking);
        }
        let raw = encode_values(values, scale);
        self.encrypt_raw(sk, &raw, scale, self.max_level(), rng)
    }

    /// Encrypt already-scaled integers at an explicit level.
    pub fn encrypt_raw<R: Rng>(
        &self,
        sk: &SecretKey,
        raw: &[i128],
        scale: f64,
        level: usize,
        rng: &mut R,
    ) -> HeResult<Ciphertext> {
        self.check_capacity(raw.len())?;
        self.check_window(raw, level)?;
        let n = self.params.poly_degree;
        let slots = raw
            .iter()
            .map(|&m| {
                let e = sampling::sample_noise(rng);
                let limbs = (0..=level)
                    .map(|j| {
                        let q = self.ctx.modulus_at(j);
                        let a: Vec<u64> =
                            (0..n).map(|_| sampling::sample_uniform(rng, q)).collect();
                        let payload = add_mod(
                            reduce_signed(m, q),
                            reduce_signed(e as i128, q),
                            q,
                        );
                        let b = add_mod(inner_product(&a, &sk.coeffs, q), payload, q);
                        Limb { a, b }
                    })
                    .collect();
                LweSlot { limbs }
            })
            .collect();
        Ok(Ciphertext {
            slots,
            level,
            scale,
            complex_packing: false,
        })
    }

    /// Public-key encryption: random subset sum of the zero samples plus the
    /// payload. Used by the server to materialize plaintexts as ciphertexts.
    pub fn encrypt_with_public<R: Rng>(
        &self,
        pk: &PublicKey,
        values: &[f64],
        scale: f64,
        rng: &mut R,
    ) -> HeResult<Ciphertext> {
        let raw = encode_values(values, scale);
        let level = self.max_level();
        self.check_capacity(raw.len())?;
        self.check_window(&raw, level)?;
        let n = self.params.poly_degree;

        let slots = raw
            .iter()
            .map(|&m| {
                let mut limbs: Vec<Limb> = (0..=level)
                    .map(|_| Limb {
                        a: vec![0u64; n],
                        b: 0,
                    })
                    .collect();
                for sample in &pk.samples {
                    if rng.gen_bool(0.5) {
                        for (j, limb) in limbs.iter_mut().enumerate() {
                            let q = self.ctx.modulus_at(j);
                            for (acc, &src) in limb.a.iter_mut().zip(&sample.limbs[j].a) {
                                *acc = add_mod(*acc, src, q);
                            }
                            limb.b = add_mod(limb.b, sample.limbs[j].b, q);
                        }
                    }
                }
                // Smudging noise on top of the subset sum.
                let e: i64 = (0..4).map(|_| sampling::sample_noise(rng)).sum();
                for (j, limb) in limbs.iter_mut().enumerate() {
                    let q = self.ctx.modulus_at(j);
                    let payload = add_mod(reduce_signed(m, q), reduce_signed(e as i128, q), q);
                    limb.b = add_mod(limb.b, payload, q);
                }
                LweSlot { limbs }
            })
            .collect();

        Ok(Ciphertext {
            slots,
            level,
            scale,
            complex_packing: false,
        })
    }

    pub fn decrypt(&self, sk: &SecretKey, ct: &Ciphertext) -> HeResult<Vec<f64>> {
        let raw = self.decrypt_raw(sk, ct)?;
        Ok(decode_values(&raw, ct.scale))
    }

    /// Decrypt to centered integers in `(-Q/2, Q/2]` at the ciphertext level.
    /// The bridge uses this path so protocol masks survive exactly.
    pub fn decrypt_raw(&self, sk: &SecretKey, ct: &Ciphertext) -> HeResult<Vec<i128>> {
        self.check_dimension(ct)?;
        let level = ct.level;
        Ok(ct
            .slots
            .iter()
            .map(|slot| {
                let residues: Vec<u64> = slot
                    .limbs
                    .iter()
                    .enumerate()
                    .map(|(j, limb)| {
                        let q = self.ctx.modulus_at(j);
                        sub_mod(limb.b, inner_product(&limb.a, &sk.coeffs, q), q)
                    })
                    .collect();
                self.ctx.reconstruct_centered(&residues, level)
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Homomorphic arithmetic
    // ------------------------------------------------------------------

    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> HeResult<Ciphertext> {
        self.binary_op(a, b, |x, y, q| add_mod(x, y, q))
    }

    pub fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> HeResult<Ciphertext> {
        self.binary_op(a, b, |x, y, q| sub_mod(x, y, q))
    }

    pub fn negate(&self, ct: &Ciphertext) -> HeResult<Ciphertext> {
        let mut out = ct.clone();
        for slot in &mut out.slots {
            for (j, limb) in slot.limbs.iter_mut().enumerate() {
                let q = self.ctx.modulus_at(j);
                for a in &mut limb.a {
                    *a = sub_mod(0, *a, q);
                }
                limb.b = sub_mod(0, limb.b, q);
            }
        }
        Ok(out)
    }

    /// ct + plaintext, encoded at the ciphertext's scale.
    pub fn add_plain(&self, ct: &Ciphertext, plain: &Plaintext) -> HeResult<Ciphertext> {
        let raw = self.broadcast_encode(ct, plain)?;
        self.plain_payload_op(ct, &raw, true)
    }

    /// ct - plaintext, encoded at the ciphertext's scale.
    pub fn sub_plain(&self, ct: &Ciphertext, plain: &Plaintext) -> HeResult<Ciphertext> {
        let raw = self.broadcast_encode(ct, plain)?;
        self.plain_payload_op(ct, &raw, false)
    }

    /// Coefficient-domain addition of raw ring values, one per slot. No
    /// encoding and no float path; the bridge uses this for protocol masks.
    pub fn add_raw_plain(&self, ct: &Ciphertext, raw: &[u128]) -> HeResult<Ciphertext> {
        let signed: Vec<i128> = raw.iter().map(|&v| v as i128).collect();
        self.plain_payload_op(ct, &signed, true)
    }

    /// Coefficient-domain subtraction of raw ring values, one per slot.
    pub fn sub_raw_plain(&self, ct: &Ciphertext, raw: &[u128]) -> HeResult<Ciphertext> {
        let signed: Vec<i128> = raw.iter().map(|&v| v as i128).collect();
        self.plain_payload_op(ct, &signed, false)
    }

    /// ct × plaintext. The plaintext is encoded at the context scale, so the
    /// result scale is `ct.scale * params.scale`. Requires level > 0.
    pub fn multiply_plain(&self, ct: &Ciphertext, plain: &Plaintext) -> HeResult<Ciphertext> {
        if ct.level == 0 {
            return Err(HeError::DepthExhausted);
        }
        if plain.len() != ct.slot_count() && plain.len() != 1 {
            return Err(HeError::SlotMismatch(plain.len(), ct.slot_count()));
        }
        let raw = encode_values(&plain.values, self.params.scale);
        let mut out = ct.clone();
        for (idx, slot) in out.slots.iter_mut().enumerate() {
            let k = if raw.len() == 1 { raw[0] } else { raw[idx] };
            for (j, limb) in slot.limbs.iter_mut().enumerate() {
                let q = self.ctx.modulus_at(j);
                let kj = reduce_signed(k, q);
                for a in &mut limb.a {
                    *a = mul_mod(*a, kj, q);
                }
                limb.b = mul_mod(limb.b, kj, q);
            }
        }
        out.scale = ct.scale * self.params.scale;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Level management
    // ------------------------------------------------------------------

    /// Drop one level and divide the scale by the dropped modulus.
    pub fn rescale_to_next(&self, ct: &Ciphertext) -> HeResult<Ciphertext> {
        if ct.level == 0 {
            return Err(HeError::DepthExhausted);
        }
        let dropped = ct.level;
        let q_dropped = self.ctx.modulus_at(dropped);
        let slots = ct
            .slots
            .iter()
            .map(|slot| {
                let last = &slot.limbs[dropped];
                let limbs = (0..dropped)
                    .map(|j| {
                        let q = self.ctx.modulus_at(j);
                        let inv = self.ctx.rescale_inverse(dropped, j);
                        let a = slot.limbs[j]
                            .a
                            .iter()
                            .zip(&last.a)
                            .map(|(&x, &xl)| mul_mod(sub_mod(x, xl % q, q), inv, q))
                            .collect();
                        let b = mul_mod(sub_mod(slot.limbs[j].b, last.b % q, q), inv, q);
                        Limb { a, b }
                    })
                    .collect();
                LweSlot { limbs }
            })
            .collect();
        Ok(Ciphertext {
            slots,
            level: dropped - 1,
            scale: ct.scale / q_dropped as f64,
            complex_packing: ct.complex_packing,
        })
    }

    /// Drop levels without touching the payload or the scale.
    pub fn mod_switch_to(&self, ct: &Ciphertext, target: usize) -> HeResult<Ciphertext> {
        if target > ct.level {
            return Err(HeError::InvalidLevelTransition {
                from: ct.level,
                to: target,
            });
        }
        if target == ct.level {
            return Ok(ct.clone());
        }
        let slots = ct
            .slots
            .iter()
            .map(|slot| LweSlot {
                limbs: slot.limbs[..=target].to_vec(),
            })
            .collect();
        Ok(Ciphertext {
            slots,
            level: target,
            scale: ct.scale,
            complex_packing: ct.complex_packing,
        })
    }

    /// Switch all the way to the base modulus, where non-linear rounds run.
    pub fn mod_switch_to_lowest(&self, ct: &Ciphertext) -> HeResult<Ciphertext> {
        self.mod_switch_to(ct, 0)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn binary_op(
        &self,
        a: &Ciphertext,
        b: &Ciphertext,
        op: impl Fn(u64, u64, u64) -> u64,
    ) -> HeResult<Ciphertext> {
        if a.level != b.level {
            return Err(HeError::LevelMismatch(a.level, b.level));
        }
        if a.slot_count() != b.slot_count() {
            return Err(HeError::SlotMismatch(a.slot_count(), b.slot_count()));
        }
        check_scale_tolerance(a.scale, b.scale)?;
        let mut out = a.clone();
        for (slot, other) in out.slots.iter_mut().zip(&b.slots) {
            for (j, (limb, other_limb)) in
                slot.limbs.iter_mut().zip(&other.limbs).enumerate()
            {
                let q = self.ctx.modulus_at(j);
                for (x, &y) in limb.a.iter_mut().zip(&other_limb.a) {
                    *x = op(*x, y, q);
                }
                limb.b = op(limb.b, other_limb.b, q);
            }
        }
        Ok(out)
    }

    fn plain_payload_op(
        &self,
        ct: &Ciphertext,
        raw: &[i128],
        add: bool,
    ) -> HeResult<Ciphertext> {
        if raw.len() != ct.slot_count() && raw.len() != 1 {
            return Err(HeError::SlotMismatch(raw.len(), ct.slot_count()));
        }
        let mut out = ct.clone();
        for (idx, slot) in out.slots.iter_mut().enumerate() {
            let m = if raw.len() == 1 { raw[0] } else { raw[idx] };
            for (j, limb) in slot.limbs.iter_mut().enumerate() {
                let q = self.ctx.modulus_at(j);
                let mj = reduce_signed(m, q);
                limb.b = if add {
                    add_mod(limb.b, mj, q)
                } else {
                    sub_mod(limb.b, mj, q)
                };
            }
        }
        Ok(out)
    }

    fn broadcast_encode(&self, ct: &Ciphertext, plain: &Plaintext) -> HeResult<Vec<i128>> {
        if plain.len() != ct.slot_count() && plain.len() != 1 {
            return Err(HeError::SlotMismatch(plain.len(), ct.slot_count()));
        }
        Ok(encode_values(&plain.values, ct.scale))
    }

    fn check_capacity(&self, count: usize) -> HeResult<()> {
        let capacity = self.params.slot_capacity();
        if count == 0 || count > capacity {
            return Err(HeError::SlotOverflow { count, capacity });
        }
        Ok(())
    }

    fn check_window(&self, raw: &[i128], level: usize) -> HeResult<()> {
        let half = (self.ctx.product_at(level) / 2) as i128;
        for &v in raw {
            if v.abs() >= half {
                return Err(HeError::ValueOutOfRange(v));
            }
        }
        Ok(())
    }

    fn check_dimension(&self, ct: &Ciphertext) -> HeResult<()> {
        if ct.level >= self.params.coeff_moduli.len() {
            return Err(HeError::InvalidCiphertext(format!(
                "level {} outside the chain",
                ct.level
            )));
        }
        for slot in &ct.slots {
            if slot.limbs.len() != ct.level + 1 {
                return Err(HeError::InvalidCiphertext(
                    "limb count does not match level".into(),
                ));
            }
            for limb in &slot.limbs {
                if limb.a.len() != self.params.poly_degree {
                    return Err(HeError::InvalidCiphertext(
                        "sample dimension does not match parameters".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_scale_tolerance(s0: f64, s1: f64) -> HeResult<()> {
    let ratio = s0 / s1;
    if !(1.0 / SCALE_TOLERANCE..=SCALE_TOLERANCE).contains(&ratio) {
        return Err(HeError::ScaleMismatch(s0, s1));
    }
    Ok(())
}

fn inner_product(a: &[u64], s: &[i8], q: u64) -> u64 {
    debug_assert_eq!(a.len(), s.len());
    let mut acc: u64 = 0;
    for (&x, &c) in a.iter().zip(s) {
        match c {
            1 => acc = add_mod(acc, x, q),
            -1 => acc = sub_mod(acc, x, q),
            _ => {}
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::seeded_rng;

    fn toy_backend() -> (HeBackend, KeyPair) {
        let backend = HeBackend::new(EncryptionParameters::toy()).unwrap();
        let mut rng = seeded_rng(1);
        let keys = backend.generate_keys(&mut rng);
        (backend, keys)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(2);
        let values = vec![0.5, -1.25, 2.0, 0.0];
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &values, scale, false, &mut rng)
            .unwrap();
        assert_eq!(ct.level(), backend.max_level());
        let out = backend.decrypt(&keys.secret, &ct).unwrap();
        for (v, o) in values.iter().zip(&out) {
            assert!((v - o).abs() < 1e-2, "{v} vs {o}");
        }
    }

    #[test]
    fn test_public_key_encrypt() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(3);
        let values = vec![1.0, -0.5];
        let scale = backend.params().scale;
        let ct = backend
            .encrypt_with_public(&keys.public, &values, scale, &mut rng)
            .unwrap();
        let out = backend.decrypt(&keys.secret, &ct).unwrap();
        for (v, o) in values.iter().zip(&out) {
            assert!((v - o).abs() < 5e-2, "{v} vs {o}");
        }
    }

    #[test]
    fn test_add_sub() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(4);
        let scale = backend.params().scale;
        let a = backend
            .encrypt(&keys.secret, &[1.0, 2.0], scale, false, &mut rng)
            .unwrap();
        let b = backend
            .encrypt(&keys.secret, &[0.25, -1.0], scale, false, &mut rng)
            .unwrap();
        let sum = backend.decrypt(&keys.secret, &backend.add(&a, &b).unwrap()).unwrap();
        let diff = backend.decrypt(&keys.secret, &backend.sub(&a, &b).unwrap()).unwrap();
        assert!((sum[0] - 1.25).abs() < 1e-2);
        assert!((sum[1] - 1.0).abs() < 1e-2);
        assert!((diff[0] - 0.75).abs() < 1e-2);
        assert!((diff[1] - 3.0).abs() < 1e-2);
    }

    #[test]
    fn test_plain_ops() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(5);
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &[1.0, -1.0], scale, false, &mut rng)
            .unwrap();
        let shifted = backend
            .add_plain(&ct, &Plaintext::new(vec![0.5, 0.5]))
            .unwrap();
        let out = backend.decrypt(&keys.secret, &shifted).unwrap();
        assert!((out[0] - 1.5).abs() < 1e-2);
        assert!((out[1] + 0.5).abs() < 1e-2);
    }

    #[test]
    fn test_multiply_plain_and_rescale() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(6);
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &[1.5, -0.5], scale, false, &mut rng)
            .unwrap();
        let prod = backend
            .multiply_plain(&ct, &Plaintext::new(vec![2.0, 2.0]))
            .unwrap();
        assert_eq!(prod.scale(), scale * scale);
        let rescaled = backend.rescale_to_next(&prod).unwrap();
        assert_eq!(rescaled.level(), backend.max_level() - 1);
        let expected_scale = scale * scale / backend.params().coeff_moduli[backend.max_level()] as f64;
        assert!((rescaled.scale() - expected_scale).abs() / expected_scale < 1e-12);
        let out = backend.decrypt(&keys.secret, &rescaled).unwrap();
        assert!((out[0] - 3.0).abs() < 0.05, "{}", out[0]);
        assert!((out[1] + 1.0).abs() < 0.05, "{}", out[1]);
    }

    #[test]
    fn test_mod_switch_preserves_payload() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(7);
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &[1.0, -2.0, 2.5], scale, false, &mut rng)
            .unwrap();
        let low = backend.mod_switch_to_lowest(&ct).unwrap();
        assert_eq!(low.level(), 0);
        assert_eq!(low.scale(), scale);
        let out = backend.decrypt(&keys.secret, &low).unwrap();
        assert!((out[0] - 1.0).abs() < 1e-2);
        assert!((out[1] + 2.0).abs() < 1e-2);
        assert!((out[2] - 2.5).abs() < 1e-2);
    }

    #[test]
    fn test_mod_switch_up_rejected() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(8);
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &[1.0], scale, false, &mut rng)
            .unwrap();
        let low = backend.mod_switch_to_lowest(&ct).unwrap();
        assert!(matches!(
            backend.mod_switch_to(&low, 1),
            Err(HeError::InvalidLevelTransition { from: 0, to: 1 })
        ));
    }

    #[test]
    fn test_depth_exhaustion_no_mutation() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(9);
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &[1.0], scale, false, &mut rng)
            .unwrap();
        let low = backend.mod_switch_to_lowest(&ct).unwrap();
        let before = backend.decrypt(&keys.secret, &low).unwrap();
        assert!(matches!(
            backend.multiply_plain(&low, &Plaintext::new(vec![2.0])),
            Err(HeError::DepthExhausted)
        ));
        assert!(matches!(
            backend.rescale_to_next(&low),
            Err(HeError::DepthExhausted)
        ));
        let after = backend.decrypt(&keys.secret, &low).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_raw_mask_roundtrip() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(10);
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &[1.0, -0.75], scale, false, &mut rng)
            .unwrap();
        let low = backend.mod_switch_to_lowest(&ct).unwrap();
        let q = backend.modulus_value_at(0);
        let masks = vec![12_345u128 % q, 54_321u128 % q];
        let masked = backend.sub_raw_plain(&low, &masks).unwrap();
        let unmasked = backend.add_raw_plain(&masked, &masks).unwrap();
        let out = backend.decrypt(&keys.secret, &unmasked).unwrap();
        assert!((out[0] - 1.0).abs() < 1e-2);
        assert!((out[1] + 0.75).abs() < 1e-2);
    }

    #[test]
    fn test_masked_decrypt_is_shifted() {
        // Subtracting a mask in the coefficient domain shifts the decrypted
        // integer by exactly that mask, modulo the base modulus.
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(11);
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &[1.0], scale, false, &mut rng)
            .unwrap();
        let low = backend.mod_switch_to_lowest(&ct).unwrap();
        let q = backend.modulus_value_at(0);
        let mask = 9_999u128;
        let masked = backend.sub_raw_plain(&low, &[mask]).unwrap();
        let plain_raw = backend.decrypt_raw(&keys.secret, &low).unwrap()[0];
        let masked_raw = backend.decrypt_raw(&keys.secret, &masked).unwrap()[0];
        let shift = (plain_raw - masked_raw).rem_euclid(q as i128);
        assert_eq!(shift, mask as i128);
    }

    #[test]
    fn test_level_mismatch_rejected() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(12);
        let scale = backend.params().scale;
        let a = backend
            .encrypt(&keys.secret, &[1.0], scale, false, &mut rng)
            .unwrap();
        let b = backend.mod_switch_to_lowest(&a).unwrap();
        assert!(matches!(
            backend.add(&a, &b),
            Err(HeError::LevelMismatch(_, _))
        ));
    }

    #[test]
    fn test_complex_packing_rejected() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(13);
        let scale = backend.params().scale;
        assert!(matches!(
            backend.encrypt(&keys.secret, &[1.0], scale, true, &mut rng),
            Err(HeError::UnsupportedPacking)
        ));
    }

    #[test]
    fn test_ciphertext_serde() {
        let (backend, keys) = toy_backend();
        let mut rng = seeded_rng(14);
        let scale = backend.params().scale;
        let ct = backend
            .encrypt(&keys.secret, &[1.0, 2.0], scale, false, &mut rng)
            .unwrap();
        let bytes = bincode::serialize(&ct).unwrap();
        let back: Ciphertext = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.level(), ct.level());
        assert_eq!(back.slot_count(), ct.slot_count());
        let out = backend.decrypt(&keys.secret, &back).unwrap();
        assert!((out[0] - 1.0).abs() < 1e-2);
    }
}
