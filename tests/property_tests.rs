//! Property-Based Tests for the CIPHERNET Numeric Core
//!
//! Uses proptest to generate random inputs and verify the codec, ledger,
//! and circuit properties hold.

use proptest::prelude::*;

use ciphernet::bridge::{decode_centered, encode_centered, reduce_zero_centered};
use ciphernet::he::{EncryptionParameters, HeBackend, HeError, Plaintext};
use ciphernet::ledger::{align, HeValue};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

// =============================================================================
// PROPTEST STRATEGIES
// =============================================================================

/// Moduli within the f64-exact window, paired with a ring representative.
fn modulus_and_representative() -> impl Strategy<Value = (u64, u64)> {
    (3u64..(1u64 << 50)).prop_flat_map(|q| (Just(q), 0..q))
}

/// Scales the codec supports.
fn scale() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(256.0),
        Just(8192.0),
        Just((1u64 << 30) as f64),
        2.0..1e9,
    ]
}

// =============================================================================
// MASKING CODEC PROPERTIES
// =============================================================================

proptest! {
    /// Property: encode(decode(i)) == i for every ring representative.
    #[test]
    fn codec_roundtrip_is_identity((q, i) in modulus_and_representative(), s in scale()) {
        let x = decode_centered(i, q, s).unwrap();
        prop_assert_eq!(encode_centered(x, q, s).unwrap(), i);
    }

    /// Property: decoded representatives stay inside the centered window.
    #[test]
    fn decode_stays_in_window((q, i) in modulus_and_representative(), s in scale()) {
        let x = decode_centered(i, q, s).unwrap();
        let half_window = q as f64 / (2.0 * s);
        prop_assert!(x.abs() <= half_window + 1e-9);
    }

    /// Property: reduce_zero_centered lands in [-q/2, q/2] and is the
    /// identity when the input already lies inside.
    #[test]
    fn reduce_lands_in_window(d in -1e6f64..1e6, q in 0.5f64..1e4) {
        let r = reduce_zero_centered(d, q).unwrap();
        prop_assert!(r >= -q / 2.0 && r <= q / 2.0);
        if d.abs() <= q / 2.0 {
            prop_assert_eq!(r, d);
        }
        // Reduction only moves by whole multiples of q.
        let steps = (d - r) / q;
        prop_assert!((steps - steps.round()).abs() < 1e-6);
    }

    /// Property: representatives above q/2 decode negative, others not.
    #[test]
    fn decode_sign_matches_half((q, i) in modulus_and_representative()) {
        let x = decode_centered(i, q, 256.0).unwrap();
        if i > q / 2 {
            prop_assert!(x < 0.0);
        } else {
            prop_assert!(x >= 0.0);
        }
    }
}

// =============================================================================
// LEDGER PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: align always equalizes levels and scales, whatever the
    /// starting levels were.
    #[test]
    fn align_equalizes_levels(la in 0usize..3, lb in 0usize..3, seed in 0u64..1000) {
        let backend = HeBackend::new(EncryptionParameters::toy()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let keys = backend.generate_keys(&mut rng);
        let s = backend.params().scale;

        let fresh_a = backend.encrypt(&keys.secret, &[1.0], s, false, &mut rng).unwrap();
        let fresh_b = backend.encrypt(&keys.secret, &[2.0], s, false, &mut rng).unwrap();
        let mut a = backend.mod_switch_to(&fresh_a, la).unwrap();
        let mut b = backend.mod_switch_to(&fresh_b, lb).unwrap();

        align(&backend, &mut a, &mut b).unwrap();
        prop_assert_eq!(a.level(), b.level());
        prop_assert_eq!(a.level(), la.min(lb));
        let ratio = a.scale() / b.scale();
        prop_assert!(ratio < 1.05 && ratio > 1.0 / 1.05);
    }

    /// Property: a multiply attempted at level 0 always fails and never
    /// mutates the ciphertext.
    #[test]
    fn depth_exhaustion_never_mutates(v in -2.0f64..2.0, seed in 0u64..1000) {
        let backend = HeBackend::new(EncryptionParameters::toy()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let keys = backend.generate_keys(&mut rng);
        let s = backend.params().scale;

        let ct = backend.encrypt(&keys.secret, &[v], s, false, &mut rng).unwrap();
        let exhausted = backend.mod_switch_to_lowest(&ct).unwrap();
        let before = backend.decrypt_raw(&keys.secret, &exhausted).unwrap();

        let result = backend.multiply_plain(&exhausted, &Plaintext::new(vec![2.0]));
        prop_assert!(matches!(result, Err(HeError::DepthExhausted)));

        let after = backend.decrypt_raw(&keys.secret, &exhausted).unwrap();
        prop_assert_eq!(before, after);
    }
}

// =============================================================================
// CIRCUIT / MASKING COMPOSITION
// =============================================================================

/// The codec composes with the additive sharing: splitting a ring value into
/// random shares and recombining mod q is lossless through the float path.
#[test]
fn share_split_recombine_lossless() {
    use rand::Rng;
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let q = 18_014_398_509_404_161u64;
    let scale = (1u64 << 30) as f64;
    for _ in 0..1000 {
        let x = rng.gen_range(0..q);
        let xc = rng.gen_range(0..q);
        let xs = (x + q - xc) % q;

        // Client-side conversion of its share through the real domain.
        let d = decode_centered(xc, q, scale).unwrap();
        let reduced = reduce_zero_centered(d, q as f64 / scale).unwrap();
        let recovered = encode_centered(reduced, q, scale).unwrap();
        assert_eq!(recovered, xc);

        assert_eq!((xs as u128 + recovered as u128) % q as u128, x as u128);
    }
}

/// Mixed batches align to the smallest ciphertext level; plaintexts are
/// untouched.
#[test]
fn smallest_level_ignores_plaintexts() {
    use ciphernet::ledger::smallest_level;
    let backend = HeBackend::new(EncryptionParameters::toy()).unwrap();
    let mut rng = ChaCha20Rng::seed_from_u64(9);
    let keys = backend.generate_keys(&mut rng);
    let s = backend.params().scale;

    let fresh = backend.encrypt(&keys.secret, &[1.0], s, false, &mut rng).unwrap();
    let mid = backend.mod_switch_to(&fresh, 1).unwrap();
    let mut batch = vec![
        HeValue::Plain(Plaintext::new(vec![0.5])),
        HeValue::Cipher(fresh),
        HeValue::Cipher(mid),
    ];
    assert_eq!(smallest_level(&backend, &mut batch).unwrap(), Some(1));
    assert!(batch[0].is_plaintext());
    assert_eq!(batch[1].as_cipher().unwrap().level(), 1);
    assert_eq!(batch[2].as_cipher().unwrap().level(), 1);
}
