//! Randomness for keys, encryption, and noise.

use rand::rngs::OsRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Noise parameter: centered binomial with 4 coin pairs, so errors lie in
/// `[-4, 4]` with standard deviation ~1.41.
const CBD_PAIRS: u32 = 4;

/// Fresh CSPRNG seeded from the operating system.
pub fn fresh_rng() -> ChaCha20Rng {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    ChaCha20Rng::from_seed(seed)
}

/// Deterministic CSPRNG for reproducible tests.
pub fn seeded_rng(seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed)
}

/// Uniform ternary secret coefficients.
pub fn sample_ternary<R: Rng>(rng: &mut R, len: usize) -> Vec<i8> {
    (0..len).map(|_| rng.gen_range(-1i8..=1)).collect()
}

/// Centered binomial noise sample.
pub fn sample_noise<R: Rng>(rng: &mut R) -> i64 {
    let mut e = 0i64;
    for _ in 0..CBD_PAIRS {
        e += rng.gen_range(0..2) as i64;
        e -= rng.gen_range(0..2) as i64;
    }
    e
}

/// Uniform residue in `[0, q)`.
pub fn sample_uniform<R: Rng>(rng: &mut R, q: u64) -> u64 {
    rng.gen_range(0..q)
}
