//! Masking codec: lossless round-trip between reals at a known scale and
//! ring representatives in `[0, q)`.
//!
//! The decrypted real domain is the open window `(-q/(2*scale),
//! q/(2*scale))`. `encode_centered` folds it onto `[0, q)` by adding `q` to
//! negative scaled values; `decode_centered` is its exact inverse. Exactness
//! holds for moduli within the f64 mantissa (<= 52 bits), which every
//! shipped parameter set respects.

use crate::errors::BridgeError;
use crate::BridgeResult;

/// Map a real at `scale` onto `[0, q)`.
pub fn encode_centered(x: f64, q: u64, scale: f64) -> BridgeResult<u64> {
    let v = (x * scale).round() as i128;
    let shifted = if v < 0 { v + q as i128 } else { v };
    if !(0..q as i128).contains(&shifted) {
        return Err(BridgeError::ShareOutOfRange {
            value: v,
            modulus: q,
        });
    }
    Ok(shifted as u64)
}

/// Inverse of [`encode_centered`]: representatives above `q/2` read as
/// negative.
pub fn decode_centered(i: u64, q: u64, scale: f64) -> BridgeResult<f64> {
    if i >= q {
        return Err(BridgeError::RangeError {
            value: i,
            modulus: q,
        });
    }
    if i > q / 2 {
        Ok((i as i128 - q as i128) as f64 / scale)
    } else {
        Ok(i as f64 / scale)
    }
}

/// Bring an arbitrary real into `[-q/2, q/2]` by adding or subtracting the
/// smallest multiple of `q`. Identity inside the window. The post-condition
/// is checked; a violation is an internal error, never recoverable.
pub fn reduce_zero_centered(d: f64, q: f64) -> BridgeResult<f64> {
    let half = q / 2.0;
    let mut out = d;
    if out < -half {
        out += (-0.5 - out / q).ceil() * q;
    } else if out > half {
        out -= (out / q - 0.5).ceil() * q;
    }
    if !(-half..=half).contains(&out) {
        return Err(BridgeError::CodecPostCondition { value: out, half });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_centered_folds_negatives() {
        let q = 1000u64;
        assert_eq!(encode_centered(0.25, q, 100.0).unwrap(), 25);
        assert_eq!(encode_centered(-0.25, q, 100.0).unwrap(), 975);
        assert_eq!(encode_centered(0.0, q, 100.0).unwrap(), 0);
    }

    #[test]
    fn test_decode_centered_inverse() {
        let q = 1000u64;
        let scale = 100.0;
        for i in [0u64, 1, 499, 500, 501, 999] {
            let x = decode_centered(i, q, scale).unwrap();
            assert_eq!(encode_centered(x, q, scale).unwrap(), i, "i = {i}");
        }
    }

    #[test]
    fn test_decode_sign_convention() {
        let q = 1000u64;
        let scale = 100.0;
        // Representatives up to q/2 are non-negative.
        assert_eq!(decode_centered(500, q, scale).unwrap(), 5.0);
        // Above q/2 they wrap negative.
        assert_eq!(decode_centered(501, q, scale).unwrap(), -4.99);
        assert_eq!(decode_centered(999, q, scale).unwrap(), -0.01);
    }

    #[test]
    fn test_decode_rejects_out_of_ring() {
        assert!(matches!(
            decode_centered(1000, 1000, 1.0),
            Err(BridgeError::RangeError { .. })
        ));
    }

    #[test]
    fn test_reduce_zero_centered_window() {
        let q = 10.0;
        // Identity inside the window.
        assert_eq!(reduce_zero_centered(3.0, q).unwrap(), 3.0);
        assert_eq!(reduce_zero_centered(-5.0, q).unwrap(), -5.0);
        // Wraps by exact multiples of q.
        assert_eq!(reduce_zero_centered(7.0, q).unwrap(), -3.0);
        assert_eq!(reduce_zero_centered(-6.0, q).unwrap(), 4.0);
        assert_eq!(reduce_zero_centered(27.0, q).unwrap(), -3.0);
        assert_eq!(reduce_zero_centered(-26.0, q).unwrap(), 4.0);
    }

    #[test]
    fn test_reduce_zero_centered_large_offsets() {
        let q = 8.0;
        for k in -50i32..50 {
            let d = 1.5 + f64::from(k) * q;
            let r = reduce_zero_centered(d, q).unwrap();
            assert!((r - 1.5).abs() < 1e-9, "k={k} r={r}");
        }
    }

    #[test]
    fn test_share_roundtrip_through_reduction() {
        // The client-side pipeline: decrypted masked value, reduced into the
        // real window, then folded onto the ring.
        let q = 65_537u64;
        let scale = 12_289.0;
        for raw in [0i64, 1, -1, 30_000, -30_000, 32_768, -32_768] {
            let decrypted = raw as f64 / scale;
            let reduced = reduce_zero_centered(decrypted, q as f64 / scale).unwrap();
            let share = encode_centered(reduced, q, scale).unwrap();
            let expected = raw.rem_euclid(q as i64) as u64;
            assert_eq!(share, expected, "raw = {raw}");
        }
    }
}
