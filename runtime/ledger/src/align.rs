//! Level and scale maintenance for binary homomorphic operators.
//!
//! Reduction strategy: when the two scales already agree within tolerance a
//! cheap modulus switch is enough; otherwise the higher operand is rescaled,
//! which also divides its scale by each dropped modulus. Either way the
//! post-conditions are asserted — a violation is a ledger bug, not bad
//! input, and is never corrected silently.

use ciphernet_he::{Ciphertext, EncryptionParameters, HeBackend};
use tracing::{debug, trace};

use crate::errors::LedgerError;
use crate::value::HeValue;
use crate::LedgerResult;

/// Relative scale tolerance below which a modulus switch replaces a rescale.
pub const SCALE_ALIGN_TOLERANCE: f64 = 1.05;

/// Whether two scales agree within rescale tolerance.
pub fn within_tolerance(s0: f64, s1: f64) -> bool {
    s0 / s1 <= SCALE_ALIGN_TOLERANCE && s1 / s0 <= SCALE_ALIGN_TOLERANCE
}

/// Bring two ciphertexts to a common level, then force their scales equal.
pub fn align(backend: &HeBackend, a: &mut Ciphertext, b: &mut Ciphertext) -> LedgerResult<()> {
    if a.level() != b.level() {
        if a.level() > b.level() {
            reduce_to(backend, a, b.level(), b.scale())?;
        } else {
            reduce_to(backend, b, a.level(), a.scale())?;
        }
    }

    if a.level() != b.level() {
        return Err(LedgerError::LevelMismatch {
            a: a.level(),
            b: b.level(),
        });
    }
    if !within_tolerance(a.scale(), b.scale()) {
        return Err(LedgerError::ScaleDrift {
            s0: a.scale(),
            s1: b.scale(),
        });
    }
    a.set_scale(b.scale());
    Ok(())
}

/// Reduce every ciphertext of a batch to the batch's minimum level, so the
/// whole batch shares one modulus for masking. Returns `None` when the batch
/// holds no ciphertexts at all.
pub fn smallest_level(
    backend: &HeBackend,
    values: &mut [HeValue],
) -> LedgerResult<Option<usize>> {
    if values.is_empty() {
        return Err(LedgerError::EmptyBatch);
    }
    let mut target: Option<(usize, f64)> = None;
    for v in values.iter() {
        if let Some(ct) = v.as_cipher() {
            match target {
                Some((lvl, _)) if ct.level() >= lvl => {}
                _ => target = Some((ct.level(), ct.scale())),
            }
        }
    }
    let Some((level, ref_scale)) = target else {
        debug!("smallest_level over an all-plaintext batch");
        return Ok(None);
    };
    trace!(level, "aligning batch to smallest level");

    for (idx, v) in values.iter_mut().enumerate() {
        if let Some(ct) = v.as_cipher_mut() {
            if ct.level() > level {
                reduce_to(backend, ct, level, ref_scale)?;
            }
            if ct.level() != level {
                return Err(LedgerError::LevelMismatch {
                    a: ct.level(),
                    b: level,
                });
            }
            if !within_tolerance(ct.scale(), ref_scale) {
                return Err(LedgerError::ScaleDrift {
                    s0: ct.scale(),
                    s1: ref_scale,
                });
            }
            ct.set_scale(ref_scale);
            trace!(idx, level, "batch element aligned");
        }
    }
    Ok(Some(level))
}

/// Multiplication guard: both operands must have depth left. Exhausted
/// operands mean the parameters were chosen too shallow for the compiled
/// function; continuing would produce silently-wrong output.
pub fn guard_multiply(a: &Ciphertext, b: Option<&Ciphertext>) -> LedgerResult<()> {
    if a.level() == 0 || b.is_some_and(|ct| ct.level() == 0) {
        return Err(LedgerError::DepthExhausted);
    }
    Ok(())
}

/// Setup-time check that the chain covers a function's multiplicative depth.
pub fn require_depth(params: &EncryptionParameters, needed: usize) -> LedgerResult<()> {
    let available = params.depth_budget();
    if needed > available {
        return Err(LedgerError::DepthBudgetTooShallow { needed, available });
    }
    Ok(())
}

fn reduce_to(
    backend: &HeBackend,
    ct: &mut Ciphertext,
    level: usize,
    target_scale: f64,
) -> LedgerResult<()> {
    if within_tolerance(ct.scale(), target_scale) {
        *ct = backend.mod_switch_to(ct, level)?;
    } else {
        while ct.level() > level {
            *ct = backend.rescale_to_next(ct)?;
        }
    }
    Ok(())
}
