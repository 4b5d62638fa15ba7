//! Chou-Orlandi base oblivious transfer over Ristretto.
//!
//! One sender scalar per execution covers the whole batch of choices; the
//! receiver sends one blinded point per choice bit and recovers exactly one
//! of the two label encryptions.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::errors::GcError;
use crate::garble::{Label, LABEL_BYTES};
use crate::GcResult;

fn point_key(p: &RistrettoPoint) -> Label {
    let mut hasher = Sha256::new();
    hasher.update(p.compress().as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; LABEL_BYTES];
    out.copy_from_slice(&digest[..LABEL_BYTES]);
    Label(out)
}

fn decompress(bytes: &[u8; 32]) -> GcResult<RistrettoPoint> {
    CompressedRistretto(*bytes)
        .decompress()
        .ok_or(GcError::MalformedPoint)
}

/// Sender state: fresh per execution.
pub(crate) struct OtSender {
    a: Scalar,
    a_pub: RistrettoPoint,
}

impl OtSender {
    pub fn new() -> Self {
        let a = Scalar::random(&mut OsRng);
        let a_pub = RistrettoPoint::mul_base(&a);
        Self { a, a_pub }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.a_pub.compress().to_bytes()
    }

    /// Encrypt the two labels of one wire against the receiver's point.
    pub fn encrypt_pair(
        &self,
        receiver_point: &[u8; 32],
        label0: &Label,
        label1: &Label,
    ) -> GcResult<([u8; LABEL_BYTES], [u8; LABEL_BYTES])> {
        let b_point = decompress(receiver_point)?;
        let k0 = point_key(&(self.a * b_point));
        let k1 = point_key(&(self.a * (b_point - self.a_pub)));
        Ok((k0.xor(label0).0, k1.xor(label1).0))
    }
}

/// Receiver state for one choice bit.
pub(crate) struct OtReceiver {
    b: Scalar,
    a_pub: RistrettoPoint,
    choice: bool,
}

impl OtReceiver {
    /// Blind the choice: `B = bG` for 0, `A + bG` for 1.
    pub fn choose(sender_public: &[u8; 32], choice: bool) -> GcResult<(Self, [u8; 32])> {
        let a_pub = decompress(sender_public)?;
        let b = Scalar::random(&mut OsRng);
        let b_pub = if choice {
            a_pub + RistrettoPoint::mul_base(&b)
        } else {
            RistrettoPoint::mul_base(&b)
        };
        Ok((
            Self { b, a_pub, choice },
            b_pub.compress().to_bytes(),
        ))
    }

    /// Decrypt the chosen label from the sender's pair.
    pub fn receive(
        &self,
        pair: &([u8; LABEL_BYTES], [u8; LABEL_BYTES]),
    ) -> Label {
        let key = point_key(&(self.b * self.a_pub));
        let enc = if self.choice { Label(pair.1) } else { Label(pair.0) };
        key.xor(&enc)
    }
}
