//! # Collective Signatures
//!
//! The commit protocol produces one signature object per sealed block link:
//! a participation mask over the roster plus one signature share per
//! participant. Verification checks every share and enforces the refusal
//! bound of the threshold policy.
//!
//! The aggregation math itself is treated as a black box; the protocol
//! driving announce/commit and challenge/response lives in `ol-consensus`.

use crate::errors::CryptoError;
use crate::signatures::verify_bytes;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_types::{PublicKeyBytes, SignatureBytes};

/// Refusal bound for a collective signature.
///
/// For BFT soundness at roster size `n`, at most `f < n/3` refusals are
/// tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub max_refusals: usize,
}

impl ThresholdPolicy {
    /// The BFT policy for a roster of `n` nodes: `f = (n - 1) / 3`.
    pub fn bft(n: usize) -> Self {
        Self {
            max_refusals: n.saturating_sub(1) / 3,
        }
    }

    /// Minimum number of participants required under this policy.
    pub fn required(&self, n: usize) -> usize {
        n.saturating_sub(self.max_refusals)
    }
}

/// A threshold signature over one message, produced by a roster.
///
/// `participation[i]` says whether roster member `i` signed; `signatures`
/// holds the shares of the participants in roster order.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectiveSignature {
    pub participation: Vec<bool>,
    #[serde_as(as = "Vec<Bytes>")]
    pub signatures: Vec<SignatureBytes>,
}

impl CollectiveSignature {
    pub fn new(participation: Vec<bool>, signatures: Vec<SignatureBytes>) -> Self {
        Self {
            participation,
            signatures,
        }
    }

    /// Number of roster members that signed.
    pub fn participant_count(&self) -> usize {
        self.participation.iter().filter(|p| **p).count()
    }

    /// Verify this signature over `message` for the roster `publics`,
    /// under `policy`.
    pub fn verify(
        &self,
        message: &[u8],
        publics: &[PublicKeyBytes],
        policy: &ThresholdPolicy,
    ) -> Result<(), CryptoError> {
        if self.participation.len() != publics.len() {
            return Err(CryptoError::MalformedCollectiveSignature(format!(
                "mask covers {} members, roster has {}",
                self.participation.len(),
                publics.len()
            )));
        }
        if self.participant_count() != self.signatures.len() {
            return Err(CryptoError::MalformedCollectiveSignature(format!(
                "{} participants but {} shares",
                self.participant_count(),
                self.signatures.len()
            )));
        }

        let refused = publics.len() - self.participant_count();
        if refused > policy.max_refusals {
            return Err(CryptoError::ThresholdNotReached {
                refused,
                allowed: policy.max_refusals,
            });
        }

        let mut shares = self.signatures.iter();
        for (public, participated) in publics.iter().zip(&self.participation) {
            if !participated {
                continue;
            }
            // participant_count == signatures.len() was checked above
            let share = shares.next().ok_or_else(|| {
                CryptoError::MalformedCollectiveSignature("share list exhausted".into())
            })?;
            verify_bytes(public, message, share)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::Ed25519KeyPair;

    fn sign_all(keypairs: &[Ed25519KeyPair], message: &[u8]) -> CollectiveSignature {
        CollectiveSignature::new(
            vec![true; keypairs.len()],
            keypairs.iter().map(|k| k.sign(message).to_bytes()).collect(),
        )
    }

    fn roster(keypairs: &[Ed25519KeyPair]) -> Vec<[u8; 32]> {
        keypairs.iter().map(|k| k.public_bytes()).collect()
    }

    #[test]
    fn full_participation_verifies() {
        let keys: Vec<_> = (0..4u8).map(|i| Ed25519KeyPair::from_seed([i; 32])).collect();
        let sig = sign_all(&keys, b"link");
        assert!(sig
            .verify(b"link", &roster(&keys), &ThresholdPolicy::bft(4))
            .is_ok());
    }

    #[test]
    fn one_refusal_of_four_tolerated() {
        let keys: Vec<_> = (0..4u8).map(|i| Ed25519KeyPair::from_seed([i; 32])).collect();
        let sig = CollectiveSignature::new(
            vec![true, true, true, false],
            keys[..3].iter().map(|k| k.sign(b"link").to_bytes()).collect(),
        );
        assert!(sig
            .verify(b"link", &roster(&keys), &ThresholdPolicy::bft(4))
            .is_ok());
    }

    #[test]
    fn two_refusals_of_four_rejected() {
        let keys: Vec<_> = (0..4u8).map(|i| Ed25519KeyPair::from_seed([i; 32])).collect();
        let sig = CollectiveSignature::new(
            vec![true, true, false, false],
            keys[..2].iter().map(|k| k.sign(b"link").to_bytes()).collect(),
        );
        assert!(matches!(
            sig.verify(b"link", &roster(&keys), &ThresholdPolicy::bft(4)),
            Err(CryptoError::ThresholdNotReached { refused: 2, .. })
        ));
    }

    #[test]
    fn tampered_message_rejected() {
        let keys: Vec<_> = (0..4u8).map(|i| Ed25519KeyPair::from_seed([i; 32])).collect();
        let sig = sign_all(&keys, b"link");
        assert_eq!(
            sig.verify(b"other", &roster(&keys), &ThresholdPolicy::bft(4)),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn mask_share_mismatch_rejected() {
        let keys: Vec<_> = (0..3u8).map(|i| Ed25519KeyPair::from_seed([i; 32])).collect();
        let sig = CollectiveSignature::new(vec![true, true, true], vec![]);
        assert!(matches!(
            sig.verify(b"link", &roster(&keys), &ThresholdPolicy::bft(3)),
            Err(CryptoError::MalformedCollectiveSignature(_))
        ));
    }
}
