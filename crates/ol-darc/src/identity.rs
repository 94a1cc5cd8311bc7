//! Signer identities and the signing side of darc requests.

use crate::errors::DarcError;
use serde::{Deserialize, Serialize};
use shared_crypto::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use shared_types::{DarcId, PublicKeyBytes, SignatureBytes};
use std::fmt;

/// An identity that can appear in rule expressions.
///
/// `Ed25519` identities verify signatures directly; `Darc` identities
/// delegate to another darc's signing rule and are resolved recursively
/// during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    Ed25519 { public: PublicKeyBytes },
    Darc { id: DarcId },
}

impl Identity {
    pub fn ed25519(public: PublicKeyBytes) -> Self {
        Identity::Ed25519 { public }
    }

    pub fn darc(id: DarcId) -> Self {
        Identity::Darc { id }
    }

    /// Verify a signature over `message` for this identity. Only key-backed
    /// identities can verify directly.
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> Result<(), DarcError> {
        match self {
            Identity::Ed25519 { public } => Ed25519PublicKey::from_bytes(*public)
                .and_then(|key| key.verify(message, &Ed25519Signature::from_bytes(*signature)))
                .map_err(|_| DarcError::BadSignature {
                    identity: self.to_string(),
                }),
            Identity::Darc { .. } => Err(DarcError::BadSignature {
                identity: self.to_string(),
            }),
        }
    }

    /// Parse the canonical string form, `ed25519:<hex>` or `darc:<hex>`.
    pub fn parse(s: &str) -> Option<Identity> {
        let (scheme, body) = s.split_once(':')?;
        let bytes = hex::decode(body).ok()?;
        let raw: [u8; 32] = bytes.try_into().ok()?;
        match scheme {
            "ed25519" => Some(Identity::Ed25519 { public: raw }),
            "darc" => Some(Identity::Darc { id: DarcId(raw) }),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Ed25519 { public } => write!(f, "ed25519:{}", hex::encode(public)),
            Identity::Darc { id } => write!(f, "darc:{}", hex::encode(id.0)),
        }
    }
}

/// A keypair together with its rule-expression identity.
pub struct Signer {
    keypair: Ed25519KeyPair,
}

impl Signer {
    pub fn random() -> Self {
        Self {
            keypair: Ed25519KeyPair::generate(),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Ed25519KeyPair::from_seed(seed),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::Ed25519 {
            public: self.keypair.public_bytes(),
        }
    }

    pub fn identity_string(&self) -> String {
        self.identity().to_string()
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        self.keypair.sign(message).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_string_round_trip() {
        let signer = Signer::from_seed([3; 32]);
        let id = signer.identity();
        let parsed = Identity::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);

        let darc_id = Identity::darc(DarcId([9; 32]));
        assert_eq!(Identity::parse(&darc_id.to_string()), Some(darc_id));
        assert_eq!(Identity::parse("rsa:00"), None);
    }

    #[test]
    fn signature_verifies_under_identity() {
        let signer = Signer::from_seed([4; 32]);
        let sig = signer.sign(b"request");
        assert!(signer.identity().verify(b"request", &sig).is_ok());
        assert!(signer.identity().verify(b"forged", &sig).is_err());
    }

    #[test]
    fn darc_identity_cannot_verify_directly() {
        let id = Identity::darc(DarcId([1; 32]));
        assert!(id.verify(b"msg", &[0; 64]).is_err());
    }
}
