//! # Ed25519 Signatures
//!
//! Thin wrappers over `ed25519-dalek` giving the ledger a byte-oriented
//! signing interface. Secret material is zeroized on drop by the underlying
//! `SigningKey`.

use crate::errors::CryptoError;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use shared_types::{PublicKeyBytes, SignatureBytes};
use zeroize::Zeroize;

/// Ed25519 public key (32 bytes), validated on construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519PublicKey(PublicKeyBytes);

impl Ed25519PublicKey {
    /// Create from raw bytes, checking they decode to a valid point.
    pub fn from_bytes(bytes: PublicKeyBytes) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &PublicKeyBytes {
        &self.0
    }

    /// Verify a signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CryptoError> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519Signature(SignatureBytes);

impl Ed25519Signature {
    pub fn from_bytes(bytes: SignatureBytes) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> SignatureBytes {
        self.0
    }

    pub fn as_bytes(&self) -> &SignatureBytes {
        &self.0
    }
}

/// Ed25519 keypair.
pub struct Ed25519KeyPair {
    signing_key: SigningKey,
}

impl Ed25519KeyPair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Deterministic keypair from a 32-byte seed. Test harnesses use this to
    /// get reproducible rosters. The seed is wiped after key derivation.
    pub fn from_seed(mut seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Self { signing_key }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn public_bytes(&self) -> PublicKeyBytes {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(message).to_bytes())
    }
}

/// Verify a raw signature against a raw public key.
pub fn verify_bytes(
    public: &PublicKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> Result<(), CryptoError> {
    Ed25519PublicKey::from_bytes(*public)?.verify(message, &Ed25519Signature(*signature))
}
