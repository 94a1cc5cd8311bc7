//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from key handling, signing and collective-signature checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Bytes do not decode to a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// A signature did not verify against the given key and message.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// Participation mask and signature list disagree.
    #[error("malformed collective signature: {0}")]
    MalformedCollectiveSignature(String),

    /// More refusals than the threshold policy tolerates.
    #[error("too many refusals: {refused} refused, at most {allowed} allowed")]
    ThresholdNotReached { refused: usize, allowed: usize },
}
