//! Error types for the authenticated collection and its persistence.

use thiserror::Error;

/// Errors from collection mutation, proof verification and storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// Create on a key that is already present.
    #[error("key already present: {0}")]
    KeyExists(String),

    /// Update or remove on a key that is not present.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A proof that does not check out against the expected root.
    #[error("proof verification failed: {0}")]
    InvalidProof(String),

    /// Persisted state missing a sibling key or failing to decode.
    #[error("store corrupt: {0}")]
    Corrupt(String),

    /// The backing byte store failed; the in-memory state was rolled back.
    #[error("store failure: {0}")]
    StoreFailure(String),
}
