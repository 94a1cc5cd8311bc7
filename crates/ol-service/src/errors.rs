//! Error types at the service boundary.
//!
//! Client-facing kinds map to RPC error responses; `Transient` failures
//! are logged and retried by the loops that hit them; `Fatal` means the
//! chain shuts down on this node because memory and disk can no longer be
//! trusted to agree.

use ol_collection::CollectionError;
use ol_consensus::ConsensusError;
use ol_contracts::ExecutionError;
use ol_network::NetworkError;
use ol_skipchain::SkipchainError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors returned by the service facade.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Client speaks a protocol version this node does not.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),

    /// Genesis darc missing required rules or malformed.
    #[error("invalid genesis darc: {0}")]
    InvalidDarc(String),

    /// Genesis for an already-known chain.
    #[error("skipchain already exists")]
    AlreadyExists,

    /// Request names a chain this node does not carry.
    #[error("unknown skipchain")]
    UnknownSkipchain,

    /// Transaction failed structural validation at the door.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The pending pool is at capacity; try again later.
    #[error("pending pool full")]
    PendingFull,

    /// The inclusion wait elapsed before the transaction settled.
    #[error("inclusion wait timed out")]
    InclusionTimeout,

    /// The transaction was processed and rejected.
    #[error("transaction rejected")]
    TransactionRejected,

    /// Generic lookup failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// A proof that does not verify.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// Peer or protocol trouble; safe to retry.
    #[error("transient: {0}")]
    Transient(String),

    /// Disk and memory can no longer be reconciled; the chain stops here.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The service is shutting down.
    #[error("service closed")]
    Closed,
}

impl From<CollectionError> for ServiceError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::StoreFailure(msg) | CollectionError::Corrupt(msg) => {
                ServiceError::Fatal(msg)
            }
            CollectionError::KeyNotFound(key) => ServiceError::NotFound(key),
            CollectionError::InvalidProof(msg) => ServiceError::InvalidProof(msg),
            other => ServiceError::InvalidTransaction(other.to_string()),
        }
    }
}

impl From<SkipchainError> for ServiceError {
    fn from(err: SkipchainError) -> Self {
        match err {
            SkipchainError::StoreFailure(msg) => ServiceError::Fatal(msg),
            SkipchainError::BlockNotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::InvalidTransaction(other.to_string()),
        }
    }
}

impl From<ExecutionError> for ServiceError {
    fn from(err: ExecutionError) -> Self {
        ServiceError::InvalidTransaction(err.to_string())
    }
}

impl From<ConsensusError> for ServiceError {
    fn from(err: ConsensusError) -> Self {
        ServiceError::Transient(err.to_string())
    }
}

impl From<NetworkError> for ServiceError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Closed => ServiceError::Closed,
            other => ServiceError::Transient(other.to_string()),
        }
    }
}
