//! Error types for the skipchain store.

use crate::block::VerifierId;
use thiserror::Error;

/// Errors from block proposal, storage and traversal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkipchainError {
    /// Unknown block or chain id.
    #[error("block not found: {0}")]
    BlockNotFound(String),

    /// A block that fails structural validation.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// A forward link whose signature or placement is wrong.
    #[error("invalid forward link: {0}")]
    InvalidLink(String),

    /// A registered verification policy refused the block.
    #[error("verifier {0:?} refused the block")]
    VerifierRefused(VerifierId),

    /// A verifier id with no registered policy.
    #[error("unknown verifier {0:?}")]
    UnknownVerifier(VerifierId),

    /// The byte store failed; fatal for the node.
    #[error("store failure: {0}")]
    StoreFailure(String),
}
