//! Error types for contract execution.

use ol_collection::CollectionError;
use ol_darc::DarcError;
use thiserror::Error;

/// Errors raised while validating or executing instructions. All of them
/// reject the enclosing transaction only; the executor never lets them
/// escape a batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// No contract registered under this id.
    #[error("unknown contract {0:?}")]
    ContractNotFound(String),

    /// A contract returned an error.
    #[error("contract failed: {0}")]
    ContractFailed(String),

    /// A contract panicked; the transaction is rejected, the node lives.
    #[error("contract panicked")]
    ContractPanicked,

    /// Instruction shape violations (index/length mismatch, empty
    /// transaction, wrong body for the contract).
    #[error("malformed instruction: {0}")]
    Malformed(String),

    /// A named argument the contract requires is missing.
    #[error("missing argument {0:?}")]
    MissingArgument(String),

    /// Referenced instance does not exist in the state.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Payload bytes that fail to decode.
    #[error("decode failure: {0}")]
    Decode(String),

    /// Authorization failure from the darc engine.
    #[error(transparent)]
    Auth(#[from] DarcError),

    /// State mutation failure while applying contract output.
    #[error(transparent)]
    Collection(#[from] CollectionError),
}
