//! Error types for the consensus protocols.

use ol_network::NetworkError;
use shared_crypto::CryptoError;
use thiserror::Error;

/// Errors from collective signing and view change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// More nodes refused or went missing than the policy tolerates.
    #[error("too many refusals: {refused} of {roster}, at most {allowed} allowed")]
    TooManyRefusals {
        refused: usize,
        roster: usize,
        allowed: usize,
    },

    /// Not enough signed votes to accept a view change.
    #[error("view-change quorum not reached: {votes} of {required}")]
    QuorumNotReached { votes: usize, required: usize },

    /// A vote or share that does not verify.
    #[error("invalid signature in protocol message")]
    InvalidSignature,

    /// Transport failure talking to peers.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The assembled signature failed its own verification.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
