//! Error types for peer messaging.

use thiserror::Error;

/// Errors crossing the transport seam.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The peer did not answer within the per-request timeout.
    #[error("peer timed out")]
    Timeout,

    /// No route to the named peer.
    #[error("unknown peer {0}")]
    UnknownPeer(String),

    /// The peer answered with an application-level failure.
    #[error("peer failed: {0}")]
    HandlerFailed(String),

    /// The peer answered with the wrong reply kind.
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),

    /// The local node is shutting down.
    #[error("network closed")]
    Closed,
}
