//! Error types for access-control checks.

use thiserror::Error;

/// Errors from darc parsing, evaluation and evolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DarcError {
    /// Expression source that does not parse.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// The darc has no rule for the requested action.
    #[error("no rule for action {0:?}")]
    RuleNotFound(String),

    /// The rule exists but the presented signatures do not satisfy it.
    #[error("rule for action {action:?} not satisfied")]
    NotAuthorized { action: String },

    /// A signature did not verify or carries a non-signing identity.
    #[error("bad signature from {identity}")]
    BadSignature { identity: String },

    /// A structurally invalid evolution (version, prev-hash or base-id).
    #[error("invalid evolution: {0}")]
    InvalidEvolution(String),

    /// Delegation chains deeper than the evaluation limit.
    #[error("delegation depth exceeded")]
    DelegationTooDeep,
}
