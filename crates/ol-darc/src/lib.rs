//! # Distributed Access-Rights Control
//!
//! Darcs bind action names to expressions over signer identities. Every
//! instance in the ledger is governed by one darc; every instruction must
//! carry signatures satisfying the governing darc's rule for the
//! instruction's action.
//!
//! Darcs are versioned: an evolution from version `n` to `n + 1` chains via
//! the previous document's hash and must be signed per the version-`n`
//! evolve rule.

pub mod darc;
pub mod errors;
pub mod expression;
pub mod identity;

pub use darc::{Darc, DarcSignature, Rules, ACTION_EVOLVE, ACTION_SIGN};
pub use errors::DarcError;
pub use expression::Expression;
pub use identity::{Identity, Signer};

use shared_types::DarcId;

/// Lookup of darc documents by base id, used to resolve `darc:` identities
/// during expression evaluation (delegation).
pub trait DarcResolver {
    fn resolve(&self, id: &DarcId) -> Option<Darc>;
}

/// Resolver that knows no darcs; delegation expressions fail under it.
pub struct NoDelegation;

impl DarcResolver for NoDelegation {
    fn resolve(&self, _id: &DarcId) -> Option<Darc> {
        None
    }
}
