//! # Skipchain
//!
//! The durable ordering primitive: an append-only block graph where every
//! block carries backward links to earlier blocks at exponentially spaced
//! distances, and sealed blocks later gain forward links signed by the
//! roster. Forward links at the highest verifiable level give log-time
//! traversal from any known block to the tip.
//!
//! Blocks are immutable once sealed; appending forward links (and the
//! parent/child chain annotations) is the only permitted mutation.

pub mod block;
pub mod errors;
pub mod store;

pub use block::{block_height, BlockLinkDigest, ForwardLink, SkipBlock, VerifierId, VERIFY_NONE, VERIFY_OMNILEDGER};
pub use errors::SkipchainError;
pub use store::{SkipchainStore, VerifierFn};
