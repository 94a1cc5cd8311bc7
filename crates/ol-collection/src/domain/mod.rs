//! Collection domain: records, the Merkle tree, proofs and the in-memory
//! collection itself.

pub mod collection;
pub mod proof;
pub mod record;
pub mod tree;
