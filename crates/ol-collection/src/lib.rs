//! # Authenticated Collection
//!
//! The ledger state: a Merkle-hashed map from instance keys to
//! `(value, contract id, darc id)` records. Two collections holding the
//! same entries produce byte-identical roots regardless of insertion
//! order, and every key has a self-contained inclusion or absence proof
//! verifiable against the root alone.
//!
//! Persistence goes through the `KeyValueStore` port: each record is kept
//! under three sibling keys distinguished by a leading tag byte, written in
//! one atomic batch per applied block.

pub mod adapters;
pub mod domain;
pub mod errors;
pub mod ports;
pub mod store;

pub use domain::collection::{Collection, CollectionView};
pub use domain::proof::{Proof, ProofLeaf};
pub use domain::record::{Record, StateAction, StateChange};
pub use errors::CollectionError;
pub use ports::{BatchOperation, KeyValueStore};
pub use store::CollectionStore;
