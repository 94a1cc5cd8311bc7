//! # Shared Types
//!
//! Core identifiers and roster types used by every OmniLedger subsystem.
//!
//! Everything here is plain data: 32-byte ids, the instance addressing
//! scheme, and the ordered server roster. Cryptographic operations live in
//! `shared-crypto`; these types only carry bytes.

pub mod entities;

pub use entities::{
    DarcId, Hash, InstanceId, Nonce, PublicKeyBytes, Roster, ServerIdentity, SignatureBytes,
    SkipBlockId, SubId,
};
