//! # Core Identifiers
//!
//! The identifier vocabulary shared by the skipchain, the authenticated
//! collection and the transaction engine.
//!
//! ## Clusters
//!
//! - **Hashes & keys**: `Hash`, `PublicKeyBytes`, `SignatureBytes`
//! - **Ledger addressing**: `SkipBlockId`, `DarcId`, `SubId`, `InstanceId`, `Nonce`
//! - **Membership**: `ServerIdentity`, `Roster`

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// A 32-byte Ed25519 public key.
pub type PublicKeyBytes = [u8; 32];

/// A 64-byte Ed25519 signature.
///
/// Serialized with `serde_with::Bytes` at use sites (serde has no derive
/// support for 64-byte arrays).
pub type SignatureBytes = [u8; 64];

/// Identity of a skip block: its hash. The id of a whole chain is the hash
/// of its genesis block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SkipBlockId(pub Hash);

impl SkipBlockId {
    /// The all-zero id, used as the "no block" marker.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First four bytes in hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for SkipBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Identity of a darc: the hash of its version-0 document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct DarcId(pub Hash);

impl DarcId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for DarcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 32-byte discriminator distinguishing instances governed by the same darc.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SubId(pub [u8; 32]);

impl SubId {
    /// The zero sub-id addresses the darc document itself.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }
}

/// 32-byte replay guard carried by every instruction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Nonce(pub [u8; 32]);

/// Address of one instance in the authenticated collection: the darc that
/// governs it plus a discriminator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct InstanceId {
    pub darc_id: DarcId,
    pub sub_id: SubId,
}

impl InstanceId {
    pub fn new(darc_id: DarcId, sub_id: SubId) -> Self {
        Self { darc_id, sub_id }
    }

    /// The instance addressing the darc document itself.
    pub fn darc(darc_id: DarcId) -> Self {
        Self::new(darc_id, SubId::zero())
    }

    /// Canonical 64-byte key under which this instance is stored.
    pub fn to_key(self) -> Vec<u8> {
        let mut key = Vec::with_capacity(64);
        key.extend_from_slice(&self.darc_id.0);
        key.extend_from_slice(&self.sub_id.0);
        key
    }
}

/// One server in a roster: its long-term public key and a human-readable
/// address used for logging and in-memory routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub public: PublicKeyBytes,
    pub address: String,
}

impl ServerIdentity {
    pub fn new(public: PublicKeyBytes, address: impl Into<String>) -> Self {
        Self {
            public,
            address: address.into(),
        }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.address, hex::encode(&self.public[..4]))
    }
}

/// Ordered list of server identities. The head is the leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Roster {
    pub list: Vec<ServerIdentity>,
}

impl Roster {
    pub fn new(list: Vec<ServerIdentity>) -> Self {
        Self { list }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn leader(&self) -> Option<&ServerIdentity> {
        self.list.first()
    }

    pub fn contains(&self, identity: &ServerIdentity) -> bool {
        self.list.iter().any(|s| s.public == identity.public)
    }

    pub fn index_of(&self, public: &PublicKeyBytes) -> Option<usize> {
        self.list.iter().position(|s| &s.public == public)
    }

    /// All public keys in roster order.
    pub fn public_keys(&self) -> Vec<PublicKeyBytes> {
        self.list.iter().map(|s| s.public).collect()
    }

    /// Roster after one view-change: the head moves to the end, everybody
    /// else shifts up. Membership never changes.
    pub fn rotated(&self) -> Roster {
        self.rotated_by(1)
    }

    /// Roster after `n` rotations.
    pub fn rotated_by(&self, n: usize) -> Roster {
        let mut list = self.list.clone();
        if !list.is_empty() {
            let n = n % list.len();
            list.rotate_left(n);
        }
        Roster { list }
    }

    /// True if `other` holds exactly the same members, in any order.
    pub fn same_members(&self, other: &Roster) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut a = self.public_keys();
        let mut b = other.public_keys();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }

    /// Hash over the ordered member keys, bound into block headers.
    pub fn hash(&self) -> Hash {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update((self.list.len() as u64).to_le_bytes());
        for server in &self.list {
            hasher.update(server.public);
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: u8) -> ServerIdentity {
        ServerIdentity::new([n; 32], format!("node-{n}"))
    }

    #[test]
    fn instance_id_key_layout() {
        let id = InstanceId::new(DarcId([1; 32]), SubId([2; 32]));
        let key = id.to_key();
        assert_eq!(key.len(), 64);
        assert_eq!(&key[..32], &[1; 32]);
        assert_eq!(&key[32..], &[2; 32]);
    }

    #[test]
    fn roster_rotation_preserves_members() {
        let roster = Roster::new(vec![identity(1), identity(2), identity(3)]);
        let rotated = roster.rotated();

        assert_eq!(rotated.leader().unwrap().public, [2; 32]);
        assert_eq!(rotated.list[2].public, [1; 32]);
        assert!(roster.same_members(&rotated));
        assert_eq!(roster.rotated_by(3), roster);
    }

    #[test]
    fn roster_hash_depends_on_order() {
        let a = Roster::new(vec![identity(1), identity(2)]);
        let b = Roster::new(vec![identity(2), identity(1)]);
        assert_ne!(a.hash(), b.hash());
        assert!(a.same_members(&b));
    }

    #[test]
    fn zero_block_id() {
        assert!(SkipBlockId::zero().is_zero());
        assert!(!SkipBlockId([1; 32]).is_zero());
    }
}
