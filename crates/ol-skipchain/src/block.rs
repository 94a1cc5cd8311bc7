//! Skip blocks and forward links.

use serde::{Deserialize, Serialize};
use shared_crypto::{CanonicalHasher, CollectiveSignature, ThresholdPolicy};
use shared_types::{Hash, Roster, SkipBlockId};

/// Selects the verification policies a block must pass before storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerifierId(pub u32);

/// Accept-everything policy, used while bootstrapping a chain.
pub const VERIFY_NONE: VerifierId = VerifierId(0);

/// The OmniLedger policy: re-execute the block body and compare state
/// roots. Registered by the transaction service.
pub const VERIFY_OMNILEDGER: VerifierId = VerifierId(1);

/// Height of the block at `index`: one more than the number of times
/// `base` divides the index, capped at `max_height`. The genesis block has
/// height 1 (its single back link is a random seed).
pub fn block_height(index: u64, base: u32, max_height: u32) -> u32 {
    if index == 0 {
        return 1;
    }
    let base = base.max(2) as u64;
    let mut height = 1;
    let mut step = base;
    while height < max_height && index % step == 0 {
        height += 1;
        step *= base;
    }
    height
}

/// Digest a forward link signs: the canonical hash of `(from, to)`.
pub struct BlockLinkDigest;

impl BlockLinkDigest {
    pub fn compute(from: &SkipBlockId, to: &SkipBlockId) -> Hash {
        let mut hasher = CanonicalHasher::new();
        hasher.fixed(from.as_bytes());
        hasher.fixed(to.as_bytes());
        hasher.finish()
    }
}

/// A sealed pointer from one block to a successor, endorsed by the
/// roster's collective signature over `(from, to)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardLink {
    pub from: SkipBlockId,
    pub to: SkipBlockId,
    pub signature: CollectiveSignature,
}

impl ForwardLink {
    pub fn new(from: SkipBlockId, to: SkipBlockId, signature: CollectiveSignature) -> Self {
        Self {
            from,
            to,
            signature,
        }
    }

    /// Verify the collective signature under `roster` with the BFT policy
    /// for its size.
    pub fn verify(&self, roster: &Roster) -> bool {
        let digest = BlockLinkDigest::compute(&self.from, &self.to);
        self.signature
            .verify(
                &digest,
                &roster.public_keys(),
                &ThresholdPolicy::bft(roster.len()),
            )
            .is_ok()
    }
}

/// A node in the skipchain.
///
/// The hash covers every field except the forward links and the
/// parent/child annotations, which are appended after sealing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipBlock {
    pub index: u64,
    pub height: u32,
    /// Chain-wide link spacing constant, fixed at genesis.
    pub base: u32,
    /// Chain-wide height cap, fixed at genesis.
    pub max_height: u32,
    /// `back_links[i]` is the most recent earlier block of height above
    /// `i`. The genesis block carries a single random link.
    pub back_links: Vec<SkipBlockId>,
    pub verifier_ids: Vec<VerifierId>,
    /// Hash of the chain's genesis block; zero on the genesis block
    /// itself.
    pub genesis: SkipBlockId,
    pub roster: Roster,
    /// Opaque application bytes.
    pub payload: Vec<u8>,

    /// Sealed successor pointers, one per level, appended post-creation.
    pub forward_links: Vec<ForwardLink>,
    /// Cross-chain annotations, kept outside the hash like forward links.
    pub parent_block: Option<SkipBlockId>,
    pub child_links: Vec<SkipBlockId>,
}

impl SkipBlock {
    /// Canonical hash over the sealed fields.
    pub fn hash(&self) -> Hash {
        let mut hasher = CanonicalHasher::new();
        hasher.u64(self.index);
        hasher.u64(self.height as u64);
        hasher.u64(self.base as u64);
        hasher.u64(self.max_height as u64);
        hasher.u64(self.back_links.len() as u64);
        for link in &self.back_links {
            hasher.fixed(link.as_bytes());
        }
        hasher.u64(self.verifier_ids.len() as u64);
        for verifier in &self.verifier_ids {
            hasher.u64(verifier.0 as u64);
        }
        hasher.fixed(self.genesis.as_bytes());
        hasher.fixed(&self.roster.hash());
        hasher.field(&self.payload);
        hasher.finish()
    }

    pub fn id(&self) -> SkipBlockId {
        SkipBlockId(self.hash())
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// The chain this block belongs to: the genesis hash, or the block's
    /// own hash if it is the genesis.
    pub fn chain_id(&self) -> SkipBlockId {
        if self.genesis.is_zero() {
            self.id()
        } else {
            self.genesis
        }
    }

    /// The immediate predecessor (level-0 back link) of a sealed block.
    pub fn previous(&self) -> Option<SkipBlockId> {
        if self.is_genesis() {
            None
        } else {
            self.back_links.first().copied()
        }
    }

    /// The highest forward link whose signature verifies under this
    /// block's roster.
    pub fn best_forward_link(&self) -> Option<&ForwardLink> {
        self.forward_links
            .iter()
            .rev()
            .find(|link| link.verify(&self.roster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ServerIdentity;

    fn roster() -> Roster {
        Roster::new(vec![
            ServerIdentity::new([1; 32], "node-1"),
            ServerIdentity::new([2; 32], "node-2"),
        ])
    }

    fn block(index: u64, payload: &[u8]) -> SkipBlock {
        SkipBlock {
            index,
            height: block_height(index, 2, 4),
            base: 2,
            max_height: 4,
            back_links: vec![SkipBlockId([9; 32])],
            verifier_ids: vec![VERIFY_NONE],
            genesis: SkipBlockId::zero(),
            roster: roster(),
            payload: payload.to_vec(),
            forward_links: vec![],
            parent_block: None,
            child_links: vec![],
        }
    }

    #[test]
    fn heights_follow_base_powers() {
        // base 2, cap 4
        let heights: Vec<u32> = (0..=16).map(|i| block_height(i, 2, 4)).collect();
        assert_eq!(
            heights,
            vec![1, 1, 2, 1, 3, 1, 2, 1, 4, 1, 2, 1, 3, 1, 2, 1, 4]
        );
        // base 4
        assert_eq!(block_height(4, 4, 4), 2);
        assert_eq!(block_height(16, 4, 4), 3);
        assert_eq!(block_height(3, 4, 4), 1);
    }

    #[test]
    fn hash_excludes_forward_links() {
        let mut b = block(1, b"payload");
        let before = b.hash();
        b.forward_links.push(ForwardLink::new(
            b.id(),
            SkipBlockId([3; 32]),
            shared_crypto::CollectiveSignature::new(vec![], vec![]),
        ));
        b.child_links.push(SkipBlockId([4; 32]));
        assert_eq!(b.hash(), before);
    }

    #[test]
    fn hash_covers_sealed_fields() {
        let base = block(1, b"payload");
        let mut other = base.clone();
        other.payload = b"different".to_vec();
        assert_ne!(base.hash(), other.hash());

        let mut other = base.clone();
        other.index = 2;
        assert_ne!(base.hash(), other.hash());

        let mut other = base.clone();
        other.roster = Roster::new(vec![ServerIdentity::new([7; 32], "x")]);
        assert_ne!(base.hash(), other.hash());
    }

    #[test]
    fn chain_id_of_genesis_is_own_hash() {
        let genesis = block(0, b"");
        assert_eq!(genesis.chain_id(), genesis.id());
        assert!(genesis.previous().is_none());

        let mut later = block(1, b"");
        later.genesis = genesis.id();
        assert_eq!(later.chain_id(), genesis.id());
    }
}
