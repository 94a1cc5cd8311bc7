//! # Skipchain Store
//!
//! Append-only block graph with persistence. All inter-block references
//! are by hash; the store owns the only table from hash to block. Sealed
//! blocks are re-persisted only when a forward link or child annotation is
//! appended.

use crate::block::{block_height, ForwardLink, SkipBlock, VerifierId, VERIFY_NONE};
use crate::errors::SkipchainError;
use ol_collection::ports::BatchOperation;
use ol_collection::store::SharedKVStore;
use shared_types::{Roster, SkipBlockId};
use std::collections::HashMap;
use tracing::debug;

const BLOCK_PREFIX: &[u8] = b"sb:";
const TIP_PREFIX: &[u8] = b"tip:";

/// A verification policy: inspects a candidate block, returns acceptance.
/// Policies must be deterministic and side-effect free.
pub type VerifierFn = Box<dyn Fn(&SkipBlock) -> bool + Send + Sync>;

/// Block graph of all chains known to one node.
pub struct SkipchainStore {
    blocks: HashMap<SkipBlockId, SkipBlock>,
    tips: HashMap<SkipBlockId, SkipBlockId>,
    verifiers: HashMap<VerifierId, VerifierFn>,
    store: SharedKVStore,
}

impl SkipchainStore {
    /// Open the store and reload every persisted block. `VERIFY_NONE` is
    /// pre-registered; other policies are registered by their services.
    pub fn open(store: SharedKVStore) -> Result<Self, SkipchainError> {
        let mut this = Self {
            blocks: HashMap::new(),
            tips: HashMap::new(),
            verifiers: HashMap::new(),
            store,
        };
        this.verifiers.insert(VERIFY_NONE, Box::new(|_| true));
        this.load()?;
        Ok(this)
    }

    /// Register a verification policy under `id`, replacing any previous
    /// one.
    pub fn register_verifier(&mut self, id: VerifierId, verifier: VerifierFn) {
        self.verifiers.insert(id, verifier);
    }

    pub fn get_block(&self, id: &SkipBlockId) -> Option<SkipBlock> {
        self.blocks.get(id).cloned()
    }

    pub fn has_block(&self, id: &SkipBlockId) -> bool {
        self.blocks.contains_key(id)
    }

    /// Tip of `chain`, if the chain is known.
    pub fn latest(&self, chain: &SkipBlockId) -> Option<SkipBlockId> {
        self.tips.get(chain).copied()
    }

    pub fn tip_block(&self, chain: &SkipBlockId) -> Option<SkipBlock> {
        self.latest(chain).and_then(|id| self.get_block(&id))
    }

    /// All chain ids with a stored tip.
    pub fn chains(&self) -> Vec<SkipBlockId> {
        self.tips.keys().copied().collect()
    }

    /// Build the genesis block of a new chain. The random back link seeds
    /// the hash; the block still has to be stored with `store_block`.
    pub fn propose_genesis(
        &self,
        roster: Roster,
        verifier_ids: Vec<VerifierId>,
        payload: Vec<u8>,
        base: u32,
        max_height: u32,
    ) -> SkipBlock {
        SkipBlock {
            index: 0,
            height: 1,
            base,
            max_height,
            back_links: vec![SkipBlockId(rand::random())],
            verifier_ids,
            genesis: SkipBlockId::zero(),
            roster,
            payload,
            forward_links: vec![],
            parent_block: None,
            child_links: vec![],
        }
    }

    /// Build the successor of `prev_id` carrying `payload`. Height and
    /// back links follow the chain's `base^h` spacing; verifier ids are
    /// inherited.
    pub fn propose_next(
        &self,
        prev_id: &SkipBlockId,
        roster: Roster,
        payload: Vec<u8>,
    ) -> Result<SkipBlock, SkipchainError> {
        let prev = self
            .blocks
            .get(prev_id)
            .ok_or_else(|| SkipchainError::BlockNotFound(prev_id.short()))?;

        let index = prev.index + 1;
        let height = block_height(index, prev.base, prev.max_height);
        let back_links = self.back_targets(prev, height);

        Ok(SkipBlock {
            index,
            height,
            base: prev.base,
            max_height: prev.max_height,
            back_links,
            verifier_ids: prev.verifier_ids.clone(),
            genesis: prev.chain_id(),
            roster,
            payload,
            forward_links: vec![],
            parent_block: None,
            child_links: vec![],
        })
    }

    /// For each level `0..height`, the most recent block at or before
    /// `prev` whose height exceeds the level; the genesis block is the
    /// fallback when no such block exists.
    fn back_targets(&self, prev: &SkipBlock, height: u32) -> Vec<SkipBlockId> {
        let mut targets = Vec::with_capacity(height as usize);
        for level in 0..height {
            let mut cursor = prev.clone();
            loop {
                if cursor.height > level || cursor.is_genesis() {
                    targets.push(cursor.id());
                    break;
                }
                match cursor.previous().and_then(|id| self.get_block(&id)) {
                    Some(earlier) => cursor = earlier,
                    // broken back chain; the genesis fallback keeps the
                    // list well-formed and validation will reject later
                    None => {
                        targets.push(cursor.id());
                        break;
                    }
                }
            }
        }
        targets
    }

    /// Blocks that should receive a forward link to `block`, as
    /// `(source id, level)` pairs. Sources at capacity or too low for the
    /// level are skipped.
    pub fn pending_link_sources(&self, block: &SkipBlock) -> Vec<(SkipBlockId, u32)> {
        let mut sources = Vec::new();
        for (level, target) in block.back_links.iter().enumerate() {
            let level = level as u32;
            let Some(source) = self.blocks.get(target) else {
                continue;
            };
            if source.height > level && source.forward_links.len() == level as usize {
                sources.push((*target, level));
            }
        }
        sources
    }

    /// Validate and store a sealed block, updating the chain tip.
    /// Storing the same block twice is a no-op.
    pub fn store_block(&mut self, block: SkipBlock) -> Result<SkipBlockId, SkipchainError> {
        let id = block.id();
        if self.blocks.contains_key(&id) {
            return Ok(id);
        }

        self.validate(&block)?;
        for verifier_id in &block.verifier_ids {
            let verifier = self
                .verifiers
                .get(verifier_id)
                .ok_or(SkipchainError::UnknownVerifier(*verifier_id))?;
            if !verifier(&block) {
                return Err(SkipchainError::VerifierRefused(*verifier_id));
            }
        }

        let chain = block.chain_id();
        let replaces_tip = match self.tip_block(&chain) {
            Some(tip) => block.index > tip.index,
            None => true,
        };

        debug!(
            chain = %chain.short(),
            block = %id.short(),
            index = block.index,
            height = block.height,
            "storing skip block"
        );

        self.persist_block(&block)?;
        self.blocks.insert(id, block);
        if replaces_tip {
            self.tips.insert(chain, id);
            self.persist_tip(&chain, &id)?;
        }
        Ok(id)
    }

    fn validate(&self, block: &SkipBlock) -> Result<(), SkipchainError> {
        if block.roster.is_empty() {
            return Err(SkipchainError::InvalidBlock("empty roster".into()));
        }
        if block.back_links.is_empty() {
            return Err(SkipchainError::InvalidBlock("no back links".into()));
        }

        if block.is_genesis() {
            if !block.genesis.is_zero() {
                return Err(SkipchainError::InvalidBlock(
                    "genesis references another genesis".into(),
                ));
            }
            if block.base < 2 || block.max_height == 0 {
                return Err(SkipchainError::InvalidBlock(
                    "bad chain constants".into(),
                ));
            }
            return Ok(());
        }

        let prev = self
            .blocks
            .get(&block.back_links[0])
            .ok_or_else(|| SkipchainError::InvalidBlock("unknown predecessor".into()))?;

        if block.index != prev.index + 1 {
            return Err(SkipchainError::InvalidBlock(format!(
                "index {} does not follow {}",
                block.index, prev.index
            )));
        }
        if block.genesis != prev.chain_id() {
            return Err(SkipchainError::InvalidBlock("wrong chain".into()));
        }
        if block.base != prev.base || block.max_height != prev.max_height {
            return Err(SkipchainError::InvalidBlock(
                "chain constants changed".into(),
            ));
        }
        if block.height != block_height(block.index, block.base, block.max_height) {
            return Err(SkipchainError::InvalidBlock("wrong height".into()));
        }
        if block.back_links.len() != block.height as usize {
            return Err(SkipchainError::InvalidBlock(
                "back link count differs from height".into(),
            ));
        }
        for link in &block.back_links[1..] {
            if !self.blocks.contains_key(link) {
                return Err(SkipchainError::InvalidBlock(
                    "back link to unknown block".into(),
                ));
            }
        }
        // The membership is fixed at genesis; ordering may differ after
        // view changes or an explicit config update.
        if !block.roster.same_members(&prev.roster) {
            return Err(SkipchainError::InvalidBlock(
                "roster membership changed".into(),
            ));
        }
        Ok(())
    }

    /// Append a sealed forward link to its source block. The target block
    /// must already be stored and the link's collective signature must
    /// verify under the source block's roster.
    pub fn append_forward_link(&mut self, link: ForwardLink) -> Result<(), SkipchainError> {
        let to = self
            .blocks
            .get(&link.to)
            .ok_or_else(|| SkipchainError::InvalidLink("target block unknown".into()))?
            .clone();

        let from = self
            .blocks
            .get(&link.from)
            .ok_or_else(|| SkipchainError::BlockNotFound(link.from.short()))?;

        let level = from.forward_links.len() as u32;
        if level >= from.height {
            return Err(SkipchainError::InvalidLink(
                "source block at link capacity".into(),
            ));
        }
        if to.height <= level {
            return Err(SkipchainError::InvalidLink(format!(
                "target height {} too low for level {level}",
                to.height
            )));
        }
        if to.index <= from.index {
            return Err(SkipchainError::InvalidLink(
                "link does not point forward".into(),
            ));
        }
        if !link.verify(&from.roster) {
            return Err(SkipchainError::InvalidLink("bad collective signature".into()));
        }

        let from = self
            .blocks
            .get_mut(&link.from)
            .expect("source block present, checked above");
        // Idempotent under re-propagation.
        if from.forward_links.iter().any(|existing| existing.to == link.to) {
            return Ok(());
        }
        from.forward_links.push(link);
        let from = from.clone();
        self.persist_block(&from)
    }

    /// Shortest path from `from_id` to the tip, taking the highest
    /// verifiable forward link at every hop.
    pub fn get_update_chain(
        &self,
        from_id: &SkipBlockId,
    ) -> Result<Vec<SkipBlock>, SkipchainError> {
        let mut current = self
            .get_block(from_id)
            .ok_or_else(|| SkipchainError::BlockNotFound(from_id.short()))?;
        let mut chain = vec![current.clone()];

        while let Some(link) = current.best_forward_link() {
            let next = self.get_block(&link.to).ok_or_else(|| {
                SkipchainError::BlockNotFound(format!("forward chain gap at {}", link.to.short()))
            })?;
            chain.push(next.clone());
            current = next;
        }
        Ok(chain)
    }

    /// Annotate `child` as a sub-chain of `parent`.
    pub fn set_child_link(
        &mut self,
        parent: &SkipBlockId,
        child: &SkipBlockId,
    ) -> Result<(), SkipchainError> {
        if !self.blocks.contains_key(parent) {
            return Err(SkipchainError::BlockNotFound(parent.short()));
        }
        if !self.blocks.contains_key(child) {
            return Err(SkipchainError::BlockNotFound(child.short()));
        }

        let child_block = self.blocks.get_mut(child).expect("checked above");
        child_block.parent_block = Some(*parent);
        let child_block = child_block.clone();

        let parent_block = self.blocks.get_mut(parent).expect("checked above");
        if !parent_block.child_links.contains(child) {
            parent_block.child_links.push(*child);
        }
        let parent_block = parent_block.clone();

        self.persist_block(&child_block)?;
        self.persist_block(&parent_block)
    }

    fn persist_block(&self, block: &SkipBlock) -> Result<(), SkipchainError> {
        let bytes = bincode::serialize(block)
            .map_err(|err| SkipchainError::StoreFailure(err.to_string()))?;
        let mut key = BLOCK_PREFIX.to_vec();
        key.extend_from_slice(block.id().as_bytes());
        self.store
            .lock()
            .atomic_batch_write(vec![BatchOperation::put(key, bytes)])
            .map_err(|err| SkipchainError::StoreFailure(err.to_string()))
    }

    fn persist_tip(
        &self,
        chain: &SkipBlockId,
        tip: &SkipBlockId,
    ) -> Result<(), SkipchainError> {
        let mut key = TIP_PREFIX.to_vec();
        key.extend_from_slice(chain.as_bytes());
        self.store
            .lock()
            .put(&key, tip.as_bytes())
            .map_err(|err| SkipchainError::StoreFailure(err.to_string()))
    }

    fn load(&mut self) -> Result<(), SkipchainError> {
        let store = self.store.lock();

        for (_, bytes) in store
            .prefix_scan(BLOCK_PREFIX)
            .map_err(|err| SkipchainError::StoreFailure(err.to_string()))?
        {
            let block: SkipBlock = bincode::deserialize(&bytes)
                .map_err(|err| SkipchainError::StoreFailure(err.to_string()))?;
            self.blocks.insert(block.id(), block);
        }

        for (key, value) in store
            .prefix_scan(TIP_PREFIX)
            .map_err(|err| SkipchainError::StoreFailure(err.to_string()))?
        {
            let chain: [u8; 32] = key[TIP_PREFIX.len()..]
                .try_into()
                .map_err(|_| SkipchainError::StoreFailure("malformed tip key".into()))?;
            let tip: [u8; 32] = value
                .as_slice()
                .try_into()
                .map_err(|_| SkipchainError::StoreFailure("malformed tip value".into()))?;
            self.tips.insert(SkipBlockId(chain), SkipBlockId(tip));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockLinkDigest;
    use ol_collection::adapters::InMemoryKVStore;
    use parking_lot::Mutex;
    use shared_crypto::{CollectiveSignature, Ed25519KeyPair};
    use shared_types::ServerIdentity;
    use std::sync::Arc;

    fn keypairs(n: u8) -> Vec<Ed25519KeyPair> {
        (0..n).map(|i| Ed25519KeyPair::from_seed([i + 1; 32])).collect()
    }

    fn roster(keys: &[Ed25519KeyPair]) -> Roster {
        Roster::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| ServerIdentity::new(k.public_bytes(), format!("node-{i}")))
                .collect(),
        )
    }

    fn sign_link(keys: &[Ed25519KeyPair], from: &SkipBlockId, to: &SkipBlockId) -> ForwardLink {
        let digest = BlockLinkDigest::compute(from, to);
        ForwardLink::new(
            *from,
            *to,
            CollectiveSignature::new(
                vec![true; keys.len()],
                keys.iter().map(|k| k.sign(&digest).to_bytes()).collect(),
            ),
        )
    }

    fn open_store() -> (SkipchainStore, SharedKVStore) {
        let kv: SharedKVStore = Arc::new(Mutex::new(InMemoryKVStore::new()));
        (SkipchainStore::open(kv.clone()).unwrap(), kv)
    }

    /// Stores `count` blocks after genesis, appending every earned
    /// forward link, and returns the chain id.
    fn build_chain(
        store: &mut SkipchainStore,
        keys: &[Ed25519KeyPair],
        count: u64,
    ) -> SkipBlockId {
        let genesis = store.propose_genesis(roster(keys), vec![VERIFY_NONE], vec![], 2, 4);
        let chain = store.store_block(genesis).unwrap();

        for i in 1..=count {
            let prev = store.latest(&chain).unwrap();
            let block = store
                .propose_next(&prev, roster(keys), format!("payload-{i}").into_bytes())
                .unwrap();
            let sources = store.pending_link_sources(&block);
            let id = store.store_block(block).unwrap();
            for (source, _level) in sources {
                store
                    .append_forward_link(sign_link(keys, &source, &id))
                    .unwrap();
            }
        }
        chain
    }

    #[test]
    fn genesis_shape() {
        let keys = keypairs(3);
        let (mut store, _) = open_store();
        let genesis = store.propose_genesis(roster(&keys), vec![VERIFY_NONE], vec![], 2, 4);

        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.height, 1);
        assert_eq!(genesis.back_links.len(), 1);
        assert!(!genesis.back_links[0].is_zero());

        let id = store.store_block(genesis.clone()).unwrap();
        assert_eq!(store.latest(&id), Some(id));
        assert_eq!(genesis.chain_id(), id);
    }

    #[test]
    fn heights_and_back_links_along_a_chain() {
        let keys = keypairs(2);
        let (mut store, _) = open_store();
        let chain = build_chain(&mut store, &keys, 8);

        let tip = store.tip_block(&chain).unwrap();
        assert_eq!(tip.index, 8);
        assert_eq!(tip.height, 4);
        assert_eq!(tip.back_links.len(), 4);

        // level 0 points at block 7, level 1 at block 6, level 2 at
        // block 4, level 3 falls back to genesis
        let chain_blocks = store.get_update_chain(&chain).unwrap();
        let by_index: HashMap<u64, SkipBlockId> =
            chain_blocks.iter().map(|b| (b.index, b.id())).collect();
        assert_eq!(tip.back_links[0], by_index[&7]);
        assert_eq!(tip.back_links[1], by_index[&6]);
        assert_eq!(tip.back_links[2], by_index[&4]);
        assert_eq!(tip.back_links[3], chain);
    }

    #[test]
    fn update_chain_uses_highest_links() {
        let keys = keypairs(2);
        let (mut store, _) = open_store();
        let chain = build_chain(&mut store, &keys, 8);

        let path = store.get_update_chain(&chain).unwrap();
        let indices: Vec<u64> = path.iter().map(|b| b.index).collect();
        // genesis can only hold one link; block 1 skips to 2, 2 to 4,
        // 4 to 8 via their top links
        assert_eq!(indices, vec![0, 1, 2, 4, 8]);
    }

    #[test]
    fn forward_link_signature_is_checked() {
        let keys = keypairs(2);
        let (mut store, _) = open_store();
        let chain = build_chain(&mut store, &keys, 1);

        let tip = store.tip_block(&chain).unwrap();
        let block = store
            .propose_next(&tip.id(), roster(&keys), b"next".to_vec())
            .unwrap();
        let id = store.store_block(block).unwrap();

        // signed by strangers
        let strangers: Vec<Ed25519KeyPair> =
            (0..2).map(|_| Ed25519KeyPair::generate()).collect();
        let bad = sign_link(&strangers, &tip.id(), &id);
        assert!(matches!(
            store.append_forward_link(bad),
            Err(SkipchainError::InvalidLink(_))
        ));

        let good = sign_link(&keys, &tip.id(), &id);
        assert!(store.append_forward_link(good).is_ok());
    }

    #[test]
    fn blocks_are_append_only() {
        let keys = keypairs(2);
        let (mut store, _) = open_store();
        let chain = build_chain(&mut store, &keys, 2);

        let tip = store.tip_block(&chain).unwrap();
        // a late competitor for an already-sealed index does not move the
        // tip and does not disturb stored blocks
        let stale = store
            .propose_next(&chain, roster(&keys), b"fork".to_vec())
            .unwrap();
        let _ = store.store_block(stale);

        assert_eq!(store.latest(&chain), Some(tip.id()));
        let reloaded = store.get_block(&tip.id()).unwrap();
        assert_eq!(reloaded.hash(), tip.hash());
    }

    #[test]
    fn rejects_membership_change() {
        let keys = keypairs(2);
        let (mut store, _) = open_store();
        let chain = build_chain(&mut store, &keys, 1);

        let tip = store.latest(&chain).unwrap();
        let other_keys = keypairs(3);
        let block = store
            .propose_next(&tip, roster(&other_keys), b"evil".to_vec())
            .unwrap();
        assert!(matches!(
            store.store_block(block),
            Err(SkipchainError::InvalidBlock(_))
        ));

        // reordering the same members is fine (view change)
        let block = store
            .propose_next(&tip, roster(&keys).rotated(), b"rotated".to_vec())
            .unwrap();
        assert!(store.store_block(block).is_ok());
    }

    #[test]
    fn verifier_refusal_blocks_storage() {
        let keys = keypairs(2);
        let (mut store, _) = open_store();
        store.register_verifier(crate::block::VERIFY_OMNILEDGER, Box::new(|_| false));

        let genesis = store.propose_genesis(
            roster(&keys),
            vec![crate::block::VERIFY_OMNILEDGER],
            vec![],
            2,
            4,
        );
        assert!(matches!(
            store.store_block(genesis),
            Err(SkipchainError::VerifierRefused(_))
        ));
    }

    #[test]
    fn child_links_annotate_both_blocks() {
        let keys = keypairs(2);
        let (mut store, _) = open_store();
        let parent_chain = build_chain(&mut store, &keys, 1);

        let child_genesis =
            store.propose_genesis(roster(&keys), vec![VERIFY_NONE], b"sub".to_vec(), 2, 4);
        let child = store.store_block(child_genesis).unwrap();

        store.set_child_link(&parent_chain, &child).unwrap();
        assert_eq!(
            store.get_block(&child).unwrap().parent_block,
            Some(parent_chain)
        );
        assert!(store
            .get_block(&parent_chain)
            .unwrap()
            .child_links
            .contains(&child));

        // the annotation is outside the hash, so ids are unchanged
        assert_eq!(store.get_block(&child).unwrap().id(), child);

        assert!(store
            .set_child_link(&parent_chain, &SkipBlockId([9; 32]))
            .is_err());
    }

    #[test]
    fn reload_from_store() {
        let keys = keypairs(2);
        let kv: SharedKVStore = Arc::new(Mutex::new(InMemoryKVStore::new()));
        let chain = {
            let mut store = SkipchainStore::open(kv.clone()).unwrap();
            build_chain(&mut store, &keys, 4)
        };

        let reloaded = SkipchainStore::open(kv).unwrap();
        let tip = reloaded.tip_block(&chain).unwrap();
        assert_eq!(tip.index, 4);
        // forward links survived persistence
        let path = reloaded.get_update_chain(&chain).unwrap();
        assert_eq!(path.last().unwrap().index, 4);
    }
}
