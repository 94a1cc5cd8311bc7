//! The service facade and peer-message dispatch.

use crate::errors::{Result, ServiceError};
use crate::messages::{
    genesis_state_changes, validate_genesis_darc, AddTxRequest, AddTxResponse, BlockData,
    CreateGenesisBlockRequest, CreateGenesisBlockResponse, DataBody, DataHeader, GenesisData,
    GetProofRequest, GetProofResponse, CURRENT_VERSION,
};
use crate::proof::Proof;
use crate::state::ChainState;
use async_trait::async_trait;
use ol_collection::{Collection, CollectionStore, CollectionView, StateAction, StateChange};
use ol_collection::store::SharedKVStore;
use ol_consensus::{
    relay_announce, relay_challenge, sign_vote, verify_new_view, view_change_digest, CosiNode,
};
use ol_contracts::domain::config::config_sub_id;
use ol_contracts::{ChainConfig, ContractRegistry, TransactionExecutor, CONTRACT_DARC};
use ol_network::{
    CosiPayload, NetworkError, NetworkHandler, PeerMessage, PeerReply, Transport,
};
use ol_skipchain::{BlockLinkDigest, ForwardLink, SkipBlock, SkipchainStore, VERIFY_OMNILEDGER};
use parking_lot::Mutex;
use shared_crypto::{verify_bytes, Ed25519KeyPair};
use shared_types::{DarcId, Hash, InstanceId, ServerIdentity, SkipBlockId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One ledger node: per-chain state plus the protocol endpoints.
pub struct Service {
    pub(crate) weak: Weak<Service>,
    pub(crate) identity: ServerIdentity,
    pub(crate) keypair: Arc<Ed25519KeyPair>,
    pub(crate) registry: Arc<ContractRegistry>,
    pub(crate) executor: TransactionExecutor,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) kv: SharedKVStore,
    pub(crate) skipchains: Mutex<SkipchainStore>,
    pub(crate) chains: Mutex<HashMap<SkipBlockId, Arc<ChainState>>>,
    pub(crate) darc_to_chain: Mutex<HashMap<DarcId, SkipBlockId>>,
    pub(crate) cosi: CosiNode,
    pub(crate) view_change_enabled: AtomicBool,
    pub(crate) closed: AtomicBool,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    /// Build a node over its transport and byte store, reloading any
    /// persisted chains. The caller registers the returned service as the
    /// network handler for `identity`.
    pub fn new(
        identity: ServerIdentity,
        keypair: Ed25519KeyPair,
        registry: Arc<ContractRegistry>,
        transport: Arc<dyn Transport>,
        kv: SharedKVStore,
    ) -> Result<Arc<Service>> {
        let keypair = Arc::new(keypair);
        let skipchains = SkipchainStore::open(kv.clone())?;

        let service = Arc::new_cyclic(|weak| Service {
            weak: weak.clone(),
            identity,
            keypair: keypair.clone(),
            registry: registry.clone(),
            executor: TransactionExecutor::new(registry),
            transport,
            kv,
            skipchains: Mutex::new(skipchains),
            chains: Mutex::new(HashMap::new()),
            darc_to_chain: Mutex::new(HashMap::new()),
            cosi: CosiNode::new(keypair),
            view_change_enabled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        // The concrete ledger verification policy: re-execute the payload
        // and compare roots against the sealed header.
        let weak = Arc::downgrade(&service);
        service.skipchains.lock().register_verifier(
            VERIFY_OMNILEDGER,
            Box::new(move |block| match weak.upgrade() {
                Some(service) => service.verify_block_payload(block),
                None => false,
            }),
        );

        service.reload_chains()?;
        Ok(service)
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// The contract registry this node executes with.
    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Arm the view-change watchdog for every chain, current and future.
    pub fn enable_view_change(&self) {
        if self.view_change_enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        let chains: Vec<SkipBlockId> = self.chains.lock().keys().copied().collect();
        for chain in chains {
            self.spawn_watchdog(chain);
        }
    }

    /// Stop loops and release every waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let chains: Vec<Arc<ChainState>> = self.chains.lock().values().cloned().collect();
        for chain in chains {
            chain.drop_all_waiters();
        }
        self.cosi.abort_all();
        info!(node = %self.identity, "service closed");
    }

    // ------------------------------------------------------------------
    // Client RPCs
    // ------------------------------------------------------------------

    /// Start a new ledger and propagate its genesis block to the roster.
    pub async fn create_genesis_block(
        &self,
        request: CreateGenesisBlockRequest,
    ) -> Result<CreateGenesisBlockResponse> {
        if request.version != CURRENT_VERSION {
            return Err(ServiceError::UnsupportedVersion(request.version));
        }
        if request.roster.is_empty() {
            return Err(ServiceError::InvalidDarc("empty roster".into()));
        }
        if request.block_interval.is_zero() {
            return Err(ServiceError::InvalidTransaction(
                "block interval must be positive".into(),
            ));
        }
        validate_genesis_darc(&request.genesis_darc)?;

        let config = ChainConfig::new(request.block_interval, request.roster.clone());
        let changes = genesis_state_changes(&request.genesis_darc, &config)?;
        let mut bootstrap = Collection::new();
        bootstrap.apply_all(&changes)?;

        let payload = BlockData {
            header: DataHeader {
                collection_root: bootstrap.root_hash(),
                roster_hash: request.roster.hash(),
                timestamp_ms: unix_millis(),
            },
            body: DataBody::default(),
            genesis: Some(GenesisData {
                darc: request.genesis_darc.clone(),
                config,
            }),
        }
        .encode()?;

        let block = self.skipchains.lock().propose_genesis(
            request.roster.clone(),
            vec![VERIFY_OMNILEDGER],
            payload,
            2,
            4,
        );
        let chain = block.id();

        if self.chains.lock().contains_key(&chain) {
            return Err(ServiceError::AlreadyExists);
        }
        self.register_chain_from_genesis(&block)?;
        info!(node = %self.identity, chain = %chain.short(), "created genesis block");

        // Best-effort propagation; unreachable peers catch up later.
        for member in request.roster.list.iter() {
            if member.public == self.identity.public {
                continue;
            }
            let message = PeerMessage::PropagateBlock {
                block: block.clone(),
                forward_link: None,
                rejected: vec![],
            };
            if let Err(err) = self.transport.send(member, message).await {
                warn!(member = %member, %err, "genesis propagation failed");
            }
        }

        Ok(CreateGenesisBlockResponse {
            version: CURRENT_VERSION,
            skipblock: block,
        })
    }

    /// Queue a transaction; optionally wait for its inclusion verdict.
    pub async fn add_transaction(&self, request: AddTxRequest) -> Result<AddTxResponse> {
        if request.version != CURRENT_VERSION {
            return Err(ServiceError::UnsupportedVersion(request.version));
        }
        request
            .transaction
            .validate_shape()
            .map_err(|err| ServiceError::InvalidTransaction(err.to_string()))?;
        let state = self
            .chain_state(&request.skipchain_id)
            .ok_or(ServiceError::UnknownSkipchain)?;
        if self.is_closed() {
            return Err(ServiceError::Closed);
        }

        let digest = request.transaction.digest();
        let receiver = (request.inclusion_wait > 0).then(|| state.register_waiter(digest));

        if let Err(err) = state.with(|inner| inner.pending.add(request.transaction.clone())) {
            state.with(|inner| inner.waiters.remove(&digest));
            return Err(err);
        }
        debug!(
            node = %self.identity,
            chain = %request.skipchain_id.short(),
            tx = %hex::encode(&digest[..4]),
            "queued transaction"
        );

        if let Some(receiver) = receiver {
            let wait = state.block_interval() * request.inclusion_wait;
            match tokio::time::timeout(wait, receiver).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return Err(ServiceError::TransactionRejected),
                Ok(Err(_)) => return Err(ServiceError::Closed),
                Err(_) => return Err(ServiceError::InclusionTimeout),
            }
        }
        Ok(AddTxResponse {
            version: CURRENT_VERSION,
        })
    }

    /// Proof of `key` at the tip, anchored at the genesis block.
    pub fn get_proof(&self, request: GetProofRequest) -> Result<GetProofResponse> {
        if request.version != CURRENT_VERSION {
            return Err(ServiceError::UnsupportedVersion(request.version));
        }
        let state = self
            .chain_state(&request.id)
            .ok_or(ServiceError::UnknownSkipchain)?;

        // Snapshot the chain and the collection under the apply lock so
        // the update chain's tip and the proven root agree.
        let _guard = state.apply_lock.lock();
        let update_chain = self.skipchains.lock().get_update_chain(&request.id)?;
        let inclusion = state.with(|inner| inner.collection.collection().proof(&request.key));

        Ok(GetProofResponse {
            version: CURRENT_VERSION,
            proof: Proof {
                update_chain,
                inclusion,
            },
        })
    }

    /// The chain's live configuration, read from the collection.
    pub fn load_config(&self, chain: &SkipBlockId) -> Result<ChainConfig> {
        let state = self.chain_state(chain).ok_or(ServiceError::UnknownSkipchain)?;
        state.with(|inner| read_config(inner.collection.collection(), &inner.genesis_darc))
    }

    pub fn load_block_interval(&self, chain: &SkipBlockId) -> Result<std::time::Duration> {
        Ok(self.load_config(chain)?.block_interval)
    }

    /// The leader this node currently accepts for `chain`.
    pub fn leader(&self, chain: &SkipBlockId) -> Result<ServerIdentity> {
        let state = self.chain_state(chain).ok_or(ServiceError::UnknownSkipchain)?;
        state
            .current_leader()
            .ok_or_else(|| ServiceError::NotFound("empty roster".into()))
    }

    /// The chain a darc lives on, if known.
    pub fn chain_of_darc(&self, darc: &DarcId) -> Option<SkipBlockId> {
        self.darc_to_chain.lock().get(darc).copied()
    }

    // ------------------------------------------------------------------
    // Chain registration and reload
    // ------------------------------------------------------------------

    pub(crate) fn chain_state(&self, chain: &SkipBlockId) -> Option<Arc<ChainState>> {
        self.chains.lock().get(chain).cloned()
    }

    /// Install a chain from its genesis block: bootstrap the collection,
    /// persist, and start the loops this node owes the chain.
    pub(crate) fn register_chain_from_genesis(&self, block: &SkipBlock) -> Result<()> {
        let chain = block.id();
        if self.chains.lock().contains_key(&chain) {
            return Ok(());
        }

        let data = BlockData::decode(&block.payload)?;
        let genesis = data
            .genesis
            .ok_or_else(|| ServiceError::InvalidTransaction("genesis block without bootstrap data".into()))?;
        let changes = genesis_state_changes(&genesis.darc, &genesis.config)?;

        let mut collection = CollectionStore::open(self.kv.clone(), chain_bucket(&chain))?;
        if collection.collection().is_empty() {
            let root = collection.apply(&changes)?;
            if root != data.header.collection_root {
                return Err(ServiceError::InvalidTransaction(
                    "genesis root does not match header".into(),
                ));
            }
        }

        self.skipchains.lock().store_block(block.clone())?;

        let state = Arc::new(ChainState::new(
            chain,
            collection,
            chain,
            genesis.config.clone(),
            genesis.darc.base_id(),
        ));
        self.chains.lock().insert(chain, state);
        self.darc_to_chain
            .lock()
            .insert(genesis.darc.base_id(), chain);

        self.start_chain_loops(chain);
        Ok(())
    }

    /// Rebuild every persisted chain after a restart.
    fn reload_chains(&self) -> Result<()> {
        let chains = self.skipchains.lock().chains();
        for chain in chains {
            let Some(genesis_block) = self.skipchains.lock().get_block(&chain) else {
                continue;
            };
            let data = BlockData::decode(&genesis_block.payload)?;
            let Some(genesis) = data.genesis else { continue };

            let collection = CollectionStore::open(self.kv.clone(), chain_bucket(&chain))?;
            let genesis_darc = genesis.darc.base_id();
            // the live config may differ from the genesis one
            let config = read_config(collection.collection(), &genesis_darc)
                .unwrap_or(genesis.config.clone());
            let latest = self
                .skipchains
                .lock()
                .latest(&chain)
                .unwrap_or(chain);

            // rebuild the darc index from the stored records
            for (key, record) in collection.collection().iter() {
                if record.contract_id == CONTRACT_DARC && key.len() == 64 {
                    let mut base = [0u8; 32];
                    base.copy_from_slice(&key[..32]);
                    self.darc_to_chain.lock().insert(DarcId(base), chain);
                }
            }

            let state = Arc::new(ChainState::new(
                chain,
                collection,
                latest,
                config,
                genesis_darc,
            ));
            self.chains.lock().insert(chain, state);
            debug!(node = %self.identity, chain = %chain.short(), "reloaded chain");
            self.start_chain_loops(chain);
        }
        Ok(())
    }

    fn start_chain_loops(&self, chain: SkipBlockId) {
        if let Some(state) = self.chain_state(&chain) {
            let am_leader = state
                .current_leader()
                .is_some_and(|leader| leader.public == self.identity.public);
            if am_leader {
                self.spawn_producer(chain);
            }
        }
        if self.view_change_enabled.load(Ordering::SeqCst) {
            self.spawn_watchdog(chain);
        }
    }

    // ------------------------------------------------------------------
    // Block application
    // ------------------------------------------------------------------

    /// Verification policy behind `VERIFY_OMNILEDGER`: the payload must
    /// decode, bind the block's roster, and re-execute to the sealed
    /// root. Genesis blocks are checked against their bootstrap data.
    pub(crate) fn verify_block_payload(&self, block: &SkipBlock) -> bool {
        let Ok(data) = BlockData::decode(&block.payload) else {
            return false;
        };
        if data.header.roster_hash != block.roster.hash() {
            return false;
        }

        if block.is_genesis() {
            let Some(genesis) = &data.genesis else {
                return false;
            };
            let Ok(changes) = genesis_state_changes(&genesis.darc, &genesis.config) else {
                return false;
            };
            let mut bootstrap = Collection::new();
            return bootstrap.apply_all(&changes).is_ok()
                && bootstrap.root_hash() == data.header.collection_root;
        }

        let Some(state) = self.chain_state(&block.genesis) else {
            return false;
        };
        state.with(|inner| {
            if inner.latest != block.back_links[0] {
                return false;
            }
            let result = self.executor.create_state_changes(
                inner.collection.collection(),
                &block.genesis,
                &data.body.transactions,
            );
            result.rejected.is_empty() && result.root == data.header.collection_root
        })
    }

    /// Apply one sealed block: re-execute its body, persist collection
    /// and block atomically per chain, fire waiters, track darcs and
    /// config updates. Idempotent under re-delivery.
    pub(crate) fn apply_block(
        &self,
        block: &SkipBlock,
        forward_link: Option<ForwardLink>,
        rejected: &[Hash],
    ) -> Result<()> {
        let chain = block.chain_id();
        let state = self.chain_state(&chain).ok_or(ServiceError::UnknownSkipchain)?;
        let _guard = state.apply_lock.lock();

        let block_id = block.id();
        let already_stored = self.skipchains.lock().has_block(&block_id);

        if !already_stored && !block.is_genesis() {
            let data = BlockData::decode(&block.payload)?;

            // Phase 1: compute the changes against the pre-state.
            let (changes, accepted_digests) =
                state.with(|inner| -> Result<(Vec<StateChange>, Vec<Hash>)> {
                if inner.latest != block.back_links[0] {
                    return Err(ServiceError::Transient(format!(
                        "block {} does not extend local tip",
                        block.index
                    )));
                }
                let result = self.executor.create_state_changes(
                    inner.collection.collection(),
                    &chain,
                    &data.body.transactions,
                );
                if !result.rejected.is_empty() || result.root != data.header.collection_root {
                    return Err(ServiceError::Transient(
                        "block body does not reproduce its sealed root".into(),
                    ));
                }
                let digests = result
                    .accepted
                    .iter()
                    .map(|tx| tx.digest())
                    .collect::<Vec<_>>();
                Ok((result.state_changes, digests))
            })?;

            // Phase 2: store the block (runs the chain's verifiers
            // against the still-unmodified state).
            self.skipchains.lock().store_block(block.clone())?;

            // Phase 3: mutate the chain state.
            let new_darcs = collect_new_darcs(&changes);
            state.with(|inner| -> Result<()> {
                inner.collection.apply(&changes)?;
                inner.latest = block_id;
                // a sealed config update resets the view counter; the
                // stored roster becomes the new base ordering
                if let Ok(config) = read_config(inner.collection.collection(), &inner.genesis_darc)
                {
                    if config != inner.config {
                        info!(chain = %chain.short(), "chain config updated");
                        inner.config = config;
                        inner.view = 0;
                    }
                }
                let mut settled = accepted_digests.clone();
                settled.extend_from_slice(rejected);
                inner.pending.remove_digests(&settled);
                Ok(())
            })?;
            for darc in new_darcs {
                self.darc_to_chain.lock().insert(darc, chain);
            }
            for digest in &accepted_digests {
                state.notify_waiters(digest, true);
            }
            info!(
                node = %self.identity,
                chain = %chain.short(),
                index = block.index,
                accepted = accepted_digests.len(),
                rejected = rejected.len(),
                "applied block"
            );
        }

        if let Some(link) = forward_link {
            if let Err(err) = self.skipchains.lock().append_forward_link(link) {
                warn!(chain = %chain.short(), %err, "forward link rejected");
            }
        }
        if !rejected.is_empty() {
            state.with(|inner| inner.pending.remove_digests(rejected));
            for digest in rejected {
                state.notify_waiters(digest, false);
            }
        }
        state.monitor.reset();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Peer message handlers
    // ------------------------------------------------------------------

    async fn handle_peer(&self, from: &ServerIdentity, message: PeerMessage) -> Result<PeerReply> {
        match message {
            PeerMessage::PollTransactions { chain } => {
                let state = self.chain_state(&chain).ok_or(ServiceError::UnknownSkipchain)?;
                if state
                    .current_leader()
                    .is_some_and(|leader| leader.public == from.public)
                {
                    state.monitor.reset();
                }
                Ok(PeerReply::Transactions(state.with(|inner| inner.pending.all())))
            }

            PeerMessage::PropagateBlock {
                block,
                forward_link,
                rejected,
            } => {
                if block.is_genesis() {
                    self.register_chain_from_genesis(&block)?;
                    if let Some(state) = self.chain_state(&block.id()) {
                        state.monitor.reset();
                    }
                } else {
                    self.apply_block(&block, forward_link, &rejected)?;
                }
                Ok(PeerReply::Ack)
            }

            PeerMessage::PropagateForwardLink { link } => {
                if let Err(err) = self.skipchains.lock().append_forward_link(link) {
                    debug!(node = %self.identity, %err, "propagated link rejected");
                }
                Ok(PeerReply::Ack)
            }

            PeerMessage::NotifyRejected { chain, rejected } => {
                if let Some(state) = self.chain_state(&chain) {
                    state.with(|inner| inner.pending.remove_digests(&rejected));
                    for digest in &rejected {
                        state.notify_waiters(digest, false);
                    }
                }
                Ok(PeerReply::Ack)
            }

            PeerMessage::CosiAnnounce {
                round,
                chain,
                payload,
                subtree,
            } => {
                let (message, accepted) = match &payload {
                    CosiPayload::Block(block) => {
                        let previous = block.back_links.first().copied().unwrap_or_default();
                        let message = BlockLinkDigest::compute(&previous, &block.id());
                        (message, self.verify_proposed_block(from, block))
                    }
                    CosiPayload::Link { from: src, to } => {
                        let message = BlockLinkDigest::compute(src, to);
                        (message, self.verify_link_payload(src, to))
                    }
                };
                // never sign a digest that differs from what the payload
                // implies
                let accepted = accepted && round == message;
                let own = self.cosi.commit(round, message, accepted);
                let commits =
                    relay_announce(&*self.transport, round, chain, &payload, &subtree, own).await;
                Ok(PeerReply::CosiCommits(commits))
            }

            PeerMessage::CosiChallenge { round, subtree } => {
                let own = self.cosi.respond(&round);
                let shares = relay_challenge(&*self.transport, round, &subtree, own).await;
                Ok(PeerReply::CosiShares(shares))
            }

            PeerMessage::ViewChangeRequest {
                chain,
                view,
                signature,
                initiator,
            } => {
                let vote = self.vote_on_view_change(&chain, view, &initiator, &signature);
                Ok(PeerReply::ViewChangeVote(vote))
            }

            PeerMessage::NewView { chain, view, votes } => {
                self.apply_new_view(&chain, view, &votes)?;
                Ok(PeerReply::Ack)
            }
        }
    }

    /// A follower's check of a candidate block before committing to it.
    /// Announces arrive either from the leader or relayed by a
    /// sub-leader, so the sender is only required to be a roster member;
    /// the proposal itself must carry the roster this node accepts, which
    /// pins the leader slot.
    fn verify_proposed_block(&self, from: &ServerIdentity, block: &SkipBlock) -> bool {
        let Some(state) = self.chain_state(&block.genesis) else {
            return false;
        };
        let working = state.working_roster();
        if working.index_of(&from.public).is_none() {
            debug!(node = %self.identity, "refusing proposal from outside the roster");
            return false;
        }
        if block.roster != working {
            debug!(node = %self.identity, "refusing proposal with unexpected roster");
            return false;
        }
        self.verify_block_payload(block)
    }

    /// A link round endorses `(from, to)` only if both blocks are sealed
    /// locally and the link points forward.
    fn verify_link_payload(&self, from: &SkipBlockId, to: &SkipBlockId) -> bool {
        let store = self.skipchains.lock();
        match (store.get_block(from), store.get_block(to)) {
            (Some(source), Some(target)) => target.index > source.index,
            _ => false,
        }
    }

    fn vote_on_view_change(
        &self,
        chain: &SkipBlockId,
        view: u64,
        initiator: &shared_types::PublicKeyBytes,
        signature: &shared_types::SignatureBytes,
    ) -> Option<ol_network::ViewChangeVote> {
        let state = self.chain_state(chain)?;
        let digest = view_change_digest(chain, view);
        if verify_bytes(initiator, &digest, signature).is_err() {
            return None;
        }
        let (current_view, in_roster) = state.with(|inner| {
            (
                inner.view,
                inner.config.roster.index_of(initiator).is_some(),
            )
        });
        if !in_roster || view != current_view + 1 || !state.monitor.nearly_expired() {
            return None;
        }
        debug!(node = %self.identity, chain = %chain.short(), view, "voting for view change");
        Some(sign_vote(&self.keypair, chain, view))
    }

    /// Accept a quorum-certified view change: rotate the working roster
    /// and, if this node got promoted, start producing.
    pub(crate) fn apply_new_view(
        &self,
        chain: &SkipBlockId,
        view: u64,
        votes: &[ol_network::ViewChangeVote],
    ) -> Result<()> {
        let state = self.chain_state(chain).ok_or(ServiceError::UnknownSkipchain)?;
        let roster = state.with(|inner| inner.config.roster.clone());
        verify_new_view(chain, view, votes, &roster)?;

        let accepted = state.with(|inner| {
            if view != inner.view + 1 {
                return false;
            }
            inner.view = view;
            true
        });
        if !accepted {
            return Ok(());
        }
        state.monitor.reset();

        let leader = state.current_leader();
        info!(
            node = %self.identity,
            chain = %chain.short(),
            view,
            leader = %leader.as_ref().map(|l| l.address.clone()).unwrap_or_default(),
            "view change accepted"
        );
        if leader.is_some_and(|leader| leader.public == self.identity.public) {
            self.spawn_producer(*chain);
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkHandler for Service {
    async fn handle(
        &self,
        from: &ServerIdentity,
        message: PeerMessage,
    ) -> std::result::Result<PeerReply, NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }
        self.handle_peer(from, message)
            .await
            .map_err(|err| NetworkError::HandlerFailed(err.to_string()))
    }
}

/// Storage bucket of a chain's collection.
pub(crate) fn chain_bucket(chain: &SkipBlockId) -> Vec<u8> {
    let mut bucket = b"st:".to_vec();
    bucket.extend_from_slice(chain.as_bytes());
    bucket
}

/// Decode the chain config instance governed by the genesis darc.
pub(crate) fn read_config(
    collection: &Collection,
    genesis_darc: &DarcId,
) -> Result<ChainConfig> {
    let key = InstanceId::new(*genesis_darc, config_sub_id()).to_key();
    let (value, _, _) = collection.get_values(&key)?;
    Ok(ChainConfig::decode(&value)?)
}

/// Base ids of darcs created by a change set, for the darc index.
fn collect_new_darcs(changes: &[StateChange]) -> Vec<DarcId> {
    changes
        .iter()
        .filter(|change| {
            change.action == StateAction::Create && change.contract_id == CONTRACT_DARC
        })
        .map(|change| change.instance_id.darc_id)
        .collect()
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
