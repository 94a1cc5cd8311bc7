//! # Block Production and Leader Watchdog
//!
//! The leader runs one producer loop per chain: every block interval it
//! polls the roster for pending transactions, executes the merged batch,
//! proposes the resulting block, commits it through collective signing,
//! applies it, and propagates. Followers run a watchdog instead,
//! initiating a view change when the leader goes silent.

use crate::errors::{Result, ServiceError};
use crate::messages::{BlockData, DataBody, DataHeader};
use crate::service::{unix_millis, Service};
use crate::state::{ChainState, ProducerPhase};
use ol_consensus::{collect_view_change_votes, run_collective_signing};
use ol_network::{CosiPayload, PeerMessage, PeerReply};
use ol_skipchain::{BlockLinkDigest, ForwardLink};
use shared_types::{Hash, Roster, ServerIdentity, SkipBlockId};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl Service {
    /// Start the producer loop for `chain` if it is not already running.
    pub(crate) fn spawn_producer(&self, chain: SkipBlockId) {
        let Some(state) = self.chain_state(&chain) else {
            return;
        };
        if state.producer_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(service) = self.weak.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            service.producer_loop(chain).await;
            if let Some(state) = service.chain_state(&chain) {
                state.producer_running.store(false, Ordering::SeqCst);
            }
        });
        self.tasks.lock().push(handle);
    }

    async fn producer_loop(&self, chain: SkipBlockId) {
        info!(node = %self.identity, chain = %chain.short(), "block producer started");
        loop {
            let Some(state) = self.chain_state(&chain) else {
                break;
            };
            tokio::time::sleep(state.block_interval()).await;
            if self.is_closed() {
                break;
            }
            if !state
                .current_leader()
                .is_some_and(|leader| leader.public == self.identity.public)
            {
                info!(node = %self.identity, chain = %chain.short(), "demoted, producer stops");
                break;
            }
            if let Err(err) = self.produce_block(&chain).await {
                if matches!(err, ServiceError::Fatal(_)) {
                    error!(node = %self.identity, chain = %chain.short(), %err, "chain halted");
                    break;
                }
                warn!(node = %self.identity, chain = %chain.short(), %err, "block production failed");
            }
        }
    }

    /// One production round: poll, execute, propose, commit, apply,
    /// propagate. A round without transactions stays idle after the poll
    /// (the poll doubles as the leader heartbeat).
    async fn produce_block(&self, chain: &SkipBlockId) -> Result<()> {
        let state = self.chain_state(chain).ok_or(ServiceError::UnknownSkipchain)?;
        let roster = state.working_roster();
        let phase_guard = PhaseGuard(&state);

        // Polling
        state.set_phase(ProducerPhase::Polling);
        let mut candidates = state.with(|inner| inner.pending.all());
        for member in self.other_members(&roster) {
            let poll = PeerMessage::PollTransactions { chain: *chain };
            match self.transport.send(&member, poll).await {
                Ok(PeerReply::Transactions(transactions)) => candidates.extend(transactions),
                Ok(_) => {}
                Err(err) => {
                    debug!(member = %member, %err, "follower poll failed");
                }
            }
        }

        // Merge: dedup by nonce, deterministic inclusion order, bounded
        // batch size.
        let mut seen = HashSet::new();
        candidates.retain(|tx| tx.nonce().map(|nonce| seen.insert(nonce)).unwrap_or(false));
        candidates.sort_by_key(|tx| (tx.nonce().unwrap_or_default(), tx.digest()));
        let max_tx = state.with(|inner| inner.config.max_tx_per_block);
        candidates.truncate(max_tx);
        if candidates.is_empty() {
            return Ok(());
        }

        // Proposing
        state.set_phase(ProducerPhase::Proposing);
        let (snapshot, latest) =
            state.with(|inner| (inner.collection.collection().snapshot(), inner.latest));
        let result = self
            .executor
            .create_state_changes(&snapshot, chain, &candidates);
        let rejected_digests: Vec<Hash> =
            result.rejected.iter().map(|tx| tx.digest()).collect();

        if result.accepted.is_empty() {
            self.drop_rejected(&state, &roster, chain, &rejected_digests)
                .await;
            return Ok(());
        }

        let payload = BlockData {
            header: DataHeader {
                collection_root: result.root,
                roster_hash: roster.hash(),
                timestamp_ms: unix_millis(),
            },
            body: DataBody {
                transactions: result.accepted.clone(),
            },
            genesis: None,
        }
        .encode()?;
        let block = self
            .skipchains
            .lock()
            .propose_next(&latest, roster.clone(), payload)?;
        let block_id = block.id();
        debug!(
            node = %self.identity,
            chain = %chain.short(),
            index = block.index,
            txs = result.accepted.len(),
            "proposing block"
        );

        // Committing
        state.set_phase(ProducerPhase::Committing);
        let message = BlockLinkDigest::compute(&latest, &block_id);
        let signature = match run_collective_signing(
            &*self.transport,
            &self.cosi,
            &roster,
            *chain,
            CosiPayload::Block(block.clone()),
            message,
        )
        .await
        {
            Ok(signature) => signature,
            Err(err) => {
                // The roster refused the whole candidate batch: reject it
                // and let the next interval work on fresh transactions.
                warn!(chain = %chain.short(), %err, "commit refused, dropping batch");
                let digests: Vec<Hash> = candidates.iter().map(|tx| tx.digest()).collect();
                self.drop_rejected(&state, &roster, chain, &digests).await;
                return Ok(());
            }
        };
        let link = ForwardLink::new(latest, block_id, signature);

        // Applying
        state.set_phase(ProducerPhase::Applying);
        self.apply_block(&block, Some(link.clone()), &rejected_digests)?;
        for member in self.other_members(&roster) {
            let message = PeerMessage::PropagateBlock {
                block: block.clone(),
                forward_link: Some(link.clone()),
                rejected: rejected_digests.clone(),
            };
            if let Err(err) = self.transport.send(&member, message).await {
                warn!(member = %member, %err, "block propagation failed");
            }
        }

        // Seal the higher-level forward links the new block earned. The
        // source list is taken before the rounds so the store lock is not
        // held across them.
        let link_sources = self.skipchains.lock().pending_link_sources(&block);
        for (source, level) in link_sources {
            if let Err(err) = self.seal_link(chain, source, block_id).await {
                warn!(chain = %chain.short(), level, %err, "forward link round failed");
            }
        }
        drop(phase_guard);
        Ok(())
    }

    /// Run a link round signed by the source block's roster and propagate
    /// the sealed link.
    async fn seal_link(
        &self,
        chain: &SkipBlockId,
        source: SkipBlockId,
        target: SkipBlockId,
    ) -> Result<()> {
        let from_block = self
            .skipchains
            .lock()
            .get_block(&source)
            .ok_or_else(|| ServiceError::NotFound(source.short()))?;

        let digest = BlockLinkDigest::compute(&source, &target);
        let signature = run_collective_signing(
            &*self.transport,
            &self.cosi,
            &from_block.roster,
            *chain,
            CosiPayload::Link {
                from: source,
                to: target,
            },
            digest,
        )
        .await?;

        let link = ForwardLink::new(source, target, signature);
        self.skipchains.lock().append_forward_link(link.clone())?;
        for member in self.other_members(&from_block.roster) {
            let message = PeerMessage::PropagateForwardLink { link: link.clone() };
            if let Err(err) = self.transport.send(&member, message).await {
                debug!(member = %member, %err, "link propagation failed");
            }
        }
        Ok(())
    }

    /// Settle dropped transactions everywhere: locally and on every
    /// follower holding them in its pool.
    async fn drop_rejected(
        &self,
        state: &Arc<ChainState>,
        roster: &Roster,
        chain: &SkipBlockId,
        digests: &[Hash],
    ) {
        if digests.is_empty() {
            return;
        }
        state.with(|inner| inner.pending.remove_digests(digests));
        for digest in digests {
            state.notify_waiters(digest, false);
        }
        for member in self.other_members(roster) {
            let message = PeerMessage::NotifyRejected {
                chain: *chain,
                rejected: digests.to_vec(),
            };
            if let Err(err) = self.transport.send(&member, message).await {
                debug!(member = %member, %err, "reject notification failed");
            }
        }
    }

    fn other_members(&self, roster: &Roster) -> Vec<ServerIdentity> {
        roster
            .list
            .iter()
            .filter(|member| member.public != self.identity.public)
            .cloned()
            .collect()
    }
}

/// Resets the visible phase to `Idle` however the round ends.
struct PhaseGuard<'a>(&'a Arc<ChainState>);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.set_phase(ProducerPhase::Idle);
    }
}

impl Service {
    /// Start the leader watchdog for `chain` if it is not already
    /// running.
    pub(crate) fn spawn_watchdog(&self, chain: SkipBlockId) {
        let Some(state) = self.chain_state(&chain) else {
            return;
        };
        if state.watchdog_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(service) = self.weak.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            service.watchdog_loop(chain).await;
            if let Some(state) = service.chain_state(&chain) {
                state.watchdog_running.store(false, Ordering::SeqCst);
            }
        });
        self.tasks.lock().push(handle);
    }

    async fn watchdog_loop(&self, chain: SkipBlockId) {
        debug!(node = %self.identity, chain = %chain.short(), "view-change watchdog armed");
        loop {
            let Some(state) = self.chain_state(&chain) else {
                break;
            };
            tokio::time::sleep(state.block_interval()).await;
            if self.is_closed() {
                break;
            }
            if state
                .current_leader()
                .is_some_and(|leader| leader.public == self.identity.public)
            {
                continue;
            }
            if !state.monitor.expired() {
                continue;
            }

            let (view, roster) =
                state.with(|inner| (inner.view + 1, inner.config.roster.clone()));
            info!(
                node = %self.identity,
                chain = %chain.short(),
                view,
                "leader silent, initiating view change"
            );
            match collect_view_change_votes(
                &*self.transport,
                &self.keypair,
                &roster,
                &chain,
                view,
            )
            .await
            {
                Ok(votes) => {
                    if let Err(err) = self.apply_new_view(&chain, view, &votes) {
                        warn!(chain = %chain.short(), %err, "own view change not applied");
                    }
                    for member in self.other_members(&roster) {
                        let message = PeerMessage::NewView {
                            chain,
                            view,
                            votes: votes.clone(),
                        };
                        if let Err(err) = self.transport.send(&member, message).await {
                            debug!(member = %member, %err, "new-view broadcast failed");
                        }
                    }
                }
                Err(err) => {
                    debug!(node = %self.identity, chain = %chain.short(), %err, "view change attempt failed");
                }
            }
            // pace the next attempt by a full deadline
            state.monitor.reset();
        }
    }
}
