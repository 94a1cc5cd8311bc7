//! Per-chain runtime state.

use crate::errors::{Result, ServiceError};
use ol_collection::CollectionStore;
use ol_consensus::HeartbeatMonitor;
use ol_contracts::{ChainConfig, ClientTransaction};
use parking_lot::Mutex;
use shared_types::{DarcId, Hash, Nonce, Roster, ServerIdentity, SkipBlockId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::sync::oneshot;

/// How many block intervals of leader silence trigger a view change.
const HEARTBEAT_INTERVALS: u32 = 4;

/// Where the leader's production loop currently is. Followers stay
/// `Idle`; the leader walks the cycle once per interval with pending
/// work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerPhase {
    #[default]
    Idle,
    Polling,
    Proposing,
    Committing,
    Applying,
}

/// Bounded FIFO of transactions waiting for a block, deduplicated by the
/// first instruction's nonce.
pub struct PendingPool {
    entries: Vec<(Hash, ClientTransaction)>,
    nonces: HashSet<Nonce>,
    capacity: usize,
}

impl PendingPool {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            nonces: HashSet::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue a transaction. A duplicate nonce is a silent no-op; a full
    /// pool pushes back on the client.
    pub fn add(&mut self, transaction: ClientTransaction) -> Result<()> {
        let Some(nonce) = transaction.nonce() else {
            return Err(ServiceError::InvalidTransaction("empty transaction".into()));
        };
        if self.nonces.contains(&nonce) {
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(ServiceError::PendingFull);
        }
        self.nonces.insert(nonce);
        self.entries.push((transaction.digest(), transaction));
        Ok(())
    }

    /// Everything currently pending, in arrival order.
    pub fn all(&self) -> Vec<ClientTransaction> {
        self.entries.iter().map(|(_, tx)| tx.clone()).collect()
    }

    /// Drop transactions by digest (included or rejected ones).
    pub fn remove_digests(&mut self, digests: &[Hash]) {
        let drop: HashSet<&Hash> = digests.iter().collect();
        let nonces = &mut self.nonces;
        self.entries.retain(|(digest, tx)| {
            if drop.contains(digest) {
                if let Some(nonce) = tx.nonce() {
                    nonces.remove(&nonce);
                }
                false
            } else {
                true
            }
        });
    }
}

/// Mutable state of one chain on one node, behind the chain mutex.
pub struct ChainInner {
    pub collection: CollectionStore,
    pub latest: SkipBlockId,
    /// Accepted view-change rotations since the last config update.
    pub view: u64,
    pub config: ChainConfig,
    pub genesis_darc: DarcId,
    pub pending: PendingPool,
    /// One-shot inclusion waiters keyed by transaction digest; fired with
    /// `true` on inclusion, `false` on rejection, dropped on shutdown.
    pub waiters: HashMap<Hash, Vec<oneshot::Sender<bool>>>,
}

/// One chain on one node.
pub struct ChainState {
    pub chain: SkipBlockId,
    inner: Mutex<ChainInner>,
    pub monitor: HeartbeatMonitor,
    /// Serializes block application; block `n + 1` never applies before
    /// block `n` is done.
    pub apply_lock: Mutex<()>,
    /// Single-instance guards for the per-chain background loops.
    pub producer_running: AtomicBool,
    pub watchdog_running: AtomicBool,
    phase: Mutex<ProducerPhase>,
}

impl ChainState {
    pub fn new(
        chain: SkipBlockId,
        collection: CollectionStore,
        latest: SkipBlockId,
        config: ChainConfig,
        genesis_darc: DarcId,
    ) -> Self {
        let heartbeat = config.block_interval * HEARTBEAT_INTERVALS;
        Self {
            chain,
            inner: Mutex::new(ChainInner {
                collection,
                latest,
                view: 0,
                config,
                genesis_darc,
                pending: PendingPool::new(PendingPool::DEFAULT_CAPACITY),
                waiters: HashMap::new(),
            }),
            monitor: HeartbeatMonitor::new(heartbeat),
            apply_lock: Mutex::new(()),
            producer_running: AtomicBool::new(false),
            watchdog_running: AtomicBool::new(false),
            phase: Mutex::new(ProducerPhase::Idle),
        }
    }

    pub fn phase(&self) -> ProducerPhase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: ProducerPhase) {
        *self.phase.lock() = phase;
    }

    /// Run `f` under the chain mutex.
    pub fn with<R>(&self, f: impl FnOnce(&mut ChainInner) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// The roster currently in force: the configured roster rotated by
    /// the accepted view changes.
    pub fn working_roster(&self) -> Roster {
        self.with(|inner| inner.config.roster.rotated_by(inner.view as usize))
    }

    pub fn current_leader(&self) -> Option<ServerIdentity> {
        self.working_roster().leader().cloned()
    }

    pub fn block_interval(&self) -> Duration {
        self.with(|inner| inner.config.block_interval)
    }

    /// Register an inclusion waiter for `digest`.
    pub fn register_waiter(&self, digest: Hash) -> oneshot::Receiver<bool> {
        let (sender, receiver) = oneshot::channel();
        self.with(|inner| inner.waiters.entry(digest).or_default().push(sender));
        receiver
    }

    /// Fire and drop the waiters of `digest`.
    pub fn notify_waiters(&self, digest: &Hash, included: bool) {
        let senders = self.with(|inner| inner.waiters.remove(digest));
        if let Some(senders) = senders {
            for sender in senders {
                let _ = sender.send(included);
            }
        }
    }

    /// Drop every waiter (shutdown); receivers observe a closed channel.
    pub fn drop_all_waiters(&self) {
        self.with(|inner| inner.waiters.clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ol_contracts::Instruction;
    use shared_types::InstanceId;

    fn transaction(nonce: u8) -> ClientTransaction {
        ClientTransaction::single(Instruction::delete(
            InstanceId::default(),
            Nonce([nonce; 32]),
        ))
    }

    #[test]
    fn pool_deduplicates_by_nonce() {
        let mut pool = PendingPool::new(8);
        pool.add(transaction(1)).unwrap();
        pool.add(transaction(1)).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pool_pushes_back_when_full() {
        let mut pool = PendingPool::new(2);
        pool.add(transaction(1)).unwrap();
        pool.add(transaction(2)).unwrap();
        assert_eq!(pool.add(transaction(3)), Err(ServiceError::PendingFull));
    }

    #[test]
    fn pool_removal_frees_nonce() {
        let mut pool = PendingPool::new(2);
        let tx = transaction(1);
        let digest = tx.digest();
        pool.add(tx.clone()).unwrap();
        pool.remove_digests(&[digest]);
        assert!(pool.is_empty());
        pool.add(tx).unwrap();
        assert_eq!(pool.len(), 1);
    }
}
