//! # View Change
//!
//! Followers track a heartbeat deadline that is rearmed by every poll or
//! block proposal from the leader. When it expires, a follower proposes
//! rotating the roster head; the rotation takes effect once a quorum of
//! members signs the proposal digest. Membership never changes, only the
//! order.

use crate::errors::ConsensusError;
use ol_network::{PeerMessage, PeerReply, Transport, ViewChangeVote};
use parking_lot::Mutex;
use shared_crypto::{verify_bytes, CanonicalHasher, Ed25519KeyPair};
use shared_types::{Hash, Roster, ServerIdentity, SkipBlockId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Votes required to accept a view change in a roster of `n`.
pub fn quorum(n: usize) -> usize {
    2 * n / 3 + 1
}

/// Digest every vote signs: chain id and the proposed view number.
pub fn view_change_digest(chain: &SkipBlockId, view: u64) -> Hash {
    let mut hasher = CanonicalHasher::new();
    hasher.fixed(chain.as_bytes());
    hasher.u64(view);
    hasher.field(b"view-change");
    hasher.finish()
}

/// Leader-liveness deadline, shared between the request handler (which
/// rearms it) and the watchdog task (which checks it).
pub struct HeartbeatMonitor {
    deadline: Duration,
    last: Mutex<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            last: Mutex::new(Instant::now()),
        }
    }

    /// Rearm on any sign of leader life.
    pub fn reset(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn expired(&self) -> bool {
        self.last.lock().elapsed() > self.deadline
    }

    /// Half-deadline check: voters endorse a rotation they have not yet
    /// initiated themselves once the leader has been silent this long.
    pub fn nearly_expired(&self) -> bool {
        self.last.lock().elapsed() * 2 > self.deadline
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Sign our own vote for `(chain, view)`.
pub fn sign_vote(keypair: &Ed25519KeyPair, chain: &SkipBlockId, view: u64) -> ViewChangeVote {
    let digest = view_change_digest(chain, view);
    ViewChangeVote {
        voter: keypair.public_bytes(),
        signature: keypair.sign(&digest).to_bytes(),
    }
}

/// Check a quorum certificate: distinct roster members, valid signatures
/// over the view digest, at least `quorum(n)` of them.
pub fn verify_new_view(
    chain: &SkipBlockId,
    view: u64,
    votes: &[ViewChangeVote],
    roster: &Roster,
) -> Result<(), ConsensusError> {
    let digest = view_change_digest(chain, view);
    let mut seen: HashSet<_> = HashSet::new();

    for vote in votes {
        if roster.index_of(&vote.voter).is_none() {
            return Err(ConsensusError::InvalidSignature);
        }
        if !seen.insert(vote.voter) {
            continue;
        }
        verify_bytes(&vote.voter, &digest, &vote.signature)
            .map_err(|_| ConsensusError::InvalidSignature)?;
    }

    let required = quorum(roster.len());
    if seen.len() < required {
        return Err(ConsensusError::QuorumNotReached {
            votes: seen.len(),
            required,
        });
    }
    Ok(())
}

/// Initiator side: ask every other member to endorse rotating to `view`.
/// Returns the quorum certificate (own vote included) or fails.
pub async fn collect_view_change_votes(
    transport: &dyn Transport,
    keypair: &Arc<Ed25519KeyPair>,
    roster: &Roster,
    chain: &SkipBlockId,
    view: u64,
) -> Result<Vec<ViewChangeVote>, ConsensusError> {
    let own = sign_vote(keypair, chain, view);
    let request = PeerMessage::ViewChangeRequest {
        chain: *chain,
        view,
        signature: own.signature,
        initiator: own.voter,
    };

    let mut votes = vec![own];
    let mut seen: HashSet<_> = votes.iter().map(|vote| vote.voter).collect();
    let digest = view_change_digest(chain, view);

    for member in &roster.list {
        if member.public == keypair.public_bytes() {
            continue;
        }
        match transport.send(member, request.clone()).await {
            Ok(PeerReply::ViewChangeVote(Some(vote))) => {
                if verify_bytes(&vote.voter, &digest, &vote.signature).is_ok()
                    && seen.insert(vote.voter)
                {
                    votes.push(vote);
                }
            }
            Ok(_) => {
                debug!(member = %member, "member declined view change");
            }
            Err(err) => {
                debug!(member = %member, %err, "member unreachable during view change");
            }
        }
    }

    let required = quorum(roster.len());
    if votes.len() < required {
        return Err(ConsensusError::QuorumNotReached {
            votes: votes.len(),
            required,
        });
    }
    info!(chain = %chain.short(), view, votes = votes.len(), "view-change quorum reached");
    Ok(votes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ol_network::{InMemoryNetwork, NetworkError, NetworkHandler};

    struct Voter {
        keypair: Arc<Ed25519KeyPair>,
        willing: bool,
    }

    #[async_trait]
    impl NetworkHandler for Voter {
        async fn handle(
            &self,
            _from: &ServerIdentity,
            message: PeerMessage,
        ) -> Result<PeerReply, NetworkError> {
            match message {
                PeerMessage::ViewChangeRequest { chain, view, .. } if self.willing => Ok(
                    PeerReply::ViewChangeVote(Some(sign_vote(&self.keypair, &chain, view))),
                ),
                PeerMessage::ViewChangeRequest { .. } => Ok(PeerReply::ViewChangeVote(None)),
                _ => Ok(PeerReply::Ack),
            }
        }
    }

    fn keys(n: u8) -> Vec<Arc<Ed25519KeyPair>> {
        (0..n)
            .map(|i| Arc::new(Ed25519KeyPair::from_seed([i + 1; 32])))
            .collect()
    }

    fn roster_of(keys: &[Arc<Ed25519KeyPair>]) -> Roster {
        Roster::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| ServerIdentity::new(k.public_bytes(), format!("node-{i}")))
                .collect(),
        )
    }

    fn wire(
        network: &Arc<InMemoryNetwork>,
        roster: &Roster,
        keys: &[Arc<Ed25519KeyPair>],
        willing: &[bool],
    ) {
        for (i, identity) in roster.list.iter().enumerate().skip(1) {
            network.register(
                identity,
                Arc::new(Voter {
                    keypair: keys[i].clone(),
                    willing: willing[i],
                }),
            );
        }
    }

    #[tokio::test]
    async fn quorum_sizes() {
        assert_eq!(quorum(3), 3);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(7), 5);
    }

    #[tokio::test]
    async fn collects_quorum() {
        let keys = keys(4);
        let roster = roster_of(&keys);
        let network = InMemoryNetwork::new();
        wire(&network, &roster, &keys, &[true; 4]);

        let transport = network.connect(roster.list[1].clone());
        let chain = SkipBlockId([5; 32]);
        let votes = collect_view_change_votes(&transport, &keys[1], &roster, &chain, 1)
            .await
            .unwrap();

        assert!(votes.len() >= quorum(4));
        assert!(verify_new_view(&chain, 1, &votes, &roster).is_ok());
    }

    #[tokio::test]
    async fn no_quorum_without_willing_members() {
        let keys = keys(4);
        let roster = roster_of(&keys);
        let network = InMemoryNetwork::new();
        wire(&network, &roster, &keys, &[false, true, false, false]);

        let transport = network.connect(roster.list[1].clone());
        let chain = SkipBlockId([5; 32]);
        let err = collect_view_change_votes(&transport, &keys[1], &roster, &chain, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::QuorumNotReached { .. }));
    }

    #[tokio::test]
    async fn verify_rejects_forgeries() {
        let keys = keys(4);
        let roster = roster_of(&keys);
        let chain = SkipBlockId([5; 32]);

        let mut votes: Vec<ViewChangeVote> = keys
            .iter()
            .map(|k| sign_vote(k, &chain, 2))
            .collect();

        assert!(verify_new_view(&chain, 2, &votes, &roster).is_ok());
        // wrong view
        assert!(verify_new_view(&chain, 3, &votes, &roster).is_err());

        // tampered signature
        votes[0].signature[0] ^= 1;
        assert!(verify_new_view(&chain, 2, &votes, &roster).is_err());

        // duplicate voters do not fake a quorum
        let duplicated = vec![votes[1].clone(); 4];
        assert!(matches!(
            verify_new_view(&chain, 2, &duplicated, &roster),
            Err(ConsensusError::QuorumNotReached { .. })
        ));
    }

    #[test]
    fn heartbeat_expiry() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(monitor.expired());

        let monitor = HeartbeatMonitor::new(Duration::from_secs(60));
        assert!(!monitor.expired());
        monitor.reset();
        assert!(!monitor.expired());
    }
}
