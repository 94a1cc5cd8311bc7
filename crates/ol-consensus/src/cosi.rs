//! # Collective Signing
//!
//! The leader is the tree root; the remaining roster splits into groups
//! of roughly square-root size, each headed by a sub-leader relaying to
//! its leaves. Round one (announce) runs the verification function on
//! every node and gathers commitments; round two (challenge) gathers
//! signature shares from the nodes that accepted.
//!
//! A sub-leader that cannot be reached fails its whole group; the tree is
//! regenerated once with the faulty sub-leader demoted to a leaf.
//! Verification functions may therefore run more than once per node and
//! must be idempotent.

use crate::errors::ConsensusError;
use ol_network::{CosiCommit, CosiPayload, CosiShare, PeerMessage, PeerReply, Transport};
use parking_lot::Mutex;
use shared_crypto::{
    CanonicalHasher, CollectiveSignature, Ed25519KeyPair, ThresholdPolicy,
};
use shared_types::{Hash, PublicKeyBytes, Roster, ServerIdentity, SkipBlockId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-node protocol state: the rounds this node has committed to.
pub struct CosiNode {
    keypair: Arc<Ed25519KeyPair>,
    rounds: Mutex<HashMap<Hash, RoundState>>,
}

struct RoundState {
    accepted: bool,
    message: Hash,
}

impl CosiNode {
    pub fn new(keypair: Arc<Ed25519KeyPair>) -> Self {
        Self {
            keypair,
            rounds: Mutex::new(HashMap::new()),
        }
    }

    pub fn public(&self) -> PublicKeyBytes {
        self.keypair.public_bytes()
    }

    /// Record the verification outcome for a round and produce this
    /// node's commitment. Re-announcing a round overwrites the previous
    /// state (retries after tree regeneration).
    pub fn commit(&self, round: Hash, message: Hash, accepted: bool) -> CosiCommit {
        self.rounds
            .lock()
            .insert(round, RoundState { accepted, message });
        CosiCommit {
            node: self.public(),
            accepted,
            commitment: commitment_digest(&round, &self.public()),
        }
    }

    /// Answer the challenge phase: a signature share if this node
    /// accepted the round, nothing otherwise. The round state is
    /// consumed.
    pub fn respond(&self, round: &Hash) -> Option<CosiShare> {
        let state = self.rounds.lock().remove(round)?;
        state.accepted.then(|| CosiShare {
            node: self.public(),
            signature: self.keypair.sign(&state.message).to_bytes(),
        })
    }

    /// Drop all in-flight rounds (shutdown).
    pub fn abort_all(&self) {
        self.rounds.lock().clear();
    }
}

fn commitment_digest(round: &Hash, public: &PublicKeyBytes) -> Hash {
    let mut hasher = CanonicalHasher::new();
    hasher.fixed(round);
    hasher.fixed(public);
    hasher.field(b"commit");
    hasher.finish()
}

/// Sub-leader side of the announce phase: relay to the leaves and return
/// the group's commitments, own first. Unreachable leaves simply do not
/// appear and count against the threshold at the root.
pub async fn relay_announce(
    transport: &dyn Transport,
    round: Hash,
    chain: SkipBlockId,
    payload: &CosiPayload,
    leaves: &[ServerIdentity],
    own: CosiCommit,
) -> Vec<CosiCommit> {
    let mut commits = vec![own];
    for leaf in leaves {
        let message = PeerMessage::CosiAnnounce {
            round,
            chain,
            payload: payload.clone(),
            subtree: vec![],
        };
        match transport.send(leaf, message).await {
            Ok(PeerReply::CosiCommits(mut leaf_commits)) => commits.append(&mut leaf_commits),
            Ok(_) | Err(_) => {
                debug!(leaf = %leaf, "leaf missing from announce round");
            }
        }
    }
    commits
}

/// Sub-leader side of the challenge phase.
pub async fn relay_challenge(
    transport: &dyn Transport,
    round: Hash,
    leaves: &[ServerIdentity],
    own: Option<CosiShare>,
) -> Vec<CosiShare> {
    let mut shares: Vec<CosiShare> = own.into_iter().collect();
    for leaf in leaves {
        let message = PeerMessage::CosiChallenge {
            round,
            subtree: vec![],
        };
        match transport.send(leaf, message).await {
            Ok(PeerReply::CosiShares(mut leaf_shares)) => shares.append(&mut leaf_shares),
            Ok(_) | Err(_) => {
                debug!(leaf = %leaf, "leaf missing from challenge round");
            }
        }
    }
    shares
}

/// One group of the signing tree.
struct Group {
    sub_leader: ServerIdentity,
    leaves: Vec<ServerIdentity>,
}

fn build_groups(members: &[ServerIdentity]) -> Vec<Group> {
    if members.is_empty() {
        return Vec::new();
    }
    let group_size = (members.len() as f64).sqrt().ceil() as usize;
    members
        .chunks(group_size.max(1))
        .map(|chunk| Group {
            sub_leader: chunk[0].clone(),
            leaves: chunk[1..].to_vec(),
        })
        .collect()
}

/// Root side of the protocol. `message` is the digest the roster signs
/// (for block rounds, the level-0 forward-link digest); `payload` is what
/// the verifiers inspect. Returns a signature satisfying the BFT policy
/// for the roster size, or fails.
pub async fn run_collective_signing(
    transport: &dyn Transport,
    node: &CosiNode,
    roster: &Roster,
    chain: SkipBlockId,
    payload: CosiPayload,
    message: Hash,
) -> Result<CollectiveSignature, ConsensusError> {
    let round = message;
    let policy = ThresholdPolicy::bft(roster.len());
    let own_public = node.public();

    let mut others: Vec<ServerIdentity> = roster
        .list
        .iter()
        .filter(|member| member.public != own_public)
        .cloned()
        .collect();

    // Announce phase, with one tree regeneration on sub-leader failure.
    let mut commits: Vec<CosiCommit> = Vec::new();
    let mut groups = build_groups(&others);
    for attempt in 0..2 {
        commits.clear();
        commits.push(node.commit(round, message, true));

        let mut failed_sub_leaders: Vec<PublicKeyBytes> = Vec::new();
        for group in &groups {
            let announce = PeerMessage::CosiAnnounce {
                round,
                chain,
                payload: payload.clone(),
                subtree: group.leaves.clone(),
            };
            match transport.send(&group.sub_leader, announce).await {
                Ok(PeerReply::CosiCommits(mut group_commits)) => {
                    commits.append(&mut group_commits);
                }
                Ok(_) | Err(_) => {
                    warn!(sub_leader = %group.sub_leader, "sub-leader failed announce");
                    failed_sub_leaders.push(group.sub_leader.public);
                }
            }
        }

        if failed_sub_leaders.is_empty() || attempt == 1 {
            break;
        }
        // Demote the faulty sub-leaders to the back of the member list and
        // rebuild the tree once.
        debug!(
            failed = failed_sub_leaders.len(),
            "regenerating signing tree with demoted sub-leaders"
        );
        others.sort_by_key(|member| failed_sub_leaders.contains(&member.public));
        groups = build_groups(&others);
    }

    let accepted: Vec<PublicKeyBytes> = commits
        .iter()
        .filter(|commit| commit.accepted)
        .map(|commit| commit.node)
        .collect();
    check_threshold(accepted.len(), roster.len(), &policy)?;

    // Challenge phase over the final tree.
    let mut shares: Vec<CosiShare> = node.respond(&round).into_iter().collect();
    for group in &groups {
        let challenge = PeerMessage::CosiChallenge {
            round,
            subtree: group.leaves.clone(),
        };
        match transport.send(&group.sub_leader, challenge).await {
            Ok(PeerReply::CosiShares(mut group_shares)) => shares.append(&mut group_shares),
            Ok(_) | Err(_) => {
                warn!(sub_leader = %group.sub_leader, "sub-leader failed challenge");
            }
        }
    }

    // Assemble in roster order; nodes that accepted but dropped before
    // responding reduce participation.
    let by_node: HashMap<PublicKeyBytes, CosiShare> = shares
        .into_iter()
        .map(|share| (share.node, share))
        .collect();
    let mut participation = Vec::with_capacity(roster.len());
    let mut signatures = Vec::new();
    for public in roster.public_keys() {
        match by_node.get(&public) {
            Some(share) => {
                participation.push(true);
                signatures.push(share.signature);
            }
            None => participation.push(false),
        }
    }

    let signature = CollectiveSignature::new(participation, signatures);
    check_threshold(signature.participant_count(), roster.len(), &policy)?;
    signature.verify(&message, &roster.public_keys(), &policy)?;
    Ok(signature)
}

fn check_threshold(
    participants: usize,
    roster: usize,
    policy: &ThresholdPolicy,
) -> Result<(), ConsensusError> {
    let refused = roster - participants;
    if refused > policy.max_refusals {
        return Err(ConsensusError::TooManyRefusals {
            refused,
            roster,
            allowed: policy.max_refusals,
        });
    }
    Ok(())
}
