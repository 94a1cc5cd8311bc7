//! Request and reply payloads exchanged between nodes.

use ol_contracts::ClientTransaction;
use ol_skipchain::{ForwardLink, SkipBlock};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_types::{Hash, PublicKeyBytes, ServerIdentity, SignatureBytes, SkipBlockId};

/// What a collective-signing round is asked to endorse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CosiPayload {
    /// A candidate block; verifiers re-execute its body.
    Block(SkipBlock),
    /// A higher-level forward link between two sealed blocks.
    Link { from: SkipBlockId, to: SkipBlockId },
}

/// A node's answer to the announce phase: accept or refuse, plus its
/// round commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosiCommit {
    pub node: PublicKeyBytes,
    pub accepted: bool,
    pub commitment: Hash,
}

/// A node's signature share from the challenge phase.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosiShare {
    pub node: PublicKeyBytes,
    #[serde_as(as = "Bytes")]
    pub signature: SignatureBytes,
}

/// A signed agreement to rotate the roster head.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChangeVote {
    pub voter: PublicKeyBytes,
    #[serde_as(as = "Bytes")]
    pub signature: SignatureBytes,
}

/// Requests one node sends another.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Leader asks a follower for its pending transactions.
    PollTransactions { chain: SkipBlockId },

    /// A sealed block, its level-0 forward link and the digests of the
    /// transactions the leader rejected with it.
    PropagateBlock {
        block: SkipBlock,
        forward_link: Option<ForwardLink>,
        rejected: Vec<Hash>,
    },

    /// A higher-level forward link sealed after the block itself.
    PropagateForwardLink { link: ForwardLink },

    /// Transactions the leader dropped without producing a block (the
    /// whole candidate batch failed commit, or execution rejected them
    /// all). Followers drop them from their pools and fail their
    /// inclusion waiters.
    NotifyRejected {
        chain: SkipBlockId,
        rejected: Vec<Hash>,
    },

    /// First collective-signing round: verify and commit. The receiver
    /// relays to `subtree` and aggregates.
    CosiAnnounce {
        round: Hash,
        chain: SkipBlockId,
        payload: CosiPayload,
        subtree: Vec<ServerIdentity>,
    },

    /// Second round: collect signature shares over the round's message.
    CosiChallenge {
        round: Hash,
        subtree: Vec<ServerIdentity>,
    },

    /// A follower proposes rotating to `view` after leader silence.
    ViewChangeRequest {
        chain: SkipBlockId,
        view: u64,
        #[serde_as(as = "Bytes")]
        signature: SignatureBytes,
        initiator: PublicKeyBytes,
    },

    /// Quorum reached: every node switches to `view`.
    NewView {
        chain: SkipBlockId,
        view: u64,
        votes: Vec<ViewChangeVote>,
    },
}

impl PeerMessage {
    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::PollTransactions { .. } => "poll",
            PeerMessage::PropagateBlock { .. } => "propagate-block",
            PeerMessage::PropagateForwardLink { .. } => "propagate-link",
            PeerMessage::NotifyRejected { .. } => "notify-rejected",
            PeerMessage::CosiAnnounce { .. } => "cosi-announce",
            PeerMessage::CosiChallenge { .. } => "cosi-challenge",
            PeerMessage::ViewChangeRequest { .. } => "view-change-request",
            PeerMessage::NewView { .. } => "new-view",
        }
    }
}

/// Replies, one variant per request kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerReply {
    Transactions(Vec<ClientTransaction>),
    CosiCommits(Vec<CosiCommit>),
    CosiShares(Vec<CosiShare>),
    ViewChangeVote(Option<ViewChangeVote>),
    Ack,
}
