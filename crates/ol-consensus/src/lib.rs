//! # Consensus
//!
//! Two protocols over the peer transport:
//!
//! - **Collective signing**: the leader drives a two-round protocol
//!   (announce/commit, then challenge/response) over a shallow tree of the
//!   roster. Every node runs the caller's deterministic verification before
//!   committing; refusals are tolerated up to the BFT bound, and a failed
//!   sub-leader demotes into a leaf for one retry.
//! - **View change**: followers watch a heartbeat deadline and, on leader
//!   silence, collect a quorum of signed votes to rotate the roster head.

pub mod cosi;
pub mod errors;
pub mod view_change;

pub use cosi::{run_collective_signing, relay_announce, relay_challenge, CosiNode};
pub use errors::ConsensusError;
pub use view_change::{
    collect_view_change_votes, quorum, sign_vote, verify_new_view, view_change_digest,
    HeartbeatMonitor,
};
