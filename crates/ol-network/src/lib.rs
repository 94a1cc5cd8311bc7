//! # Peer Messaging
//!
//! The seam between the ledger services and the wire. Services talk to
//! peers through the `Transport` port and receive through the
//! `NetworkHandler` port; the actual wire transport is an external
//! collaborator. The in-memory adapter routes between services of one
//! process and simulates dead peers, which is all the protocol tests
//! need.

pub mod errors;
pub mod memory;
pub mod messages;
pub mod transport;

pub use errors::NetworkError;
pub use memory::{InMemoryNetwork, NodeTransport};
pub use messages::{
    CosiCommit, CosiPayload, CosiShare, PeerMessage, PeerReply, ViewChangeVote,
};
pub use transport::{NetworkHandler, Transport};
