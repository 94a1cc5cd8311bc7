//! # OmniLedger Service
//!
//! The node-facing facade over all subsystems: it accepts client RPCs,
//! keeps the per-chain state (collection, tip, pending pool, inclusion
//! waiters), answers peer messages, runs the leader's block production
//! loop and the followers' view-change watchdog.
//!
//! Lock order, outermost first: per-chain `apply_lock` → skipchain store
//! → chain registry → per-chain state. No await point is reached while
//! any of these is held.

pub mod errors;
pub mod genesis;
pub mod messages;
pub mod producer;
pub mod proof;
pub mod service;
pub mod state;

pub use errors::{Result, ServiceError};
pub use genesis::{default_genesis_message, genesis_message, DEFAULT_BLOCK_INTERVAL};
pub use messages::{
    genesis_state_changes, validate_genesis_darc, AddTxRequest, AddTxResponse, BlockData,
    CreateGenesisBlockRequest, CreateGenesisBlockResponse, DataBody, DataHeader, GenesisData,
    GetProofRequest, GetProofResponse, CURRENT_VERSION,
};
pub use proof::Proof;
pub use service::Service;
pub use state::{ChainState, PendingPool, ProducerPhase};
