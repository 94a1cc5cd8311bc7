//! # Contracts and Transaction Execution
//!
//! Client transactions are ordered lists of signed instructions. Each
//! instruction names an instance, is authorized against the instance's
//! darc, and is executed by the contract registered for the instance's
//! contract id. Contracts are deterministic functions from a read-only
//! state view and an instruction to a list of state changes; the executor
//! applies whole transactions atomically over a snapshot, rolling back on
//! any failure and containing contract panics.

pub mod contracts;
pub mod domain;
pub mod errors;

pub use contracts::{darc_contract, update_config_contract};
pub use domain::config::ChainConfig;
pub use domain::executor::{ExecutionResult, TransactionExecutor};
pub use domain::registry::{ContractFn, ContractRegistry, CONTRACT_CONFIG, CONTRACT_DARC};
pub use domain::transaction::{
    darc_from_view, Argument, ClientTransaction, Coin, Instruction, InstructionBody, Invoke, Spawn,
};
pub use errors::ExecutionError;
