//! # Transaction Executor
//!
//! Deterministically applies a batch of client transactions over a
//! snapshot of the collection. Transactions are all-or-nothing: any
//! instruction failing authorization, lookup or execution rolls the
//! snapshot back to the start of that transaction and rejects it, leaving
//! the rest of the batch untouched. A panicking contract is downgraded to
//! a per-transaction rejection.

use crate::domain::registry::ContractRegistry;
use crate::domain::transaction::{darc_from_view, ClientTransaction, Coin};
use crate::contracts::darc::ViewResolver;
use crate::errors::ExecutionError;
use ol_collection::{Collection, StateChange};
use ol_darc::darc::evaluate_request;
use shared_types::{Hash, SkipBlockId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of executing one batch.
pub struct ExecutionResult {
    pub accepted: Vec<ClientTransaction>,
    pub rejected: Vec<ClientTransaction>,
    pub state_changes: Vec<StateChange>,
    /// Root of the snapshot after all accepted transactions.
    pub root: Hash,
}

/// Executes client transactions against collection snapshots.
pub struct TransactionExecutor {
    registry: Arc<ContractRegistry>,
}

impl TransactionExecutor {
    pub fn new(registry: Arc<ContractRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.registry
    }

    /// Run `transactions` in the given order over a copy of `snapshot`.
    /// The input collection is never touched; callers apply the returned
    /// state changes themselves once the batch is sealed.
    pub fn create_state_changes(
        &self,
        snapshot: &Collection,
        chain: &SkipBlockId,
        transactions: &[ClientTransaction],
    ) -> ExecutionResult {
        let mut working = snapshot.snapshot();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut state_changes = Vec::new();

        for transaction in transactions {
            match self.execute_transaction(&mut working, transaction) {
                Ok(changes) => {
                    accepted.push(transaction.clone());
                    state_changes.extend(changes);
                }
                Err(err) => {
                    debug!(
                        chain = %chain.short(),
                        %err,
                        "rejecting transaction"
                    );
                    rejected.push(transaction.clone());
                }
            }
        }

        ExecutionResult {
            accepted,
            rejected,
            state_changes,
            root: working.root_hash(),
        }
    }

    /// All-or-nothing execution of one transaction against `working`.
    fn execute_transaction(
        &self,
        working: &mut Collection,
        transaction: &ClientTransaction,
    ) -> Result<Vec<StateChange>, ExecutionError> {
        transaction.validate_shape()?;
        let checkpoint = working.snapshot();
        match self.execute_instructions(working, transaction) {
            Ok(changes) => Ok(changes),
            Err(err) => {
                *working = checkpoint;
                Err(err)
            }
        }
    }

    fn execute_instructions(
        &self,
        working: &mut Collection,
        transaction: &ClientTransaction,
    ) -> Result<Vec<StateChange>, ExecutionError> {
        let mut collected = Vec::new();
        // Coins flow between the instructions of one transaction and die
        // with it.
        let mut coins: Vec<Coin> = Vec::new();

        for instruction in &transaction.instructions {
            {
                let darc = darc_from_view(working, &instruction.instance_id.darc_id)?;
                let resolver = ViewResolver { view: working };
                evaluate_request(
                    &darc,
                    &instruction.action(),
                    &instruction.digest(),
                    &instruction.signatures,
                    &resolver,
                )?;
            }

            let contract_id = instruction.resolve_contract_id(working)?;
            let contract = self
                .registry
                .get(&contract_id)
                .ok_or_else(|| ExecutionError::ContractNotFound(contract_id.clone()))?;

            let coins_in = std::mem::take(&mut coins);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                contract(&*working, instruction, coins_in)
            }));

            match outcome {
                Ok(Ok((changes, coins_out))) => {
                    working.apply_all(&changes)?;
                    collected.extend(changes);
                    coins = coins_out;
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    warn!(
                        contract = %contract_id,
                        "contract panicked, rejecting its transaction"
                    );
                    return Err(ExecutionError::ContractPanicked);
                }
            }
        }
        Ok(collected)
    }
}
