//! Contract registry.

use crate::contracts::{darc_contract, update_config_contract};
use crate::domain::transaction::{Coin, Instruction};
use crate::errors::ExecutionError;
use ol_collection::{CollectionView, StateChange};
use std::collections::HashMap;
use std::sync::Arc;

/// Id of the built-in darc contract.
pub const CONTRACT_DARC: &str = "_darc";

/// Id of the built-in chain-config contract.
pub const CONTRACT_CONFIG: &str = "_config";

/// A contract: a deterministic, side-effect-free function from a read-only
/// state view, one instruction and the coins flowing in, to state changes
/// and the coins flowing out.
pub type ContractFn = Arc<
    dyn Fn(
            &dyn CollectionView,
            &Instruction,
            Vec<Coin>,
        ) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError>
        + Send
        + Sync,
>;

/// Mapping from contract id to contract function. Populated at startup,
/// read-only afterwards; the executor holds it behind an `Arc`.
pub struct ContractRegistry {
    contracts: HashMap<String, ContractFn>,
}

impl ContractRegistry {
    /// A registry with the built-in `_darc` and `_config` contracts.
    pub fn new() -> Self {
        let mut registry = Self {
            contracts: HashMap::new(),
        };
        registry
            .register(CONTRACT_DARC, Arc::new(darc_contract))
            .expect("empty registry accepts built-ins");
        registry
            .register(CONTRACT_CONFIG, Arc::new(update_config_contract))
            .expect("empty registry accepts built-ins");
        registry
    }

    /// Register a contract under `id`. Ids are claimed once.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        contract: ContractFn,
    ) -> Result<(), ExecutionError> {
        let id = id.into();
        if self.contracts.contains_key(&id) {
            return Err(ExecutionError::Malformed(format!(
                "contract {id:?} already registered"
            )));
        }
        self.contracts.insert(id, contract);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ContractFn> {
        self.contracts.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.contracts.contains_key(id)
    }

    /// All registered ids, for genesis rule construction.
    pub fn contract_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contracts.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_ins_present() {
        let registry = ContractRegistry::new();
        assert!(registry.contains(CONTRACT_DARC));
        assert!(registry.contains(CONTRACT_CONFIG));
    }

    #[test]
    fn ids_claimed_once() {
        let mut registry = ContractRegistry::new();
        registry
            .register("dummy", Arc::new(|_, _, coins| Ok((vec![], coins))))
            .unwrap();
        assert!(registry
            .register("dummy", Arc::new(|_, _, coins| Ok((vec![], coins))))
            .is_err());
        assert!(registry.get("dummy").is_some());
        assert!(registry.get("missing").is_none());
    }
}
