//! Stored records and the state-change vocabulary.

use serde::{Deserialize, Serialize};
use shared_crypto::CanonicalHasher;
use shared_types::{DarcId, Hash, InstanceId};

/// What one instance key maps to: opaque value bytes, the contract that
/// owns the instance, and the darc that governs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub value: Vec<u8>,
    pub contract_id: String,
    pub darc_id: DarcId,
}

impl Record {
    pub fn new(value: Vec<u8>, contract_id: impl Into<String>, darc_id: DarcId) -> Self {
        Self {
            value,
            contract_id: contract_id.into(),
            darc_id,
        }
    }

    /// Canonical hash bound into the Merkle leaf.
    pub fn hash(&self) -> Hash {
        let mut hasher = CanonicalHasher::new();
        hasher.field(&self.value);
        hasher.field(self.contract_id.as_bytes());
        hasher.fixed(&self.darc_id.0);
        hasher.finish()
    }
}

/// The three ways a contract may touch the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateAction {
    Create,
    Update,
    Remove,
}

/// One collection mutation, as returned by a contract. Applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub action: StateAction,
    pub instance_id: InstanceId,
    pub contract_id: String,
    pub darc_id: DarcId,
    pub value: Vec<u8>,
}

impl StateChange {
    pub fn create(
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        darc_id: DarcId,
        value: Vec<u8>,
    ) -> Self {
        Self {
            action: StateAction::Create,
            instance_id,
            contract_id: contract_id.into(),
            darc_id,
            value,
        }
    }

    pub fn update(
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        darc_id: DarcId,
        value: Vec<u8>,
    ) -> Self {
        Self {
            action: StateAction::Update,
            instance_id,
            contract_id: contract_id.into(),
            darc_id,
            value,
        }
    }

    pub fn remove(instance_id: InstanceId, darc_id: DarcId) -> Self {
        Self {
            action: StateAction::Remove,
            instance_id,
            contract_id: String::new(),
            darc_id,
            value: Vec::new(),
        }
    }

    /// The record this change stores (meaningless for `Remove`).
    pub fn record(&self) -> Record {
        Record::new(self.value.clone(), self.contract_id.clone(), self.darc_id)
    }
}
