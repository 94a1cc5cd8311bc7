//! Chain configuration stored in the ledger itself.

use crate::errors::ExecutionError;
use serde::{Deserialize, Serialize};
use shared_types::{Roster, SubId};
use std::time::Duration;

/// Sub-id of the reserved config instance under the genesis darc.
pub fn config_sub_id() -> SubId {
    let mut id = [0u8; 32];
    id[31] = 1;
    SubId(id)
}

/// Per-chain configuration, mutated only through `invoke:update_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub block_interval: Duration,
    pub roster: Roster,
    pub max_tx_per_block: usize,
}

impl ChainConfig {
    pub fn new(block_interval: Duration, roster: Roster) -> Self {
        Self {
            block_interval,
            roster,
            max_tx_per_block: Self::DEFAULT_MAX_TX_PER_BLOCK,
        }
    }

    pub const DEFAULT_MAX_TX_PER_BLOCK: usize = 200;

    /// Structural sanity, checked both at genesis and on every update.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.block_interval.is_zero() {
            return Err(ExecutionError::Malformed(
                "block interval must be positive".into(),
            ));
        }
        if self.roster.is_empty() {
            return Err(ExecutionError::Malformed("empty roster".into()));
        }
        if self.max_tx_per_block == 0 {
            return Err(ExecutionError::Malformed(
                "max transactions per block must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, ExecutionError> {
        bincode::serialize(self).map_err(|err| ExecutionError::Decode(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ExecutionError> {
        bincode::deserialize(bytes).map_err(|err| ExecutionError::Decode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ServerIdentity;

    fn roster() -> Roster {
        Roster::new(vec![ServerIdentity::new([1; 32], "node-0")])
    }

    #[test]
    fn round_trip() {
        let config = ChainConfig::new(Duration::from_millis(200), roster());
        let decoded = ChainConfig::decode(&config.encode().unwrap()).unwrap();
        assert_eq!(config, decoded);
    }

    #[test]
    fn validation() {
        assert!(ChainConfig::new(Duration::from_millis(200), roster())
            .validate()
            .is_ok());
        assert!(ChainConfig::new(Duration::ZERO, roster()).validate().is_err());
        assert!(ChainConfig::new(Duration::from_millis(200), Roster::default())
            .validate()
            .is_err());
    }
}
