//! RPC messages and the block payload format.

use crate::errors::{Result, ServiceError};
use crate::proof::Proof;
use ol_collection::StateChange;
use ol_contracts::{ChainConfig, ClientTransaction, CONTRACT_CONFIG, CONTRACT_DARC};
use ol_contracts::domain::config::config_sub_id;
use ol_darc::{Darc, ACTION_EVOLVE, ACTION_SIGN};
use ol_skipchain::SkipBlock;
use serde::{Deserialize, Serialize};
use shared_types::{Hash, InstanceId, Roster, SkipBlockId};
use std::time::Duration;

/// Protocol version spoken by this node.
pub const CURRENT_VERSION: u32 = 1;

/// Start a new ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGenesisBlockRequest {
    pub version: u32,
    pub roster: Roster,
    pub genesis_darc: Darc,
    pub block_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGenesisBlockResponse {
    pub version: u32,
    pub skipblock: SkipBlock,
}

/// Submit a transaction; `inclusion_wait > 0` blocks until it settles or
/// that many block intervals pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTxRequest {
    pub version: u32,
    pub skipchain_id: SkipBlockId,
    pub transaction: ClientTransaction,
    pub inclusion_wait: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTxResponse {
    pub version: u32,
}

/// Ask for a proof of `key` at the tip of chain `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProofRequest {
    pub version: u32,
    pub id: SkipBlockId,
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProofResponse {
    pub version: u32,
    pub proof: Proof,
}

/// Header sealed into every block: the state root after the body, the
/// roster binding and the leader's clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataHeader {
    pub collection_root: Hash,
    pub roster_hash: Hash,
    pub timestamp_ms: u64,
}

/// Accepted transactions only; rejected ones never enter a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DataBody {
    pub transactions: Vec<ClientTransaction>,
}

/// Bootstrap state carried only by genesis blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisData {
    pub darc: Darc,
    pub config: ChainConfig,
}

/// The application payload of a skip block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub header: DataHeader,
    pub body: DataBody,
    pub genesis: Option<GenesisData>,
}

impl BlockData {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|err| ServiceError::Fatal(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|err| ServiceError::InvalidTransaction(format!("bad block payload: {err}")))
    }
}

/// The two state changes every chain starts from: the genesis darc and
/// the chain config, both governed by the genesis darc.
pub fn genesis_state_changes(darc: &Darc, config: &ChainConfig) -> Result<Vec<StateChange>> {
    let darc_bytes =
        bincode::serialize(darc).map_err(|err| ServiceError::InvalidDarc(err.to_string()))?;
    let config_bytes = config.encode()?;
    let base = darc.base_id();

    Ok(vec![
        StateChange::create(InstanceId::darc(base), CONTRACT_DARC, base, darc_bytes),
        StateChange::create(
            InstanceId::new(base, config_sub_id()),
            CONTRACT_CONFIG,
            base,
            config_bytes,
        ),
    ])
}

/// Sanity checks on a genesis darc: it must at least let someone sign and
/// someone evolve it.
pub fn validate_genesis_darc(darc: &Darc) -> Result<()> {
    if darc.version != 0 {
        return Err(ServiceError::InvalidDarc(
            "genesis darc must be version 0".into(),
        ));
    }
    if darc.rules.is_empty() {
        return Err(ServiceError::InvalidDarc("empty rule set".into()));
    }
    for action in [ACTION_SIGN, ACTION_EVOLVE] {
        if !darc.rules.contains(action) {
            return Err(ServiceError::InvalidDarc(format!(
                "missing rule {action:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ol_darc::{Rules, Signer};
    use shared_types::ServerIdentity;

    #[test]
    fn block_data_round_trip() {
        let data = BlockData {
            header: DataHeader {
                collection_root: [1; 32],
                roster_hash: [2; 32],
                timestamp_ms: 1234,
            },
            body: DataBody::default(),
            genesis: None,
        };
        assert_eq!(BlockData::decode(&data.encode().unwrap()).unwrap(), data);
        assert!(BlockData::decode(b"junk").is_err());
    }

    #[test]
    fn genesis_changes_cover_darc_and_config() {
        let signer = Signer::from_seed([1; 32]);
        let ids = [signer.identity()];
        let darc = Darc::new(Rules::initial(&ids, &ids), b"genesis".to_vec());
        let config = ChainConfig::new(
            Duration::from_millis(200),
            Roster::new(vec![ServerIdentity::new([1; 32], "node-0")]),
        );

        let changes = genesis_state_changes(&darc, &config).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].contract_id, CONTRACT_DARC);
        assert_eq!(changes[1].contract_id, CONTRACT_CONFIG);
        assert_eq!(changes[0].instance_id, InstanceId::darc(darc.base_id()));
    }

    #[test]
    fn genesis_darc_validation() {
        let signer = Signer::from_seed([1; 32]);
        let ids = [signer.identity()];
        let darc = Darc::new(Rules::initial(&ids, &ids), b"ok".to_vec());
        assert!(validate_genesis_darc(&darc).is_ok());

        assert!(validate_genesis_darc(&Darc::new(Rules::default(), b"".to_vec())).is_err());

        let mut evolved = darc.clone();
        evolved.evolve_from(&darc);
        assert!(validate_genesis_darc(&evolved).is_err());
    }
}
