//! Proofs returned to clients: an update chain from the genesis block to
//! the tip, plus an inclusion or absence proof against the tip's state
//! root. A verifier needs nothing but the genesis hash.

use crate::errors::{Result, ServiceError};
use crate::messages::BlockData;
use ol_collection::Record;
use ol_skipchain::SkipBlock;
use serde::{Deserialize, Serialize};
use shared_types::SkipBlockId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    /// Blocks from genesis to the tip, each hop sealed by a forward link
    /// of the earlier block.
    pub update_chain: Vec<SkipBlock>,
    /// Inclusion or absence of the requested key at the tip.
    pub inclusion: ol_collection::Proof,
}

impl Proof {
    /// True when the key is present at the tip.
    pub fn matches(&self) -> bool {
        self.inclusion.matches()
    }

    /// The proven key and record, for inclusion proofs.
    pub fn key_value(&self) -> Result<(&[u8], &Record)> {
        self.inclusion
            .key_value()
            .map_err(|err| ServiceError::InvalidProof(err.to_string()))
    }

    pub fn latest(&self) -> Result<&SkipBlock> {
        self.update_chain
            .last()
            .ok_or_else(|| ServiceError::InvalidProof("empty update chain".into()))
    }

    /// Verify the whole proof against the chain's genesis hash: the chain
    /// starts there, every hop carries a valid forward-link signature
    /// under the source block's roster, and the state proof checks out
    /// against the tip's sealed root.
    pub fn verify(&self, genesis: &SkipBlockId) -> Result<()> {
        let first = self
            .update_chain
            .first()
            .ok_or_else(|| ServiceError::InvalidProof("empty update chain".into()))?;
        if &first.id() != genesis {
            return Err(ServiceError::InvalidProof(
                "update chain does not start at genesis".into(),
            ));
        }

        for pair in self.update_chain.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            let to_id = to.id();
            let link = from
                .forward_links
                .iter()
                .find(|link| link.to == to_id)
                .ok_or_else(|| {
                    ServiceError::InvalidProof(format!(
                        "no forward link from block {} to {}",
                        from.index, to.index
                    ))
                })?;
            if link.from != from.id() || !link.verify(&from.roster) {
                return Err(ServiceError::InvalidProof(format!(
                    "bad forward link at block {}",
                    from.index
                )));
            }
        }

        let tip = self.latest()?;
        let data = BlockData::decode(&tip.payload)?;
        self.inclusion
            .verify(&data.header.collection_root)
            .map_err(|err| ServiceError::InvalidProof(err.to_string()))
    }
}
