//! Genesis request construction.

use crate::messages::{CreateGenesisBlockRequest, CURRENT_VERSION};
use ol_darc::{Darc, Identity, Rules};
use shared_types::Roster;
use std::time::Duration;

/// Default block interval when the request leaves it unset.
pub const DEFAULT_BLOCK_INTERVAL: Duration = Duration::from_secs(5);

/// Build a standard genesis request: the darc lets `owner` evolve and
/// sign, grants it `invoke:update_config`, and adds every extra action
/// from `rules` (typically `spawn:<contract>` entries).
pub fn default_genesis_message(
    version: u32,
    roster: &Roster,
    rules: &[&str],
    owner: &Identity,
) -> CreateGenesisBlockRequest {
    let ids = [*owner];
    let mut darc_rules = Rules::initial(&ids, &ids);
    darc_rules.add("invoke:update_config", owner.to_string());
    for action in rules {
        darc_rules.add(*action, owner.to_string());
    }

    CreateGenesisBlockRequest {
        version,
        roster: roster.clone(),
        genesis_darc: Darc::new(darc_rules, b"genesis darc".to_vec()),
        block_interval: DEFAULT_BLOCK_INTERVAL,
    }
}

/// `default_genesis_message` at the current protocol version.
pub fn genesis_message(
    roster: &Roster,
    rules: &[&str],
    owner: &Identity,
) -> CreateGenesisBlockRequest {
    default_genesis_message(CURRENT_VERSION, roster, rules, owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::validate_genesis_darc;
    use ol_darc::Signer;
    use shared_types::ServerIdentity;

    #[test]
    fn default_message_passes_validation() {
        let signer = Signer::from_seed([1; 32]);
        let roster = Roster::new(vec![ServerIdentity::new([1; 32], "node-0")]);
        let request = genesis_message(&roster, &["spawn:dummy"], &signer.identity());

        assert!(validate_genesis_darc(&request.genesis_darc).is_ok());
        assert!(request.genesis_darc.rules.contains("spawn:dummy"));
        assert!(request.genesis_darc.rules.contains("invoke:update_config"));
    }
}
