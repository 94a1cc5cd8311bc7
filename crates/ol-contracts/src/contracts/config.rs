//! The `_config` contract: guarded updates of the chain configuration.

use crate::domain::config::ChainConfig;
use crate::domain::registry::CONTRACT_CONFIG;
use crate::domain::transaction::{Coin, Instruction, InstructionBody};
use crate::errors::ExecutionError;
use ol_collection::{CollectionView, StateChange};

/// `invoke:update_config` replaces the stored configuration. The new
/// config must be structurally valid and keep the roster membership of the
/// current one; reordering is how a deliberate leader change is encoded.
pub fn update_config_contract(
    view: &dyn CollectionView,
    instruction: &Instruction,
    coins: Vec<Coin>,
) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
    let InstructionBody::Invoke(invoke) = &instruction.body else {
        return Err(ExecutionError::Malformed(
            "config instance only accepts invoke".into(),
        ));
    };
    if invoke.command != "update_config" {
        return Err(ExecutionError::Malformed(format!(
            "config contract has no command {:?}",
            invoke.command
        )));
    }

    let bytes = instruction
        .arg("config")
        .ok_or_else(|| ExecutionError::MissingArgument("config".into()))?;
    let new = ChainConfig::decode(bytes)?;
    new.validate()?;

    let key = instruction.instance_id.to_key();
    let (current_bytes, _, darc_id) = view.get_values(&key).map_err(|_| {
        ExecutionError::InstanceNotFound("config instance".into())
    })?;
    let current = ChainConfig::decode(&current_bytes)?;

    if !new.roster.same_members(&current.roster) {
        return Err(ExecutionError::Malformed(
            "config update changes roster membership".into(),
        ));
    }

    Ok((
        vec![StateChange::update(
            instruction.instance_id,
            CONTRACT_CONFIG,
            darc_id,
            bytes.to_vec(),
        )],
        coins,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::config_sub_id;
    use ol_collection::{Collection, Record};
    use shared_types::{DarcId, InstanceId, Nonce, Roster, ServerIdentity};
    use std::time::Duration;

    fn roster(n: u8) -> Roster {
        Roster::new(
            (0..n)
                .map(|i| ServerIdentity::new([i + 1; 32], format!("node-{i}")))
                .collect(),
        )
    }

    fn seeded(config: &ChainConfig) -> (InstanceId, Collection) {
        let darc_id = DarcId([9; 32]);
        let instance = InstanceId::new(darc_id, config_sub_id());
        let mut state = Collection::new();
        state
            .add(
                instance.to_key(),
                Record::new(config.encode().unwrap(), CONTRACT_CONFIG, darc_id),
            )
            .unwrap();
        (instance, state)
    }

    fn update_instruction(instance: InstanceId, config: &ChainConfig) -> Instruction {
        Instruction::invoke(
            instance,
            Nonce([4; 32]),
            "update_config",
            vec![crate::Argument::new("config", config.encode().unwrap())],
        )
    }

    #[test]
    fn interval_update_accepted() {
        let current = ChainConfig::new(Duration::from_millis(200), roster(3));
        let (instance, state) = seeded(&current);

        let new = ChainConfig::new(Duration::from_millis(420), roster(3));
        let instruction = update_instruction(instance, &new);
        let (changes, _) = update_config_contract(&state, &instruction, vec![]).unwrap();
        assert_eq!(ChainConfig::decode(&changes[0].value).unwrap(), new);
    }

    #[test]
    fn membership_change_rejected() {
        let current = ChainConfig::new(Duration::from_millis(200), roster(3));
        let (instance, state) = seeded(&current);

        let new = ChainConfig::new(Duration::from_millis(200), roster(2));
        let instruction = update_instruction(instance, &new);
        assert!(update_config_contract(&state, &instruction, vec![]).is_err());
    }

    #[test]
    fn invalid_interval_rejected() {
        let current = ChainConfig::new(Duration::from_millis(200), roster(3));
        let (instance, state) = seeded(&current);

        let new = ChainConfig::new(Duration::ZERO, roster(3));
        let instruction = update_instruction(instance, &new);
        assert!(update_config_contract(&state, &instruction, vec![]).is_err());
    }

    #[test]
    fn reordering_accepted() {
        let current = ChainConfig::new(Duration::from_millis(200), roster(3));
        let (instance, state) = seeded(&current);

        let mut new = current.clone();
        new.roster = new.roster.rotated();
        let instruction = update_instruction(instance, &new);
        assert!(update_config_contract(&state, &instruction, vec![]).is_ok());
    }
}
