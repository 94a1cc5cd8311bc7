//! The `_darc` contract: spawning, evolving and deleting darcs.

use crate::domain::registry::CONTRACT_DARC;
use crate::domain::transaction::{darc_from_view, Coin, Instruction, InstructionBody};
use crate::errors::ExecutionError;
use ol_collection::{CollectionView, StateChange};
use ol_darc::{Darc, DarcResolver};
use shared_types::{DarcId, InstanceId};

/// Resolver backed by the live state view: darcs are looked up by their
/// base id at the zero sub-id.
pub struct ViewResolver<'a> {
    pub view: &'a dyn CollectionView,
}

impl DarcResolver for ViewResolver<'_> {
    fn resolve(&self, id: &DarcId) -> Option<Darc> {
        darc_from_view(self.view, id).ok()
    }
}

/// Spawn creates a fresh darc instance keyed by the new darc's base id;
/// `invoke:evolve` replaces the stored document after a full evolution
/// check; delete removes the instance.
pub fn darc_contract(
    view: &dyn CollectionView,
    instruction: &Instruction,
    coins: Vec<Coin>,
) -> Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
    match &instruction.body {
        InstructionBody::Spawn(spawn) => {
            if spawn.contract_id != CONTRACT_DARC {
                return Err(ExecutionError::Malformed(format!(
                    "darc contract cannot spawn {:?}",
                    spawn.contract_id
                )));
            }
            let bytes = instruction
                .arg("darc")
                .ok_or_else(|| ExecutionError::MissingArgument("darc".into()))?;
            let darc: Darc = bincode::deserialize(bytes)
                .map_err(|err| ExecutionError::Decode(err.to_string()))?;
            if darc.version != 0 {
                return Err(ExecutionError::Malformed(
                    "spawned darc must be version 0".into(),
                ));
            }

            let instance = InstanceId::darc(darc.base_id());
            if view.get_record(&instance.to_key()).is_some() {
                return Err(ExecutionError::Malformed("darc already exists".into()));
            }
            Ok((
                vec![StateChange::create(
                    instance,
                    CONTRACT_DARC,
                    darc.base_id(),
                    bytes.to_vec(),
                )],
                coins,
            ))
        }
        InstructionBody::Invoke(invoke) => {
            if invoke.command != "evolve" {
                return Err(ExecutionError::Malformed(format!(
                    "darc contract has no command {:?}",
                    invoke.command
                )));
            }
            let bytes = instruction
                .arg("darc")
                .ok_or_else(|| ExecutionError::MissingArgument("darc".into()))?;
            let new: Darc = bincode::deserialize(bytes)
                .map_err(|err| ExecutionError::Decode(err.to_string()))?;

            let current = darc_from_view(view, &instruction.instance_id.darc_id)?;
            let resolver = ViewResolver { view };
            current.verify_evolution(&new, &resolver)?;

            Ok((
                vec![StateChange::update(
                    InstanceId::darc(current.base_id()),
                    CONTRACT_DARC,
                    current.base_id(),
                    bytes.to_vec(),
                )],
                coins,
            ))
        }
        InstructionBody::Delete => {
            let current = darc_from_view(view, &instruction.instance_id.darc_id)?;
            Ok((
                vec![StateChange::remove(
                    InstanceId::darc(current.base_id()),
                    current.base_id(),
                )],
                coins,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ol_collection::{Collection, Record};
    use ol_darc::{Rules, Signer};
    use shared_types::Nonce;

    fn seeded() -> (Signer, Darc, Collection) {
        let signer = Signer::from_seed([1; 32]);
        let ids = [signer.identity()];
        let darc = Darc::new(Rules::initial(&ids, &ids), b"genesis".to_vec());

        let mut state = Collection::new();
        state
            .add(
                InstanceId::darc(darc.base_id()).to_key(),
                Record::new(
                    bincode::serialize(&darc).unwrap(),
                    CONTRACT_DARC,
                    darc.base_id(),
                ),
            )
            .unwrap();
        (signer, darc, state)
    }

    #[test]
    fn spawn_new_darc() {
        let (signer, genesis_darc, state) = seeded();
        let fresh_signer = Signer::from_seed([2; 32]);
        let ids = [fresh_signer.identity()];
        let fresh = Darc::new(Rules::initial(&ids, &ids), b"second".to_vec());
        let bytes = bincode::serialize(&fresh).unwrap();

        let mut instruction = Instruction::spawn(
            InstanceId::darc(genesis_darc.base_id()),
            Nonce([7; 32]),
            CONTRACT_DARC,
            vec![crate::Argument::new("darc", bytes)],
        );
        instruction.sign_by(&signer);

        let (changes, _) = darc_contract(&state, &instruction, vec![]).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].instance_id, InstanceId::darc(fresh.base_id()));
    }

    #[test]
    fn evolve_replaces_document() {
        let (signer, darc, state) = seeded();
        let mut next = darc.clone();
        next.evolve_from(&darc);
        next.sign_evolution(&signer);
        let bytes = bincode::serialize(&next).unwrap();

        let instruction = Instruction::invoke(
            InstanceId::darc(darc.base_id()),
            Nonce([8; 32]),
            "evolve",
            vec![crate::Argument::new("darc", bytes.clone())],
        );
        let (changes, _) = darc_contract(&state, &instruction, vec![]).unwrap();
        assert_eq!(changes[0].value, bytes);
    }

    #[test]
    fn evolve_with_wrong_version_fails() {
        let (signer, darc, state) = seeded();
        let mut next = darc.clone();
        next.evolve_from(&darc);
        next.version = 11;
        next.sign_evolution(&signer);

        let instruction = Instruction::invoke(
            InstanceId::darc(darc.base_id()),
            Nonce([9; 32]),
            "evolve",
            vec![crate::Argument::new(
                "darc",
                bincode::serialize(&next).unwrap(),
            )],
        );
        assert!(darc_contract(&state, &instruction, vec![]).is_err());
    }

    #[test]
    fn spawn_duplicate_fails() {
        let (_, darc, state) = seeded();
        let instruction = Instruction::spawn(
            InstanceId::darc(darc.base_id()),
            Nonce([1; 32]),
            CONTRACT_DARC,
            vec![crate::Argument::new(
                "darc",
                bincode::serialize(&darc).unwrap(),
            )],
        );
        assert!(darc_contract(&state, &instruction, vec![]).is_err());
    }
}
