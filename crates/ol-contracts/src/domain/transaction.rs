//! Instructions, client transactions and coins.

use crate::errors::ExecutionError;
use ol_collection::CollectionView;
use ol_darc::{Darc, DarcSignature, Signer};
use serde::{Deserialize, Serialize};
use shared_crypto::CanonicalHasher;
use shared_types::{DarcId, Hash, InstanceId, Nonce};

/// Named argument to a spawn or invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Vec<u8>,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Create a fresh instance under a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spawn {
    pub contract_id: String,
    pub args: Vec<Argument>,
}

/// Call a command on an existing instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoke {
    pub command: String,
    pub args: Vec<Argument>,
}

/// The three instruction kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionBody {
    Spawn(Spawn),
    Invoke(Invoke),
    Delete,
}

/// One signed operation on one instance.
///
/// `index` and `length` bind the instruction to its position inside the
/// enclosing transaction, so a signature cannot be replayed in another
/// context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub instance_id: InstanceId,
    pub nonce: Nonce,
    pub index: u32,
    pub length: u32,
    pub body: InstructionBody,
    pub signatures: Vec<DarcSignature>,
}

impl Instruction {
    pub fn spawn(
        instance_id: InstanceId,
        nonce: Nonce,
        contract_id: impl Into<String>,
        args: Vec<Argument>,
    ) -> Self {
        Self {
            instance_id,
            nonce,
            index: 0,
            length: 1,
            body: InstructionBody::Spawn(Spawn {
                contract_id: contract_id.into(),
                args,
            }),
            signatures: vec![],
        }
    }

    pub fn invoke(
        instance_id: InstanceId,
        nonce: Nonce,
        command: impl Into<String>,
        args: Vec<Argument>,
    ) -> Self {
        Self {
            instance_id,
            nonce,
            index: 0,
            length: 1,
            body: InstructionBody::Invoke(Invoke {
                command: command.into(),
                args,
            }),
            signatures: vec![],
        }
    }

    pub fn delete(instance_id: InstanceId, nonce: Nonce) -> Self {
        Self {
            instance_id,
            nonce,
            index: 0,
            length: 1,
            body: InstructionBody::Delete,
            signatures: vec![],
        }
    }

    /// The darc action string this instruction requires.
    pub fn action(&self) -> String {
        match &self.body {
            InstructionBody::Spawn(spawn) => format!("spawn:{}", spawn.contract_id),
            InstructionBody::Invoke(invoke) => format!("invoke:{}", invoke.command),
            InstructionBody::Delete => "delete".to_string(),
        }
    }

    /// Arguments of the body, empty for deletes.
    pub fn args(&self) -> &[Argument] {
        match &self.body {
            InstructionBody::Spawn(spawn) => &spawn.args,
            InstructionBody::Invoke(invoke) => &invoke.args,
            InstructionBody::Delete => &[],
        }
    }

    /// Value of the named argument.
    pub fn arg(&self, name: &str) -> Option<&[u8]> {
        self.args()
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| arg.value.as_slice())
    }

    /// Canonical digest every signer signs.
    pub fn digest(&self) -> Hash {
        let mut hasher = CanonicalHasher::new();
        hasher.fixed(&self.instance_id.darc_id.0);
        hasher.fixed(&self.instance_id.sub_id.0);
        hasher.fixed(&self.nonce.0);
        hasher.u64(self.index as u64);
        hasher.u64(self.length as u64);
        match &self.body {
            InstructionBody::Spawn(spawn) => {
                hasher.fixed(&[0u8]);
                hasher.field(spawn.contract_id.as_bytes());
                hash_args(&mut hasher, &spawn.args);
            }
            InstructionBody::Invoke(invoke) => {
                hasher.fixed(&[1u8]);
                hasher.field(invoke.command.as_bytes());
                hash_args(&mut hasher, &invoke.args);
            }
            InstructionBody::Delete => {
                hasher.fixed(&[2u8]);
            }
        }
        hasher.finish()
    }

    /// Sign the digest with `signer`, appending to the signature list.
    pub fn sign_by(&mut self, signer: &Signer) {
        let digest = self.digest();
        self.signatures.push(DarcSignature {
            signer: signer.identity(),
            signature: signer.sign(&digest),
        });
    }

    /// The contract id this instruction executes under: spawns name it,
    /// invokes and deletes use the instance's stored contract.
    pub fn resolve_contract_id(
        &self,
        view: &dyn CollectionView,
    ) -> Result<String, ExecutionError> {
        match &self.body {
            InstructionBody::Spawn(spawn) => Ok(spawn.contract_id.clone()),
            InstructionBody::Invoke(_) | InstructionBody::Delete => view
                .get_record(&self.instance_id.to_key())
                .map(|record| record.contract_id)
                .ok_or_else(|| {
                    ExecutionError::InstanceNotFound(hex::encode(
                        &self.instance_id.darc_id.0[..4],
                    ))
                }),
        }
    }
}

fn hash_args(hasher: &mut CanonicalHasher, args: &[Argument]) {
    hasher.u64(args.len() as u64);
    for arg in args {
        hasher.field(arg.name.as_bytes());
        hasher.field(&arg.value);
    }
}

/// An atomic batch of instructions: all execute, or none do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTransaction {
    pub instructions: Vec<Instruction>,
}

impl ClientTransaction {
    /// A single-instruction transaction with index and length set.
    pub fn single(mut instruction: Instruction) -> Self {
        instruction.index = 0;
        instruction.length = 1;
        Self {
            instructions: vec![instruction],
        }
    }

    /// A multi-instruction transaction; indices and lengths are assigned.
    pub fn batch(mut instructions: Vec<Instruction>) -> Self {
        let length = instructions.len() as u32;
        for (i, instruction) in instructions.iter_mut().enumerate() {
            instruction.index = i as u32;
            instruction.length = length;
        }
        Self { instructions }
    }

    /// Digest identifying the whole transaction (keys inclusion waits).
    pub fn digest(&self) -> Hash {
        let mut hasher = CanonicalHasher::new();
        hasher.u64(self.instructions.len() as u64);
        for instruction in &self.instructions {
            hasher.fixed(&instruction.digest());
        }
        hasher.finish()
    }

    /// Nonce of the first instruction, the pool's dedup key.
    pub fn nonce(&self) -> Option<Nonce> {
        self.instructions.first().map(|i| i.nonce)
    }

    /// Structural checks independent of state: non-empty, consistent
    /// index/length numbering.
    pub fn validate_shape(&self) -> Result<(), ExecutionError> {
        if self.instructions.is_empty() {
            return Err(ExecutionError::Malformed("empty transaction".into()));
        }
        let length = self.instructions.len() as u32;
        for (i, instruction) in self.instructions.iter().enumerate() {
            if instruction.index != i as u32 || instruction.length != length {
                return Err(ExecutionError::Malformed(format!(
                    "instruction {i} carries index {}/{}",
                    instruction.index, instruction.length
                )));
            }
        }
        Ok(())
    }
}

/// A typed token flow between the instructions of one transaction. Coins
/// never cross transaction boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub name: Hash,
    pub value: u64,
}

/// Decode the darc document stored under `id` in the state view.
pub fn darc_from_view(view: &dyn CollectionView, id: &DarcId) -> Result<Darc, ExecutionError> {
    let key = InstanceId::darc(*id).to_key();
    let record = view
        .get_record(&key)
        .ok_or_else(|| ExecutionError::InstanceNotFound(format!("darc {}", id.short())))?;
    bincode::deserialize(&record.value)
        .map_err(|err| ExecutionError::Decode(format!("darc {}: {err}", id.short())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::SubId;

    fn instruction() -> Instruction {
        Instruction::spawn(
            InstanceId::new(DarcId([1; 32]), SubId([2; 32])),
            Nonce([3; 32]),
            "dummy",
            vec![Argument::new("v", b"anyvalue".to_vec())],
        )
    }

    #[test]
    fn action_strings() {
        assert_eq!(instruction().action(), "spawn:dummy");
        let inv = Instruction::invoke(
            InstanceId::default(),
            Nonce::default(),
            "update_config",
            vec![],
        );
        assert_eq!(inv.action(), "invoke:update_config");
        assert_eq!(
            Instruction::delete(InstanceId::default(), Nonce::default()).action(),
            "delete"
        );
    }

    #[test]
    fn digest_covers_position() {
        let a = instruction();
        let mut b = instruction();
        b.index = 1;
        b.length = 2;
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn digest_covers_args() {
        let a = instruction();
        let mut b = instruction();
        match &mut b.body {
            InstructionBody::Spawn(spawn) => spawn.args[0].value = b"other".to_vec(),
            _ => unreachable!(),
        }
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn signature_verifies_under_signer() {
        let signer = Signer::from_seed([7; 32]);
        let mut inst = instruction();
        inst.sign_by(&signer);
        let digest = inst.digest();
        assert!(inst.signatures[0]
            .signer
            .verify(&digest, &inst.signatures[0].signature)
            .is_ok());
    }

    #[test]
    fn batch_assigns_positions() {
        let tx = ClientTransaction::batch(vec![instruction(), instruction(), instruction()]);
        assert!(tx.validate_shape().is_ok());
        assert_eq!(tx.instructions[2].index, 2);
        assert_eq!(tx.instructions[0].length, 3);

        let mut broken = tx.clone();
        broken.instructions[1].index = 5;
        assert!(broken.validate_shape().is_err());
        assert!(ClientTransaction { instructions: vec![] }
            .validate_shape()
            .is_err());
    }
}
