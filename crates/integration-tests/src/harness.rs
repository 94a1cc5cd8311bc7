//! The roster-in-a-process test bed.

use ol_collection::adapters::InMemoryKVStore;
use ol_collection::store::SharedKVStore;
use ol_collection::StateChange;
use ol_contracts::{
    Argument, ClientTransaction, Coin, ContractRegistry, ExecutionError, Instruction,
};
use ol_darc::{Darc, Signer};
use ol_network::InMemoryNetwork;
use ol_service::{
    genesis_message, AddTxRequest, AddTxResponse, GetProofRequest, Proof, Result, Service,
    CURRENT_VERSION,
};
use parking_lot::Mutex;
use shared_crypto::Ed25519KeyPair;
use shared_types::{InstanceId, Nonce, Roster, ServerIdentity, SkipBlockId, SubId};
use std::sync::Arc;
use std::time::Duration;

/// The contract actions every test chain allows its owner.
pub const TEST_ACTIONS: &[&str] = &[
    "spawn:dummy",
    "spawn:invalid",
    "spawn:panic",
    "spawn:_darc",
];

/// A roster of services over one in-memory network.
pub struct TestBed {
    pub network: Arc<InMemoryNetwork>,
    pub roster: Roster,
    pub services: Vec<Arc<Service>>,
    pub stores: Vec<SharedKVStore>,
    pub signer: Signer,
    pub genesis_darc: Darc,
    pub chain: SkipBlockId,
    pub interval: Duration,
}

impl TestBed {
    /// Start `n` nodes, create a chain with `interval`, optionally with
    /// view change armed.
    pub async fn start(n: usize, interval: Duration, view_change: bool) -> TestBed {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let network = InMemoryNetwork::new();
        let signer = Signer::from_seed([99; 32]);

        let mut services = Vec::new();
        let mut stores = Vec::new();
        let mut members = Vec::new();
        for i in 0..n {
            let keypair = Ed25519KeyPair::from_seed([i as u8 + 1; 32]);
            let identity = ServerIdentity::new(keypair.public_bytes(), format!("node-{i}"));
            let kv: SharedKVStore = Arc::new(Mutex::new(InMemoryKVStore::new()));
            let transport = Arc::new(network.connect(identity.clone()));

            let service = Service::new(
                identity.clone(),
                keypair,
                Arc::new(test_registry()),
                transport,
                kv.clone(),
            )
            .expect("fresh service starts");
            if view_change {
                service.enable_view_change();
            }
            network.register(&identity, service.clone());

            members.push(identity);
            stores.push(kv);
            services.push(service);
        }
        let roster = Roster::new(members);

        let mut request = genesis_message(&roster, TEST_ACTIONS, &signer.identity());
        request.block_interval = interval;
        let genesis_darc = request.genesis_darc.clone();
        let response = services[0]
            .create_genesis_block(request)
            .await
            .expect("genesis");

        TestBed {
            network,
            roster,
            services,
            stores,
            signer,
            genesis_darc,
            chain: response.skipblock.id(),
            interval,
        }
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.services[0]
    }

    /// A spawn transaction on a fresh instance, signed by the owner.
    pub fn spawn_tx(&self, contract: &str, value: &[u8]) -> ClientTransaction {
        let mut instruction = Instruction::spawn(
            InstanceId::new(self.genesis_darc.base_id(), SubId(rand::random())),
            Nonce(rand::random()),
            contract,
            vec![Argument::new("v", value.to_vec())],
        );
        instruction.sign_by(&self.signer);
        ClientTransaction::single(instruction)
    }

    pub async fn send_tx(
        &self,
        node: usize,
        transaction: ClientTransaction,
        inclusion_wait: u32,
    ) -> Result<AddTxResponse> {
        self.services[node]
            .add_transaction(AddTxRequest {
                version: CURRENT_VERSION,
                skipchain_id: self.chain,
                transaction,
                inclusion_wait,
            })
            .await
    }

    pub fn proof(&self, node: usize, key: &[u8]) -> Proof {
        self.services[node]
            .get_proof(GetProofRequest {
                version: CURRENT_VERSION,
                id: self.chain,
                key: key.to_vec(),
            })
            .expect("proof")
            .proof
    }

    /// Poll for an inclusion proof of `key`, up to ten block intervals.
    pub async fn wait_proof(&self, node: usize, key: &[u8]) -> Proof {
        let mut proof = self.proof(node, key);
        for _ in 0..10 {
            if proof.matches() {
                break;
            }
            tokio::time::sleep(self.interval).await;
            proof = self.proof(node, key);
        }
        proof
    }

    pub async fn settle(&self, intervals: u32) {
        tokio::time::sleep(self.interval * intervals).await;
    }

    pub fn close_all(&self) {
        for service in &self.services {
            service.close();
        }
    }
}

/// The scenario contract set: `dummy` stores its argument, `invalid`
/// always errors, `panic` panics.
pub fn test_registry() -> ContractRegistry {
    let mut registry = ContractRegistry::new();
    registry
        .register(
            "dummy",
            Arc::new(|_view, instruction, coins| {
                let value = instruction
                    .arg("v")
                    .ok_or_else(|| ExecutionError::MissingArgument("v".into()))?;
                Ok((
                    vec![StateChange::create(
                        instruction.instance_id,
                        "dummy",
                        instruction.instance_id.darc_id,
                        value.to_vec(),
                    )],
                    coins,
                ))
            }),
        )
        .expect("register dummy");
    registry
        .register(
            "invalid",
            Arc::new(|_, _, _| {
                Err(ExecutionError::ContractFailed(
                    "this invalid contract always returns an error".into(),
                ))
            }),
        )
        .expect("register invalid");
    registry
        .register(
            "panic",
            Arc::new(
                |_, _, _| -> std::result::Result<(Vec<StateChange>, Vec<Coin>), ExecutionError> {
                    panic!("this contract panics")
                },
            ),
        )
        .expect("register panic");
    registry
}
