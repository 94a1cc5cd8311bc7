//! End-to-end scenarios over a live roster.

use crate::harness::TestBed;
use ol_contracts::{Argument, ClientTransaction, Instruction};
use ol_darc::Darc;
use ol_service::{
    genesis_message, AddTxRequest, CreateGenesisBlockRequest, ServiceError, CURRENT_VERSION,
};
use shared_types::{InstanceId, Nonce};
use std::time::Duration;

const INTERVAL: Duration = Duration::from_millis(200);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn genesis_block_shape_and_config() {
    let bed = TestBed::start(3, INTERVAL, false).await;

    // the genesis block as returned by the creating node
    let proof = bed.proof(0, b"missing");
    let genesis = &proof.update_chain[0];
    assert_eq!(genesis.index, 0);
    assert_eq!(genesis.height, 1);
    assert_eq!(genesis.back_links.len(), 1);
    assert!(!genesis.back_links[0].is_zero());

    // every node knows the configured interval and the darc's chain
    for service in &bed.services {
        assert_eq!(service.load_block_interval(&bed.chain).unwrap(), INTERVAL);
        assert_eq!(
            service.leader(&bed.chain).unwrap().public,
            bed.roster.list[0].public
        );
        assert_eq!(
            service.chain_of_darc(&bed.genesis_darc.base_id()),
            Some(bed.chain)
        );
    }

    // version and darc validation at the door
    let mut bad_version = genesis_message(&bed.roster, &[], &bed.signer.identity());
    bad_version.version = CURRENT_VERSION + 1;
    assert!(matches!(
        bed.service().create_genesis_block(bad_version).await,
        Err(ServiceError::UnsupportedVersion(_))
    ));

    let bad_darc = CreateGenesisBlockRequest {
        version: CURRENT_VERSION,
        roster: bed.roster.clone(),
        genesis_darc: Darc::new(Default::default(), b"empty".to_vec()),
        block_interval: INTERVAL,
    };
    assert!(matches!(
        bed.service().create_genesis_block(bad_darc).await,
        Err(ServiceError::InvalidDarc(_))
    ));

    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawn_is_provable_on_every_node() {
    let bed = TestBed::start(3, INTERVAL, false).await;

    let tx = bed.spawn_tx("dummy", b"anyvalue");
    let key = tx.instructions[0].instance_id.to_key();
    bed.send_tx(0, tx, 10).await.expect("inclusion");

    for node in 0..3 {
        let proof = bed.wait_proof(node, &key).await;
        assert!(proof.matches(), "node {node} misses the instance");
        proof.verify(&bed.chain).expect("proof verifies from genesis");
        let (proven_key, record) = proof.key_value().unwrap();
        assert_eq!(proven_key, key.as_slice());
        assert_eq!(record.value, b"anyvalue");
    }

    // a key that cannot exist yields a verifiable absence proof
    let mut longer = key.clone();
    longer.push(0);
    let absent = bed.proof(0, &longer);
    assert!(!absent.matches());
    absent.verify(&bed.chain).expect("absence proof verifies");

    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_contract_is_excluded() {
    let bed = TestBed::start(3, INTERVAL, false).await;

    let bad = bed.spawn_tx("invalid", b"a");
    let bad_key = bad.instructions[0].instance_id.to_key();
    let good = bed.spawn_tx("dummy", b"b");
    let good_key = good.instructions[0].instance_id.to_key();

    bed.send_tx(0, bad, 0).await.expect("queuing succeeds");
    bed.send_tx(0, good, 10).await.expect("inclusion");
    bed.settle(2).await;

    let proof = bed.wait_proof(0, &good_key).await;
    assert!(proof.matches());

    let absent = bed.proof(0, &bad_key);
    assert!(!absent.matches());
    absent.verify(&bed.chain).expect("absence proof verifies");

    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contract_panic_is_contained() {
    let bed = TestBed::start(3, INTERVAL, false).await;

    let panicking = bed.spawn_tx("panic", b"a");
    let panic_key = panicking.instructions[0].instance_id.to_key();
    let good = bed.spawn_tx("dummy", b"b");
    let good_key = good.instructions[0].instance_id.to_key();

    bed.send_tx(0, panicking, 0).await.expect("queuing succeeds");
    bed.send_tx(0, good, 10).await.expect("inclusion");

    assert!(bed.wait_proof(0, &good_key).await.matches());
    assert!(!bed.proof(0, &panic_key).matches());

    // the roster survived the panic
    let again = bed.spawn_tx("dummy", b"still alive");
    let again_key = again.instructions[0].instance_id.to_key();
    bed.send_tx(1, again, 10).await.expect("inclusion after panic");
    assert!(bed.wait_proof(0, &again_key).await.matches());

    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn darc_evolution_versions_are_enforced() {
    let bed = TestBed::start(3, INTERVAL, false).await;
    let darc_key = InstanceId::darc(bed.genesis_darc.base_id()).to_key();

    let evolve_tx = |darc: &Darc| {
        let mut instruction = Instruction::invoke(
            InstanceId::darc(bed.genesis_darc.base_id()),
            Nonce(rand::random()),
            "evolve",
            vec![Argument::new("darc", bincode::serialize(darc).unwrap())],
        );
        instruction.sign_by(&bed.signer);
        ClientTransaction::single(instruction)
    };

    // wrong version: should be 1, claims 11
    let mut wrong = bed.genesis_darc.clone();
    wrong.evolve_from(&bed.genesis_darc);
    wrong.version = 11;
    wrong.sign_evolution(&bed.signer);

    assert!(matches!(
        bed.send_tx(0, evolve_tx(&wrong), 10).await,
        Err(ServiceError::TransactionRejected)
    ));

    let proof = bed.wait_proof(0, &darc_key).await;
    let (_, record) = proof.key_value().unwrap();
    let stored: Darc = bincode::deserialize(&record.value).unwrap();
    assert_eq!(stored.version, 0);
    assert_eq!(stored, bed.genesis_darc);

    // correct version: accepted and retrievable by base id
    let mut next = bed.genesis_darc.clone();
    next.evolve_from(&bed.genesis_darc);
    next.rules.add("spawn:rain", bed.signer.identity_string());
    next.sign_evolution(&bed.signer);

    bed.send_tx(0, evolve_tx(&next), 10).await.expect("evolution");

    let proof = bed.wait_proof(0, &darc_key).await;
    let (_, record) = proof.key_value().unwrap();
    let stored: Darc = bincode::deserialize(&record.value).unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored, next);
    assert_eq!(stored.base_id(), bed.genesis_darc.base_id());

    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn killing_the_leader_rotates_the_roster() {
    let bed = TestBed::start(4, INTERVAL, true).await;
    bed.settle(2).await;

    // kill the leader
    bed.services[0].close();
    bed.network.pause(&bed.roster.list[0]);

    // survivors should agree on the next leader within bounded time
    let expected = bed.roster.list[1].public;
    let mut rotated = false;
    for _ in 0..50 {
        bed.settle(1).await;
        rotated = (1..4).all(|node| {
            bed.services[node]
                .leader(&bed.chain)
                .map(|leader| leader.public == expected)
                .unwrap_or(false)
        });
        if rotated {
            break;
        }
    }
    assert!(rotated, "leader rotation failed");

    // a transaction sent to a follower is polled by the new leader
    let tx = bed.spawn_tx("dummy", b"after rotation");
    let key = tx.instructions[0].instance_id.to_key();
    bed.send_tx(2, tx, 20).await.expect("inclusion after rotation");

    for node in 1..4 {
        let proof = bed.wait_proof(node, &key).await;
        assert!(proof.matches(), "node {node} misses the post-rotation tx");
        proof.verify(&bed.chain).expect("proof verifies");
    }

    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inclusion_wait_reports_the_verdict() {
    let bed = TestBed::start(3, INTERVAL, false).await;

    // without waiting the call returns before inclusion
    let tx = bed.spawn_tx("dummy", b"no wait");
    let key = tx.instructions[0].instance_id.to_key();
    bed.send_tx(0, tx, 0).await.expect("queued");
    assert!(bed.wait_proof(0, &key).await.matches());

    // waiting on a failing transaction reports the rejection
    let bad = bed.spawn_tx("invalid", b"x");
    assert!(matches!(
        bed.send_tx(1, bad, 10).await,
        Err(ServiceError::TransactionRejected)
    ));

    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn state_survives_a_restart() {
    use ol_service::Service;
    use shared_crypto::Ed25519KeyPair;
    use std::sync::Arc;

    let bed = TestBed::start(1, INTERVAL, false).await;

    let tx = bed.spawn_tx("dummy", b"durable");
    let key = tx.instructions[0].instance_id.to_key();
    bed.send_tx(0, tx, 10).await.expect("inclusion");
    bed.services[0].close();

    // a fresh service over the same byte store sees the same state
    let keypair = Ed25519KeyPair::from_seed([1; 32]);
    let identity = bed.roster.list[0].clone();
    let transport = Arc::new(bed.network.connect(identity.clone()));
    let reloaded = Service::new(
        identity.clone(),
        keypair,
        Arc::new(crate::harness::test_registry()),
        transport,
        bed.stores[0].clone(),
    )
    .expect("reload");
    bed.network.register(&identity, reloaded.clone());

    let proof = reloaded
        .get_proof(ol_service::GetProofRequest {
            version: CURRENT_VERSION,
            id: bed.chain,
            key: key.clone(),
        })
        .expect("proof after reload")
        .proof;
    assert!(proof.matches());
    proof.verify(&bed.chain).expect("proof verifies after reload");
    assert_eq!(reloaded.load_block_interval(&bed.chain).unwrap(), INTERVAL);

    reloaded.close();
    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pending_pool_pushes_back() {
    let bed = TestBed::start(1, Duration::from_secs(3600), false).await;

    // with an hour-long interval nothing drains; fill the pool
    let mut hit_limit = false;
    for _ in 0..2000 {
        match bed.send_tx(0, bed.spawn_tx("dummy", b"x"), 0).await {
            Ok(_) => {}
            Err(ServiceError::PendingFull) => {
                hit_limit = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(hit_limit, "pool never pushed back");

    bed.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_chain_and_version_are_rejected() {
    let bed = TestBed::start(1, INTERVAL, false).await;

    let tx = bed.spawn_tx("dummy", b"x");
    let unknown = bed
        .services[0]
        .add_transaction(AddTxRequest {
            version: CURRENT_VERSION,
            skipchain_id: shared_types::SkipBlockId([0xEE; 32]),
            transaction: tx.clone(),
            inclusion_wait: 0,
        })
        .await;
    assert!(matches!(unknown, Err(ServiceError::UnknownSkipchain)));

    let wrong_version = bed
        .services[0]
        .add_transaction(AddTxRequest {
            version: CURRENT_VERSION + 1,
            skipchain_id: bed.chain,
            transaction: tx,
            inclusion_wait: 0,
        })
        .await;
    assert!(matches!(wrong_version, Err(ServiceError::UnsupportedVersion(_))));

    bed.close_all();
}
