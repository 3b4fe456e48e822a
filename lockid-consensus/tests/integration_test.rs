//! End-to-end identity flows against the in-memory chain

use lockid_consensus::config::{BackoffStrategy, FeeConfig, WaitMode};
use lockid_consensus::*;
use lockid_core::{AssetLockProof, Duffs, IdentityPublicKey, KeyPair, KeyType};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn regtest_config() -> PlatformConfig {
    let mut config = PlatformConfig::default();
    config.apply_regtest_flag(Some("true"));
    config
}

fn setup(config: &PlatformConfig) -> (Arc<MemoryChain>, Arc<Platform>, PlatformClient) {
    let chain = Arc::new(MemoryChain::new());
    let platform = Arc::new(Platform::new(chain.clone(), config));
    let client = PlatformClient::new(chain.clone(), platform.clone(), config);
    (chain, platform, client)
}

fn keypair() -> KeyPair {
    KeyPair::generate(KeyType::EcdsaSecp256k1).unwrap()
}

/// A confirmed lock of `value` duffs for `key`
fn confirmed_proof(chain: &MemoryChain, key: &KeyPair, value: Duffs) -> AssetLockProof {
    let tx = chain.fund_asset_lock(value, &key.public_key_hash());
    chain.broadcast(&tx).unwrap();
    chain.mine(1, "miner").unwrap();
    AssetLockProof::from_transaction(&tx, 0).unwrap()
}

fn signed_create(proof: AssetLockProof, key: &KeyPair) -> StateTransition {
    let mut transition =
        StateTransition::identity_create(proof, vec![IdentityPublicKey::from_keypair(0, key)]);
    transition.sign(key, 0).unwrap();
    transition
}

fn signed_top_up(
    identity_id: lockid_core::IdentityId,
    proof: AssetLockProof,
    key: &KeyPair,
) -> StateTransition {
    let mut transition = StateTransition::identity_top_up(identity_id, proof);
    transition.sign(key, 0).unwrap();
    transition
}

#[tokio::test]
async fn test_register_write_top_up_flow() {
    let (chain, platform, client) = setup(&regtest_config());
    let key = keypair();

    // Register with 1 duff
    let funding = chain.fund_asset_lock(1, &key.public_key_hash());
    let identity = client.register_identity(&funding, &[key.clone()]).await.unwrap();
    assert_eq!(identity.balance, 826);

    // One document write costs more than what is left
    let note = DocumentOperation::create(
        "notes",
        "note",
        &identity.id,
        &rand::random::<[u8; 32]>(),
        json!({"message": "hello"}),
    );
    let error = client
        .broadcast_documents(&identity.id, vec![note.clone()], &key, 0)
        .await
        .unwrap_err();
    let rejection = error.transition_error().unwrap();
    assert_eq!(rejection.name(), "BalanceIsNotEnoughError");
    assert_eq!(
        rejection.to_wire().message,
        "Failed precondition: Not enough credits"
    );
    assert_eq!(platform.get_identity(&identity.id).unwrap().balance, 826);
    assert!(platform.get_document(&note.key()).is_none());

    // Top up with a fresh lock and retry
    let funding = chain.fund_asset_lock(1, &key.public_key_hash());
    let balance = client
        .top_up_identity(&identity.id, &funding, &key, 0)
        .await
        .unwrap();
    assert_eq!(balance, 826 + 826);

    client
        .broadcast_documents(&identity.id, vec![note.clone()], &key, 0)
        .await
        .unwrap();
    assert_eq!(platform.get_identity(&identity.id).unwrap().balance, 652);

    let stored = platform.get_document(&note.key()).unwrap();
    assert_eq!(stored.owner_id, identity.id);
    assert_eq!(stored.data, json!({"message": "hello"}));
}

#[test]
fn test_outpoint_is_consumed_once() {
    let config = PlatformConfig::default();
    let (chain, platform, _) = setup(&config);
    let key = keypair();
    let proof = confirmed_proof(&chain, &key, 1);
    let outpoint = proof.outpoint;

    let create = signed_create(proof.clone(), &key);
    platform.submit(&create).unwrap();
    let identity_id = create.identity_id();

    // Same outpoint as a top-up of the identity it created
    let result = platform.submit(&signed_top_up(identity_id, proof.clone(), &key));
    assert_eq!(result, Err(TransitionError::OutpointAlreadyConsumed { outpoint }));

    // Same outpoint for a new identity with a different key
    let other = keypair();
    let result = platform.submit(&signed_create(proof, &other));
    assert_eq!(result, Err(TransitionError::OutpointAlreadyConsumed { outpoint }));

    assert_eq!(platform.get_identity(&identity_id).unwrap().balance, 826);
    assert_eq!(platform.revision(), 1);
}

#[test]
fn test_first_public_key_is_unique() {
    let (chain, platform, _) = setup(&PlatformConfig::default());
    let key = keypair();

    let first = signed_create(confirmed_proof(&chain, &key, 1), &key);
    platform.submit(&first).unwrap();
    let before = platform.get_identity(&first.identity_id()).unwrap();

    // A second, unrelated lock for the same key
    let second = signed_create(confirmed_proof(&chain, &key, 3), &key);
    let error = platform.submit(&second).unwrap_err();

    assert_eq!(
        error,
        TransitionError::FirstPublicKeyAlreadyExists {
            public_key_hash: key.public_key_hash()
        }
    );
    let wire = error.to_wire();
    assert_eq!(wire.name, "IdentityFirstPublicKeyAlreadyExistsError");
    assert_eq!(wire.public_key_hash, Some(key.public_key_hash()));
    assert!(platform.get_identity(&second.identity_id()).is_none());

    let after = platform.get_identity(&first.identity_id()).unwrap();
    assert_eq!(after, before);
    assert_eq!(after.balance, 826);
    assert_eq!(platform.revision(), 1);
}

#[test]
fn test_replayed_create_reports_consumed_outpoint() {
    let (chain, platform, _) = setup(&PlatformConfig::default());
    let key = keypair();
    let create = signed_create(confirmed_proof(&chain, &key, 1), &key);
    let outpoint = create.asset_lock_proof().unwrap().outpoint;

    platform.submit(&create).unwrap();
    let result = platform.submit(&create);

    assert_eq!(result, Err(TransitionError::OutpointAlreadyConsumed { outpoint }));
    assert_eq!(platform.get_identity(&create.identity_id()).unwrap().balance, 826);
    assert_eq!(platform.revision(), 1);
}

#[test]
fn test_later_keys_may_repeat_across_identities() {
    let (chain, platform, _) = setup(&PlatformConfig::default());
    let shared = keypair();

    for _ in 0..2 {
        let first = keypair();
        let proof = confirmed_proof(&chain, &first, 1);
        let mut transition = StateTransition::identity_create(
            proof,
            vec![
                IdentityPublicKey::from_keypair(0, &first),
                IdentityPublicKey::from_keypair(1, &shared),
            ],
        );
        transition.sign(&first, 0).unwrap();
        platform.submit(&transition).unwrap();
    }

    assert_eq!(platform.ledger().identity_count(), 2);
}

#[test]
fn test_top_up_of_unknown_identity() {
    let (chain, platform, _) = setup(&PlatformConfig::default());
    let key = keypair();
    let missing = lockid_core::IdentityId([3; 32]);

    let result = platform.submit(&signed_top_up(missing, confirmed_proof(&chain, &key, 1), &key));
    assert_eq!(
        result,
        Err(TransitionError::IdentityNotFound {
            identity_id: missing
        })
    );
}

#[test]
fn test_reads_are_idempotent() {
    let (chain, platform, _) = setup(&PlatformConfig::default());
    let key = keypair();
    let create = signed_create(confirmed_proof(&chain, &key, 4), &key);
    platform.submit(&create).unwrap();

    let hash = key.public_key_hash();
    let first = platform.get_identity_by_first_public_key(&hash);
    for _ in 0..5 {
        assert_eq!(platform.get_identity_by_first_public_key(&hash), first);
        assert_eq!(
            platform.get_identity_id_by_first_public_key(&hash),
            Some(create.identity_id())
        );
    }
    assert_eq!(platform.revision(), 1);
}

#[test]
fn test_disjoint_creates_run_in_parallel() {
    let (chain, platform, _) = setup(&PlatformConfig::default());
    let transitions: Vec<StateTransition> = (0..8)
        .map(|_| {
            let key = keypair();
            signed_create(confirmed_proof(&chain, &key, 1), &key)
        })
        .collect();

    let handles: Vec<_> = transitions
        .into_iter()
        .map(|transition| {
            let platform = platform.clone();
            thread::spawn(move || platform.submit(&transition))
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(platform.ledger().identity_count(), 8);
    assert_eq!(platform.revision(), 8);
}

#[test]
fn test_racing_top_ups_consume_outpoint_once() {
    let (chain, platform, _) = setup(&PlatformConfig::default());
    let key = keypair();
    let create = signed_create(confirmed_proof(&chain, &key, 1), &key);
    platform.submit(&create).unwrap();
    let identity_id = create.identity_id();

    let top_up = Arc::new(signed_top_up(identity_id, confirmed_proof(&chain, &key, 1), &key));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let platform = platform.clone();
            let top_up = top_up.clone();
            thread::spawn(move || platform.submit(&top_up))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let applied = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(applied, 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
        e,
        TransitionError::OutpointAlreadyConsumed { .. }
    )));
    assert_eq!(platform.get_identity(&identity_id).unwrap().balance, 826 * 2);
}

#[test]
fn test_racing_batches_never_overdraw() {
    let (chain, platform, _) = setup(&PlatformConfig::default());
    let key = keypair();
    // 3000 - 174 credits pay for two 1000-credit writes, not three
    let create = signed_create(confirmed_proof(&chain, &key, 3), &key);
    platform.submit(&create).unwrap();
    let owner = create.identity_id();

    let handles: Vec<_> = (0..3u8)
        .map(|i| {
            let platform = platform.clone();
            let key = key.clone();
            thread::spawn(move || {
                let mut batch = StateTransition::documents_batch(
                    owner,
                    vec![DocumentOperation::create("c", "note", &owner, &[i], json!({}))],
                );
                batch.sign(&key, 0).unwrap();
                platform.submit(&batch)
            })
        })
        .collect();

    let applied = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(applied, 2);
    assert_eq!(platform.get_identity(&owner).unwrap().balance, 826);
}

#[tokio::test(start_paused = true)]
async fn test_client_resubmits_until_lock_confirms() {
    let (chain, platform, client) = setup(&PlatformConfig::default());
    let client = client.with_retry_policy(RetryPolicy {
        strategy: BackoffStrategy::Fixed,
        initial_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(10),
        max_attempts: None,
    });
    let key = keypair();

    // Known to the chain but unmined: the platform reports it as not found
    let tx = chain.fund_asset_lock(1, &key.public_key_hash());
    chain.broadcast(&tx).unwrap();
    let create = signed_create(AssetLockProof::from_transaction(&tx, 0).unwrap(), &key);
    assert!(matches!(
        platform.submit(&create),
        Err(TransitionError::AssetLockTransactionNotFound { .. })
    ));

    let miner = chain.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        miner.mine(1, "miner").unwrap();
    });

    client.submit_with_retry(&create).await.unwrap();
    assert_eq!(platform.get_identity(&create.identity_id()).unwrap().balance, 826);
}

#[tokio::test(start_paused = true)]
async fn test_client_gives_up_after_max_attempts() {
    let (chain, platform, client) = setup(&PlatformConfig::default());
    let client = client.with_retry_policy(RetryPolicy {
        strategy: BackoffStrategy::Exponential,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(4),
        max_attempts: Some(3),
    });
    let key = keypair();
    let tx = chain.fund_asset_lock(1, &key.public_key_hash());
    let create = signed_create(AssetLockProof::from_transaction(&tx, 0).unwrap(), &key);

    let error = client.submit_with_retry(&create).await.unwrap_err();
    assert!(matches!(
        error,
        ClientError::RetriesExhausted { attempts: 3, .. }
    ));
    assert_eq!(platform.revision(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_does_not_retry_validation_errors() {
    let (chain, platform, client) = setup(&PlatformConfig::default());
    let key = keypair();
    let mut create = signed_create(confirmed_proof(&chain, &key, 1), &key);
    create.signature[0] ^= 0xff;

    let started = tokio::time::Instant::now();
    let error = client.submit_with_retry(&create).await.unwrap_err();

    assert!(matches!(
        error,
        ClientError::Transition(TransitionError::InvalidSignature(_))
    ));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(platform.revision(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_polling_client_waits_for_external_miner() {
    let mut config = PlatformConfig::default();
    assert_eq!(config.confirmation.mode, WaitMode::Poll);
    config.confirmation.poll_interval_secs = 5;
    let (chain, _, client) = setup(&config);

    let miner = chain.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(12)).await;
            miner.mine(1, "miner").unwrap();
        }
    });

    let key = keypair();
    let funding = chain.fund_asset_lock(2, &key.public_key_hash());
    let identity = client.register_identity(&funding, &[key]).await.unwrap();
    assert_eq!(identity.balance, 2000 - 174);
}

#[test]
fn test_size_priced_fees() {
    let mut config = PlatformConfig::default();
    config.credits.fees = FeeConfig::Size { price_per_byte: 1 };
    let (chain, platform, _) = setup(&config);
    let key = keypair();

    let create = signed_create(confirmed_proof(&chain, &key, 5), &key);
    let size = create.serialized_size().unwrap() as u64;
    platform.submit(&create).unwrap();

    let identity = platform.get_identity(&create.identity_id()).unwrap();
    assert_eq!(identity.balance, 5000 - size);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_top_ups_add_value_minus_fee(first in 1u64..50, second in 1u64..50) {
        let (chain, platform, _) = setup(&PlatformConfig::default());
        let key = keypair();
        let create = signed_create(confirmed_proof(&chain, &key, first), &key);
        platform.submit(&create).unwrap();
        let identity_id = create.identity_id();

        platform
            .submit(&signed_top_up(identity_id, confirmed_proof(&chain, &key, second), &key))
            .unwrap();

        let balance = platform.get_identity(&identity_id).unwrap().balance;
        prop_assert_eq!(balance, first * 1000 - 174 + second * 1000 - 174);
    }

    #[test]
    fn prop_batches_never_leave_negative_balance(value in 1u64..5, operations in 1usize..6) {
        let (chain, platform, _) = setup(&PlatformConfig::default());
        let key = keypair();
        let create = signed_create(confirmed_proof(&chain, &key, value), &key);
        platform.submit(&create).unwrap();
        let owner = create.identity_id();
        let before = value * 1000 - 174;

        let ops = (0..operations)
            .map(|i| DocumentOperation::create("c", "note", &owner, &[i as u8], json!({})))
            .collect();
        let mut batch = StateTransition::documents_batch(owner, ops);
        batch.sign(&key, 0).unwrap();
        let fee = operations as u64 * 1000;

        let result = platform.submit(&batch);
        let after = platform.get_identity(&owner).unwrap().balance;
        if fee <= before {
            prop_assert!(result.is_ok());
            prop_assert_eq!(after, before - fee);
        } else {
            prop_assert_eq!(
                result,
                Err(TransitionError::InsufficientCredits { required: fee, available: before })
            );
            prop_assert_eq!(after, before);
        }
    }
}
