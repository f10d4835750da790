use std::time::Duration;

use er_lifecycle::account::{AccountAddress, AuthorityMode, Instruction, LifecycleState, SignedRequest};
use er_lifecycle::client::{wait_for_commitment, PollPolicy};
use er_lifecycle::commit::CommitStatus;
use er_lifecycle::config::LifecycleConfig;
use er_lifecycle::crypto::KeyPair;
use er_lifecycle::node::Cluster;
use er_lifecycle::vrf::derive_payload;
use er_lifecycle::LifecycleError;

fn cluster() -> Cluster {
    Cluster::in_memory(&LifecycleConfig::default()).unwrap()
}

fn policy() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(1), Duration::from_millis(10), Duration::from_secs(2))
}

fn init_and_delegate(c: &Cluster, owner: &KeyPair) -> AccountAddress {
    c.initialize(&c.request(Instruction::Initialize, owner)).unwrap();
    c.delegate(&c.request(Instruction::Delegate { validator: c.validator() }, owner))
        .unwrap();
    c.pump();
    c.address_of(&owner.pubkey())
}

#[tokio::test]
async fn full_round_trip_ends_with_fresh_account() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = c.address_of(&owner.pubkey());

    let record = c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
    assert_eq!(record.payload, 0);
    assert_eq!(record.lifecycle, LifecycleState::Active);

    let seed = [5u8; 32];
    let attestation = c.attest(&address, seed).unwrap();
    let payload = c
        .update(&c.request(Instruction::Update { caller_seed: seed }, &owner), Some(&attestation))
        .unwrap();
    assert_eq!(payload, derive_payload(0, &attestation.randomness));

    c.delegate(&c.request(Instruction::Delegate { validator: c.validator() }, &owner))
        .unwrap();
    assert_eq!(c.get_account(&address).unwrap().lifecycle, LifecycleState::Delegated);
    c.pump();

    let ticket = c
        .ephemeral_update_commit(&c.request(
            Instruction::EphemeralUpdateCommit { value: 43, idempotency_key: None },
            &owner,
        ))
        .unwrap();
    assert_eq!(c.get_commitment_signature(&ticket), CommitStatus::Pending);

    c.pump();
    let signature = wait_for_commitment(&c, &ticket, &policy()).await.unwrap();
    assert_eq!(c.get_commitment(&ticket).unwrap().signature, signature);

    c.undelegate(&c.request(Instruction::Undelegate, &owner)).unwrap();
    c.pump();
    let record = c.get_account(&address).unwrap();
    assert_eq!(record.lifecycle, LifecycleState::Active);
    assert_eq!(record.authority_mode, AuthorityMode::BaseLayerWritable);
    assert_eq!(record.payload, 43);

    c.close(&c.request(Instruction::Close, &owner)).unwrap();
    let fresh = c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
    assert_eq!(fresh.payload, 0);
}

#[test]
fn close_while_delegated_is_rejected() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = init_and_delegate(&c, &owner);

    let err = c.close(&c.request(Instruction::Close, &owner)).unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    assert_eq!(c.get_account(&address).unwrap().lifecycle, LifecycleState::Delegated);
}

#[test]
fn close_by_another_owner_is_rejected() {
    let c = cluster();
    let owner = KeyPair::generate();
    let intruder = KeyPair::generate();
    let address = c.address_of(&owner.pubkey());
    c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
    let before = c.get_account(&address).unwrap();

    // Intruder claims to be the owner
    let forged = SignedRequest::new(Instruction::Close, owner.pubkey(), address, intruder.pubkey())
        .signed_by(&intruder);
    assert!(matches!(c.close(&forged).unwrap_err(), LifecycleError::AuthorizationMismatch(_)));

    // Intruder signs as itself but targets someone else's account
    let wrong_account = SignedRequest::from_owner(Instruction::Close, &intruder, address);
    assert!(matches!(
        c.close(&wrong_account).unwrap_err(),
        LifecycleError::AuthorizationMismatch(_)
    ));

    assert_eq!(c.get_account(&address).unwrap(), before);
}

#[test]
fn closed_account_is_not_found_until_reinitialized() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = c.address_of(&owner.pubkey());
    c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
    c.close(&c.request(Instruction::Close, &owner)).unwrap();

    assert!(matches!(c.get_account(&address), Err(LifecycleError::NotFound(_))));
    let attestation_err = c.attest(&address, [1u8; 32]).unwrap_err();
    assert!(matches!(attestation_err, LifecycleError::NotFound(_)));
    for instruction in [
        Instruction::Delegate { validator: c.validator() },
        Instruction::Undelegate,
        Instruction::Close,
    ] {
        let req = c.request(instruction, &owner);
        let err = match req.instruction {
            Instruction::Delegate { .. } => c.delegate(&req).unwrap_err(),
            Instruction::Undelegate => c.undelegate(&req).unwrap_err(),
            _ => c.close(&req).map(|_| ()).unwrap_err(),
        };
        assert!(matches!(err, LifecycleError::NotFound(_)), "{:?}", err);
    }

    c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
    assert_eq!(c.get_account(&address).unwrap().payload, 0);
}

#[test]
fn second_initialize_leaves_account_untouched() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = c.address_of(&owner.pubkey());
    c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
    let seed = [2u8; 32];
    let attestation = c.attest(&address, seed).unwrap();
    c.update(&c.request(Instruction::Update { caller_seed: seed }, &owner), Some(&attestation))
        .unwrap();
    let before = c.get_account(&address).unwrap();

    let err = c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyExists(_)));
    assert_eq!(c.get_account(&address).unwrap(), before);
}

#[test]
fn update_without_randomness_proof_never_mutates() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = c.address_of(&owner.pubkey());
    c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();

    for seed in [[0u8; 32], [1u8; 32], [0xffu8; 32]] {
        let err = c
            .update(&c.request(Instruction::Update { caller_seed: seed }, &owner), None)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::MissingRandomnessProof(_)));
    }

    // Attestation bound to a different seed than the one submitted
    let attestation = c.attest(&address, [1u8; 32]).unwrap();
    let err = c
        .update(&c.request(Instruction::Update { caller_seed: [2u8; 32] }, &owner), Some(&attestation))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::MissingRandomnessProof(_)));
    assert_eq!(c.get_account(&address).unwrap().payload, 0);
}

#[test]
fn delegated_account_refuses_base_update_until_undelegated() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = init_and_delegate(&c, &owner);

    let seed = [3u8; 32];
    let attestation = c.attest(&address, seed).unwrap();
    let err = c
        .update(&c.request(Instruction::Update { caller_seed: seed }, &owner), Some(&attestation))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));

    c.undelegate(&c.request(Instruction::Undelegate, &owner)).unwrap();
    c.pump();
    c.update(&c.request(Instruction::Update { caller_seed: seed }, &owner), Some(&attestation))
        .unwrap();
}

#[test]
fn non_owner_commit_leaves_both_layers_unchanged() {
    let c = cluster();
    let owner = KeyPair::generate();
    let intruder = KeyPair::generate();
    let address = init_and_delegate(&c, &owner);
    c.ephemeral_update(&c.request(Instruction::EphemeralUpdate { value: 8 }, &owner))
        .unwrap();

    let forged = SignedRequest::new(
        Instruction::EphemeralUpdateCommit { value: 666, idempotency_key: None },
        owner.pubkey(),
        address,
        intruder.pubkey(),
    )
    .signed_by(&intruder);
    let err = c.ephemeral_update_commit(&forged).unwrap_err();
    assert!(matches!(err, LifecycleError::AuthorizationMismatch(_)));

    c.pump();
    assert_eq!(c.get_ephemeral_account(&address).unwrap().payload, 8);
    assert_eq!(c.get_account(&address).unwrap().payload, 0);
}

#[test]
fn second_delegation_is_rejected() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = init_and_delegate(&c, &owner);

    let err = c
        .delegate(&c.request(Instruction::Delegate { validator: c.validator() }, &owner))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
    assert_eq!(
        c.get_account(&address).unwrap().authority_mode,
        AuthorityMode::Delegated(c.validator())
    );
}

fn keyed_commit(c: &Cluster, owner: &KeyPair, value: u64, key: &str) -> SignedRequest {
    c.request(
        Instruction::EphemeralUpdateCommit { value, idempotency_key: Some(key.to_string()) },
        owner,
    )
}

#[test]
fn reused_key_in_new_delegation_commits_new_value() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = init_and_delegate(&c, &owner);

    let first = c.ephemeral_update_commit(&keyed_commit(&c, &owner, 43, "k1")).unwrap();
    c.pump();
    c.undelegate(&c.request(Instruction::Undelegate, &owner)).unwrap();
    c.pump();

    c.delegate(&c.request(Instruction::Delegate { validator: c.validator() }, &owner))
        .unwrap();
    c.pump();
    let second = c.ephemeral_update_commit(&keyed_commit(&c, &owner, 50, "k1")).unwrap();
    assert_ne!(first, second);
    c.pump();

    assert_eq!(c.get_account(&address).unwrap().payload, 50);
    assert_eq!(c.get_commitment(&first).unwrap().payload, 43);
    assert_eq!(c.get_commitment(&second).unwrap().payload, 50);
}

#[test]
fn reused_key_after_close_and_reinitialize_commits_new_value() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = init_and_delegate(&c, &owner);

    let first = c.ephemeral_update_commit(&keyed_commit(&c, &owner, 43, "k1")).unwrap();
    c.undelegate(&c.request(Instruction::Undelegate, &owner)).unwrap();
    c.pump();
    c.close(&c.request(Instruction::Close, &owner)).unwrap();

    init_and_delegate(&c, &owner);
    let second = c.ephemeral_update_commit(&keyed_commit(&c, &owner, 7, "k1")).unwrap();
    c.pump();

    assert_ne!(first, second);
    assert_eq!(c.get_account(&address).unwrap().payload, 7);
    assert!(c.get_commitment(&second).unwrap().applied);
}

#[test]
fn resubmitted_commit_request_returns_original_ticket() {
    let c = cluster();
    let owner = KeyPair::generate();
    let address = init_and_delegate(&c, &owner);

    let request = c.request(
        Instruction::EphemeralUpdateCommit { value: 12, idempotency_key: None },
        &owner,
    );
    let ticket = c.ephemeral_update_commit(&request).unwrap();
    assert_eq!(c.ephemeral_update_commit(&request).unwrap(), ticket);

    c.pump();
    assert_eq!(c.ephemeral_update_commit(&request).unwrap(), ticket);
    assert_eq!(c.get_account(&address).unwrap().payload, 12);
    assert!(matches!(c.get_commitment_signature(&ticket), CommitStatus::Committed(_)));
}
