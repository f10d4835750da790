//! In-process cluster: one base layer, one ephemeral validator and the relay
//! between them.
//!
//! Every operation returns as soon as the layer it targets has accepted it.
//! Cross-ledger effects travel through the relay and only become visible once
//! delivered, either by [`Cluster::pump`] or by the task started with
//! [`Cluster::spawn_relay`].

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::account::{
    AccountAddress, AccountRecord, AddressDeriver, AuthorityMode, Instruction, SignedRequest,
};
use crate::base::BaseLayer;
use crate::client::{CommitmentSource, DelegationSource};
use crate::commit::{CommitStatus, CommitTicket, CommitmentArtifact};
use crate::config::LifecycleConfig;
use crate::crypto::{KeyPair, Pubkey};
use crate::ephemeral::{EphemeralMirror, MirroredAccount};
use crate::error::{LifecycleError, Result};
use crate::identity;
use crate::relay::{now_ms, Direction, Relay, RelayMessage, RelayStats};
use crate::storage::Storage;
use crate::vrf::{RandomnessRequest, TrustedSignerVerifier, VrfAttestation, VrfOracle};

// A poisoned lock only means another holder panicked; the state behind it
// is still all-or-nothing per operation.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct Cluster {
    pub base: Arc<Mutex<BaseLayer>>,
    pub mirror: Arc<Mutex<EphemeralMirror>>,
    pub relay: Arc<Mutex<Relay>>,
    oracle: Arc<VrfOracle>,
    storage: Option<Arc<Storage>>,
    deriver: AddressDeriver,
    validator: Pubkey,
    tick: Duration,
}

impl Cluster {
    pub fn new(base: BaseLayer, mirror: EphemeralMirror, relay: Relay, oracle: VrfOracle, tick: Duration) -> Self {
        let deriver = base.deriver().clone();
        let validator = mirror.validator();
        Self {
            base: Arc::new(Mutex::new(base)),
            mirror: Arc::new(Mutex::new(mirror)),
            relay: Arc::new(Mutex::new(relay)),
            oracle: Arc::new(oracle),
            storage: None,
            deriver,
            validator,
            tick,
        }
    }

    /// Cluster without persistence and with a zero-delay relay
    pub fn in_memory(config: &LifecycleConfig) -> Result<Self> {
        Self::build(config, KeyPair::generate(), KeyPair::generate().pubkey(), None, Relay::immediate())
    }

    /// Cluster backed by the sled database and identity files named in `config`
    pub fn from_config(config: &LifecycleConfig) -> Result<Self> {
        info!("Persistence: opening sled DB at '{}'", config.node.db_path);
        let storage = Arc::new(Storage::new(&config.node.db_path)?);
        let identity = identity::load_or_create(Path::new(&config.node.identity_file))?;
        let validator = identity::load_or_create(Path::new(&config.node.validator_identity_file))?;
        let relay = Relay::new(config.relay.delegation_delay_ms, config.relay.commit_delay_ms);
        Self::build(config, identity, validator.pubkey(), Some(storage), relay)
    }

    fn build(
        config: &LifecycleConfig,
        identity: KeyPair,
        validator: Pubkey,
        storage: Option<Arc<Storage>>,
        mut relay: Relay,
    ) -> Result<Self> {
        let program_id = config
            .protocol
            .program_id()
            .map_err(|e| LifecycleError::Config(format!("program_id: {}", e)))?;
        let deriver = AddressDeriver::new(program_id, config.protocol.namespace_tag.clone());

        let oracle = VrfOracle::new(KeyPair::generate());
        let mut trusted = config.protocol.trusted_signers();
        trusted.push(oracle.pubkey());
        let verifier = Box::new(TrustedSignerVerifier::new(trusted));

        let base = match &storage {
            Some(storage) => BaseLayer::with_storage(
                identity,
                deriver.clone(),
                verifier,
                config.protocol.rent_reserve,
                storage.clone(),
            )?,
            None => BaseLayer::new(identity, deriver.clone(), verifier, config.protocol.rent_reserve),
        };
        let mut mirror = EphemeralMirror::new(validator, deriver);

        // The mirror keeps no state of its own across restarts: re-clone what
        // the base layer still lends to it and re-issue lost undelegations.
        for record in base.delegated_to(&validator) {
            mirror.observe_delegation(&record, &validator)?;
            if let AuthorityMode::PendingUndelegate(v) = record.authority_mode {
                relay.send(RelayMessage::UndelegateRequested { address: record.address, validator: v });
            }
            info!("Cluster: re-adopted delegated account {}", record.address);
        }

        info!(
            "Cluster ready: base identity {}, validator {}, oracle {}",
            base.identity(),
            mirror.validator(),
            oracle.pubkey()
        );
        let mut cluster = Self::new(base, mirror, relay, oracle, Duration::from_millis(config.relay.tick_ms));
        cluster.storage = storage;
        Ok(cluster)
    }

    pub fn validator(&self) -> Pubkey {
        self.validator
    }

    pub fn base_identity(&self) -> Pubkey {
        lock(&self.base).identity()
    }

    pub fn address_of(&self, owner: &Pubkey) -> AccountAddress {
        self.deriver.derive(owner)
    }

    /// Build a request for `owner`'s own account, signed by `owner`
    pub fn request(&self, instruction: Instruction, owner: &KeyPair) -> SignedRequest {
        SignedRequest::from_owner(instruction, owner, self.address_of(&owner.pubkey()))
    }

    // --- Base layer ---

    pub fn initialize(&self, request: &SignedRequest) -> Result<AccountRecord> {
        lock(&self.base).initialize(request)
    }

    pub fn update(&self, request: &SignedRequest, attestation: Option<&VrfAttestation>) -> Result<u64> {
        lock(&self.base).update(request, attestation)
    }

    /// Ask the oracle directly for an attestation over the account's current nonce
    pub fn attest(&self, address: &AccountAddress, caller_seed: [u8; 32]) -> Result<VrfAttestation> {
        let record = lock(&self.base).get_account(address)?;
        let request = RandomnessRequest {
            address: record.address,
            owner: record.owner,
            caller_seed,
            nonce: record.vrf_nonce,
        };
        Ok(self.oracle.attest(&request))
    }

    pub fn request_randomness(&self, request: &SignedRequest) -> Result<RandomnessRequest> {
        lock(&self.base).request_randomness(request)
    }

    /// Let the oracle answer every queued randomness request.
    /// Returns how many callbacks were applied.
    pub fn fulfil_randomness(&self) -> usize {
        let mut base = lock(&self.base);
        let mut applied = 0;
        while let Some(pending) = base.next_randomness_request() {
            let attestation = self.oracle.attest(&pending);
            match base.consume_randomness(&attestation) {
                Ok(_) => applied += 1,
                Err(e) => warn!("Oracle: callback for {} rejected: {}", pending.address, e),
            }
        }
        applied
    }

    /// Only the validator this cluster runs can take delegations
    pub fn delegate(&self, request: &SignedRequest) -> Result<()> {
        if let Instruction::Delegate { validator } = &request.instruction {
            if *validator != self.validator {
                return Err(LifecycleError::AuthorizationMismatch(format!(
                    "validator {} is not served by this cluster",
                    validator
                )));
            }
        }
        let message = lock(&self.base).delegate(request)?;
        lock(&self.relay).send(message);
        Ok(())
    }

    pub fn undelegate(&self, request: &SignedRequest) -> Result<()> {
        let message = lock(&self.base).undelegate(request)?;
        lock(&self.relay).send(message);
        Ok(())
    }

    /// Returns the reserve refunded to the owner
    pub fn close(&self, request: &SignedRequest) -> Result<u64> {
        lock(&self.base).close(request)
    }

    /// Base-layer record; stale while delegated
    pub fn get_account(&self, address: &AccountAddress) -> Result<AccountRecord> {
        lock(&self.base).get_account(address)
    }

    /// Pure query; `Pending` until the commit has been applied on the base layer
    pub fn get_commitment_signature(&self, ticket: &CommitTicket) -> CommitStatus {
        lock(&self.base).commitment_status(ticket)
    }

    pub fn get_commitment(&self, ticket: &CommitTicket) -> Option<CommitmentArtifact> {
        lock(&self.base).commitment(ticket)
    }

    // --- Ephemeral layer ---

    pub fn ephemeral_update(&self, request: &SignedRequest) -> Result<u64> {
        lock(&self.mirror).ephemeral_update(request)
    }

    pub fn ephemeral_update_commit(&self, request: &SignedRequest) -> Result<CommitTicket> {
        let (ticket, commit) = lock(&self.mirror).update_commit(request)?;
        if let Some(commit) = commit {
            lock(&self.relay).send(RelayMessage::ScheduleCommit(commit));
        }
        Ok(ticket)
    }

    pub fn commit(&self, request: &SignedRequest) -> Result<CommitTicket> {
        let (ticket, commit) = lock(&self.mirror).commit(request)?;
        lock(&self.relay).send(RelayMessage::ScheduleCommit(commit));
        Ok(ticket)
    }

    pub fn get_ephemeral_account(&self, address: &AccountAddress) -> Result<MirroredAccount> {
        lock(&self.mirror).get_account(address)
    }

    // --- Relay ---

    /// Deliver everything in flight, ignoring delays, until the relay is idle.
    /// Returns the number of messages delivered.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        loop {
            let round = self.deliver(u128::MAX);
            if round == 0 && lock(&self.relay).is_idle() {
                return delivered;
            }
            delivered += round;
        }
    }

    /// Deliver only messages whose propagation delay has elapsed
    pub fn pump_ready(&self) -> usize {
        self.deliver(now_ms())
    }

    /// Run delivery in the background every `tick_ms`
    pub fn spawn_relay(&self) -> JoinHandle<()> {
        let cluster = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cluster.tick);
            loop {
                interval.tick().await;
                let delivered = cluster.pump_ready();
                if delivered > 0 {
                    debug!("Relay: delivered {} messages", delivered);
                }
            }
        })
    }

    /// Flush persisted base-layer state; no-op without storage
    pub fn flush(&self) -> Result<()> {
        match &self.storage {
            Some(storage) => storage.flush(),
            None => Ok(()),
        }
    }

    pub fn relay_stats(&self) -> RelayStats {
        lock(&self.relay).get_stats()
    }

    // One pass over both directions; never holds two locks at once
    fn deliver(&self, now: u128) -> usize {
        let mut delivered = 0;

        let to_ephemeral = lock(&self.relay).drain_ready(Direction::ToEphemeral, now);
        for entry in to_ephemeral {
            let outcome = lock(&self.mirror).handle(&entry.message);
            let mut relay = lock(&self.relay);
            match outcome {
                Ok(reply) => {
                    relay.mark_delivered(&entry);
                    if let Some(reply) = reply {
                        relay.send(reply);
                    }
                }
                Err(e) => relay.mark_failed(&entry, &e.to_string()),
            }
            delivered += 1;
        }

        let to_base = lock(&self.relay).drain_ready(Direction::ToBase, now);
        for entry in to_base {
            let outcome = lock(&self.base).handle(&entry.message);
            let mut relay = lock(&self.relay);
            match outcome {
                Ok(()) => relay.mark_delivered(&entry),
                Err(e) => relay.mark_failed(&entry, &e.to_string()),
            }
            delivered += 1;
        }

        delivered
    }
}

#[async_trait]
impl CommitmentSource for Cluster {
    async fn commitment_status(&self, ticket: &CommitTicket) -> CommitStatus {
        self.get_commitment_signature(ticket)
    }
}

#[async_trait]
impl DelegationSource for Cluster {
    async fn is_delegated(&self, address: &AccountAddress) -> bool {
        lock(&self.mirror).is_delegated(address)
    }

    async fn is_released(&self, address: &AccountAddress) -> bool {
        lock(&self.base)
            .get_account(address)
            .map(|record| record.is_base_writable())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AuthorityMode, LifecycleState};
    use crate::client::{wait_for_commitment, wait_for_delegation, PollPolicy};

    fn cluster() -> Cluster {
        Cluster::in_memory(&LifecycleConfig::default()).unwrap()
    }

    fn delegated(c: &Cluster, owner: &KeyPair) -> AccountAddress {
        c.initialize(&c.request(Instruction::Initialize, owner)).unwrap();
        c.delegate(&c.request(Instruction::Delegate { validator: c.validator() }, owner))
            .unwrap();
        c.pump();
        c.address_of(&owner.pubkey())
    }

    #[test]
    fn test_delegation_is_not_visible_until_delivered() {
        let c = cluster();
        let owner = KeyPair::generate();
        let address = c.address_of(&owner.pubkey());
        c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
        c.delegate(&c.request(Instruction::Delegate { validator: c.validator() }, &owner))
            .unwrap();

        let write = c.request(Instruction::EphemeralUpdate { value: 5 }, &owner);
        assert!(matches!(
            c.ephemeral_update(&write).unwrap_err(),
            LifecycleError::InvalidStateTransition { .. }
        ));

        assert_eq!(c.pump(), 1);
        let write = c.request(Instruction::EphemeralUpdate { value: 5 }, &owner);
        assert_eq!(c.ephemeral_update(&write).unwrap(), 5);
        assert_eq!(c.get_account(&address).unwrap().payload, 0);
    }

    #[test]
    fn test_commit_is_pending_until_pumped() {
        let c = cluster();
        let owner = KeyPair::generate();
        let address = delegated(&c, &owner);

        let req = c.request(
            Instruction::EphemeralUpdateCommit { value: 43, idempotency_key: None },
            &owner,
        );
        let ticket = c.ephemeral_update_commit(&req).unwrap();
        assert!(c.get_commitment_signature(&ticket).is_pending());

        c.pump();
        assert!(!c.get_commitment_signature(&ticket).is_pending());
        assert!(c.get_commitment(&ticket).unwrap().verify(&c.base_identity()));
        assert_eq!(c.get_account(&address).unwrap().payload, 43);
    }

    #[test]
    fn test_idempotency_key_schedules_once() {
        let c = cluster();
        let owner = KeyPair::generate();
        delegated(&c, &owner);

        let commit = |value| {
            c.request(
                Instruction::EphemeralUpdateCommit { value, idempotency_key: Some("k1".to_string()) },
                &owner,
            )
        };
        let first = c.ephemeral_update_commit(&commit(7)).unwrap();
        let second = c.ephemeral_update_commit(&commit(7)).unwrap();
        assert_eq!(first, second);
        assert_eq!(c.relay_stats().messages_sent, 2);
        assert!(matches!(
            c.ephemeral_update_commit(&commit(8)).unwrap_err(),
            LifecycleError::IdempotencyConflict(_)
        ));
    }

    #[test]
    fn test_commit_publishes_ephemeral_writes() {
        let c = cluster();
        let owner = KeyPair::generate();
        let address = delegated(&c, &owner);

        c.ephemeral_update(&c.request(Instruction::EphemeralUpdate { value: 21 }, &owner))
            .unwrap();
        c.pump();
        assert_eq!(c.get_account(&address).unwrap().payload, 0);

        let ticket = c.commit(&c.request(Instruction::Commit, &owner)).unwrap();
        c.pump();
        let artifact = c.get_commitment(&ticket).unwrap();
        assert!(artifact.applied);
        assert_eq!(artifact.payload, 21);
        assert_eq!(c.get_account(&address).unwrap().payload, 21);
        assert_eq!(c.get_ephemeral_account(&address).unwrap().payload, 21);
    }

    #[test]
    fn test_undelegate_carries_uncommitted_writes() {
        let c = cluster();
        let owner = KeyPair::generate();
        let address = delegated(&c, &owner);

        c.ephemeral_update(&c.request(Instruction::EphemeralUpdate { value: 11 }, &owner))
            .unwrap();
        c.undelegate(&c.request(Instruction::Undelegate, &owner)).unwrap();
        assert!(matches!(
            c.get_account(&address).unwrap().authority_mode,
            AuthorityMode::PendingUndelegate(_)
        ));

        c.pump();
        let record = c.get_account(&address).unwrap();
        assert_eq!(record.payload, 11);
        assert_eq!(record.lifecycle, LifecycleState::Active);
        assert!(matches!(c.get_ephemeral_account(&address), Err(LifecycleError::NotFound(_))));
    }

    #[test]
    fn test_oracle_fulfils_queued_requests() {
        let c = cluster();
        let owner = KeyPair::generate();
        let address = c.address_of(&owner.pubkey());
        c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
        c.request_randomness(&c.request(Instruction::RequestRandomness { caller_seed: [3u8; 32] }, &owner))
            .unwrap();

        assert_eq!(c.fulfil_randomness(), 1);
        assert_eq!(c.fulfil_randomness(), 0);
        assert_eq!(c.get_account(&address).unwrap().vrf_nonce, 1);
    }

    #[test]
    fn test_delegate_to_unserved_validator_is_refused() {
        let c = cluster();
        let owner = KeyPair::generate();
        let address = c.address_of(&owner.pubkey());
        c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();

        let elsewhere = KeyPair::generate().pubkey();
        let req = c.request(Instruction::Delegate { validator: elsewhere }, &owner);
        assert!(matches!(
            c.delegate(&req).unwrap_err(),
            LifecycleError::AuthorizationMismatch(_)
        ));
        assert_eq!(c.relay_stats().messages_sent, 0);

        let record = c.get_account(&address).unwrap();
        assert_eq!(record.authority_mode, AuthorityMode::BaseLayerWritable);
        c.close(&c.request(Instruction::Close, &owner)).unwrap();
    }

    fn restart(storage: &Arc<Storage>, validator: &KeyPair) -> Cluster {
        Cluster::build(
            &LifecycleConfig::default(),
            KeyPair::generate(),
            validator.pubkey(),
            Some(storage.clone()),
            Relay::immediate(),
        )
        .unwrap()
    }

    #[test]
    fn test_restart_readopts_delegated_accounts() {
        let storage = Arc::new(Storage::temporary().unwrap());
        let validator = KeyPair::generate();
        let owner = KeyPair::generate();

        let before = restart(&storage, &validator);
        let address = delegated(&before, &owner);
        drop(before);

        let after = restart(&storage, &validator);
        assert!(after.get_ephemeral_account(&address).is_ok());
        let ticket = after
            .ephemeral_update_commit(&after.request(
                Instruction::EphemeralUpdateCommit { value: 17, idempotency_key: None },
                &owner,
            ))
            .unwrap();
        after.undelegate(&after.request(Instruction::Undelegate, &owner)).unwrap();
        after.pump();

        assert!(after.get_commitment(&ticket).unwrap().applied);
        assert_eq!(after.get_account(&address).unwrap().payload, 17);
        after.close(&after.request(Instruction::Close, &owner)).unwrap();
    }

    #[test]
    fn test_restart_resumes_pending_undelegate() {
        let storage = Arc::new(Storage::temporary().unwrap());
        let validator = KeyPair::generate();
        let owner = KeyPair::generate();

        let before = restart(&storage, &validator);
        let address = delegated(&before, &owner);
        before
            .ephemeral_update_commit(&before.request(
                Instruction::EphemeralUpdateCommit { value: 43, idempotency_key: None },
                &owner,
            ))
            .unwrap();
        before.pump();
        before.undelegate(&before.request(Instruction::Undelegate, &owner)).unwrap();
        drop(before);

        let after = restart(&storage, &validator);
        assert_eq!(after.pump(), 2);
        let record = after.get_account(&address).unwrap();
        assert_eq!(record.authority_mode, AuthorityMode::BaseLayerWritable);
        assert_eq!(record.payload, 43);
        after.close(&after.request(Instruction::Close, &owner)).unwrap();
    }

    #[test]
    fn test_validator_key_comes_from_identity_file() {
        let dir = std::env::temp_dir().join(format!("er-cluster-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("validator.json");

        let first = identity::load_or_create(&path).unwrap();
        let second = identity::load_or_create(&path).unwrap();
        let storage = Arc::new(Storage::temporary().unwrap());
        assert_eq!(restart(&storage, &first).validator(), restart(&storage, &second).validator());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_background_relay_with_polling() {
        let mut config = LifecycleConfig::default();
        config.relay.tick_ms = 5;
        let c = Cluster::build(
            &config,
            KeyPair::generate(),
            KeyPair::generate().pubkey(),
            None,
            Relay::new(20, 10),
        )
        .unwrap();
        let handle = c.spawn_relay();
        let policy = PollPolicy::new(
            Duration::from_millis(2),
            Duration::from_millis(20),
            Duration::from_secs(5),
        );

        let owner = KeyPair::generate();
        let address = c.address_of(&owner.pubkey());
        c.initialize(&c.request(Instruction::Initialize, &owner)).unwrap();
        c.delegate(&c.request(Instruction::Delegate { validator: c.validator() }, &owner))
            .unwrap();
        wait_for_delegation(&c, &address, &policy).await.unwrap();

        let ticket = c
            .ephemeral_update_commit(&c.request(
                Instruction::EphemeralUpdateCommit { value: 9, idempotency_key: None },
                &owner,
            ))
            .unwrap();
        wait_for_commitment(&c, &ticket, &policy).await.unwrap();
        assert_eq!(c.get_account(&address).unwrap().payload, 9);

        handle.abort();
    }
}
