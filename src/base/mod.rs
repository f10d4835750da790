//! Base-layer program
//!
//! Owns the authoritative account records. Mutations pass the authorization
//! gate, are staged on a copy of the record, and are written back only once
//! every check has passed.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::account::{
    AccountAddress, AccountRecord, AccountStore, AddressDeriver, AuthorityMode, AuthorizationGate,
    Instruction, LifecycleState, Operation, SignedRequest,
};
use crate::commit::{CommitLog, CommitRequest, CommitStatus, CommitTicket, CommitmentArtifact};
use crate::crypto::{KeyPair, Pubkey};
use crate::error::{LifecycleError, Result};
use crate::relay::RelayMessage;
use crate::storage::Storage;
use crate::vrf::{derive_payload, AttestationVerifier, RandomnessQueue, RandomnessRequest, VrfAttestation};

pub struct BaseLayer {
    identity: KeyPair,
    gate: AuthorizationGate,
    accounts: AccountStore,
    commits: CommitLog,
    verifier: Box<dyn AttestationVerifier>,
    randomness: RandomnessQueue,
    rent_reserve: u64,
    // Resources released back to owners on close
    reclaimed: HashMap<Pubkey, u64>,
}

impl BaseLayer {
    pub fn new(
        identity: KeyPair,
        deriver: AddressDeriver,
        verifier: Box<dyn AttestationVerifier>,
        rent_reserve: u64,
    ) -> Self {
        Self {
            identity,
            gate: AuthorizationGate::new(deriver),
            accounts: AccountStore::new(),
            commits: CommitLog::new(),
            verifier,
            randomness: RandomnessQueue::new(),
            rent_reserve,
            reclaimed: HashMap::new(),
        }
    }

    /// Same as [`BaseLayer::new`] with records and artifacts persisted in `storage`
    pub fn with_storage(
        identity: KeyPair,
        deriver: AddressDeriver,
        verifier: Box<dyn AttestationVerifier>,
        rent_reserve: u64,
        storage: Arc<Storage>,
    ) -> Result<Self> {
        let mut layer = Self::new(identity, deriver, verifier, rent_reserve);
        layer.accounts = AccountStore::with_storage(storage.clone())?;
        layer.commits = CommitLog::with_storage(storage)?;
        info!(
            "Base layer: restored {} accounts, {} commitments",
            layer.accounts.len(),
            layer.commits.len()
        );
        Ok(layer)
    }

    /// Key that signs commitment artifacts
    pub fn identity(&self) -> Pubkey {
        self.identity.pubkey()
    }

    pub fn deriver(&self) -> &AddressDeriver {
        self.gate.deriver()
    }

    /// Read-only view; stale while the account is delegated
    pub fn get_account(&self, address: &AccountAddress) -> Result<AccountRecord> {
        self.accounts.get(address).cloned()
    }

    /// Records whose write authority currently sits with `validator`
    pub fn delegated_to(&self, validator: &Pubkey) -> Vec<AccountRecord> {
        self.accounts
            .all_accounts()
            .into_iter()
            .filter(|record| record.authority_mode.validator() == Some(*validator))
            .cloned()
            .collect()
    }

    /// Create the owner's account with an empty payload
    pub fn initialize(&mut self, request: &SignedRequest) -> Result<AccountRecord> {
        self.gate.authorize(request, Operation::Initialize)?;

        let record = AccountRecord::new(request.target, request.owner, self.rent_reserve);
        self.accounts.insert_new(record.clone())?;
        self.gate.mark_processed(request);

        info!("Base layer: initialized {} for owner {}", record.address, record.owner);
        Ok(record)
    }

    /// Randomness-gated update signed by the owner
    pub fn update(&mut self, request: &SignedRequest, attestation: Option<&VrfAttestation>) -> Result<u64> {
        self.gate.authorize(request, Operation::Update)?;
        let caller_seed = match &request.instruction {
            Instruction::Update { caller_seed } => *caller_seed,
            _ => return Err(LifecycleError::AuthorizationMismatch("malformed update".to_string())),
        };
        let record = self.accounts.get(&request.target)?;
        self.gate.authorize_record(request, record)?;
        AuthorizationGate::check_transition(Operation::Update, record)?;

        let attestation = attestation.ok_or_else(|| {
            LifecycleError::MissingRandomnessProof("no attestation supplied".to_string())
        })?;
        let payload = self.apply_randomness(&request.target, &caller_seed, attestation)?;
        self.gate.mark_processed(request);
        Ok(payload)
    }

    /// Queue a randomness request for the oracle to fulfil
    pub fn request_randomness(&mut self, request: &SignedRequest) -> Result<RandomnessRequest> {
        self.gate.authorize(request, Operation::RequestRandomness)?;
        let caller_seed = match &request.instruction {
            Instruction::RequestRandomness { caller_seed } => *caller_seed,
            _ => return Err(LifecycleError::AuthorizationMismatch("malformed request".to_string())),
        };
        let record = self.accounts.get(&request.target)?;
        self.gate.authorize_record(request, record)?;
        AuthorizationGate::check_transition(Operation::RequestRandomness, record)?;

        let pending = RandomnessRequest {
            address: record.address,
            owner: record.owner,
            caller_seed,
            nonce: record.vrf_nonce,
        };
        self.randomness.push(pending.clone());
        self.gate.mark_processed(request);
        debug!("Base layer: randomness requested for {} (nonce {})", pending.address, pending.nonce);
        Ok(pending)
    }

    /// Oldest request waiting on the oracle
    pub fn next_randomness_request(&mut self) -> Option<RandomnessRequest> {
        self.randomness.pop()
    }

    /// Oracle callback; the attestation itself authorizes the write
    pub fn consume_randomness(&mut self, attestation: &VrfAttestation) -> Result<u64> {
        let record = self.accounts.get(&attestation.address)?;
        AuthorizationGate::check_transition(Operation::Update, record)?;
        self.apply_randomness(&attestation.address, &attestation.caller_seed, attestation)
    }

    fn apply_randomness(
        &mut self,
        address: &AccountAddress,
        caller_seed: &[u8; 32],
        attestation: &VrfAttestation,
    ) -> Result<u64> {
        let record = self.accounts.get(address)?;
        let randomness = self.verifier.verify(attestation, address, record.vrf_nonce, caller_seed)?;

        let mut staged = record.clone();
        staged.payload = derive_payload(record.payload, &randomness);
        staged.vrf_nonce += 1;
        let payload = staged.payload;
        self.accounts.put(staged)?;
        self.randomness.cancel(address);

        info!("Base layer: randomness consumed for {}, payload now {}", address, payload);
        Ok(payload)
    }

    /// Lend write authority to `validator`
    pub fn delegate(&mut self, request: &SignedRequest) -> Result<RelayMessage> {
        self.gate.authorize(request, Operation::Delegate)?;
        let validator = match &request.instruction {
            Instruction::Delegate { validator } => *validator,
            _ => return Err(LifecycleError::AuthorizationMismatch("malformed delegate".to_string())),
        };
        let record = self.accounts.get(&request.target)?;
        self.gate.authorize_record(request, record)?;
        AuthorizationGate::check_transition(Operation::Delegate, record)?;

        let mut staged = record.clone();
        staged.authority_mode = AuthorityMode::Delegated(validator);
        staged.lifecycle = LifecycleState::Delegated;
        staged.delegation_id = uuid::Uuid::new_v4().to_string();
        self.accounts.put(staged.clone())?;
        self.randomness.cancel(&request.target);
        self.gate.mark_processed(request);

        info!("Base layer: {} delegated to validator {}", staged.address, validator);
        Ok(RelayMessage::Delegated { record: staged, validator })
    }

    /// Ask the validator to release the account. Authority returns once the
    /// validator's `Released` message is applied by [`BaseLayer::finalize_release`].
    pub fn undelegate(&mut self, request: &SignedRequest) -> Result<RelayMessage> {
        self.gate.authorize(request, Operation::Undelegate)?;
        let record = self.accounts.get(&request.target)?;
        self.gate.authorize_record(request, record)?;
        AuthorizationGate::check_transition(Operation::Undelegate, record)?;

        let validator = match record.authority_mode {
            AuthorityMode::Delegated(v) => v,
            _ => return Err(LifecycleError::transition(Operation::Undelegate, record.state_label())),
        };
        let mut staged = record.clone();
        staged.authority_mode = AuthorityMode::PendingUndelegate(validator);
        self.accounts.put(staged)?;
        self.gate.mark_processed(request);

        info!("Base layer: undelegation of {} requested from {}", request.target, validator);
        Ok(RelayMessage::UndelegateRequested {
            address: request.target,
            validator,
        })
    }

    /// Destroy the record and refund its reserve to the owner
    pub fn close(&mut self, request: &SignedRequest) -> Result<u64> {
        self.gate.authorize(request, Operation::Close)?;
        let record = self.accounts.get(&request.target)?;
        self.gate.authorize_record(request, record)?;
        AuthorizationGate::check_transition(Operation::Close, record)?;

        let removed = self.accounts.remove(&request.target)?;
        *self.reclaimed.entry(removed.owner).or_insert(0) += removed.reserve;
        self.randomness.cancel(&request.target);
        self.gate.mark_processed(request);

        info!("Base layer: closed {}, {} reclaimed by {}", removed.address, removed.reserve, removed.owner);
        Ok(removed.reserve)
    }

    /// Total resources refunded to `owner` by closes
    pub fn reclaimed_by(&self, owner: &Pubkey) -> u64 {
        self.reclaimed.get(owner).copied().unwrap_or(0)
    }

    /// Incorporate a commit from the validator holding the account.
    ///
    /// Idempotent per ticket. A commit older than the last applied sequence
    /// still gets an artifact (marked not applied) so pollers terminate.
    pub fn apply_commit(&mut self, request: &CommitRequest) -> Result<CommitmentArtifact> {
        if let Some(existing) = self.commits.get(&request.ticket) {
            Self::check_same_commit(existing, request)?;
            debug!("Base layer: commit {} already finalized", request.ticket);
            return Ok(existing.clone());
        }
        let record = self.accounts.get(&request.address)?;
        let (staged, applied) = Self::stage_commit(record, request)?;

        let artifact = CommitmentArtifact::sign(request, applied, &self.identity);
        self.accounts.put(staged)?;
        self.commits.record(artifact.clone())?;

        if applied {
            info!(
                "Base layer: commit {} applied to {} (seq {}, payload {})",
                request.ticket, request.address, request.sequence, request.payload
            );
        } else {
            warn!(
                "Base layer: commit {} for {} is stale (seq {}), recorded without applying",
                request.ticket, request.address, request.sequence
            );
        }
        Ok(artifact)
    }

    /// A ticket already finalized may only be re-delivered with the same content
    fn check_same_commit(existing: &CommitmentArtifact, request: &CommitRequest) -> Result<()> {
        if existing.address != request.address
            || existing.payload != request.payload
            || existing.sequence != request.sequence
        {
            warn!(
                "Base layer: commit {} re-delivered with different content (payload {} vs {})",
                request.ticket, request.payload, existing.payload
            );
            return Err(LifecycleError::IdempotencyConflict(request.ticket.to_string()));
        }
        Ok(())
    }

    fn stage_commit(record: &AccountRecord, request: &CommitRequest) -> Result<(AccountRecord, bool)> {
        if record.authority_mode.validator() != Some(request.validator) {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "validator {} does not hold {}",
                request.validator, request.address
            )));
        }
        let mut staged = record.clone();
        let applied = request.sequence > record.last_commit_sequence;
        if applied {
            staged.payload = request.payload;
            staged.last_commit_sequence = request.sequence;
        }
        Ok((staged, applied))
    }

    /// Apply the validator's final commit and restore base-layer authority
    pub fn finalize_release(
        &mut self,
        address: &AccountAddress,
        validator: &Pubkey,
        final_commit: &CommitRequest,
    ) -> Result<CommitmentArtifact> {
        let record = self.accounts.get(address)?;
        if record.authority_mode != AuthorityMode::PendingUndelegate(*validator) {
            return Err(LifecycleError::transition("release", record.state_label()));
        }
        let (mut staged, applied) = Self::stage_commit(record, final_commit)?;
        staged.authority_mode = AuthorityMode::BaseLayerWritable;
        staged.lifecycle = LifecycleState::Active;

        let artifact = match self.commits.get(&final_commit.ticket) {
            Some(existing) => {
                Self::check_same_commit(existing, final_commit)?;
                existing.clone()
            }
            None => CommitmentArtifact::sign(final_commit, applied, &self.identity),
        };
        self.accounts.put(staged)?;
        self.commits.record(artifact.clone())?;

        info!("Base layer: {} undelegated, payload {}", address, self.accounts.get(address)?.payload);
        Ok(artifact)
    }

    /// Dispatch a message arriving from the ephemeral layer
    pub fn handle(&mut self, message: &RelayMessage) -> Result<()> {
        match message {
            RelayMessage::ScheduleCommit(request) => self.apply_commit(request).map(|_| ()),
            RelayMessage::Released { address, validator, final_commit } => {
                self.finalize_release(address, validator, final_commit).map(|_| ())
            }
            other => Err(LifecycleError::AuthorizationMismatch(format!(
                "{} is not addressed to the base layer",
                other.kind()
            ))),
        }
    }

    /// Pure query for a commit ticket
    pub fn commitment_status(&self, ticket: &CommitTicket) -> CommitStatus {
        self.commits.status(ticket)
    }

    pub fn commitment(&self, ticket: &CommitTicket) -> Option<CommitmentArtifact> {
        self.commits.get(ticket).cloned()
    }
}
