//! Authentication and authorization for account operations
//!
//! Every mutating request is a [`SignedRequest`]. The [`AuthorizationGate`]
//! recomputes the target address from the claimed owner, checks the owner is
//! among the verified signers, and checks the operation is legal for the
//! account's current state. Any failure rejects the whole request before a
//! single field is written.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::io::{self, Write};

use super::address::{AccountAddress, AddressDeriver};
use super::types::{AccountRecord, AuthorityMode, LifecycleState, Operation};
use crate::crypto::{self, KeyPair, Pubkey, Signature};
use crate::encoding::CanonicalSerialize;
use crate::error::{LifecycleError, Result};

/// How many processed request ids are remembered for duplicate detection
const PROCESSED_HISTORY: usize = 4096;

/// An operation together with its signed arguments
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Instruction {
    Initialize,
    Update { caller_seed: [u8; 32] },
    RequestRandomness { caller_seed: [u8; 32] },
    Delegate { validator: Pubkey },
    EphemeralUpdate { value: u64 },
    EphemeralUpdateCommit { value: u64, idempotency_key: Option<String> },
    Commit,
    Undelegate,
    Close,
}

impl Instruction {
    pub fn operation(&self) -> Operation {
        match self {
            Instruction::Initialize => Operation::Initialize,
            Instruction::Update { .. } => Operation::Update,
            Instruction::RequestRandomness { .. } => Operation::RequestRandomness,
            Instruction::Delegate { .. } => Operation::Delegate,
            Instruction::EphemeralUpdate { .. } => Operation::EphemeralUpdate,
            Instruction::EphemeralUpdateCommit { .. } => Operation::EphemeralUpdateCommit,
            Instruction::Commit => Operation::Commit,
            Instruction::Undelegate => Operation::Undelegate,
            Instruction::Close => Operation::Close,
        }
    }
}

impl CanonicalSerialize for Instruction {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.operation().tag().canonical_serialize(writer)?;
        match self {
            Instruction::Update { caller_seed } | Instruction::RequestRandomness { caller_seed } => {
                caller_seed.canonical_serialize(writer)
            }
            Instruction::Delegate { validator } => validator.canonical_serialize(writer),
            Instruction::EphemeralUpdate { value } => value.canonical_serialize(writer),
            Instruction::EphemeralUpdateCommit { value, idempotency_key } => {
                value.canonical_serialize(writer)?;
                idempotency_key.canonical_serialize(writer)
            }
            Instruction::Initialize
            | Instruction::Commit
            | Instruction::Undelegate
            | Instruction::Close => Ok(()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RequestSignature {
    pub signer: Pubkey,
    pub signature: Signature,
}

/// A request as submitted to either layer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SignedRequest {
    pub instruction: Instruction,
    /// Claimed owner of the target account
    pub owner: Pubkey,
    pub target: AccountAddress,
    /// Pays fees; grants no authority over the account
    pub fee_payer: Pubkey,
    pub request_id: String,
    pub signatures: Vec<RequestSignature>,
}

impl SignedRequest {
    /// Unsigned request; add signatures with [`SignedRequest::signed_by`]
    pub fn new(instruction: Instruction, owner: Pubkey, target: AccountAddress, fee_payer: Pubkey) -> Self {
        Self {
            instruction,
            owner,
            target,
            fee_payer,
            request_id: uuid::Uuid::new_v4().to_string(),
            signatures: Vec::new(),
        }
    }

    /// Request where the owner signs and pays
    pub fn from_owner(instruction: Instruction, owner: &KeyPair, target: AccountAddress) -> Self {
        Self::new(instruction, owner.pubkey(), target, owner.pubkey()).signed_by(owner)
    }

    pub fn signed_by(mut self, signer: &KeyPair) -> Self {
        let signature = signer.sign(&self.message());
        self.signatures.push(RequestSignature {
            signer: signer.pubkey(),
            signature,
        });
        self
    }

    pub fn operation(&self) -> Operation {
        self.instruction.operation()
    }

    /// Canonical bytes every signer signs
    pub fn message(&self) -> Vec<u8> {
        let mut buf = b"ER_LIFECYCLE_REQUEST:".to_vec();
        buf.extend(self.instruction.to_bytes());
        buf.extend(self.owner.to_bytes());
        buf.extend(self.target.0);
        buf.extend(self.fee_payer.to_bytes());
        buf.extend(self.request_id.to_bytes());
        buf
    }
}

/// Signers whose signatures over a request verified
#[derive(Clone, Debug, Default)]
pub struct SignerSet {
    signers: HashSet<Pubkey>,
}

impl SignerSet {
    /// Verify every attached signature; a single bad one rejects the request
    pub fn verify(request: &SignedRequest) -> Result<Self> {
        let message = request.message();
        let mut signers = HashSet::new();
        for sig in &request.signatures {
            if !crypto::verify(&sig.signer, &message, &sig.signature) {
                return Err(LifecycleError::InvalidSignature(sig.signer.to_string()));
            }
            signers.insert(sig.signer);
        }
        Ok(Self { signers })
    }

    pub fn contains(&self, key: &Pubkey) -> bool {
        self.signers.contains(key)
    }

}

/// Authorization gate shared by the base layer and the ephemeral mirror
#[derive(Clone, Debug)]
pub struct AuthorizationGate {
    deriver: AddressDeriver,
    processed: HashSet<String>,
    processed_order: VecDeque<String>,
}

impl AuthorizationGate {
    pub fn new(deriver: AddressDeriver) -> Self {
        Self {
            deriver,
            processed: HashSet::new(),
            processed_order: VecDeque::new(),
        }
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    /// Signature and identity checks for `request`, which must carry `expected`.
    ///
    /// Fails with `AuthorizationMismatch` when the owner did not sign, when the
    /// target is not the owner's derived address, or when the fee payer did not
    /// sign. Returns the verified signer set.
    pub fn authorize(&self, request: &SignedRequest, expected: Operation) -> Result<SignerSet> {
        if request.operation() != expected {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "request signed for {} submitted as {}",
                request.operation(),
                expected
            )));
        }
        if self.processed.contains(&request.request_id) {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "request {} already processed",
                request.request_id
            )));
        }

        let signers = SignerSet::verify(request)?;
        if !signers.contains(&request.owner) {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "owner {} did not sign",
                request.owner
            )));
        }
        if !signers.contains(&request.fee_payer) {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "fee payer {} did not sign",
                request.fee_payer
            )));
        }

        let expected_address = self.deriver.derive(&request.owner);
        if expected_address != request.target {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "account {} is not derived from owner {}",
                request.target, request.owner
            )));
        }
        Ok(signers)
    }

    /// The stored record must belong to the claimed owner
    pub fn authorize_record(&self, request: &SignedRequest, record: &AccountRecord) -> Result<()> {
        if record.owner != request.owner || record.address != request.target {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "account {} is owned by {}",
                record.address, record.owner
            )));
        }
        Ok(())
    }

    pub fn is_processed(&self, request_id: &str) -> bool {
        self.processed.contains(request_id)
    }

    /// Remember a successfully applied request so a resubmission is rejected
    pub fn mark_processed(&mut self, request: &SignedRequest) {
        if self.processed.insert(request.request_id.clone()) {
            self.processed_order.push_back(request.request_id.clone());
        }
        while self.processed_order.len() > PROCESSED_HISTORY {
            if let Some(old) = self.processed_order.pop_front() {
                self.processed.remove(&old);
            }
        }
    }

    /// Base-layer state machine
    pub fn check_transition(operation: Operation, record: &AccountRecord) -> Result<()> {
        let allowed = match operation {
            Operation::Update | Operation::RequestRandomness | Operation::Delegate | Operation::Close => {
                record.is_base_writable()
            }
            Operation::Undelegate => {
                record.lifecycle == LifecycleState::Delegated
                    && matches!(record.authority_mode, AuthorityMode::Delegated(_))
            }
            // Creation is handled by the store; ephemeral writes never land on the base layer
            Operation::Initialize
            | Operation::EphemeralUpdate
            | Operation::EphemeralUpdateCommit
            | Operation::Commit => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(LifecycleError::transition(operation, record.state_label()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthorizationGate {
        AuthorizationGate::new(AddressDeriver::new(Pubkey([5u8; 32]), "user"))
    }

    #[test]
    fn test_owner_signed_request_passes() {
        let gate = gate();
        let owner = KeyPair::generate();
        let target = gate.deriver().derive(&owner.pubkey());
        let req = SignedRequest::from_owner(Instruction::Close, &owner, target);

        let signers = gate.authorize(&req, Operation::Close).unwrap();
        assert!(signers.contains(&owner.pubkey()));
    }

    #[test]
    fn test_wrong_signer_is_rejected() {
        let gate = gate();
        let owner = KeyPair::generate();
        let intruder = KeyPair::generate();
        let target = gate.deriver().derive(&owner.pubkey());

        // Claims to be the owner but only the intruder signs
        let req = SignedRequest::new(Instruction::Close, owner.pubkey(), target, intruder.pubkey())
            .signed_by(&intruder);
        let err = gate.authorize(&req, Operation::Close).unwrap_err();
        assert!(matches!(err, LifecycleError::AuthorizationMismatch(_)));
    }

    #[test]
    fn test_wrong_account_is_rejected() {
        let gate = gate();
        let owner = KeyPair::generate();
        let other = KeyPair::generate();
        let victim = gate.deriver().derive(&other.pubkey());

        let req = SignedRequest::from_owner(Instruction::Close, &owner, victim);
        let err = gate.authorize(&req, Operation::Close).unwrap_err();
        assert!(matches!(err, LifecycleError::AuthorizationMismatch(_)));
    }

    #[test]
    fn test_tampered_instruction_fails_signature() {
        let gate = gate();
        let owner = KeyPair::generate();
        let target = gate.deriver().derive(&owner.pubkey());
        let mut req = SignedRequest::from_owner(Instruction::EphemeralUpdate { value: 1 }, &owner, target);
        req.instruction = Instruction::EphemeralUpdate { value: 1000 };

        let err = gate.authorize(&req, Operation::EphemeralUpdate).unwrap_err();
        assert!(err.is_authorization());
    }

    #[test]
    fn test_separate_fee_payer_must_sign() {
        let gate = gate();
        let owner = KeyPair::generate();
        let payer = KeyPair::generate();
        let target = gate.deriver().derive(&owner.pubkey());

        let unsigned_payer = SignedRequest::new(Instruction::Initialize, owner.pubkey(), target, payer.pubkey())
            .signed_by(&owner);
        assert!(gate.authorize(&unsigned_payer, Operation::Initialize).is_err());

        let both = SignedRequest::new(Instruction::Initialize, owner.pubkey(), target, payer.pubkey())
            .signed_by(&owner)
            .signed_by(&payer);
        assert!(gate.authorize(&both, Operation::Initialize).is_ok());
    }

    #[test]
    fn test_processed_request_is_rejected() {
        let mut gate = gate();
        let owner = KeyPair::generate();
        let target = gate.deriver().derive(&owner.pubkey());
        let req = SignedRequest::from_owner(Instruction::Initialize, &owner, target);

        gate.authorize(&req, Operation::Initialize).unwrap();
        gate.mark_processed(&req);
        assert!(gate.authorize(&req, Operation::Initialize).is_err());
    }

    #[test]
    fn test_transition_table() {
        let validator = Pubkey([3u8; 32]);
        let mut record = AccountRecord::new(AccountAddress([1u8; 32]), Pubkey([2u8; 32]), 0);

        assert!(AuthorizationGate::check_transition(Operation::Delegate, &record).is_ok());
        assert!(AuthorizationGate::check_transition(Operation::Close, &record).is_ok());
        assert!(AuthorizationGate::check_transition(Operation::Undelegate, &record).is_err());

        record.lifecycle = LifecycleState::Delegated;
        record.authority_mode = AuthorityMode::Delegated(validator);
        for op in [Operation::Update, Operation::Delegate, Operation::Close] {
            let err = AuthorizationGate::check_transition(op, &record).unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidStateTransition { .. }));
        }
        assert!(AuthorizationGate::check_transition(Operation::Undelegate, &record).is_ok());

        record.authority_mode = AuthorityMode::PendingUndelegate(validator);
        assert!(AuthorizationGate::check_transition(Operation::Undelegate, &record).is_err());
        assert!(AuthorizationGate::check_transition(Operation::Close, &record).is_err());
    }
}
