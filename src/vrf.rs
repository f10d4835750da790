//! Verifiable randomness for base-layer updates
//!
//! A trusted oracle signs a binding of (account, nonce, caller seed). Ed25519
//! signatures are deterministic, so the randomness output is the SHA-256 of
//! the signature and anyone holding the oracle key can recompute and check it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};

use crate::account::AccountAddress;
use crate::crypto::{self, KeyPair, Pubkey, Signature};
use crate::error::{LifecycleError, Result};

/// A pending request for randomness, queued by `RequestRandomness`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RandomnessRequest {
    pub address: AccountAddress,
    pub owner: Pubkey,
    pub caller_seed: [u8; 32],
    /// Account VRF nonce at request time
    pub nonce: u64,
}

impl RandomnessRequest {
    pub fn binding_message(&self) -> Vec<u8> {
        binding_message(&self.address, self.nonce, &self.caller_seed)
    }
}

fn binding_message(address: &AccountAddress, nonce: u64, caller_seed: &[u8; 32]) -> Vec<u8> {
    let mut msg = b"ER_LIFECYCLE_VRF:".to_vec();
    msg.extend_from_slice(&address.0);
    msg.extend_from_slice(&nonce.to_le_bytes());
    msg.extend_from_slice(caller_seed);
    msg
}

/// Signed proof that `randomness` was produced for this exact request
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VrfAttestation {
    pub signer: Pubkey,
    pub address: AccountAddress,
    pub nonce: u64,
    pub caller_seed: [u8; 32],
    pub randomness: [u8; 32],
    pub signature: Signature,
}

/// The randomness service; holds the trusted signing key
pub struct VrfOracle {
    keypair: KeyPair,
}

impl VrfOracle {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Produce the attestation for a request
    pub fn attest(&self, request: &RandomnessRequest) -> VrfAttestation {
        let signature = self.keypair.sign(&request.binding_message());
        VrfAttestation {
            signer: self.pubkey(),
            address: request.address,
            nonce: request.nonce,
            caller_seed: request.caller_seed,
            randomness: randomness_from_signature(&signature),
            signature,
        }
    }
}

fn randomness_from_signature(signature: &Signature) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(signature.to_bytes());
    hasher.finalize().into()
}

/// Signature-verification service consulted before a randomness-gated update
pub trait AttestationVerifier: Send + Sync {
    /// Returns the verified randomness output, or `MissingRandomnessProof`
    fn verify(
        &self,
        attestation: &VrfAttestation,
        address: &AccountAddress,
        nonce: u64,
        caller_seed: &[u8; 32],
    ) -> Result<[u8; 32]>;
}

/// Accepts attestations from a fixed set of oracle keys
#[derive(Clone, Debug, Default)]
pub struct TrustedSignerVerifier {
    trusted: HashSet<Pubkey>,
}

impl TrustedSignerVerifier {
    pub fn new(trusted: impl IntoIterator<Item = Pubkey>) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
        }
    }

    pub fn is_trusted(&self, key: &Pubkey) -> bool {
        self.trusted.contains(key)
    }
}

impl AttestationVerifier for TrustedSignerVerifier {
    fn verify(
        &self,
        attestation: &VrfAttestation,
        address: &AccountAddress,
        nonce: u64,
        caller_seed: &[u8; 32],
    ) -> Result<[u8; 32]> {
        let reject = |reason: &str| -> Result<[u8; 32]> {
            Err(LifecycleError::MissingRandomnessProof(reason.to_string()))
        };

        if !self.is_trusted(&attestation.signer) {
            return reject("attestation signer is not a trusted VRF oracle");
        }
        if attestation.address != *address {
            return reject("attestation bound to a different account");
        }
        if attestation.nonce != nonce {
            // Stale nonce means the attestation was already consumed
            return reject("attestation nonce is stale or replayed");
        }
        if attestation.caller_seed != *caller_seed {
            return reject("attestation bound to a different seed");
        }
        let message = binding_message(address, nonce, caller_seed);
        if !crypto::verify(&attestation.signer, &message, &attestation.signature) {
            return reject("attestation signature invalid");
        }
        if randomness_from_signature(&attestation.signature) != attestation.randomness {
            return reject("randomness does not match attestation signature");
        }
        Ok(attestation.randomness)
    }
}

/// Fold randomness into a u64
pub fn random_u64(randomness: &[u8; 32]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&randomness[..8]);
    u64::from_le_bytes(bytes)
}

/// New payload after consuming `randomness`
pub fn derive_payload(old_payload: u64, randomness: &[u8; 32]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(old_payload.to_le_bytes());
    hasher.update(randomness);
    let digest: [u8; 32] = hasher.finalize().into();
    random_u64(&digest)
}

/// Requests waiting on the oracle, oldest first
#[derive(Clone, Debug, Default)]
pub struct RandomnessQueue {
    pending: VecDeque<RandomnessRequest>,
}

impl RandomnessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request; an older request for the same account is replaced
    pub fn push(&mut self, request: RandomnessRequest) {
        self.pending.retain(|r| r.address != request.address);
        self.pending.push_back(request);
    }

    pub fn pop(&mut self) -> Option<RandomnessRequest> {
        self.pending.pop_front()
    }

    /// Drop requests for an account (closed, delegated away)
    pub fn cancel(&mut self, address: &AccountAddress) {
        self.pending.retain(|r| &r.address != address);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
