//! Commitment protocol
//!
//! The ephemeral mirror schedules a [`CommitRequest`] for every commit; the
//! base layer applies it and records a [`CommitmentArtifact`] signed by the
//! base-layer identity. Clients hold a [`CommitTicket`] and poll for the
//! artifact, treating [`CommitStatus::Pending`] as a normal result.

pub mod log;

pub use log::CommitLog;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::account::AccountAddress;
use crate::crypto::{self, KeyPair, Pubkey, Signature};

/// Handle for one scheduled commit, derived from (account, delegation, idempotency key)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitTicket(pub [u8; 32]);

impl CommitTicket {
    pub fn derive(address: &AccountAddress, delegation_id: &str, idempotency_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"ER_LIFECYCLE_COMMIT:");
        hasher.update(address.0);
        hasher.update((delegation_id.len() as u64).to_le_bytes());
        hasher.update(delegation_id.as_bytes());
        hasher.update(idempotency_key.as_bytes());
        CommitTicket(hasher.finalize().into())
    }
}

impl fmt::Display for CommitTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CommitTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitTicket({}..)", &hex::encode(self.0)[..8])
    }
}

/// Snapshot of mirrored state sent to the base layer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CommitRequest {
    pub ticket: CommitTicket,
    pub address: AccountAddress,
    pub validator: Pubkey,
    pub payload: u64,
    /// Per-account, strictly increasing on the mirror
    pub sequence: u64,
    /// Id of the ephemeral transaction that caused the commit
    pub ephemeral_tx: String,
}

/// Proof that the base layer incorporated a commit
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CommitmentArtifact {
    pub ticket: CommitTicket,
    pub ephemeral_tx: String,
    pub address: AccountAddress,
    pub payload: u64,
    pub sequence: u64,
    /// False when a newer commit had already been applied
    pub applied: bool,
    pub committed_at: i64,
    pub signature: Signature,
}

impl CommitmentArtifact {
    /// Sign an artifact for `request` with the base-layer identity
    pub fn sign(request: &CommitRequest, applied: bool, base_identity: &KeyPair) -> Self {
        let message = artifact_message(request, applied);
        Self {
            ticket: request.ticket,
            ephemeral_tx: request.ephemeral_tx.clone(),
            address: request.address,
            payload: request.payload,
            sequence: request.sequence,
            applied,
            committed_at: chrono::Utc::now().timestamp_millis(),
            signature: base_identity.sign(&message),
        }
    }

    /// Check the inclusion signature against the base-layer identity
    pub fn verify(&self, base_identity: &Pubkey) -> bool {
        let request = CommitRequest {
            ticket: self.ticket,
            address: self.address,
            validator: Pubkey::default(),
            payload: self.payload,
            sequence: self.sequence,
            ephemeral_tx: self.ephemeral_tx.clone(),
        };
        crypto::verify(base_identity, &artifact_message(&request, self.applied), &self.signature)
    }
}

fn artifact_message(request: &CommitRequest, applied: bool) -> Vec<u8> {
    let mut msg = b"ER_LIFECYCLE_ARTIFACT:".to_vec();
    msg.extend_from_slice(&request.ticket.0);
    msg.extend_from_slice(request.ephemeral_tx.as_bytes());
    msg.extend_from_slice(&request.address.0);
    msg.extend_from_slice(&request.payload.to_le_bytes());
    msg.extend_from_slice(&request.sequence.to_le_bytes());
    msg.push(applied as u8);
    msg
}

/// Result of polling for a commitment; `Pending` is not an error
#[derive(Clone, Debug, PartialEq)]
pub enum CommitStatus {
    Committed(Signature),
    Pending,
}

impl CommitStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, CommitStatus::Pending)
    }
}
