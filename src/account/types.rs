//! Account type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

use super::address::AccountAddress;
use crate::crypto::Pubkey;

/// Who may mutate the payload, and where
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorityMode {
    /// Base layer holds write authority
    BaseLayerWritable,
    /// Write authority lent to the ephemeral validator
    Delegated(Pubkey),
    /// Undelegation requested, waiting for the validator to release
    PendingUndelegate(Pubkey),
}

impl AuthorityMode {
    /// Validator currently holding (or releasing) the account
    pub fn validator(&self) -> Option<Pubkey> {
        match self {
            AuthorityMode::BaseLayerWritable => None,
            AuthorityMode::Delegated(v) | AuthorityMode::PendingUndelegate(v) => Some(*v),
        }
    }
}

impl fmt::Display for AuthorityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityMode::BaseLayerWritable => write!(f, "base-layer-writable"),
            AuthorityMode::Delegated(v) => write!(f, "delegated to {}", v),
            AuthorityMode::PendingUndelegate(v) => write!(f, "pending undelegate from {}", v),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Active,
    Delegated,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Delegated => write!(f, "delegated"),
            LifecycleState::Closed => write!(f, "closed"),
        }
    }
}

/// Every operation the protocol accepts, across both layers
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    Update,
    RequestRandomness,
    Delegate,
    EphemeralUpdate,
    EphemeralUpdateCommit,
    Commit,
    Undelegate,
    Close,
}

impl Operation {
    pub fn tag(&self) -> u8 {
        match self {
            Operation::Initialize => 0,
            Operation::Update => 1,
            Operation::RequestRandomness => 2,
            Operation::Delegate => 3,
            Operation::EphemeralUpdate => 4,
            Operation::EphemeralUpdateCommit => 5,
            Operation::Commit => 6,
            Operation::Undelegate => 7,
            Operation::Close => 8,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Initialize => "initialize",
            Operation::Update => "update",
            Operation::RequestRandomness => "request randomness",
            Operation::Delegate => "delegate",
            Operation::EphemeralUpdate => "ephemeral update",
            Operation::EphemeralUpdateCommit => "update and commit",
            Operation::Commit => "commit",
            Operation::Undelegate => "undelegate",
            Operation::Close => "close",
        };
        write!(f, "{}", name)
    }
}

/// The base-layer account record
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AccountRecord {
    // Identity
    pub address: AccountAddress,
    pub owner: Pubkey,

    // Application state
    pub payload: u64,

    // Authority
    pub authority_mode: AuthorityMode,
    pub lifecycle: LifecycleState,

    // Replay protection for randomness attestations
    pub vrf_nonce: u64,
    // Highest commit sequence applied from the ephemeral layer
    pub last_commit_sequence: u64,
    /// Fresh id per Delegate; scopes commit tickets to one delegation
    pub delegation_id: String,

    /// Resources reserved at creation, refunded to the owner on close
    pub reserve: u64,
    pub created_at: i64,
}

impl AccountRecord {
    pub fn new(address: AccountAddress, owner: Pubkey, reserve: u64) -> Self {
        Self {
            address,
            owner,
            payload: 0,
            authority_mode: AuthorityMode::BaseLayerWritable,
            lifecycle: LifecycleState::Active,
            vrf_nonce: 0,
            last_commit_sequence: 0,
            delegation_id: String::new(),
            reserve,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Payload may be written directly on the base layer
    pub fn is_base_writable(&self) -> bool {
        self.lifecycle == LifecycleState::Active
            && self.authority_mode == AuthorityMode::BaseLayerWritable
    }

    pub fn is_delegated_to(&self, validator: &Pubkey) -> bool {
        self.lifecycle == LifecycleState::Delegated
            && self.authority_mode == AuthorityMode::Delegated(*validator)
    }

    /// Human-readable state used in transition errors
    pub fn state_label(&self) -> String {
        match self.authority_mode {
            AuthorityMode::PendingUndelegate(_) => "pending undelegate".to_string(),
            _ => self.lifecycle.to_string(),
        }
    }
}
