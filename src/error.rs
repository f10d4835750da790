use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Authorization mismatch: {0}")]
    AuthorizationMismatch(String),
    #[error("Invalid state transition: cannot {operation} while {state}")]
    InvalidStateTransition { operation: String, state: String },
    #[error("Missing randomness proof: {0}")]
    MissingRandomnessProof(String),
    #[error("Account already exists: {0}")]
    AlreadyExists(String),
    #[error("Account not found: {0}")]
    NotFound(String),
    #[error("Commit {ticket} not finalized after {waited_ms}ms")]
    CommitTimeout { ticket: String, waited_ms: u64 },
    #[error("Delegation of {address} not visible on the ephemeral layer after {waited_ms}ms")]
    DelegationTimeout { address: String, waited_ms: u64 },
    #[error("Idempotency key {0} already used with a different value")]
    IdempotencyConflict(String),
    #[error("Invalid signature from {0}")]
    InvalidSignature(String),
    #[error("Database error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    pub fn transition(operation: impl ToString, state: impl ToString) -> Self {
        LifecycleError::InvalidStateTransition {
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }

    /// Rejections of the authorization class (wrong signer, wrong address, bad signature)
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            LifecycleError::AuthorizationMismatch(_) | LifecycleError::InvalidSignature(_)
        )
    }
}

impl From<sled::Error> for LifecycleError {
    fn from(err: sled::Error) -> Self {
        LifecycleError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for LifecycleError {
    fn from(err: bincode::Error) -> Self {
        LifecycleError::Serialization(err.to_string())
    }
}
