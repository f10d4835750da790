//! Client-side waiting for cross-ledger effects
//!
//! Neither delegation propagation nor commit finalization is synchronous.
//! These helpers poll with exponential backoff; only the caller's budget
//! turns "not yet" into an error.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::account::AccountAddress;
use crate::commit::{CommitStatus, CommitTicket};
use crate::config::ClientConfig;
use crate::crypto::Signature;
use crate::error::{LifecycleError, Result};

/// Anything that can answer "has this commit landed yet"
#[async_trait]
pub trait CommitmentSource: Send + Sync {
    async fn commitment_status(&self, ticket: &CommitTicket) -> CommitStatus;
}

/// Anything that can see both sides of a delegation
#[async_trait]
pub trait DelegationSource: Send + Sync {
    /// Has the mirror cloned this account yet
    async fn is_delegated(&self, address: &AccountAddress) -> bool;
    /// Has the base layer taken write authority back
    async fn is_released(&self, address: &AccountAddress) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(initial_backoff: Duration, max_backoff: Duration, timeout: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            timeout,
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_backoff)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for PollPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self::new(
            Duration::from_millis(config.poll_initial_ms),
            Duration::from_millis(config.poll_max_ms),
            config.timeout(),
        )
    }
}

/// Poll `check` until it yields a value or the policy's budget runs out.
/// Returns the elapsed time on timeout.
async fn poll<T, F, Fut>(policy: &PollPolicy, mut check: F) -> std::result::Result<T, Duration>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let started = Instant::now();
    let mut backoff = policy.initial_backoff;
    loop {
        if let Some(value) = check().await {
            return Ok(value);
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(elapsed);
        }
        sleep(backoff.min(policy.timeout - elapsed)).await;
        backoff = policy.next_backoff(backoff);
    }
}

/// Wait until the base layer reports a commitment signature for `ticket`
pub async fn wait_for_commitment<S: CommitmentSource + ?Sized>(
    source: &S,
    ticket: &CommitTicket,
    policy: &PollPolicy,
) -> Result<Signature> {
    let outcome = poll(policy, move || async move {
        match source.commitment_status(ticket).await {
            CommitStatus::Committed(signature) => Some(signature),
            CommitStatus::Pending => {
                debug!("Commit {} still pending", ticket);
                None
            }
        }
    })
    .await;

    outcome.map_err(|waited| LifecycleError::CommitTimeout {
        ticket: ticket.to_string(),
        waited_ms: waited.as_millis() as u64,
    })
}

/// Wait until the ephemeral layer recognizes a delegation of `address`
pub async fn wait_for_delegation<S: DelegationSource + ?Sized>(
    source: &S,
    address: &AccountAddress,
    policy: &PollPolicy,
) -> Result<()> {
    let outcome = poll(policy, move || async move {
        if source.is_delegated(address).await {
            Some(())
        } else {
            None
        }
    })
    .await;

    outcome.map_err(|waited| LifecycleError::DelegationTimeout {
        address: address.to_string(),
        waited_ms: waited.as_millis() as u64,
    })
}

/// Wait until the base layer has finalized an undelegation of `address`
pub async fn wait_for_undelegation<S: DelegationSource + ?Sized>(
    source: &S,
    address: &AccountAddress,
    policy: &PollPolicy,
) -> Result<()> {
    let outcome = poll(policy, move || async move {
        if source.is_released(address).await {
            Some(())
        } else {
            None
        }
    })
    .await;

    outcome.map_err(|waited| LifecycleError::DelegationTimeout {
        address: address.to_string(),
        waited_ms: waited.as_millis() as u64,
    })
}
