use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::account::{
    AccountAddress, AccountRecord, AddressDeriver, AuthorizationGate, Instruction, Operation,
    SignedRequest, SignerSet,
};
use crate::commit::{CommitRequest, CommitTicket};
use crate::crypto::Pubkey;
use crate::error::{LifecycleError, Result};
use crate::relay::{now_ms, RelayMessage};

/// The mirror's local copy of a delegated account
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MirroredAccount {
    pub address: AccountAddress,
    pub owner: Pubkey,
    pub payload: u64,
    /// Sequence of the last commit this mirror scheduled
    pub sequence: u64,
    /// Delegation this copy belongs to; part of every commit ticket
    pub delegation_id: String,
    pub cloned_at_ms: u128,
}

pub struct EphemeralMirror {
    validator: Pubkey,
    gate: AuthorizationGate,
    accounts: HashMap<AccountAddress, MirroredAccount>,
    // Every commit scheduled, by ticket; backs idempotency-key dedup
    scheduled: HashMap<CommitTicket, CommitRequest>,
}

impl EphemeralMirror {
    pub fn new(validator: Pubkey, deriver: AddressDeriver) -> Self {
        Self {
            validator,
            gate: AuthorizationGate::new(deriver),
            accounts: HashMap::new(),
            scheduled: HashMap::new(),
        }
    }

    pub fn validator(&self) -> Pubkey {
        self.validator
    }

    /// Clone a freshly delegated account. Delegations to other validators are refused.
    pub fn observe_delegation(&mut self, record: &AccountRecord, validator: &Pubkey) -> Result<()> {
        if *validator != self.validator {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "{} is delegated to {}, not {}",
                record.address, validator, self.validator
            )));
        }
        let mirrored = MirroredAccount {
            address: record.address,
            owner: record.owner,
            payload: record.payload,
            sequence: record.last_commit_sequence,
            delegation_id: record.delegation_id.clone(),
            cloned_at_ms: now_ms(),
        };
        info!("Mirror {}: cloned {} (payload {})", self.validator, record.address, record.payload);
        self.accounts.insert(record.address, mirrored);
        Ok(())
    }

    /// Has the delegation propagated here yet
    pub fn is_delegated(&self, address: &AccountAddress) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn get_account(&self, address: &AccountAddress) -> Result<MirroredAccount> {
        self.accounts
            .get(address)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(address.to_string()))
    }

    /// Authorization plus the "delegated to me" check shared by every write
    fn authorize_write(&self, request: &SignedRequest, operation: Operation) -> Result<&MirroredAccount> {
        self.gate.authorize(request, operation)?;
        let account = self.accounts.get(&request.target).ok_or_else(|| {
            LifecycleError::transition(operation, format!("not delegated to validator {}", self.validator))
        })?;
        if account.owner != request.owner {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "account {} is owned by {}",
                account.address, account.owner
            )));
        }
        Ok(account)
    }

    /// Write without scheduling a commit
    pub fn ephemeral_update(&mut self, request: &SignedRequest) -> Result<u64> {
        let value = match &request.instruction {
            Instruction::EphemeralUpdate { value } => *value,
            _ => return Err(LifecycleError::AuthorizationMismatch("malformed update".to_string())),
        };
        self.authorize_write(request, Operation::EphemeralUpdate)?;

        if let Some(account) = self.accounts.get_mut(&request.target) {
            account.payload = value;
        }
        self.gate.mark_processed(request);
        debug!("Mirror {}: {} payload set to {}", self.validator, request.target, value);
        Ok(value)
    }

    /// Write `value` and schedule its commit.
    ///
    /// Returns the ticket and the commit to relay; the commit is `None` when
    /// the idempotency key was already used for the same value.
    pub fn update_commit(&mut self, request: &SignedRequest) -> Result<(CommitTicket, Option<CommitRequest>)> {
        let (value, key) = match &request.instruction {
            Instruction::EphemeralUpdateCommit { value, idempotency_key } => (
                *value,
                idempotency_key.clone().unwrap_or_else(|| request.request_id.clone()),
            ),
            _ => return Err(LifecycleError::AuthorizationMismatch("malformed update".to_string())),
        };
        if let Some(ticket) = self.retried_commit(request, value, &key)? {
            debug!("Mirror {}: request {} retried, commit {} already scheduled", self.validator, request.request_id, ticket);
            return Ok((ticket, None));
        }
        let account = self.authorize_write(request, Operation::EphemeralUpdateCommit)?;

        let ticket = CommitTicket::derive(&request.target, &account.delegation_id, &key);
        if let Some(previous) = self.scheduled.get(&ticket) {
            if previous.payload != value {
                return Err(LifecycleError::IdempotencyConflict(key));
            }
            debug!("Mirror {}: commit {} already scheduled", self.validator, ticket);
            self.gate.mark_processed(request);
            return Ok((ticket, None));
        }

        let commit = self.schedule(&request.target, ticket, Some(value), &request.request_id)?;
        self.gate.mark_processed(request);
        Ok((ticket, Some(commit)))
    }

    /// Schedule a commit of the current payload without changing it
    pub fn commit(&mut self, request: &SignedRequest) -> Result<(CommitTicket, CommitRequest)> {
        let account = self.authorize_write(request, Operation::Commit)?;
        let ticket = CommitTicket::derive(&request.target, &account.delegation_id, &request.request_id);
        let commit = self.schedule(&request.target, ticket, None, &request.request_id)?;
        self.gate.mark_processed(request);
        Ok((ticket, commit))
    }

    /// An already processed request resubmitted unchanged gets its original ticket
    fn retried_commit(&self, request: &SignedRequest, value: u64, key: &str) -> Result<Option<CommitTicket>> {
        if !self.gate.is_processed(&request.request_id) {
            return Ok(None);
        }
        let account = match self.accounts.get(&request.target) {
            Some(account) if account.owner == request.owner => account,
            _ => return Ok(None),
        };
        let ticket = CommitTicket::derive(&request.target, &account.delegation_id, key);
        match self.scheduled.get(&ticket) {
            Some(previous) if previous.payload == value => {
                let signers = SignerSet::verify(request)?;
                Ok(signers.contains(&request.owner).then_some(ticket))
            }
            _ => Ok(None),
        }
    }

    fn schedule(
        &mut self,
        address: &AccountAddress,
        ticket: CommitTicket,
        value: Option<u64>,
        ephemeral_tx: &str,
    ) -> Result<CommitRequest> {
        let account = self
            .accounts
            .get_mut(address)
            .ok_or_else(|| LifecycleError::NotFound(address.to_string()))?;
        if let Some(v) = value {
            account.payload = v;
        }
        account.sequence += 1;

        let commit = CommitRequest {
            ticket,
            address: *address,
            validator: self.validator,
            payload: account.payload,
            sequence: account.sequence,
            ephemeral_tx: ephemeral_tx.to_string(),
        };
        info!(
            "Mirror {}: scheduled commit {} for {} (seq {}, payload {})",
            self.validator, ticket, address, commit.sequence, commit.payload
        );
        self.scheduled.insert(ticket, commit.clone());
        Ok(commit)
    }

    /// Base layer asked for the account back: emit a final commit and stop
    /// accepting writes for it.
    pub fn release(&mut self, address: &AccountAddress, validator: &Pubkey) -> Result<RelayMessage> {
        if *validator != self.validator {
            return Err(LifecycleError::AuthorizationMismatch(format!(
                "release for {} addressed to {}",
                address, validator
            )));
        }
        let delegation_id = self
            .accounts
            .get(address)
            .map(|account| account.delegation_id.clone())
            .ok_or_else(|| LifecycleError::NotFound(address.to_string()))?;
        let ticket = CommitTicket::derive(address, &delegation_id, &format!("release:{}", uuid::Uuid::new_v4()));
        let final_commit = self.schedule(address, ticket, None, "undelegate")?;

        self.accounts.remove(address);
        self.scheduled.retain(|_, c| c.address != *address);
        info!("Mirror {}: released {}", self.validator, address);

        Ok(RelayMessage::Released {
            address: *address,
            validator: self.validator,
            final_commit,
        })
    }

    /// Dispatch a message arriving from the base layer; may produce a reply
    pub fn handle(&mut self, message: &RelayMessage) -> Result<Option<RelayMessage>> {
        match message {
            RelayMessage::Delegated { record, validator } => {
                self.observe_delegation(record, validator)?;
                Ok(None)
            }
            RelayMessage::UndelegateRequested { address, validator } => {
                self.release(address, validator).map(Some)
            }
            other => Err(LifecycleError::AuthorizationMismatch(format!(
                "{} is not addressed to the ephemeral layer",
                other.kind()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
