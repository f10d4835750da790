use serde::{Deserialize, Serialize};

use crate::account::{AccountAddress, AccountRecord};
use crate::commit::CommitRequest;
use crate::crypto::Pubkey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    ToEphemeral,
    ToBase,
}

/// Messages carried between the base layer and the ephemeral validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// Base layer lent write authority; the mirror clones the record
    Delegated { record: AccountRecord, validator: Pubkey },
    /// Mirror asks the base layer to incorporate a snapshot
    ScheduleCommit(CommitRequest),
    /// Owner asked for authority back
    UndelegateRequested { address: AccountAddress, validator: Pubkey },
    /// Mirror dropped the account; carries its final state
    Released { address: AccountAddress, validator: Pubkey, final_commit: CommitRequest },
}

impl RelayMessage {
    pub fn direction(&self) -> Direction {
        match self {
            RelayMessage::Delegated { .. } | RelayMessage::UndelegateRequested { .. } => {
                Direction::ToEphemeral
            }
            RelayMessage::ScheduleCommit(_) | RelayMessage::Released { .. } => Direction::ToBase,
        }
    }

    pub fn address(&self) -> AccountAddress {
        match self {
            RelayMessage::Delegated { record, .. } => record.address,
            RelayMessage::ScheduleCommit(req) => req.address,
            RelayMessage::UndelegateRequested { address, .. } => *address,
            RelayMessage::Released { address, .. } => *address,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Delegated { .. } => "delegated",
            RelayMessage::ScheduleCommit(_) => "schedule-commit",
            RelayMessage::UndelegateRequested { .. } => "undelegate-requested",
            RelayMessage::Released { .. } => "released",
        }
    }
}
