pub mod poll;

pub use poll::{wait_for_commitment, wait_for_delegation, wait_for_undelegation, CommitmentSource, DelegationSource, PollPolicy};
