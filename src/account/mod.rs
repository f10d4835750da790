//! Account System Module
//!
//! This module implements the per-owner account model with:
//! - Deterministic address derivation from (namespace tag, owner)
//! - Tagged authority mode tracking base-layer vs delegated write authority
//! - Signed requests and the authorization gate every mutation passes through
//! - Write-through persistent storage of account records

pub mod types;
pub mod address;
pub mod store;
pub mod auth;

pub use types::{AccountRecord, AuthorityMode, LifecycleState, Operation};
pub use address::{AccountAddress, AddressDeriver};
pub use store::AccountStore;
pub use auth::{AuthorizationGate, Instruction, RequestSignature, SignedRequest, SignerSet};
