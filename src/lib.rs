pub mod account;
pub mod base;
pub mod cli;
pub mod client;
pub mod commit;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod ephemeral;
pub mod error;
pub mod identity;
pub mod node;
pub mod relay;
pub mod storage;
pub mod vrf;

pub use error::{LifecycleError, Result};
