//! Deterministic account addressing
//!
//! An account's address is a pure function of the program id, the namespace
//! tag and the owner key, so lookup never needs an index and an owner can
//! hold at most one live account per namespace.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::crypto::Pubkey;

/// Domain separator mixed into every derivation
const DERIVATION_MARKER: &[u8] = b"ProgramDerivedAddress";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountAddress(pub [u8; 32]);

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountAddress({}..)", &hex::encode(self.0)[..8])
    }
}

impl FromStr for AccountAddress {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pk: Pubkey = s.parse()?;
        Ok(AccountAddress(pk.0))
    }
}

/// Derives account addresses for one program/namespace pair
#[derive(Clone, Debug)]
pub struct AddressDeriver {
    program_id: Pubkey,
    namespace_tag: String,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey, namespace_tag: impl Into<String>) -> Self {
        Self {
            program_id,
            namespace_tag: namespace_tag.into(),
        }
    }

    pub fn namespace_tag(&self) -> &str {
        &self.namespace_tag
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    /// Address of the account owned by `owner` in this namespace
    pub fn derive(&self, owner: &Pubkey) -> AccountAddress {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace_tag.as_bytes());
        hasher.update(owner.as_bytes());
        hasher.update(self.program_id.as_bytes());
        hasher.update(DERIVATION_MARKER);
        AccountAddress(hasher.finalize().into())
    }
}
