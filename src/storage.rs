use serde::{Deserialize, Serialize};

use crate::account::{AccountAddress, AccountRecord};
use crate::commit::CommitmentArtifact;
use crate::error::Result;

pub struct Storage {
    db: sled::Db,
}

impl Storage {
    pub fn new(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Storage { db })
    }

    /// In-memory tree that is dropped with the handle (tests, demo runs)
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Storage { db })
    }

    // Generic Helper: Put
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let serialized = bincode::serialize(value)?;
        self.db.insert(key.as_bytes(), serialized)?;
        Ok(())
    }

    // Generic Helper: Get
    pub fn get<T: for<'a> Deserialize<'a>>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    /// All values under a key prefix, in key order
    pub fn scan<T: for<'a> Deserialize<'a>>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, data) = item?;
            out.push(bincode::deserialize(&data)?);
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- Specific Accessors ---

    // 1. Account records
    pub fn save_account(&self, record: &AccountRecord) -> Result<()> {
        self.put(&format!("account:{}", record.address), record)
    }

    pub fn get_account(&self, address: &AccountAddress) -> Result<Option<AccountRecord>> {
        self.get(&format!("account:{}", address))
    }

    pub fn delete_account(&self, address: &AccountAddress) -> Result<()> {
        self.delete(&format!("account:{}", address))
    }

    pub fn load_accounts(&self) -> Result<Vec<AccountRecord>> {
        self.scan("account:")
    }

    // 2. Commitment artifacts
    pub fn save_artifact(&self, artifact: &CommitmentArtifact) -> Result<()> {
        self.put(&format!("commit:{}", artifact.ticket), artifact)
    }

    pub fn load_artifacts(&self) -> Result<Vec<CommitmentArtifact>> {
        self.scan("commit:")
    }
}
