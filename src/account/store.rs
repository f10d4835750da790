//! Account storage and management

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::address::AccountAddress;
use super::types::AccountRecord;
use crate::error::{LifecycleError, Result};
use crate::storage::Storage;

/// Account store for all live records on the base layer.
///
/// Mutations are staged on a clone by the caller and written back with
/// [`AccountStore::put`], so a failed operation never leaves a half-applied
/// record behind.
#[derive(Clone, Default)]
pub struct AccountStore {
    accounts: HashMap<AccountAddress, AccountRecord>,
    storage: Option<Arc<Storage>>,
}

impl AccountStore {
    /// Create a new empty account store
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            storage: None,
        }
    }

    /// Create with storage backend, reloading any persisted records
    pub fn with_storage(storage: Arc<Storage>) -> Result<Self> {
        let mut accounts = HashMap::new();
        for record in storage.load_accounts()? {
            accounts.insert(record.address, record);
        }
        debug!("Persistence: loaded {} account records", accounts.len());
        Ok(Self {
            accounts,
            storage: Some(storage),
        })
    }

    /// Insert a record at a fresh address
    pub fn insert_new(&mut self, record: AccountRecord) -> Result<()> {
        if self.accounts.contains_key(&record.address) {
            return Err(LifecycleError::AlreadyExists(record.address.to_string()));
        }
        self.put(record)
    }

    /// Overwrite (or create) a record
    pub fn put(&mut self, record: AccountRecord) -> Result<()> {
        // Persist first so the cache never runs ahead of storage
        if let Some(storage) = &self.storage {
            storage.save_account(&record)?;
        }
        self.accounts.insert(record.address, record);
        Ok(())
    }

    /// Get account by address
    pub fn get(&self, address: &AccountAddress) -> Result<&AccountRecord> {
        self.accounts
            .get(address)
            .ok_or_else(|| LifecycleError::NotFound(address.to_string()))
    }

    /// Remove a record, returning it
    pub fn remove(&mut self, address: &AccountAddress) -> Result<AccountRecord> {
        if !self.accounts.contains_key(address) {
            return Err(LifecycleError::NotFound(address.to_string()));
        }
        if let Some(storage) = &self.storage {
            storage.delete_account(address)?;
        }
        self.accounts
            .remove(address)
            .ok_or_else(|| LifecycleError::NotFound(address.to_string()))
    }

    /// Get all accounts
    pub fn all_accounts(&self) -> Vec<&AccountRecord> {
        self.accounts.values().collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
