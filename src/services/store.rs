use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::StoreError;
use crate::models::{AccountUpdate, UserAccount};

/// Durable home of user accounts. Each call must be atomic on its own; the
/// ledger serializes read-modify-write sequences per username above this.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_account(&self, username: &str) -> Result<UserAccount, StoreError>;

    async fn create_account(&self, account: &UserAccount) -> Result<UserAccount, StoreError>;

    async fn update_account(&self, username: &str, update: &AccountUpdate) -> Result<(), StoreError>;
}

/// Map-backed store used by tests and the `memory` backend.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    accounts: RwLock<HashMap<String, UserAccount>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an account as-is (test setup).
    pub fn put(&self, account: UserAccount) {
        self.accounts.write().insert(account.username.clone(), account);
    }

    pub fn get(&self, username: &str) -> Option<UserAccount> {
        self.accounts.read().get(username).cloned()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_account(&self, username: &str) -> Result<UserAccount, StoreError> {
        self.get(username)
            .ok_or_else(|| StoreError::NotFound(username.to_string()))
    }

    async fn create_account(&self, account: &UserAccount) -> Result<UserAccount, StoreError> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&account.username) {
            return Err(StoreError::AlreadyExists(account.username.clone()));
        }
        accounts.insert(account.username.clone(), account.clone());
        Ok(account.clone())
    }

    async fn update_account(&self, username: &str, update: &AccountUpdate) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(username)
            .ok_or_else(|| StoreError::NotFound(username.to_string()))?;
        update.apply(account);
        Ok(())
    }
}
