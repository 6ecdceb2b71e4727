// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded account database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `accounts`: account_id → serialized Account (JSON bytes)
//! - `account_email_index`: normalized email → account_id
//!
//! redb admits one write transaction at a time, so every create and patch is
//! serialized against all other mutations. Both tables are always written in
//! the same transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{CredentialStore, StoreError, StoreResult};
use crate::accounts::account::{Account, AccountId, AccountPatch, Email, PatchRejection};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: account_id → serialized Account (JSON bytes).
const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");

/// Unique index: normalized email → account_id.
const ACCOUNT_EMAIL_INDEX: TableDefinition<&str, &str> = TableDefinition::new("account_email_index");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccountDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("patch rejected: {0}")]
    Rejected(PatchRejection),
}

pub type AccountDbResult<T> = Result<T, AccountDbError>;

impl From<AccountDbError> for StoreError {
    fn from(e: AccountDbError) -> Self {
        match e {
            AccountDbError::Conflict(what) => StoreError::Conflict(what),
            AccountDbError::NotFound(what) => StoreError::NotFound(what),
            AccountDbError::Rejected(rejection) => StoreError::Rejected(rejection),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

// =============================================================================
// AccountDatabase
// =============================================================================

/// Synchronous redb handle. Wrapped by [`RedbCredentialStore`] for async use.
pub struct AccountDatabase {
    db: Database,
}

impl AccountDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> AccountDbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS)?;
            let _ = write_txn.open_table(ACCOUNT_EMAIL_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Look up an account by id.
    pub fn get(&self, id: &AccountId) -> AccountDbResult<Option<Account>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;
        match table.get(id.to_string().as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Look up an account through the email index.
    pub fn get_by_email(&self, email: &Email) -> AccountDbResult<Option<Account>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ACCOUNT_EMAIL_INDEX)?;
        let Some(id) = index.get(email.as_str())?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };

        let accounts = read_txn.open_table(ACCOUNTS)?;
        match accounts.get(id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => {
                tracing::warn!(account_id = %id, "Email index points at a missing account");
                Ok(None)
            }
        }
    }

    /// Insert a new account and its index entry.
    pub fn insert_new(&self, account: &Account) -> AccountDbResult<()> {
        let id = account.id.to_string();
        let json = serde_json::to_vec(account)?;

        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut index = write_txn.open_table(ACCOUNT_EMAIL_INDEX)?;
            let mut accounts = write_txn.open_table(ACCOUNTS)?;

            if index.get(account.email.as_str())?.is_some() {
                Err(AccountDbError::Conflict(format!("Account with email {}", account.email)))
            } else if accounts.get(id.as_str())?.is_some() {
                Err(AccountDbError::Conflict(format!("Account {id}")))
            } else {
                accounts.insert(id.as_str(), json.as_slice())?;
                index.insert(account.email.as_str(), id.as_str())?;
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                write_txn.commit()?;
                Ok(())
            }
            Err(e) => {
                write_txn.abort()?;
                Err(e)
            }
        }
    }

    /// Apply a patch to one account inside a single write transaction.
    pub fn apply_patch(&self, id: &AccountId, patch: &AccountPatch) -> AccountDbResult<Account> {
        let key = id.to_string();

        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;

            // Read existing value and deserialize before mutating
            let existing_bytes = accounts.get(key.as_str())?.map(|v| v.value().to_vec());

            match existing_bytes {
                None => Err(AccountDbError::NotFound(format!("Account {key}"))),
                Some(bytes) => {
                    let current: Account = serde_json::from_slice(&bytes)?;
                    match patch.apply(&current) {
                        Ok(updated) => {
                            let json = serde_json::to_vec(&updated)?;
                            accounts.insert(key.as_str(), json.as_slice())?;
                            Ok(updated)
                        }
                        Err(rejection) => Err(AccountDbError::Rejected(rejection)),
                    }
                }
            }
        };

        match outcome {
            Ok(updated) => {
                write_txn.commit()?;
                Ok(updated)
            }
            Err(e) => {
                write_txn.abort()?;
                Err(e)
            }
        }
    }

    /// Open a read transaction on both tables.
    pub fn ping(&self) -> AccountDbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(ACCOUNTS)?;
        let _ = read_txn.open_table(ACCOUNT_EMAIL_INDEX)?;
        Ok(())
    }
}

// =============================================================================
// Async adapter
// =============================================================================

/// [`CredentialStore`] over [`AccountDatabase`]; calls run on the blocking pool.
#[derive(Clone)]
pub struct RedbCredentialStore {
    db: Arc<AccountDatabase>,
}

impl RedbCredentialStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = AccountDatabase::open(path)?;
        tracing::info!(path = %path.display(), "Opened account database");
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&AccountDatabase) -> AccountDbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl CredentialStore for RedbCredentialStore {
    async fn find_by_email(&self, email: &Email) -> StoreResult<Option<Account>> {
        let email = email.clone();
        self.blocking(move |db| db.get_by_email(&email)).await
    }

    async fn find_by_id(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        let id = *id;
        self.blocking(move |db| db.get(&id)).await
    }

    async fn create(&self, account: Account) -> StoreResult<Account> {
        self.blocking(move |db| {
            db.insert_new(&account)?;
            Ok(account)
        })
        .await
    }

    async fn update(&self, id: &AccountId, patch: AccountPatch) -> StoreResult<Account> {
        let id = *id;
        self.blocking(move |db| db.apply_patch(&id, &patch)).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.blocking(|db| db.ping()).await
    }
}
