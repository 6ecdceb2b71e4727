// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory credential store.
//!
//! Used by tests and by `STORE_BACKEND=memory` for local runs. Every mutation
//! holds the write lock for its whole read-apply-write cycle, which gives the
//! same atomicity as a redb write transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CredentialStore, StoreError, StoreResult};
use crate::accounts::account::{Account, AccountId, AccountPatch, Email};

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    email_index: HashMap<Email, AccountId>,
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Tables>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub async fn len(&self) -> usize {
        self.inner.read().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &Email) -> StoreResult<Option<Account>> {
        let tables = self.inner.read().await;
        Ok(tables
            .email_index
            .get(email)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        Ok(self.inner.read().await.accounts.get(id).cloned())
    }

    async fn create(&self, account: Account) -> StoreResult<Account> {
        let mut tables = self.inner.write().await;
        if tables.email_index.contains_key(&account.email) {
            return Err(StoreError::Conflict(format!(
                "Account with email {}",
                account.email
            )));
        }
        if tables.accounts.contains_key(&account.id) {
            return Err(StoreError::Conflict(format!("Account {}", account.id)));
        }

        tables.email_index.insert(account.email.clone(), account.id);
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn update(&self, id: &AccountId, patch: AccountPatch) -> StoreResult<Account> {
        let mut tables = self.inner.write().await;
        let current = tables
            .accounts
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("Account {id}")))?;

        let updated = patch.apply(current).map_err(StoreError::Rejected)?;
        tables.accounts.insert(*id, updated.clone());
        Ok(updated)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::account::{
        CodeDigest, CodePurpose, HashScheme, PasswordCredential, PendingCode,
    };
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn sample_account(email: &str) -> Account {
        Account::local(
            Email::parse(email).unwrap(),
            "Ana",
            PasswordCredential {
                hash: "stub".to_string(),
                scheme: HashScheme::Argon2idV19,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_and_find() {
        let store = MemoryCredentialStore::new();
        assert!(store.is_empty().await);

        let account = store.create(sample_account("ana@example.com")).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store
                .find_by_email(&Email::parse("ANA@example.com").unwrap())
                .await
                .unwrap(),
            Some(account.clone())
        );
        assert_eq!(store.find_by_id(&account.id).await.unwrap(), Some(account));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryCredentialStore::new();
        store.create(sample_account("ana@example.com")).await.unwrap();
        let result = store.create(sample_account("ana@example.com")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn concurrent_consumers_only_one_wins() {
        let store = Arc::new(MemoryCredentialStore::new());
        let now = Utc::now();
        let account = store.create(sample_account("ana@example.com")).await.unwrap();
        store
            .update(
                &account.id,
                AccountPatch::at(now).set_code(PendingCode {
                    purpose: CodePurpose::EmailVerify,
                    digest: "d".to_string(),
                    expires_at: now + Duration::hours(1),
                }),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = account.id;
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        &id,
                        AccountPatch::at(now)
                            .consume_code(CodePurpose::EmailVerify, CodeDigest::new("d".to_string()))
                            .mark_verified(),
                    )
                    .await
                    .is_ok()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
