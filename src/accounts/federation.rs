// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Federated sign-in.
//!
//! Converts an external identity that the provider has already verified into
//! a local session. The first exchange for an email creates a `Verified`
//! account without a password; later exchanges reuse it untouched.

use std::sync::Arc;
use std::time::Duration;

use super::account::{Account, Email};
use super::service::{guard_store, map_store_error, Session, MAX_DISPLAY_NAME_LEN};
use crate::auth::tokens::TokenIssuer;
use crate::clock::Clock;
use crate::error::{IdentityError, IdentityResult};
use crate::storage::{CredentialStore, StoreError};

/// Identity asserted by a trusted provider.
#[derive(Debug, Clone)]
pub struct FederatedIdentity {
    pub email: String,
    pub display_name: String,
}

pub struct FederationAdapter {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<TokenIssuer>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl FederationAdapter {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: Arc<TokenIssuer>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            tokens,
            clock,
            timeout,
        }
    }

    /// Find or create the account for `identity` and mint a session token.
    pub async fn exchange(&self, identity: FederatedIdentity) -> IdentityResult<Session> {
        let email = Email::parse(&identity.email)?;
        let display_name = federated_display_name(&identity.display_name, &email);

        let account = match self.find(&email).await? {
            Some(existing) => existing,
            None => self.create(email, display_name).await?,
        };

        let token = self.tokens.issue(&account)?;
        tracing::info!(account_id = %account.id, jti = %token.claims.jti, "Federated session issued");
        Ok(Session { account, token })
    }

    async fn find(&self, email: &Email) -> IdentityResult<Option<Account>> {
        guard_store(self.timeout, "find_by_email", self.store.find_by_email(email)).await
    }

    async fn create(&self, email: Email, display_name: String) -> IdentityResult<Account> {
        let account = Account::federated(email.clone(), display_name, self.clock.now());

        let created = tokio::time::timeout(self.timeout, self.store.create(account)).await;
        match created {
            Ok(Ok(account)) => {
                tracing::info!(account_id = %account.id, "Account created by federation");
                Ok(account)
            }
            // Lost a concurrent first sign-in; use the winner's account.
            Ok(Err(StoreError::Conflict(_))) => self
                .find(&email)
                .await?
                .ok_or_else(|| IdentityError::internal("account vanished after conflict".to_string())),
            Ok(Err(e)) => Err(map_store_error("create", e)),
            Err(_) => {
                tracing::error!(operation = "create", "Credential store timed out");
                Err(IdentityError::unavailable("Account store is unavailable"))
            }
        }
    }
}

/// Provider names are trusted but not bounded; fall back to the local part
/// and cut to the same length local registration allows.
fn federated_display_name(raw: &str, email: &Email) -> String {
    let name = match raw.trim() {
        "" => email.as_str().split('@').next().unwrap_or_default(),
        name => name,
    };
    let truncated: String = name.chars().take(MAX_DISPLAY_NAME_LEN).collect();
    truncated.trim_end().to_string()
}
