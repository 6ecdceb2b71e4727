// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use crate::accounts::{AccountService, Collaborators, FederationAdapter, VerificationCodeService};
use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::error::{IdentityError, IdentityResult};
use crate::providers::GoogleClient;
use crate::storage::CredentialStore;

/// Browser-facing settings: redirects and cookie attributes.
#[derive(Debug, Clone)]
pub struct WebSettings {
    pub frontend_url: String,
    pub federation_failure_url: String,
    pub cookie_secure: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountService>,
    pub federation: Arc<FederationAdapter>,
    pub tokens: Arc<TokenIssuer>,
    pub store: Arc<dyn CredentialStore>,
    /// `None` when Google sign-in is not configured
    pub google: Option<Arc<GoogleClient>>,
    pub web: WebSettings,
    pub dependency_timeout: Duration,
}

impl AppState {
    /// Wire the services from configuration and collaborators.
    pub fn new(config: &Config, collaborators: Collaborators) -> IdentityResult<Self> {
        let timeout = config.dependency_timeout;
        let tokens = Arc::new(TokenIssuer::new(
            config.tokens.clone(),
            collaborators.clock.clone(),
        )?);
        let codes = VerificationCodeService::new(config.codes.clone())?;

        let google = match config.google.clone() {
            Some(settings) => Some(Arc::new(
                GoogleClient::new(settings, timeout)
                    .map_err(|e| IdentityError::internal(e.to_string()))?,
            )),
            None => None,
        };

        let federation = Arc::new(FederationAdapter::new(
            collaborators.store.clone(),
            tokens.clone(),
            collaborators.clock.clone(),
            timeout,
        ));
        let store = collaborators.store.clone();
        let accounts = Arc::new(AccountService::new(
            collaborators,
            codes,
            tokens.clone(),
            config.service_settings(),
        ));

        Ok(Self {
            accounts,
            federation,
            tokens,
            store,
            google,
            web: WebSettings {
                frontend_url: config.frontend_url.clone(),
                federation_failure_url: config.federation_failure_url(),
                cookie_secure: config.cookie_secure,
            },
            dependency_timeout: timeout,
        })
    }

    /// Session lifetime in seconds, used for the cookie `Max-Age`.
    pub fn session_max_age(&self) -> i64 {
        self.tokens.ttl().num_seconds()
    }
}
