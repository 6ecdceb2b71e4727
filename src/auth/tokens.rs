// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token issuance and validation (HS256 JWT).
//!
//! Tokens are self-contained: there is no session table and no revocation.
//! A token stays valid until `exp` even after logout or a password reset.

use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::claims::SessionClaims;
use crate::accounts::account::Account;
use crate::clock::Clock;
use crate::error::{IdentityError, IdentityResult};

/// Minimum signing key length for HS256.
pub const MIN_SECRET_LEN: usize = 32;

/// Construction-time settings for [`TokenIssuer`].
#[derive(Clone)]
pub struct TokenSettings {
    pub secret: Vec<u8>,
    pub issuer: String,
    pub ttl: Duration,
    /// Clock skew tolerance in seconds
    pub leeway_secs: u64,
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// A signed token and the claims inside it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
    leeway_secs: u64,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(settings: TokenSettings, clock: Arc<dyn Clock>) -> IdentityResult<Self> {
        if settings.secret.len() < MIN_SECRET_LEN {
            return Err(IdentityError::internal(format!(
                "token signing key must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if settings.ttl <= Duration::zero() {
            return Err(IdentityError::internal("session ttl must be positive".to_string()));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(&settings.secret),
            decoding: DecodingKey::from_secret(&settings.secret),
            issuer: settings.issuer,
            ttl: settings.ttl,
            leeway_secs: settings.leeway_secs,
            clock,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a session token bound to the account's current identity fields.
    pub fn issue(&self, account: &Account) -> IdentityResult<IssuedToken> {
        let iat = self.clock.now();
        let claims = SessionClaims {
            sub: account.id.to_string(),
            name: account.display_name.clone(),
            email: account.email.to_string(),
            role: account.role.clone(),
            iss: self.issuer.clone(),
            iat: iat.timestamp(),
            exp: (iat + self.ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| IdentityError::internal(format!("token signing failed: {e}")))?;

        Ok(IssuedToken { token, claims })
    }

    /// Verify signature, issuer and expiry; return the embedded claims.
    ///
    /// Expiry is judged against the injected clock, same as issuance.
    pub fn validate(&self, token: &str) -> IdentityResult<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected session token");
                IdentityError::TokenInvalid
            })?;

        let leeway = i64::try_from(self.leeway_secs).unwrap_or(i64::MAX);
        if claims.exp.saturating_add(leeway) < self.clock.now().timestamp() {
            return Err(IdentityError::TokenExpired);
        }
        Ok(claims)
    }
}
