// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Argon2id password hashing.
//!
//! Hashing is CPU-bound, so the async entry points move the work onto
//! tokio's blocking pool.

use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::Argon2;
use ring::rand::{SecureRandom, SystemRandom};

use super::account::{HashScheme, PasswordCredential};
use crate::error::{IdentityError, IdentityResult};

const SALT_LEN: usize = 16;

/// Upper bound on accepted password length (bytes).
pub const MAX_PASSWORD_LEN: usize = 1024;

#[derive(Debug, Clone)]
pub struct PasswordHasher {
    rng: SystemRandom,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// Hash `password` with a fresh random salt.
    pub fn hash_blocking(&self, password: &str) -> IdentityResult<PasswordCredential> {
        let mut salt_bytes = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt_bytes)
            .map_err(|_| IdentityError::internal("system randomness unavailable".to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| IdentityError::internal(format!("salt encoding failed: {e}")))?;

        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| IdentityError::internal(format!("password hashing failed: {e}")))?;

        Ok(PasswordCredential {
            hash: hash.to_string(),
            scheme: HashScheme::Argon2idV19,
        })
    }

    /// Constant-time check of `password` against a stored credential.
    ///
    /// An unparseable stored hash counts as a mismatch.
    pub fn verify_blocking(&self, password: &str, credential: &PasswordCredential) -> bool {
        match credential.scheme {
            HashScheme::Argon2idV19 => match PasswordHash::new(&credential.hash) {
                Ok(parsed) => Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok(),
                Err(e) => {
                    tracing::warn!(error = %e, "Stored password hash is unparseable");
                    false
                }
            },
        }
    }

    pub async fn hash(&self, password: String) -> IdentityResult<PasswordCredential> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password))
            .await
            .map_err(|e| IdentityError::internal(format!("hashing task failed: {e}")))?
    }

    pub async fn verify(
        &self,
        password: String,
        credential: PasswordCredential,
    ) -> IdentityResult<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&password, &credential))
            .await
            .map_err(|e| IdentityError::internal(format!("verification task failed: {e}")))
    }
}
