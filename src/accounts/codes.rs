// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-time codes for email verification and password reset.
//!
//! ## Code Formats
//!
//! - `EmailVerify`: N decimal digits (default 6), typed by the user.
//! - `PasswordReset`: `<account-id>.<base64url secret>`, delivered as a link.
//!   The id prefix lets the reset endpoint locate the account without an
//!   email address; the 256-bit secret is what proves possession.
//!
//! Only `HMAC-SHA256(key, purpose | account id | code)` is stored. Validation
//! is never a read-then-write: [`VerificationCodeService::consume`] returns a
//! patch whose guard is checked inside the store's atomic update.

use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

use super::account::{AccountId, AccountPatch, CodeDigest, CodePurpose, PendingCode};
use crate::error::{IdentityError, IdentityResult};

type HmacSha256 = Hmac<Sha256>;

/// Random bytes behind a password-reset token.
const RESET_SECRET_LEN: usize = 32;

/// Construction-time settings for [`VerificationCodeService`].
#[derive(Clone)]
pub struct CodeSettings {
    pub secret: Vec<u8>,
    pub digits: u32,
    pub email_verify_ttl: Duration,
    pub password_reset_ttl: Duration,
}

impl std::fmt::Debug for CodeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeSettings")
            .field("secret", &"<redacted>")
            .field("digits", &self.digits)
            .field("email_verify_ttl", &self.email_verify_ttl)
            .field("password_reset_ttl", &self.password_reset_ttl)
            .finish()
    }
}

/// A freshly generated code: the plaintext goes to the mailer, the pending
/// record goes to the store.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub plaintext: String,
    pub pending: PendingCode,
}

#[derive(Clone)]
pub struct VerificationCodeService {
    mac: HmacSha256,
    digits: u32,
    email_verify_ttl: Duration,
    password_reset_ttl: Duration,
    rng: SystemRandom,
}

impl VerificationCodeService {
    pub fn new(settings: CodeSettings) -> IdentityResult<Self> {
        if settings.secret.is_empty() {
            return Err(IdentityError::internal("code secret must not be empty".to_string()));
        }
        if !(6..=9).contains(&settings.digits) {
            return Err(IdentityError::internal(format!(
                "code length must be 6-9 digits, got {}",
                settings.digits
            )));
        }
        let mac = HmacSha256::new_from_slice(&settings.secret)
            .map_err(|e| IdentityError::internal(format!("invalid code secret: {e}")))?;

        Ok(Self {
            mac,
            digits: settings.digits,
            email_verify_ttl: settings.email_verify_ttl,
            password_reset_ttl: settings.password_reset_ttl,
            rng: SystemRandom::new(),
        })
    }

    pub fn ttl(&self, purpose: CodePurpose) -> Duration {
        match purpose {
            CodePurpose::EmailVerify => self.email_verify_ttl,
            CodePurpose::PasswordReset => self.password_reset_ttl,
        }
    }

    /// Generate a new code for `account_id` valid from `now`.
    pub fn issue(
        &self,
        account_id: &AccountId,
        purpose: CodePurpose,
        now: DateTime<Utc>,
    ) -> IdentityResult<IssuedCode> {
        let plaintext = match purpose {
            CodePurpose::EmailVerify => self.numeric_code()?,
            CodePurpose::PasswordReset => self.reset_token(account_id)?,
        };

        let pending = PendingCode {
            purpose,
            digest: self.digest(account_id, purpose, &plaintext).as_str().to_string(),
            expires_at: now + self.ttl(purpose),
        };

        Ok(IssuedCode { plaintext, pending })
    }

    /// Keyed digest of a code as bound to one account and purpose.
    pub fn digest(&self, account_id: &AccountId, purpose: CodePurpose, code: &str) -> CodeDigest {
        let mut mac = self.mac.clone();
        mac.update(purpose.as_str().as_bytes());
        mac.update(&[0]);
        mac.update(account_id.to_string().as_bytes());
        mac.update(&[0]);
        mac.update(code.trim().as_bytes());
        CodeDigest::new(Base64::encode_string(&mac.finalize().into_bytes()))
    }

    /// Patch that validates and clears the pending code of `purpose`.
    ///
    /// The caller extends it with the transition the code authorizes and
    /// commits it through the store; a missing, expired or mismatched code
    /// rejects the whole patch.
    pub fn consume(
        &self,
        account_id: &AccountId,
        purpose: CodePurpose,
        supplied: &str,
        now: DateTime<Utc>,
    ) -> AccountPatch {
        AccountPatch::at(now).consume_code(purpose, self.digest(account_id, purpose, supplied))
    }

    /// Account addressed by a password-reset token, if the token is well formed.
    pub fn reset_token_account(token: &str) -> Option<AccountId> {
        let (id, secret) = token.trim().split_once('.')?;
        if secret.is_empty() {
            return None;
        }
        AccountId::parse(id)
    }

    fn numeric_code(&self) -> IdentityResult<String> {
        let modulus = 10u32.pow(self.digits);
        // Reject the tail of the u32 range so every code is equally likely.
        let zone = u32::MAX - (u32::MAX % modulus);

        loop {
            let mut buf = [0u8; 4];
            self.fill(&mut buf)?;
            let value = u32::from_be_bytes(buf);
            if value < zone {
                return Ok(format!(
                    "{:0width$}",
                    value % modulus,
                    width = self.digits as usize
                ));
            }
        }
    }

    fn reset_token(&self, account_id: &AccountId) -> IdentityResult<String> {
        let mut secret = [0u8; RESET_SECRET_LEN];
        self.fill(&mut secret)?;
        Ok(format!("{account_id}.{}", Base64UrlUnpadded::encode_string(&secret)))
    }

    fn fill(&self, buf: &mut [u8]) -> IdentityResult<()> {
        self.rng
            .fill(buf)
            .map_err(|_| IdentityError::internal("system randomness unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::account::{Account, Email, HashScheme, PasswordCredential};

    fn service() -> VerificationCodeService {
        VerificationCodeService::new(CodeSettings {
            secret: b"test-code-secret".to_vec(),
            digits: 6,
            email_verify_ttl: Duration::hours(24),
            password_reset_ttl: Duration::minutes(15),
        })
        .unwrap()
    }

    fn account(now: DateTime<Utc>) -> Account {
        Account::local(
            Email::parse("ana@example.com").unwrap(),
            "Ana",
            PasswordCredential {
                hash: "x".to_string(),
                scheme: HashScheme::Argon2idV19,
            },
            now,
        )
    }

    #[test]
    fn email_codes_are_six_digits() {
        let codes = service();
        let id = AccountId::new();
        for _ in 0..50 {
            let issued = codes.issue(&id, CodePurpose::EmailVerify, Utc::now()).unwrap();
            assert_eq!(issued.plaintext.len(), 6);
            assert!(issued.plaintext.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn pending_record_never_holds_plaintext() {
        let codes = service();
        let id = AccountId::new();
        let issued = codes.issue(&id, CodePurpose::EmailVerify, Utc::now()).unwrap();
        assert_ne!(issued.pending.digest, issued.plaintext);
        assert!(!issued.pending.digest.contains(&issued.plaintext));
    }

    #[test]
    fn expiry_follows_purpose_ttl() {
        let codes = service();
        let id = AccountId::new();
        let now = Utc::now();

        let verify = codes.issue(&id, CodePurpose::EmailVerify, now).unwrap();
        assert_eq!(verify.pending.expires_at, now + Duration::hours(24));

        let reset = codes.issue(&id, CodePurpose::PasswordReset, now).unwrap();
        assert_eq!(reset.pending.expires_at, now + Duration::minutes(15));
    }

    #[test]
    fn digest_is_bound_to_account_and_purpose() {
        let codes = service();
        let a = AccountId::new();
        let b = AccountId::new();

        let base = codes.digest(&a, CodePurpose::EmailVerify, "123456");
        assert_eq!(base, codes.digest(&a, CodePurpose::EmailVerify, " 123456 "));
        assert_ne!(base, codes.digest(&b, CodePurpose::EmailVerify, "123456"));
        assert_ne!(base, codes.digest(&a, CodePurpose::PasswordReset, "123456"));
    }

    #[test]
    fn reset_tokens_locate_their_account() {
        let codes = service();
        let id = AccountId::new();
        let issued = codes.issue(&id, CodePurpose::PasswordReset, Utc::now()).unwrap();

        assert_eq!(VerificationCodeService::reset_token_account(&issued.plaintext), Some(id));
        assert_eq!(VerificationCodeService::reset_token_account("garbage"), None);
        assert_eq!(VerificationCodeService::reset_token_account(&format!("{id}.")), None);
    }

    #[test]
    fn consume_accepts_once_and_only_before_expiry() {
        let codes = service();
        let now = Utc::now();
        let mut acct = account(now);
        let issued = codes.issue(&acct.id, CodePurpose::EmailVerify, now).unwrap();
        acct.pending_codes.email_verify = Some(issued.pending.clone());

        let expired = codes
            .consume(&acct.id, CodePurpose::EmailVerify, &issued.plaintext, now + Duration::hours(25))
            .apply(&acct);
        assert!(expired.is_err());

        let consumed = codes
            .consume(&acct.id, CodePurpose::EmailVerify, &issued.plaintext, now)
            .apply(&acct)
            .unwrap();
        assert!(consumed.pending_codes.email_verify.is_none());

        let again = codes
            .consume(&acct.id, CodePurpose::EmailVerify, &issued.plaintext, now)
            .apply(&consumed);
        assert!(again.is_err());
    }

    #[test]
    fn rejects_bad_settings() {
        let mut settings = CodeSettings {
            secret: Vec::new(),
            digits: 6,
            email_verify_ttl: Duration::hours(1),
            password_reset_ttl: Duration::hours(1),
        };
        assert!(VerificationCodeService::new(settings.clone()).is_err());

        settings.secret = b"k".to_vec();
        settings.digits = 4;
        assert!(VerificationCodeService::new(settings).is_err());
    }
}
