// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account record, its identifiers and the patch type every mutation goes
//! through.
//!
//! Stores never mutate an [`Account`] field by field. They hand the current
//! record to [`AccountPatch::apply`] inside one write transaction and persist
//! the result only if the patch accepted it, which is what makes code
//! consumption single-use under concurrent requests.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};

/// Role assigned to every new account. Opaque to this service.
pub const DEFAULT_ROLE: &str = "student";

/// RFC 5321 path limit.
const MAX_EMAIL_LEN: usize = 254;

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque unique account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Case-normalized email address.
///
/// Parsing applies Unicode NFKC, trims surrounding whitespace and lower-cases
/// the result, so two spellings of one mailbox always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> IdentityResult<Self> {
        let normalized = raw.nfkc().collect::<String>().trim().to_lowercase();

        if normalized.is_empty() {
            return Err(IdentityError::validation("Email is required"));
        }
        if normalized.len() > MAX_EMAIL_LEN {
            return Err(IdentityError::validation("Email is too long"));
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(IdentityError::validation("Email must not contain whitespace"));
        }

        let Some((local, domain)) = normalized.split_once('@') else {
            return Err(IdentityError::validation("Email address is malformed"));
        };
        let domain_ok = !domain.is_empty()
            && !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.');
        if local.is_empty() || !domain_ok {
            return Err(IdentityError::validation("Email address is malformed"));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Credential & Verification State
// =============================================================================

/// Password hashing scheme tag stored next to each hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashScheme {
    #[serde(rename = "argon2id-v19")]
    Argon2idV19,
}

/// Local password credential (PHC string).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordCredential {
    pub hash: String,
    pub scheme: HashScheme,
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredential")
            .field("hash", &"<redacted>")
            .field("scheme", &self.scheme)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    Verified,
}

/// What a one-time code proves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    EmailVerify,
    PasswordReset,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::EmailVerify => "email_verify",
            CodePurpose::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for CodePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyed digest of a supplied or issued code.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeDigest(String);

impl CodeDigest {
    pub(crate) fn new(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CodeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodeDigest(<redacted>)")
    }
}

/// A pending one-time code. Only the digest is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCode {
    pub purpose: CodePurpose,
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

impl PendingCode {
    /// Unexpired and digest-equal (constant time).
    pub fn accepts(&self, supplied: &CodeDigest, now: DateTime<Utc>) -> bool {
        let fresh = now < self.expires_at;
        let equal: bool = self.digest.as_bytes().ct_eq(supplied.as_str().as_bytes()).into();
        fresh && equal
    }
}

/// At most one pending code per purpose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCodes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verify: Option<PendingCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset: Option<PendingCode>,
}

impl PendingCodes {
    fn slot_mut(&mut self, purpose: CodePurpose) -> &mut Option<PendingCode> {
        match purpose {
            CodePurpose::EmailVerify => &mut self.email_verify,
            CodePurpose::PasswordReset => &mut self.password_reset,
        }
    }
}

/// Profile attributes; opaque to the lifecycle rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: Email,
    pub display_name: String,
    /// `None` for federation-only accounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordCredential>,
    pub verification: VerificationState,
    #[serde(default)]
    pub pending_codes: PendingCodes,
    #[serde(default)]
    pub profile: Profile,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Locally registered account, awaiting email verification.
    pub fn local(
        email: Email,
        display_name: impl Into<String>,
        password: PasswordCredential,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AccountId::new(),
            email,
            display_name: display_name.into(),
            password: Some(password),
            verification: VerificationState::Unverified,
            pending_codes: PendingCodes::default(),
            profile: Profile::default(),
            role: DEFAULT_ROLE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Account created by a federation exchange: verified, no password.
    pub fn federated(email: Email, display_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            email,
            display_name: display_name.into(),
            password: None,
            verification: VerificationState::Verified,
            pending_codes: PendingCodes::default(),
            profile: Profile::default(),
            role: DEFAULT_ROLE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verification == VerificationState::Verified
    }
}

// =============================================================================
// Patches
// =============================================================================

/// Why a store refused to commit a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PatchRejection {
    #[error("{0} code was missing, expired or did not match")]
    CodeRejected(CodePurpose),
}

#[derive(Debug, Clone)]
enum AccountChange {
    ConsumeCode {
        purpose: CodePurpose,
        supplied: CodeDigest,
    },
    MarkVerified,
    SetCode(PendingCode),
    SetPassword(PasswordCredential),
    SetDisplayName(String),
    MergeMetadata(Map<String, Value>),
    SetAvatar(String),
}

/// Ordered set of changes applied to one account in a single atomic update.
#[derive(Debug, Clone)]
pub struct AccountPatch {
    at: DateTime<Utc>,
    changes: Vec<AccountChange>,
}

impl AccountPatch {
    /// Start a patch evaluated at `now` (code expiry and `updated_at`).
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            at: now,
            changes: Vec::new(),
        }
    }

    /// Guard: the pending code of `purpose` must accept `supplied`; it is
    /// then cleared. A failed guard rejects the whole patch.
    pub fn consume_code(mut self, purpose: CodePurpose, supplied: CodeDigest) -> Self {
        self.changes.push(AccountChange::ConsumeCode { purpose, supplied });
        self
    }

    pub fn mark_verified(mut self) -> Self {
        self.changes.push(AccountChange::MarkVerified);
        self
    }

    /// Replace any pending code of the same purpose.
    pub fn set_code(mut self, code: PendingCode) -> Self {
        self.changes.push(AccountChange::SetCode(code));
        self
    }

    pub fn set_password(mut self, credential: PasswordCredential) -> Self {
        self.changes.push(AccountChange::SetPassword(credential));
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.changes.push(AccountChange::SetDisplayName(name.into()));
        self
    }

    /// Merge metadata keys; a `null` value removes the key.
    pub fn merge_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.changes.push(AccountChange::MergeMetadata(metadata));
        self
    }

    pub fn avatar(mut self, reference: impl Into<String>) -> Self {
        self.changes.push(AccountChange::SetAvatar(reference.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Apply every change to a copy of `current`.
    ///
    /// Returns the updated record, or the rejection of the first failing
    /// guard, in which case nothing may be persisted.
    pub fn apply(&self, current: &Account) -> Result<Account, PatchRejection> {
        let mut account = current.clone();

        for change in &self.changes {
            match change {
                AccountChange::ConsumeCode { purpose, supplied } => {
                    let slot = account.pending_codes.slot_mut(*purpose);
                    let accepted = slot
                        .as_ref()
                        .is_some_and(|code| code.accepts(supplied, self.at));
                    if !accepted {
                        return Err(PatchRejection::CodeRejected(*purpose));
                    }
                    *slot = None;
                }
                AccountChange::MarkVerified => {
                    account.verification = VerificationState::Verified;
                }
                AccountChange::SetCode(code) => {
                    *account.pending_codes.slot_mut(code.purpose) = Some(code.clone());
                }
                AccountChange::SetPassword(credential) => {
                    account.password = Some(credential.clone());
                }
                AccountChange::SetDisplayName(name) => {
                    account.display_name = name.clone();
                }
                AccountChange::MergeMetadata(metadata) => {
                    for (key, value) in metadata {
                        if value.is_null() {
                            account.profile.metadata.remove(key);
                        } else {
                            account.profile.metadata.insert(key.clone(), value.clone());
                        }
                    }
                }
                AccountChange::SetAvatar(reference) => {
                    account.profile.avatar = Some(reference.clone());
                }
            }
        }

        account.updated_at = self.at;
        Ok(account)
    }
}
