// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account lifecycle controller.
//!
//! Every operation validates its input before the store is consulted. All
//! mutations are single [`AccountPatch`] updates, so concurrent requests for
//! the same account can never both consume one code.
//!
//! ## Collaborator Failures
//!
//! - Store errors and timeouts fail the operation with
//!   `DependencyUnavailable`; nothing is retried.
//! - Mail errors and timeouts are logged only. The mutation that produced
//!   the code stays committed and the caller can ask for a resend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use super::account::{Account, AccountId, AccountPatch, CodePurpose, Email};
use super::codes::VerificationCodeService;
use super::password::{PasswordHasher, MAX_PASSWORD_LEN};
use crate::auth::claims::SessionClaims;
use crate::auth::tokens::{IssuedToken, TokenIssuer};
use crate::clock::Clock;
use crate::error::{IdentityError, IdentityResult};
use crate::mail::{MailSender, MailTemplate};
use crate::storage::{AvatarUpload, AvatarUploader, CredentialStore, StoreError, StoreResult};

/// Longest accepted display name (characters).
pub const MAX_DISPLAY_NAME_LEN: usize = 100;

/// Default bound on each store or mail call.
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(5);

/// How `forgot_password` answers for an unknown email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForgotPasswordPolicy {
    /// Report `NotFound`
    #[default]
    NotFound,
    /// Answer as if a mail was sent
    Uniform,
}

impl ForgotPasswordPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "not_found" => Some(Self::NotFound),
            "uniform" => Some(Self::Uniform),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub dependency_timeout: Duration,
    pub forgot_password: ForgotPasswordPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
            forgot_password: ForgotPasswordPolicy::default(),
        }
    }
}

/// External collaborators of the lifecycle controller.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn CredentialStore>,
    pub mailer: Arc<dyn MailSender>,
    pub avatars: Arc<dyn AvatarUploader>,
    pub clock: Arc<dyn Clock>,
}

/// Fields a profile update may change. `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

/// Result of a successful login or federation exchange.
#[derive(Debug, Clone)]
pub struct Session {
    pub account: Account,
    pub token: IssuedToken,
}

pub struct AccountService {
    store: Arc<dyn CredentialStore>,
    mailer: Arc<dyn MailSender>,
    avatars: Arc<dyn AvatarUploader>,
    clock: Arc<dyn Clock>,
    codes: VerificationCodeService,
    passwords: PasswordHasher,
    tokens: Arc<TokenIssuer>,
    settings: ServiceSettings,
}

impl AccountService {
    pub fn new(
        collaborators: Collaborators,
        codes: VerificationCodeService,
        tokens: Arc<TokenIssuer>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store: collaborators.store,
            mailer: collaborators.mailer,
            avatars: collaborators.avatars,
            clock: collaborators.clock,
            codes,
            passwords: PasswordHasher::new(),
            tokens,
            settings,
        }
    }

    /// Create an `Unverified` account and mail its verification code.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> IdentityResult<Account> {
        let email = Email::parse(email)?;
        validate_password(password)?;
        let display_name = normalize_display_name(display_name)?;

        if self.find_by_email(&email).await?.is_some() {
            return Err(IdentityError::conflict("An account with this email already exists"));
        }

        let credential = self.passwords.hash(password.to_string()).await?;
        let now = self.clock.now();
        let mut account = Account::local(email, display_name, credential, now);
        let issued = self.codes.issue(&account.id, CodePurpose::EmailVerify, now)?;
        account.pending_codes.email_verify = Some(issued.pending);

        let account = self.store_call("create", self.store.create(account)).await?;
        tracing::info!(account_id = %account.id, "Account registered");

        self.dispatch(&account, MailTemplate::EmailVerification, &issued.plaintext)
            .await;
        Ok(account)
    }

    /// Consume the pending `EmailVerify` code and mark the account verified.
    pub async fn verify_email(&self, email: &str, code: &str) -> IdentityResult<Account> {
        let email = Email::parse(email)?;
        let code = require_code(code)?;

        let account = self
            .find_by_email(&email)
            .await?
            .ok_or_else(|| IdentityError::not_found("Account not found"))?;

        let patch = self
            .codes
            .consume(&account.id, CodePurpose::EmailVerify, code, self.clock.now())
            .mark_verified();
        let account = self.store_call("verify_email", self.store.update(&account.id, patch)).await?;

        tracing::info!(account_id = %account.id, "Email verified");
        Ok(account)
    }

    /// Replace the pending code of `purpose` and mail the new one.
    pub async fn resend_code(&self, email: &str, purpose: CodePurpose) -> IdentityResult<()> {
        let email = Email::parse(email)?;

        let account = self
            .find_by_email(&email)
            .await?
            .ok_or_else(|| IdentityError::not_found("Account not found"))?;

        if purpose == CodePurpose::EmailVerify && account.is_verified() {
            return Err(IdentityError::AlreadyVerified);
        }

        self.issue_and_send(&account, purpose).await
    }

    /// Check the password, then the verification state, then mint a token.
    pub async fn login(&self, email: &str, password: &str) -> IdentityResult<Session> {
        let email = Email::parse(email)?;
        if password.is_empty() {
            return Err(IdentityError::validation("Password is required"));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(IdentityError::InvalidCredentials);
        }

        let account = self
            .find_by_email(&email)
            .await?
            .ok_or(IdentityError::InvalidCredentials)?;
        let credential = account
            .password
            .clone()
            .ok_or(IdentityError::InvalidCredentials)?;

        if !self.passwords.verify(password.to_string(), credential).await? {
            tracing::debug!(account_id = %account.id, "Password mismatch");
            return Err(IdentityError::InvalidCredentials);
        }
        if !account.is_verified() {
            return Err(IdentityError::NotVerified);
        }

        let token = self.tokens.issue(&account)?;
        tracing::info!(account_id = %account.id, jti = %token.claims.jti, "Session issued");
        Ok(Session { account, token })
    }

    /// Sessions are stateless; the caller discards its token.
    pub fn logout(&self, claims: Option<&SessionClaims>) {
        if let Some(claims) = claims {
            tracing::info!(account_id = %claims.sub, jti = %claims.jti, "Session discarded by client");
        }
    }

    /// Current account behind a validated session.
    pub async fn get_profile(&self, claims: &SessionClaims) -> IdentityResult<Account> {
        let id = claims.account_id()?;
        self.find_by_id(&id)
            .await?
            .ok_or_else(|| IdentityError::not_found("Account not found"))
    }

    /// Merge profile fields; an avatar is uploaded first and its reference
    /// stored with the rest of the patch.
    pub async fn update_profile(
        &self,
        account_id: &AccountId,
        update: ProfileUpdate,
        avatar: Option<AvatarUpload>,
    ) -> IdentityResult<Account> {
        let display_name = update
            .display_name
            .as_deref()
            .map(normalize_display_name)
            .transpose()?;

        let current = self
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| IdentityError::not_found("Account not found"))?;

        let mut patch = AccountPatch::at(self.clock.now());
        if let Some(name) = display_name {
            patch = patch.display_name(name);
        }
        if let Some(metadata) = update.metadata {
            patch = patch.merge_metadata(metadata);
        }
        if let Some(upload) = avatar {
            let reference = self.upload_avatar(upload).await?;
            patch = patch.avatar(reference);
        }

        if patch.is_empty() {
            return Ok(current);
        }

        let account = self
            .store_call("update_profile", self.store.update(account_id, patch))
            .await?;
        tracing::info!(account_id = %account.id, "Profile updated");
        Ok(account)
    }

    /// Attach a password-reset code and mail the reset link.
    pub async fn forgot_password(&self, email: &str) -> IdentityResult<()> {
        let email = Email::parse(email)?;

        match self.find_by_email(&email).await? {
            Some(account) => self.issue_and_send(&account, CodePurpose::PasswordReset).await,
            None => match self.settings.forgot_password {
                ForgotPasswordPolicy::NotFound => Err(IdentityError::not_found("Account not found")),
                ForgotPasswordPolicy::Uniform => {
                    tracing::debug!("Password reset requested for unknown email");
                    Ok(())
                }
            },
        }
    }

    /// Consume a reset token and replace the password hash.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> IdentityResult<Account> {
        let token = require_code(token)?;
        validate_password(new_password)?;

        let account_id =
            VerificationCodeService::reset_token_account(token).ok_or(IdentityError::InvalidCode)?;
        // Unknown account looks the same as a bad token.
        let current = self
            .find_by_id(&account_id)
            .await?
            .ok_or(IdentityError::InvalidCode)?;

        // Check the code before paying for a hash; the store re-checks on commit.
        let guard = self
            .codes
            .consume(&account_id, CodePurpose::PasswordReset, token, self.clock.now());
        guard.apply(&current).map_err(|_| IdentityError::InvalidCode)?;

        let credential = self.passwords.hash(new_password.to_string()).await?;
        let patch = guard.set_password(credential);

        let account = self
            .store_call("reset_password", self.store.update(&account_id, patch))
            .await?;
        tracing::info!(account_id = %account.id, "Password reset");
        Ok(account)
    }

    // ========== Helpers ==========

    async fn issue_and_send(&self, account: &Account, purpose: CodePurpose) -> IdentityResult<()> {
        let now = self.clock.now();
        let issued = self.codes.issue(&account.id, purpose, now)?;
        let patch = AccountPatch::at(now).set_code(issued.pending);
        let account = self.store_call("set_code", self.store.update(&account.id, patch)).await?;

        tracing::info!(account_id = %account.id, purpose = %purpose, "Code issued");

        let template = match purpose {
            CodePurpose::EmailVerify => MailTemplate::EmailVerification,
            CodePurpose::PasswordReset => MailTemplate::PasswordReset,
        };
        self.dispatch(&account, template, &issued.plaintext).await;
        Ok(())
    }

    async fn dispatch(&self, account: &Account, template: MailTemplate, code: &str) {
        let send = self.mailer.send(&account.email, template, code);
        match tokio::time::timeout(self.settings.dependency_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                account_id = %account.id,
                template = template.as_str(),
                error = %e,
                "Mail delivery failed"
            ),
            Err(_) => tracing::warn!(
                account_id = %account.id,
                template = template.as_str(),
                "Mail delivery timed out"
            ),
        }
    }

    async fn upload_avatar(&self, upload: AvatarUpload) -> IdentityResult<String> {
        match tokio::time::timeout(self.settings.dependency_timeout, self.avatars.store(upload)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::error!("Avatar upload timed out");
                Err(IdentityError::unavailable("Avatar storage is unavailable"))
            }
        }
    }

    async fn find_by_email(&self, email: &Email) -> IdentityResult<Option<Account>> {
        self.store_call("find_by_email", self.store.find_by_email(email)).await
    }

    async fn find_by_id(&self, id: &AccountId) -> IdentityResult<Option<Account>> {
        self.store_call("find_by_id", self.store.find_by_id(id)).await
    }

    async fn store_call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> IdentityResult<T> {
        guard_store(self.settings.dependency_timeout, operation, fut).await
    }
}

/// Run one store call under `timeout`, mapping failures to the taxonomy.
pub(crate) async fn guard_store<T>(
    timeout: Duration,
    operation: &'static str,
    fut: impl Future<Output = StoreResult<T>>,
) -> IdentityResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| map_store_error(operation, e)),
        Err(_) => {
            tracing::error!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Credential store timed out"
            );
            Err(IdentityError::unavailable("Account store is unavailable"))
        }
    }
}

pub(crate) fn map_store_error(operation: &'static str, e: StoreError) -> IdentityError {
    match e {
        StoreError::Conflict(_) => {
            IdentityError::conflict("An account with this email already exists")
        }
        StoreError::NotFound(_) => IdentityError::not_found("Account not found"),
        StoreError::Rejected(rejection) => {
            tracing::debug!(operation, %rejection, "Code rejected");
            IdentityError::InvalidCode
        }
        StoreError::Backend(message) => {
            tracing::error!(operation, error = %message, "Credential store failure");
            IdentityError::unavailable("Account store is unavailable")
        }
    }
}

fn validate_password(password: &str) -> IdentityResult<()> {
    if password.is_empty() {
        return Err(IdentityError::validation("Password is required"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(IdentityError::validation(format!(
            "Password must be at most {MAX_PASSWORD_LEN} bytes"
        )));
    }
    Ok(())
}

fn normalize_display_name(raw: &str) -> IdentityResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(IdentityError::validation("Name is required"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(IdentityError::validation(format!(
            "Name must be at most {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn require_code(code: &str) -> IdentityResult<&str> {
    let code = code.trim();
    if code.is_empty() {
        return Err(IdentityError::validation("Code is required"));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::account::VerificationState;
    use crate::accounts::codes::CodeSettings;
    use crate::auth::tokens::TokenSettings;
    use crate::storage::{FileAvatarStore, MemoryCredentialStore};
    use crate::test_support::{ManualClock, RecordingMailer};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    const JWT_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct Harness {
        service: AccountService,
        store: Arc<MemoryCredentialStore>,
        mailer: Arc<RecordingMailer>,
        clock: Arc<ManualClock>,
        tokens: Arc<TokenIssuer>,
        _avatars_dir: tempfile::TempDir,
    }

    fn harness_with(mailer: RecordingMailer, policy: ForgotPasswordPolicy) -> Harness {
        let store = Arc::new(MemoryCredentialStore::new());
        let mailer = Arc::new(mailer);
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let avatars_dir = tempfile::tempdir().unwrap();

        let codes = VerificationCodeService::new(CodeSettings {
            secret: b"code-secret".to_vec(),
            digits: 6,
            email_verify_ttl: ChronoDuration::hours(24),
            password_reset_ttl: ChronoDuration::minutes(15),
        })
        .unwrap();
        let tokens = Arc::new(
            TokenIssuer::new(
                TokenSettings {
                    secret: JWT_SECRET.to_vec(),
                    issuer: "academy-identity".to_string(),
                    ttl: ChronoDuration::days(7),
                    leeway_secs: 0,
                },
                clock.clone(),
            )
            .unwrap(),
        );

        let service = AccountService::new(
            Collaborators {
                store: store.clone(),
                mailer: mailer.clone(),
                avatars: Arc::new(FileAvatarStore::new(avatars_dir.path().join("avatars"))),
                clock: clock.clone(),
            },
            codes,
            tokens.clone(),
            ServiceSettings {
                dependency_timeout: Duration::from_secs(5),
                forgot_password: policy,
            },
        );

        Harness {
            service,
            store,
            mailer,
            clock,
            tokens,
            _avatars_dir: avatars_dir,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingMailer::new(), ForgotPasswordPolicy::NotFound)
    }

    fn wrong_code(code: &str) -> &'static str {
        if code == "000000" {
            "111111"
        } else {
            "000000"
        }
    }

    impl Harness {
        fn email_code(&self) -> String {
            self.mailer
                .last_code(MailTemplate::EmailVerification)
                .expect("verification mail sent")
        }

        fn reset_token(&self) -> String {
            self.mailer
                .last_code(MailTemplate::PasswordReset)
                .expect("reset mail sent")
        }

        async fn verified_account(&self) -> Account {
            self.service.register("a@x.com", "pw123", "Ana").await.unwrap();
            self.service
                .verify_email("a@x.com", &self.email_code())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn full_lifecycle_scenario() {
        let h = harness();

        let account = h.service.register("a@x.com", "pw123", "Ana").await.unwrap();
        assert_eq!(account.verification, VerificationState::Unverified);
        assert_eq!(h.mailer.sent().len(), 1);

        let before = h.service.login("a@x.com", "pw123").await;
        assert!(matches!(before, Err(IdentityError::NotVerified)));

        let code = h.email_code();
        let wrong = h.service.verify_email("a@x.com", wrong_code(&code)).await;
        assert!(matches!(wrong, Err(IdentityError::InvalidCode)));

        let verified = h.service.verify_email("a@x.com", &code).await.unwrap();
        assert_eq!(verified.verification, VerificationState::Verified);

        let session = h.service.login("a@x.com", "pw123").await.unwrap();
        assert_eq!(session.token.claims.email, "a@x.com");
        assert_eq!(session.token.claims.name, "Ana");
        assert_eq!(h.tokens.validate(&session.token.token).unwrap(), session.token.claims);

        let bad = h.service.login("a@x.com", "pw124").await;
        assert!(matches!(bad, Err(IdentityError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let h = harness();
        h.service.register("a@x.com", "pw123", "Ana").await.unwrap();
        let again = h.service.register("A@X.com", "other", "Ana 2").await;
        assert!(matches!(again, Err(IdentityError::Conflict(_))));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn malformed_input_never_reaches_store() {
        let h = harness();
        for (email, password, name) in [
            ("not-an-email", "pw", "Ana"),
            ("a@x.com", "", "Ana"),
            ("a@x.com", "pw", "   "),
        ] {
            let result = h.service.register(email, password, name).await;
            assert!(matches!(result, Err(IdentityError::Validation(_))));
        }
        assert!(h.store.is_empty().await);
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn verification_code_is_single_use() {
        let h = harness();
        h.service.register("a@x.com", "pw123", "Ana").await.unwrap();
        let code = h.email_code();

        h.service.verify_email("a@x.com", &code).await.unwrap();
        let second = h.service.verify_email("a@x.com", &code).await;
        assert!(matches!(second, Err(IdentityError::InvalidCode)));
    }

    #[tokio::test]
    async fn expired_code_is_invalid_code() {
        let h = harness();
        h.service.register("a@x.com", "pw123", "Ana").await.unwrap();
        let code = h.email_code();

        h.clock.advance(ChronoDuration::hours(24));
        let result = h.service.verify_email("a@x.com", &code).await;
        assert!(matches!(result, Err(IdentityError::InvalidCode)));
    }

    #[tokio::test]
    async fn mismatch_leaves_code_usable() {
        let h = harness();
        h.service.register("a@x.com", "pw123", "Ana").await.unwrap();
        let code = h.email_code();

        let _ = h.service.verify_email("a@x.com", wrong_code(&code)).await;
        assert!(h.service.verify_email("a@x.com", &code).await.is_ok());
    }

    #[tokio::test]
    async fn resend_invalidates_previous_code() {
        let h = harness();
        h.service.register("a@x.com", "pw123", "Ana").await.unwrap();
        let first = h.email_code();

        h.service
            .resend_code("a@x.com", CodePurpose::EmailVerify)
            .await
            .unwrap();
        let second = h.email_code();
        assert_eq!(h.mailer.sent().len(), 2);

        if first != second {
            let old = h.service.verify_email("a@x.com", &first).await;
            assert!(matches!(old, Err(IdentityError::InvalidCode)));
        }
        h.service.verify_email("a@x.com", &second).await.unwrap();
    }

    #[tokio::test]
    async fn resend_rules() {
        let h = harness();
        let missing = h.service.resend_code("nobody@x.com", CodePurpose::EmailVerify).await;
        assert!(matches!(missing, Err(IdentityError::NotFound(_))));

        h.verified_account().await;
        let verified = h.service.resend_code("a@x.com", CodePurpose::EmailVerify).await;
        assert!(matches!(verified, Err(IdentityError::AlreadyVerified)));

        h.service
            .resend_code("a@x.com", CodePurpose::PasswordReset)
            .await
            .unwrap();
        assert!(h.mailer.last_code(MailTemplate::PasswordReset).is_some());
    }

    #[tokio::test]
    async fn verify_unknown_email_is_not_found() {
        let h = harness();
        let result = h.service.verify_email("nobody@x.com", "123456").await;
        assert!(matches!(result, Err(IdentityError::NotFound(_))));
    }

    #[tokio::test]
    async fn login_hides_account_existence() {
        let h = harness();
        let result = h.service.login("nobody@x.com", "pw").await;
        assert!(matches!(result, Err(IdentityError::InvalidCredentials)));

        // Wrong password on an unverified account does not reveal its state.
        h.service.register("a@x.com", "pw123", "Ana").await.unwrap();
        let result = h.service.login("a@x.com", "nope").await;
        assert!(matches!(result, Err(IdentityError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn password_reset_flow() {
        let h = harness();
        h.verified_account().await;

        h.service.forgot_password("a@x.com").await.unwrap();
        let token = h.reset_token();

        let account = h.service.reset_password(&token, "newpass").await.unwrap();
        assert!(account.pending_codes.password_reset.is_none());
        assert!(account.is_verified());

        assert!(h.service.login("a@x.com", "newpass").await.is_ok());
        assert!(matches!(
            h.service.login("a@x.com", "pw123").await,
            Err(IdentityError::InvalidCredentials)
        ));

        let reused = h.service.reset_password(&token, "again").await;
        assert!(matches!(reused, Err(IdentityError::InvalidCode)));
    }

    #[tokio::test]
    async fn new_reset_request_invalidates_old_token() {
        let h = harness();
        h.verified_account().await;

        h.service.forgot_password("a@x.com").await.unwrap();
        let first = h.reset_token();
        h.service.forgot_password("a@x.com").await.unwrap();
        let second = h.reset_token();
        assert_ne!(first, second);

        let old = h.service.reset_password(&first, "newpass").await;
        assert!(matches!(old, Err(IdentityError::InvalidCode)));

        h.service
            .resend_code("a@x.com", CodePurpose::PasswordReset)
            .await
            .unwrap();
        let third = h.reset_token();
        let stale = h.service.reset_password(&second, "newpass").await;
        assert!(matches!(stale, Err(IdentityError::InvalidCode)));

        h.service.reset_password(&third, "newpass").await.unwrap();
        assert!(h.service.login("a@x.com", "newpass").await.is_ok());
    }

    #[tokio::test]
    async fn wrong_reset_secret_leaves_password_and_code() {
        let h = harness();
        let account = h.verified_account().await;
        h.service.forgot_password("a@x.com").await.unwrap();
        let token = h.reset_token();

        let forged = format!("{}.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", account.id);
        let result = h.service.reset_password(&forged, "newpass").await;
        assert!(matches!(result, Err(IdentityError::InvalidCode)));

        let stored = h.store.find_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.password, account.password);
        assert!(stored.pending_codes.password_reset.is_some());

        h.service.reset_password(&token, "newpass").await.unwrap();
    }

    #[tokio::test]
    async fn reset_token_expires() {
        let h = harness();
        h.verified_account().await;
        h.service.forgot_password("a@x.com").await.unwrap();
        let token = h.reset_token();

        h.clock.advance(ChronoDuration::minutes(16));
        let result = h.service.reset_password(&token, "newpass").await;
        assert!(matches!(result, Err(IdentityError::InvalidCode)));
    }

    #[tokio::test]
    async fn malformed_reset_token_is_invalid_code() {
        let h = harness();
        for token in ["garbage", "not-a-uuid.secret", &format!("{}.secret", AccountId::new())] {
            let result = h.service.reset_password(token, "newpass").await;
            assert!(matches!(result, Err(IdentityError::InvalidCode)), "{token}");
        }
    }

    #[tokio::test]
    async fn forgot_password_policy() {
        let h = harness();
        let result = h.service.forgot_password("nobody@x.com").await;
        assert!(matches!(result, Err(IdentityError::NotFound(_))));

        let h = harness_with(RecordingMailer::new(), ForgotPasswordPolicy::Uniform);
        h.service.forgot_password("nobody@x.com").await.unwrap();
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn mail_failure_does_not_roll_back() {
        let h = harness_with(RecordingMailer::failing(), ForgotPasswordPolicy::NotFound);
        let account = h.service.register("a@x.com", "pw123", "Ana").await.unwrap();

        let stored = h.store.find_by_id(&account.id).await.unwrap().unwrap();
        assert!(stored.pending_codes.email_verify.is_some());

        // The code was still generated and is still valid.
        let code = h.email_code();
        h.service.verify_email("a@x.com", &code).await.unwrap();
    }

    #[tokio::test]
    async fn profile_read_and_update() {
        let h = harness();
        let account = h.verified_account().await;
        let session = h.service.login("a@x.com", "pw123").await.unwrap();

        let profile = h.service.get_profile(&session.token.claims).await.unwrap();
        assert_eq!(profile.id, account.id);

        let update = ProfileUpdate {
            display_name: Some("  Ana Maria ".to_string()),
            metadata: json!({"bio": "hi"}).as_object().cloned(),
        };
        let avatar = AvatarUpload::new(vec![1, 2, 3], "image/png").unwrap();
        let updated = h
            .service
            .update_profile(&account.id, update, Some(avatar))
            .await
            .unwrap();

        assert_eq!(updated.display_name, "Ana Maria");
        assert_eq!(updated.profile.metadata.get("bio"), Some(&json!("hi")));
        assert!(updated.profile.avatar.unwrap().starts_with("avatars/"));
    }

    #[tokio::test]
    async fn profile_of_missing_account_is_not_found() {
        let h = harness();
        let result = h
            .service
            .update_profile(&AccountId::new(), ProfileUpdate::default(), None)
            .await;
        assert!(matches!(result, Err(IdentityError::NotFound(_))));
    }

    struct StalledStore;

    #[async_trait]
    impl CredentialStore for StalledStore {
        async fn find_by_email(&self, _email: &Email) -> StoreResult<Option<Account>> {
            std::future::pending().await
        }
        async fn find_by_id(&self, _id: &AccountId) -> StoreResult<Option<Account>> {
            std::future::pending().await
        }
        async fn create(&self, _account: Account) -> StoreResult<Account> {
            std::future::pending().await
        }
        async fn update(&self, _id: &AccountId, _patch: AccountPatch) -> StoreResult<Account> {
            std::future::pending().await
        }
        async fn health_check(&self) -> StoreResult<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn store_timeout_is_dependency_unavailable() {
        let h = harness();
        let service = AccountService {
            store: Arc::new(StalledStore),
            settings: ServiceSettings {
                dependency_timeout: Duration::from_millis(20),
                forgot_password: ForgotPasswordPolicy::NotFound,
            },
            ..h.service
        };

        let result = service.register("a@x.com", "pw123", "Ana").await;
        assert!(matches!(result, Err(IdentityError::DependencyUnavailable(_))));
    }

    #[test]
    fn policy_parses_config_values() {
        assert_eq!(ForgotPasswordPolicy::parse("uniform"), Some(ForgotPasswordPolicy::Uniform));
        assert_eq!(ForgotPasswordPolicy::parse(" NOT_FOUND "), Some(ForgotPasswordPolicy::NotFound));
        assert_eq!(ForgotPasswordPolicy::parse("silent"), None);
    }
}
