// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transactional mail for verification codes and password reset links.
//!
//! Delivery is best effort: callers log a failed send and carry on, the
//! account mutation that produced the code is never rolled back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::accounts::account::Email;

pub const DEFAULT_MAIL_API_URL: &str = "https://api.brevo.com/v3/smtp/email";
const DEFAULT_SENDER_NAME: &str = "Academy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTemplate {
    EmailVerification,
    PasswordReset,
}

impl MailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailTemplate::EmailVerification => "email_verification",
            MailTemplate::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail configuration invalid: {0}")]
    Config(String),

    #[error("mail request failed: {0}")]
    Request(String),

    #[error("mail API returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver `template` carrying `code` to `to`.
    async fn send(&self, to: &Email, template: MailTemplate, code: &str) -> Result<(), MailError>;
}

/// Subject and bodies of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Render a template. Reset tokens become a link under `frontend_url`.
pub fn render(template: MailTemplate, code: &str, frontend_url: &str) -> RenderedMail {
    match template {
        MailTemplate::EmailVerification => RenderedMail {
            subject: "Verify your email address".to_string(),
            html: format!(
                "<p>Welcome! Use the code below to verify your email address.</p>\
                 <p style=\"font-size:24px;letter-spacing:4px\"><strong>{code}</strong></p>\
                 <p>If you did not create an account, you can ignore this message.</p>"
            ),
            text: format!(
                "Welcome! Your verification code is {code}\n\n\
                 If you did not create an account, you can ignore this message."
            ),
        },
        MailTemplate::PasswordReset => {
            let link = format!("{}/reset-password/{code}", frontend_url.trim_end_matches('/'));
            RenderedMail {
                subject: "Reset your password".to_string(),
                html: format!(
                    "<p>We received a request to reset your password.</p>\
                     <p><a href=\"{link}\">Choose a new password</a></p>\
                     <p>If you did not ask for this, you can ignore this message.</p>"
                ),
                text: format!(
                    "We received a request to reset your password.\n\n\
                     Open {link} to choose a new one.\n\n\
                     If you did not ask for this, you can ignore this message."
                ),
            }
        }
    }
}

// =============================================================================
// Log-only sender
// =============================================================================

/// Used when no mail API is configured. Records that a message would have
/// been sent; the code itself is not logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, to: &Email, template: MailTemplate, _code: &str) -> Result<(), MailError> {
        tracing::info!(to = %to, template = template.as_str(), "Mail delivery disabled, message dropped");
        Ok(())
    }
}

// =============================================================================
// HTTP sender (Brevo-compatible)
// =============================================================================

#[derive(Clone)]
pub struct MailSettings {
    pub api_url: String,
    pub api_key: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
}

impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("sender_email", &self.sender_email)
            .field("sender_name", &self.sender_name)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpMailer {
    api_url: String,
    api_key: String,
    sender_email: String,
    sender_name: String,
    frontend_url: String,
    http: Client,
}

impl HttpMailer {
    pub fn new(
        settings: MailSettings,
        frontend_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        if settings.api_key.trim().is_empty() {
            return Err(MailError::Config("MAIL_API_KEY is empty".to_string()));
        }
        if settings.sender_email.trim().is_empty() {
            return Err(MailError::Config("MAIL_SENDER_EMAIL is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_url: settings.api_url,
            api_key: settings.api_key,
            sender_email: settings.sender_email,
            sender_name: settings
                .sender_name
                .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
            frontend_url: frontend_url.into(),
            http,
        })
    }
}

#[async_trait]
impl MailSender for HttpMailer {
    async fn send(&self, to: &Email, template: MailTemplate, code: &str) -> Result<(), MailError> {
        let message = render(template, code, &self.frontend_url);
        let payload = json!({
            "sender": { "name": self.sender_name, "email": self.sender_email },
            "to": [{ "email": to.as_str() }],
            "subject": message.subject,
            "htmlContent": message.html,
            "textContent": message.text,
        });

        let response = self
            .http
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }

        tracing::debug!(template = template.as_str(), "Mail accepted by API");
        Ok(())
    }
}
