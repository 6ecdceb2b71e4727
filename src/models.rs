// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the `/v1/users` endpoints. All types
//! derive `ToSchema` for the OpenAPI document.
//!
//! ## Model Categories
//!
//! - **Registration & Verification**: register, verify-email, resend-code
//! - **Sessions**: login response, profile
//! - **Password Recovery**: forgot-password, reset-password

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::accounts::account::{Account, CodePurpose};

// =============================================================================
// Registration & Verification
// =============================================================================

/// Request body for POST /v1/users/register
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    /// Identifier of the new account
    pub account_id: String,
    pub message: String,
}

/// Request body for POST /v1/users/verify-email
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

fn default_purpose() -> CodePurpose {
    CodePurpose::EmailVerify
}

/// Request body for POST /v1/users/resend-code
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResendCodeRequest {
    pub email: String,
    /// Defaults to `email_verify`
    #[serde(default = "default_purpose")]
    pub purpose: CodePurpose,
}

// =============================================================================
// Sessions & Profile
// =============================================================================

/// Request body for POST /v1/users/login
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer session token (also set as the `token` cookie)
    pub token: String,
    /// Token expiry (Unix seconds)
    pub expires_at: i64,
    pub user: ProfileResponse,
}

/// Public profile of an account. Never carries credentials or codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
    pub role: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for ProfileResponse {
    fn from(account: Account) -> Self {
        let verified = account.is_verified();
        Self {
            id: account.id.to_string(),
            email: account.email.to_string(),
            name: account.display_name,
            avatar: account.profile.avatar,
            metadata: account.profile.metadata,
            role: account.role,
            verified,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Multipart form for PUT /v1/users/update/profile (documentation only).
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UpdateProfileForm {
    /// New display name
    pub name: Option<String>,
    /// JSON object merged into the profile metadata; `null` values remove keys
    pub metadata: Option<String>,
    /// png, jpeg, webp or gif, at most 5 MiB
    #[schema(value_type = Option<String>, format = Binary)]
    #[allow(non_snake_case)]
    pub profileImage: Option<Vec<u8>>,
}

// =============================================================================
// Password Recovery
// =============================================================================

/// Request body for POST /v1/users/forgot-password
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Request body for POST /v1/users/reset-password/{token}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
