// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy shared by every account and session operation.
//!
//! Each variant has a stable `error_code` and HTTP status. Collaborator
//! failures (store, mail, uploads) are logged where they happen and surface
//! here only as [`IdentityError::DependencyUnavailable`] with a generic
//! message.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Malformed input; never reaches the store
    #[error("{0}")]
    Validation(String),

    /// Duplicate email
    #[error("{0}")]
    Conflict(String),

    /// No such account
    #[error("{0}")]
    NotFound(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email address has not been verified")]
    NotVerified,

    /// Missing, mismatched and expired codes all map here
    #[error("Invalid or expired code")]
    InvalidCode,

    #[error("Email address is already verified")]
    AlreadyVerified,

    #[error("Session token has expired")]
    TokenExpired,

    #[error("Session token is invalid")]
    TokenInvalid,

    #[error("Authentication is required")]
    Unauthenticated,

    #[error("{0}")]
    DependencyUnavailable(String),

    /// The detail is logged when the error is built, never sent to the client.
    #[error("Internal server error")]
    Internal(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    error_code: String,
}

impl IdentityError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::DependencyUnavailable(message.into())
    }

    /// Log `detail` in full and wrap it as an opaque 500.
    pub fn internal(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!(detail = %detail, "Internal error");
        Self::Internal(detail)
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            IdentityError::Validation(_) => "validation_error",
            IdentityError::Conflict(_) => "conflict",
            IdentityError::NotFound(_) => "not_found",
            IdentityError::InvalidCredentials => "invalid_credentials",
            IdentityError::NotVerified => "not_verified",
            IdentityError::InvalidCode => "invalid_code",
            IdentityError::AlreadyVerified => "already_verified",
            IdentityError::TokenExpired => "token_expired",
            IdentityError::TokenInvalid => "token_invalid",
            IdentityError::Unauthenticated => "unauthenticated",
            IdentityError::DependencyUnavailable(_) => "dependency_unavailable",
            IdentityError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            IdentityError::Validation(_) | IdentityError::InvalidCode => StatusCode::BAD_REQUEST,
            IdentityError::Conflict(_) | IdentityError::AlreadyVerified => StatusCode::CONFLICT,
            IdentityError::NotFound(_) => StatusCode::NOT_FOUND,
            IdentityError::InvalidCredentials
            | IdentityError::TokenExpired
            | IdentityError::TokenInvalid
            | IdentityError::Unauthenticated => StatusCode::UNAUTHORIZED,
            IdentityError::NotVerified => StatusCode::FORBIDDEN,
            IdentityError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IdentityError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

impl From<JsonRejection> for IdentityError {
    fn from(rejection: JsonRejection) -> Self {
        IdentityError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for IdentityError {
    fn from(rejection: PathRejection) -> Self {
        IdentityError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for IdentityError {
    fn from(rejection: QueryRejection) -> Self {
        IdentityError::Validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for IdentityError {
    fn from(rejection: MultipartRejection) -> Self {
        IdentityError::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for IdentityError {
    fn from(e: MultipartError) -> Self {
        IdentityError::Validation(e.body_text())
    }
}
