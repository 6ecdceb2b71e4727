// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated sessions.
//!
//! Use the `Auth` extractor in handlers to require a valid session:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(claims): Auth) -> impl IntoResponse {
//!     // claims is SessionClaims
//! }
//! ```
//!
//! The token is read from `Authorization: Bearer <token>` first and from the
//! `token` cookie second.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use super::claims::SessionClaims;
use super::cookie::{read_cookie, SESSION_COOKIE};
use crate::error::IdentityError;
use crate::state::AppState;

/// Extractor for a validated session.
pub struct Auth(pub SessionClaims);

impl FromRequestParts<AppState> for Auth {
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(IdentityError::Unauthenticated)?;
        let claims = state.tokens.validate(&token)?;
        Ok(Auth(claims))
    }
}

/// Optional authentication extractor.
///
/// Returns `None` if no valid session is present, instead of rejecting.
pub struct OptionalAuth(pub Option<SessionClaims>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(claims)) => Ok(OptionalAuth(Some(claims))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}

/// Bearer token from the Authorization header, else the session cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    bearer.or_else(|| read_cookie(headers, SESSION_COOKIE))
}
