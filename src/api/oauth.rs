// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Google sign-in endpoints.
//!
//! `GET /v1/users/google` redirects to the consent screen with a random
//! `state`, remembered in a short-lived cookie. The callback checks it,
//! resolves the Google identity and hands it to the federation adapter.
//! The browser always ends up back on the frontend: on success with the
//! session cookie set, on failure at the configured failure path.

use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use utoipa::IntoParams;

use crate::{
    accounts::Session,
    auth::cookie::{
        clear_cookie, read_cookie, set_cookie, SetCookie, OAUTH_STATE_COOKIE, SESSION_COOKIE,
    },
    error::IdentityError,
    providers::GoogleError,
    state::AppState,
};

/// Lifetime of the `oauth_state` cookie.
const STATE_COOKIE_MAX_AGE_SECS: i64 = 10 * 60;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Anti-forgery value echoed by Google
    pub state: Option<String>,
    /// Set when the user denied consent
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum CallbackFailure {
    #[error("provider returned error `{0}`")]
    Denied(String),

    #[error("callback without authorization code")]
    MissingCode,

    #[error("state parameter does not match cookie")]
    StateMismatch,

    #[error(transparent)]
    Provider(#[from] GoogleError),

    #[error(transparent)]
    Exchange(#[from] IdentityError),
}

#[utoipa::path(
    get,
    path = "/v1/users/google",
    tag = "Google",
    responses(
        (status = 303, description = "Redirect to the Google consent screen"),
        (status = 404, description = "Google sign-in is not configured"),
    )
)]
pub async fn google_start(
    State(state): State<AppState>,
) -> Result<(SetCookie, Redirect), IdentityError> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| IdentityError::not_found("Google sign-in is not configured"))?;

    let oauth_state = google.new_state().map_err(internal)?;
    let url = google.authorization_url(&oauth_state).map_err(internal)?;

    let cookie = set_cookie(
        OAUTH_STATE_COOKIE,
        &oauth_state,
        STATE_COOKIE_MAX_AGE_SECS,
        state.web.cookie_secure,
    );
    Ok(([(SET_COOKIE, cookie)], Redirect::to(url.as_str())))
}

#[utoipa::path(
    get,
    path = "/v1/users/auth/google/callback",
    params(CallbackParams),
    tag = "Google",
    responses(
        (status = 303, description = "Redirect to the frontend, with the session cookie on success"),
        (status = 404, description = "Google sign-in is not configured"),
    )
)]
pub async fn google_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, IdentityError> {
    if state.google.is_none() {
        return Err(IdentityError::not_found("Google sign-in is not configured"));
    }
    let secure = state.web.cookie_secure;
    let clear_state = clear_cookie(OAUTH_STATE_COOKIE, secure);

    match complete_sign_in(&state, &headers, params).await {
        Ok(session) => {
            tracing::info!(account_id = %session.account.id, "Google sign-in completed");
            let token_cookie = set_cookie(
                SESSION_COOKIE,
                &session.token.token,
                state.session_max_age(),
                secure,
            );
            Ok((
                AppendHeaders([(SET_COOKIE, token_cookie), (SET_COOKIE, clear_state)]),
                Redirect::to(&state.web.frontend_url),
            )
                .into_response())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Google sign-in failed");
            Ok((
                AppendHeaders([(SET_COOKIE, clear_state)]),
                Redirect::to(&state.web.federation_failure_url),
            )
                .into_response())
        }
    }
}

async fn complete_sign_in(
    state: &AppState,
    headers: &HeaderMap,
    params: CallbackParams,
) -> Result<Session, CallbackFailure> {
    if let Some(error) = params.error {
        return Err(CallbackFailure::Denied(error));
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(CallbackFailure::MissingCode)?;

    let expected = read_cookie(headers, OAUTH_STATE_COOKIE).ok_or(CallbackFailure::StateMismatch)?;
    let supplied = params.state.unwrap_or_default();
    if !bool::from(expected.as_bytes().ct_eq(supplied.as_bytes())) {
        return Err(CallbackFailure::StateMismatch);
    }

    let google = state
        .google
        .as_ref()
        .ok_or_else(|| IdentityError::not_found("Google sign-in is not configured"))?;
    let identity = google.identity_for_code(&code).await?;
    Ok(state.federation.exchange(identity).await?)
}

fn internal(e: GoogleError) -> IdentityError {
    IdentityError::internal(format!("Google sign-in setup failed: {e}"))
}
