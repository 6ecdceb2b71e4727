// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints: registration, verification, sessions, profile and
//! password recovery.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::{header::SET_COOKIE, StatusCode},
    Json,
};
use serde_json::{Map, Value};

use super::AppJson;
use crate::{
    accounts::ProfileUpdate,
    auth::{
        cookie::{clear_cookie, set_cookie, SetCookie, SESSION_COOKIE},
        Auth, OptionalAuth, SessionClaims,
    },
    error::IdentityError,
    models::{
        ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, ProfileResponse,
        RegisterRequest, RegisterResponse, ResendCodeRequest, ResetPasswordRequest,
        UpdateProfileForm, VerifyEmailRequest,
    },
    state::AppState,
    storage::AvatarUpload,
};

/// Register a local account and mail its verification code.
#[utoipa::path(
    post,
    path = "/v1/users/register",
    request_body = RegisterRequest,
    tag = "Users",
    responses(
        (status = 201, description = "Account created, verification code sent", body = RegisterResponse),
        (status = 400, description = "Invalid email, password or name"),
        (status = 409, description = "Email already registered"),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    AppJson(request): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), IdentityError> {
    let account = state
        .accounts
        .register(&request.email, &request.password, &request.name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            account_id: account.id.to_string(),
            message: "Verification code sent".to_string(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/users/verify-email",
    request_body = VerifyEmailRequest,
    tag = "Users",
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired code"),
        (status = 404, description = "Account not found"),
    )
)]
pub async fn verify_email(
    State(state): State<AppState>,
    AppJson(request): AppJson<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, IdentityError> {
    state
        .accounts
        .verify_email(&request.email, &request.code)
        .await?;
    Ok(Json(MessageResponse::new("Email verified")))
}

/// Issue a fresh code; the previous one of the same purpose stops working.
#[utoipa::path(
    post,
    path = "/v1/users/resend-code",
    request_body = ResendCodeRequest,
    tag = "Users",
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 404, description = "Account not found"),
        (status = 409, description = "Email already verified"),
    )
)]
pub async fn resend_code(
    State(state): State<AppState>,
    AppJson(request): AppJson<ResendCodeRequest>,
) -> Result<Json<MessageResponse>, IdentityError> {
    state
        .accounts
        .resend_code(&request.email, request.purpose)
        .await?;
    Ok(Json(MessageResponse::new("Code sent")))
}

/// Password login. The token is returned in the body and set as a cookie.
#[utoipa::path(
    post,
    path = "/v1/users/login",
    request_body = LoginRequest,
    tag = "Users",
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 401, description = "Invalid email or password"),
        (status = 403, description = "Email not verified"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(request): AppJson<LoginRequest>,
) -> Result<(SetCookie, Json<LoginResponse>), IdentityError> {
    let session = state
        .accounts
        .login(&request.email, &request.password)
        .await?;

    let cookie = set_cookie(
        SESSION_COOKIE,
        &session.token.token,
        state.session_max_age(),
        state.web.cookie_secure,
    );
    let response = LoginResponse {
        token: session.token.token,
        expires_at: session.token.claims.exp,
        user: session.account.into(),
    };
    Ok(([(SET_COOKIE, cookie)], Json(response)))
}

/// Clear the session cookie. Works with or without a valid session.
#[utoipa::path(
    get,
    path = "/v1/users/logout",
    tag = "Users",
    responses((status = 200, description = "Session cookie cleared", body = MessageResponse))
)]
pub async fn logout(
    State(state): State<AppState>,
    OptionalAuth(claims): OptionalAuth,
) -> (SetCookie, Json<MessageResponse>) {
    state.accounts.logout(claims.as_ref());
    (
        [(SET_COOKIE, clear_cookie(SESSION_COOKIE, state.web.cookie_secure))],
        Json(MessageResponse::new("Logged out")),
    )
}

#[utoipa::path(
    get,
    path = "/v1/users/profile",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Profile of the caller", body = ProfileResponse),
        (status = 401, description = "Missing, invalid or expired session"),
        (status = 404, description = "Account no longer exists"),
    )
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Auth(claims): Auth,
) -> Result<Json<ProfileResponse>, IdentityError> {
    let account = state.accounts.get_profile(&claims).await?;
    Ok(Json(account.into()))
}

/// Update name, metadata and avatar from a multipart form.
#[utoipa::path(
    put,
    path = "/v1/users/update/profile",
    tag = "Users",
    security(("bearer" = [])),
    request_body(content = UpdateProfileForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 400, description = "Invalid field or image"),
        (status = 401, description = "Missing, invalid or expired session"),
    )
)]
pub async fn update_profile(
    State(state): State<AppState>,
    Auth(claims): Auth,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProfileResponse>, IdentityError> {
    let account_id = claims.account_id()?;
    let mut multipart = multipart?;

    let mut update = ProfileUpdate::default();
    let mut avatar = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("name") => update.display_name = Some(field.text().await?),
            Some("metadata") => update.metadata = parse_metadata(&field.text().await?)?,
            Some("profileImage") => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let has_file = field.file_name().is_some_and(|f| !f.is_empty());
                let bytes = field.bytes().await?;
                // Browsers send an empty part when no file was picked.
                if bytes.is_empty() && !has_file {
                    continue;
                }
                avatar = Some(AvatarUpload::new(bytes.to_vec(), &content_type)?);
            }
            _ => {}
        }
    }

    let account = state
        .accounts
        .update_profile(&account_id, update, avatar)
        .await?;
    Ok(Json(account.into()))
}

/// Start password recovery for `email`.
#[utoipa::path(
    post,
    path = "/v1/users/forgot-password",
    request_body = ForgotPasswordRequest,
    tag = "Password",
    responses(
        (status = 200, description = "Reset link sent", body = MessageResponse),
        (status = 404, description = "Account not found (unless uniform responses are configured)"),
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(request): AppJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, IdentityError> {
    state.accounts.forgot_password(&request.email).await?;
    Ok(Json(MessageResponse::new(
        "If the account exists, a password reset link has been sent",
    )))
}

#[utoipa::path(
    post,
    path = "/v1/users/reset-password/{token}",
    params(("token" = String, Path, description = "Reset token from the emailed link")),
    request_body = ResetPasswordRequest,
    tag = "Password",
    responses(
        (status = 200, description = "Password replaced", body = MessageResponse),
        (status = 400, description = "Invalid or expired token, or invalid password"),
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    AppJson(request): AppJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, IdentityError> {
    state
        .accounts
        .reset_password(&token, &request.password)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// Claims of the current session.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Session claims", body = SessionClaims),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn me(Auth(claims): Auth) -> Json<SessionClaims> {
    Json(claims)
}

/// `metadata` form field: a JSON object, or empty for no change.
fn parse_metadata(raw: &str) -> Result<Option<Map<String, Value>>, IdentityError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        _ => Err(IdentityError::validation("metadata must be a JSON object")),
    }
}
