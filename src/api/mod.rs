// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, FromRequest},
    http::{header, HeaderValue, Method, Request},
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    accounts::account::CodePurpose,
    auth::SessionClaims,
    error::IdentityError,
    models::{
        ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, ProfileResponse,
        RegisterRequest, RegisterResponse, ResendCodeRequest, ResetPasswordRequest,
        UpdateProfileForm, VerifyEmailRequest,
    },
    state::AppState,
    storage::avatars::MAX_AVATAR_BYTES,
};

pub mod health;
pub mod oauth;
pub mod users;

/// Request body cap: one avatar plus the other multipart fields.
pub const MAX_BODY_BYTES: usize = MAX_AVATAR_BYTES + 1024 * 1024;

/// JSON extractor whose rejections use the service error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(IdentityError))]
pub struct AppJson<T>(pub T);

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.web.frontend_url);

    let user_routes = Router::new()
        .route("/register", post(users::register))
        .route("/verify-email", post(users::verify_email))
        .route("/resend-code", post(users::resend_code))
        .route("/login", post(users::login))
        .route("/logout", get(users::logout))
        .route("/profile", get(users::get_profile))
        .route("/update/profile", put(users::update_profile))
        .route("/forgot-password", post(users::forgot_password))
        .route("/reset-password/{token}", post(users::reset_password))
        .route("/me", get(users::me))
        .route("/google", get(oauth::google_start))
        .route("/auth/google/callback", get(oauth::google_callback));

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    Router::new()
        .nest("/v1/users", user_routes)
        .merge(health_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Credentialed CORS for the frontend origin only.
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let origin = url::Url::parse(frontend_url)
        .ok()
        .map(|url| url.origin().ascii_serialization())
        .and_then(|origin| HeaderValue::from_str(&origin).ok());

    match origin {
        Some(origin) => base.allow_origin(AllowOrigin::exact(origin)),
        None => {
            tracing::warn!(frontend_url, "Frontend URL has no usable origin; cross-origin requests disabled");
            base
        }
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        users::register,
        users::verify_email,
        users::resend_code,
        users::login,
        users::logout,
        users::get_profile,
        users::update_profile,
        users::forgot_password,
        users::reset_password,
        users::me,
        oauth::google_start,
        oauth::google_callback,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            RegisterRequest,
            RegisterResponse,
            VerifyEmailRequest,
            ResendCodeRequest,
            CodePurpose,
            LoginRequest,
            LoginResponse,
            ProfileResponse,
            UpdateProfileForm,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            MessageResponse,
            SessionClaims,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Users", description = "Registration, verification, sessions and profile"),
        (name = "Password", description = "Password recovery"),
        (name = "Google", description = "Google sign-in"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MailTemplate;
    use crate::test_support::{test_state, TestContext};
    use axum::{
        body::to_bytes,
        http::{header::SET_COOKIE, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(ctx: &TestContext, request: Request<Body>) -> Response {
        router(ctx.state.clone()).oneshot(request).await.unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Register and verify `email`, returning the login response.
    async fn verified_login(ctx: &TestContext, email: &str) -> Response {
        let response = send(
            ctx,
            post_json(
                "/v1/users/register",
                json!({"name": "Ana", "email": email, "password": "pw123456"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let code = ctx.mailer.last_code(MailTemplate::EmailVerification).unwrap();
        let response = send(
            ctx,
            post_json("/v1/users/verify-email", json!({"email": email, "code": code})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        send(
            ctx,
            post_json("/v1/users/login", json!({"email": email, "password": "pw123456"})),
        )
        .await
    }

    #[tokio::test]
    async fn error_bodies_carry_error_code() {
        let ctx = test_state();
        let response = send(
            &ctx,
            post_json(
                "/v1/users/login",
                json!({"email": "nobody@x.com", "password": "whatever1"}),
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error_code"], "invalid_credentials");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let ctx = test_state();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/users/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = send(&ctx, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error_code"], "validation_error");
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_token() {
        let ctx = test_state();
        for uri in ["/v1/users/profile", "/v1/users/me"] {
            let response = send(&ctx, get_request(uri)).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(json_body(response).await["error_code"], "unauthenticated");
        }
    }

    #[tokio::test]
    async fn login_before_verification_is_forbidden() {
        let ctx = test_state();
        send(
            &ctx,
            post_json(
                "/v1/users/register",
                json!({"name": "Ana", "email": "a@x.com", "password": "pw123456"}),
            ),
        )
        .await;

        let response = send(
            &ctx,
            post_json("/v1/users/login", json!({"email": "a@x.com", "password": "pw123456"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["error_code"], "not_verified");
    }

    #[tokio::test]
    async fn login_sets_token_cookie() {
        let ctx = test_state();
        let response = verified_login(&ctx, "a@x.com").await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        let body = json_body(response).await;
        let token = body["token"].as_str().unwrap();

        assert!(cookie.starts_with(&format!("token={token};")));
        assert!(cookie.contains("HttpOnly"));
        assert_eq!(body["user"]["email"], "a@x.com");
        assert_eq!(body["user"]["verified"], true);
    }

    #[tokio::test]
    async fn cookie_session_reaches_profile() {
        let ctx = test_state();
        let body = json_body(verified_login(&ctx, "a@x.com").await).await;
        let token = body["token"].as_str().unwrap();

        let request = Request::builder()
            .uri("/v1/users/profile")
            .header(header::COOKIE, format!("token={token}"))
            .body(Body::empty())
            .unwrap();
        let response = send(&ctx, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["name"], "Ana");
    }

    #[tokio::test]
    async fn logout_clears_cookie() {
        let ctx = test_state();
        let response = send(&ctx, get_request("/v1/users/logout")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let ctx = test_state();
        let response = send(&ctx, get_request("/health/live")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn google_routes_are_absent_without_configuration() {
        let ctx = test_state();
        let response = send(&ctx, get_request("/v1/users/google")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn openapi_document_lists_user_routes() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["paths"]["/v1/users/register"].is_object());
        assert!(json["paths"]["/v1/users/reset-password/{token}"].is_object());
        assert!(json["components"]["securitySchemes"]["bearer"].is_object());
    }
}
