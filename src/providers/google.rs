// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Google OAuth 2.0 sign-in (authorization code flow).
//!
//! The client only establishes who the user is at Google. Turning that into
//! a local account and session is the federation adapter's job.

use std::collections::HashMap;
use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use reqwest::Client;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use url::Url;

use crate::accounts::FederatedIdentity;

const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const SCOPES: &str = "openid email profile";
const STATE_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum GoogleError {
    #[error("Google configuration invalid: {0}")]
    Config(String),

    #[error("Google token exchange failed: {0}")]
    Auth(String),

    #[error("Google request failed: {0}")]
    Request(String),

    #[error("Google response was invalid: {0}")]
    InvalidResponse(String),

    #[error("Google account email is not verified")]
    UnverifiedEmail,
}

#[derive(Clone)]
pub struct GoogleSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for GoogleSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GoogleClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    http: Client,
    rng: SystemRandom,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
}

impl GoogleClient {
    pub fn new(settings: GoogleSettings, timeout: Duration) -> Result<Self, GoogleError> {
        for (name, value) in [
            ("GOOGLE_CLIENT_ID", &settings.client_id),
            ("GOOGLE_CLIENT_SECRET", &settings.client_secret),
            ("GOOGLE_REDIRECT_URI", &settings.redirect_uri),
        ] {
            if value.trim().is_empty() {
                return Err(GoogleError::Config(format!("{name} is empty")));
            }
        }
        Url::parse(&settings.redirect_uri)
            .map_err(|e| GoogleError::Config(format!("GOOGLE_REDIRECT_URI is not a URL: {e}")))?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GoogleError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            redirect_uri: settings.redirect_uri,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            userinfo_url: DEFAULT_USERINFO_URL.to_string(),
            http,
            rng: SystemRandom::new(),
        })
    }

    /// Fresh anti-forgery value for the `state` parameter.
    pub fn new_state(&self) -> Result<String, GoogleError> {
        let mut bytes = [0u8; STATE_LEN];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| GoogleError::Config("system randomness unavailable".to_string()))?;
        Ok(Base64UrlUnpadded::encode_string(&bytes))
    }

    /// Consent screen URL the browser is redirected to.
    pub fn authorization_url(&self, state: &str) -> Result<Url, GoogleError> {
        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| GoogleError::Config(format!("invalid auth URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("prompt", "select_account");
        Ok(url)
    }

    /// Complete the callback: exchange `code`, then read the userinfo.
    pub async fn identity_for_code(&self, code: &str) -> Result<FederatedIdentity, GoogleError> {
        let access_token = self.exchange_code(code).await?;
        self.fetch_identity(&access_token).await
    }

    async fn exchange_code(&self, code: &str) -> Result<String, GoogleError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("client_id", self.client_id.as_str());
        form.insert("client_secret", self.client_secret.as_str());
        form.insert("redirect_uri", self.redirect_uri.as_str());

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| GoogleError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GoogleError::Auth(format!(
                "token request returned {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| GoogleError::Auth(format!("invalid token response: {e}")))?;

        if token_response.access_token.trim().is_empty() {
            return Err(GoogleError::Auth(
                "token response did not include access_token".to_string(),
            ));
        }

        Ok(token_response.access_token)
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<FederatedIdentity, GoogleError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| GoogleError::Request(format!("GET userinfo failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GoogleError::Request(format!(
                "GET userinfo returned {status}: {body}"
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| GoogleError::InvalidResponse(format!("userinfo invalid JSON: {e}")))?;

        identity_from_userinfo(info)
    }
}

fn identity_from_userinfo(info: UserInfo) -> Result<FederatedIdentity, GoogleError> {
    let email = info
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| GoogleError::InvalidResponse("userinfo has no email".to_string()))?;

    if info.email_verified != Some(true) {
        return Err(GoogleError::UnverifiedEmail);
    }

    Ok(FederatedIdentity {
        email,
        display_name: info.name.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GoogleClient {
        GoogleClient::new(
            GoogleSettings {
                client_id: "client-123".to_string(),
                client_secret: "shh".to_string(),
                redirect_uri: "http://localhost:8080/v1/users/auth/google/callback".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn authorization_url_carries_flow_parameters() {
        let url = client().authorization_url("state-xyz").unwrap();
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "openid email profile");
        assert_eq!(pairs["state"], "state-xyz");
        assert_eq!(
            pairs["redirect_uri"],
            "http://localhost:8080/v1/users/auth/google/callback"
        );
    }

    #[test]
    fn states_are_random() {
        let google = client();
        let a = google.new_state().unwrap();
        let b = google.new_state().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn verified_userinfo_becomes_identity() {
        let info: UserInfo = serde_json::from_str(
            r#"{"sub":"1","email":"Ana@Gmail.com","email_verified":true,"name":"Ana G"}"#,
        )
        .unwrap();
        let identity = identity_from_userinfo(info).unwrap();
        assert_eq!(identity.email, "Ana@Gmail.com");
        assert_eq!(identity.display_name, "Ana G");
    }

    #[test]
    fn unverified_or_missing_email_is_refused() {
        let unverified: UserInfo =
            serde_json::from_str(r#"{"email":"a@x.com","email_verified":false}"#).unwrap();
        assert!(matches!(
            identity_from_userinfo(unverified),
            Err(GoogleError::UnverifiedEmail)
        ));

        let missing: UserInfo = serde_json::from_str(r#"{"email_verified":true}"#).unwrap();
        assert!(matches!(
            identity_from_userinfo(missing),
            Err(GoogleError::InvalidResponse(_))
        ));
    }

    #[test]
    fn empty_settings_are_refused() {
        let result = GoogleClient::new(
            GoogleSettings {
                client_id: String::new(),
                client_secret: "s".to_string(),
                redirect_uri: "http://localhost/cb".to_string(),
            },
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(GoogleError::Config(_))));
    }
}
