// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded once from the environment at startup into a typed
//! [`Config`]. [`Config::from_lookup`] takes any name → value function so
//! tests never touch the process environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Account database and avatar directory | `./data` |
//! | `STORE_BACKEND` | `redb` or `memory` | `redb` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; HTTPS when both are set | unset |
//! | `JWT_SECRET` | Session token signing key (at least 32 bytes) | Required |
//! | `JWT_ISSUER` | `iss` claim | `academy-identity` |
//! | `SESSION_TTL_SECS` | Session token lifetime | `604800` |
//! | `CODE_SECRET` | Code digest key | derived from `JWT_SECRET` |
//! | `CODE_DIGITS` | Email verification code length (6-9) | `6` |
//! | `EMAIL_CODE_TTL_SECS` | Email verification code validity | `86400` |
//! | `RESET_CODE_TTL_SECS` | Password reset link validity | `900` |
//! | `DEPENDENCY_TIMEOUT_MS` | Store and mail call timeout | `5000` |
//! | `FORGOT_PASSWORD_RESPONSE` | `not_found` or `uniform` | `not_found` |
//! | `FRONTEND_URL` | Redirect and link base | `http://localhost:5173` |
//! | `FEDERATION_FAILURE_PATH` | Redirect path after a failed Google sign-in | `/login/student` |
//! | `COOKIE_SECURE` | Mark cookies `Secure` | `false` |
//! | `MAIL_API_URL` | Transactional mail endpoint | Brevo |
//! | `MAIL_API_KEY` | Enables HTTP mail delivery | unset (log only) |
//! | `MAIL_SENDER_EMAIL` | From address | Required with `MAIL_API_KEY` |
//! | `MAIL_SENDER_NAME` | From name | `Academy` |
//! | `GOOGLE_CLIENT_ID` | Enables Google sign-in | unset |
//! | `GOOGLE_CLIENT_SECRET` | OAuth client secret | Required with `GOOGLE_CLIENT_ID` |
//! | `GOOGLE_REDIRECT_URI` | OAuth callback URL | Required with `GOOGLE_CLIENT_ID` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::accounts::codes::CodeSettings;
use crate::accounts::service::{ForgotPasswordPolicy, ServiceSettings};
use crate::auth::tokens::{TokenSettings, MIN_SECRET_LEN};
use crate::mail::{MailSettings, DEFAULT_MAIL_API_URL};
use crate::providers::google::GoogleSettings;
use crate::storage::paths::DATA_ROOT;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default `RUST_LOG` filter.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ISSUER: &str = "academy-identity";
const DEFAULT_SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_CODE_DIGITS: u32 = 6;
const DEFAULT_EMAIL_CODE_TTL_SECS: i64 = 24 * 60 * 60;
const DEFAULT_RESET_CODE_TTL_SECS: i64 = 15 * 60;
const DEFAULT_DEPENDENCY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";
const DEFAULT_FAILURE_PATH: &str = "/login/student";

/// Clock skew tolerance for token validation (seconds).
const TOKEN_LEEWAY_SECS: u64 = 60;

/// Label mixed into `JWT_SECRET` when no `CODE_SECRET` is configured.
const CODE_SECRET_LABEL: &[u8] = b"academy-identity/verification-codes";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redb,
    Memory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub store_backend: StoreBackend,
    pub tls: Option<TlsPaths>,
    pub tokens: TokenSettings,
    pub codes: CodeSettings,
    pub dependency_timeout: Duration,
    pub forgot_password: ForgotPasswordPolicy,
    pub frontend_url: String,
    pub federation_failure_path: String,
    pub cookie_secure: bool,
    pub mail: Option<MailSettings>,
    pub google: Option<GoogleSettings>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let store_backend = match env.or_default("STORE_BACKEND", "redb").to_ascii_lowercase().as_str() {
            "redb" => StoreBackend::Redb,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    reason: format!("expected `redb` or `memory`, got `{other}`"),
                })
            }
        };

        let tls = match (env.optional("TLS_CERT_PATH"), env.optional("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    name: "TLS_CERT_PATH",
                    reason: "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                })
            }
        };

        let jwt_secret = env.required("JWT_SECRET")?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "JWT_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }
        let code_secret = match env.optional("CODE_SECRET") {
            Some(secret) => secret.into_bytes(),
            None => derive_code_secret(jwt_secret.as_bytes())?,
        };

        let session_ttl = env.parsed("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        positive("SESSION_TTL_SECS", session_ttl)?;
        let digits = env.parsed("CODE_DIGITS", DEFAULT_CODE_DIGITS)?;
        if !(6..=9).contains(&digits) {
            return Err(ConfigError::Invalid {
                name: "CODE_DIGITS",
                reason: "must be between 6 and 9".to_string(),
            });
        }
        let email_ttl = env.parsed("EMAIL_CODE_TTL_SECS", DEFAULT_EMAIL_CODE_TTL_SECS)?;
        positive("EMAIL_CODE_TTL_SECS", email_ttl)?;
        let reset_ttl = env.parsed("RESET_CODE_TTL_SECS", DEFAULT_RESET_CODE_TTL_SECS)?;
        positive("RESET_CODE_TTL_SECS", reset_ttl)?;

        let forgot_raw = env.or_default("FORGOT_PASSWORD_RESPONSE", "not_found");
        let forgot_password =
            ForgotPasswordPolicy::parse(&forgot_raw).ok_or_else(|| ConfigError::Invalid {
                name: "FORGOT_PASSWORD_RESPONSE",
                reason: format!("expected `not_found` or `uniform`, got `{forgot_raw}`"),
            })?;

        let frontend_url = env.or_default("FRONTEND_URL", DEFAULT_FRONTEND_URL);
        url::Url::parse(&frontend_url).map_err(|e| ConfigError::Invalid {
            name: "FRONTEND_URL",
            reason: e.to_string(),
        })?;

        let mail = match env.optional("MAIL_API_KEY") {
            Some(api_key) => Some(MailSettings {
                api_url: env.or_default("MAIL_API_URL", DEFAULT_MAIL_API_URL),
                api_key,
                sender_email: env.required("MAIL_SENDER_EMAIL")?,
                sender_name: env.optional("MAIL_SENDER_NAME"),
            }),
            None => None,
        };

        let google = match env.optional("GOOGLE_CLIENT_ID") {
            Some(client_id) => Some(GoogleSettings {
                client_id,
                client_secret: env.required("GOOGLE_CLIENT_SECRET")?,
                redirect_uri: env.required("GOOGLE_REDIRECT_URI")?,
            }),
            None => None,
        };

        Ok(Self {
            host: env.or_default("HOST", DEFAULT_HOST),
            port: env.parsed("PORT", DEFAULT_PORT)?,
            data_dir: env.or_default(DATA_DIR_ENV, DATA_ROOT).into(),
            store_backend,
            tls,
            tokens: TokenSettings {
                secret: jwt_secret.into_bytes(),
                issuer: env.or_default("JWT_ISSUER", DEFAULT_ISSUER),
                ttl: chrono::Duration::seconds(session_ttl),
                leeway_secs: TOKEN_LEEWAY_SECS,
            },
            codes: CodeSettings {
                secret: code_secret,
                digits,
                email_verify_ttl: chrono::Duration::seconds(email_ttl),
                password_reset_ttl: chrono::Duration::seconds(reset_ttl),
            },
            dependency_timeout: Duration::from_millis(
                env.parsed("DEPENDENCY_TIMEOUT_MS", DEFAULT_DEPENDENCY_TIMEOUT_MS)?,
            ),
            forgot_password,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            federation_failure_path: env.or_default("FEDERATION_FAILURE_PATH", DEFAULT_FAILURE_PATH),
            cookie_secure: env.parsed("COOKIE_SECURE", false)?,
            mail,
            google,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            dependency_timeout: self.dependency_timeout,
            forgot_password: self.forgot_password,
        }
    }

    /// Where the browser lands after a failed Google sign-in.
    pub fn federation_failure_url(&self) -> String {
        format!("{}{}", self.frontend_url, self.federation_failure_path)
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(name) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}

fn positive(name: &'static str, value: i64) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

fn derive_code_secret(jwt_secret: &[u8]) -> Result<Vec<u8>, ConfigError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(jwt_secret).map_err(|e| ConfigError::Invalid {
        name: "JWT_SECRET",
        reason: e.to_string(),
    })?;
    mac.update(CODE_SECRET_LABEL);
    Ok(mac.finalize().into_bytes().to_vec())
}
