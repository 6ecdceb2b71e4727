// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test doubles shared across module tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use crate::accounts::account::{Account, Email};
use crate::accounts::Collaborators;
use crate::auth::IssuedToken;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::mail::{MailError, MailSender, MailTemplate};
use crate::state::AppState;
use crate::storage::{FileAvatarStore, MemoryCredentialStore};

pub const TEST_JWT_SECRET: &str = "test-secret-test-secret-test-secret!";

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// 2026-01-01T00:00:00Z
    pub fn fixed() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub template: MailTemplate,
    pub code: String,
}

/// Mail sender that records every message; optionally fails each send.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    /// Code carried by the most recent message of `template`.
    pub fn last_code(&self, template: MailTemplate) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.template == template)
            .map(|m| m.code.clone())
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, to: &Email, template: MailTemplate, code: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            template,
            code: code.to_string(),
        });
        if self.fail {
            return Err(MailError::Rejected {
                status: 500,
                body: "recording mailer set to fail".to_string(),
            });
        }
        Ok(())
    }
}

/// Fully wired [`AppState`] over in-memory collaborators.
pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryCredentialStore>,
    pub mailer: Arc<RecordingMailer>,
    pub avatars_dir: TempDir,
}

impl TestContext {
    /// Session token for an account that exists only in the token.
    pub fn issue_token(&self, email: &str, name: &str) -> IssuedToken {
        let account = Account::federated(Email::parse(email).unwrap(), name, Utc::now());
        self.state.tokens.issue(&account).unwrap()
    }
}

/// Test state with the default configuration.
pub fn test_state() -> TestContext {
    test_state_with(&[])
}

/// Test state with extra environment entries layered over the defaults.
pub fn test_state_with(vars: &[(&str, &str)]) -> TestContext {
    let mut env: HashMap<String, String> = HashMap::from([
        ("JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
        ("STORE_BACKEND".to_string(), "memory".to_string()),
        ("FRONTEND_URL".to_string(), "http://app.test".to_string()),
    ]);
    for (name, value) in vars {
        env.insert(name.to_string(), value.to_string());
    }
    let config = Config::from_lookup(|name| env.get(name).cloned()).unwrap();

    let store = Arc::new(MemoryCredentialStore::new());
    let mailer = Arc::new(RecordingMailer::new());
    let avatars_dir = TempDir::new().unwrap();
    let collaborators = Collaborators {
        store: store.clone(),
        mailer: mailer.clone(),
        avatars: Arc::new(FileAvatarStore::new(avatars_dir.path())),
        clock: Arc::new(SystemClock),
    };

    TestContext {
        state: AppState::new(&config, collaborators).unwrap(),
        store,
        mailer,
        avatars_dir,
    }
}
