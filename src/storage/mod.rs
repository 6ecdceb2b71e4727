// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistence collaborators of the account services.
//!
//! ## Storage Layout
//!
//! ```text
//! $DATA_DIR/
//!   accounts.redb       # Account records + email index (redb, ACID)
//!   avatars/
//!     {uuid}.{ext}      # Uploaded profile images
//! ```
//!
//! ## Credential Store Contract
//!
//! - `create` fails with [`StoreError::Conflict`] on a duplicate email or id
//! - `update` applies an [`AccountPatch`] atomically: the patch sees the
//!   current record and either everything it produces is written or nothing
//!   is ([`StoreError::Rejected`])
//! - Email lookups use the case-normalized [`Email`]

use async_trait::async_trait;

use crate::accounts::account::{Account, AccountId, AccountPatch, Email, PatchRejection};

pub mod account_db;
pub mod avatars;
pub mod memory;
pub mod paths;

pub use account_db::RedbCredentialStore;
pub use avatars::{AvatarUpload, AvatarUploader, FileAvatarStore, UploadError};
pub use memory::MemoryCredentialStore;
pub use paths::StoragePaths;

/// Error type for credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("patch rejected: {0}")]
    Rejected(PatchRejection),

    /// Backend failure (I/O, database, serialization)
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for credential store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Account persistence used by the lifecycle controller and federation adapter.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &Email) -> StoreResult<Option<Account>>;

    async fn find_by_id(&self, id: &AccountId) -> StoreResult<Option<Account>>;

    async fn create(&self, account: Account) -> StoreResult<Account>;

    async fn update(&self, id: &AccountId, patch: AccountPatch) -> StoreResult<Account>;

    /// Cheap liveness probe for readiness checks.
    async fn health_check(&self) -> StoreResult<()>;
}
