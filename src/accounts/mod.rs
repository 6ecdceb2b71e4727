// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Accounts Module
//!
//! Account lifecycle: registration, email verification, password login,
//! federated sign-in, profile maintenance and password recovery.
//!
//! ## Lifecycle
//!
//! ```text
//! register ──> Unverified ──verify_email──> Verified
//!                                              ▲
//! federation (first sign-in) ──────────────────┘
//! ```
//!
//! `Verified` is terminal. Password resets and profile updates never change
//! the verification state.

pub mod account;
pub mod codes;
pub mod federation;
pub mod password;
pub mod service;

pub use account::{Account, AccountId, AccountPatch, CodePurpose, Email, VerificationState};
pub use codes::{CodeSettings, VerificationCodeService};
pub use federation::{FederatedIdentity, FederationAdapter};
pub use password::PasswordHasher;
pub use service::{
    AccountService, Collaborators, ForgotPasswordPolicy, ProfileUpdate, ServiceSettings, Session,
};
