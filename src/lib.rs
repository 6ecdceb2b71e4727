// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Academy Identity - Account Lifecycle & Session Service
//!
//! Registration with email verification, password login, Google sign-in and
//! password recovery for the course-delivery platform. Successful logins
//! mint stateless HS256 session tokens.
//!
//! ## Modules
//!
//! - `accounts` - Account model, lifecycle controller, codes and federation
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Session tokens and the authentication extractor
//! - `mail` - Verification and reset mail delivery
//! - `providers` - Google OAuth client
//! - `storage` - Credential store (redb or in-memory) and avatar files

pub mod accounts;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod mail;
pub mod models;
pub mod providers;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;
