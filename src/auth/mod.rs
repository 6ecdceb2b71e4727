// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Session tokens and the request-side authentication gate.
//!
//! ## Auth Flow
//!
//! 1. Login or Google sign-in mints an HS256 session token
//! 2. The token is returned in the body and set as the `token` cookie
//! 3. Protected endpoints read `Authorization: Bearer <token>` or the cookie
//!    and validate signature, issuer and expiry
//!
//! ## Limitations
//!
//! - Tokens are stateless; logout only clears the cookie
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod cookie;
pub mod extractor;
pub mod tokens;

pub use claims::SessionClaims;
pub use extractor::{Auth, OptionalAuth};
pub use tokens::{IssuedToken, TokenIssuer, TokenSettings};
