// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token claims.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::accounts::account::AccountId;
use crate::error::{IdentityError, IdentityResult};

/// Identity claims embedded in every session token.
///
/// Local login and federation produce exactly this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionClaims {
    /// Subject (account id)
    pub sub: String,

    /// Display name at issuance
    pub name: String,

    /// Normalized email at issuance
    pub email: String,

    /// Opaque role string
    pub role: String,

    /// Issuer
    pub iss: String,

    /// Issued at (Unix seconds)
    pub iat: i64,

    /// Expiration (Unix seconds)
    pub exp: i64,

    /// Unique token id
    pub jti: String,
}

impl SessionClaims {
    /// Account the session belongs to.
    pub fn account_id(&self) -> IdentityResult<AccountId> {
        AccountId::parse(&self.sub).ok_or(IdentityError::TokenInvalid)
    }
}
