// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Symmetric token backend.

use chrono::{Duration, Utc};

use super::attributes::{IdentityAttributes, UserField};
use super::backend::{Authentication, AuthenticationBackend};
use super::error::AuthError;
use super::replay::ReplayGuard;
use super::token::TokenCodec;
use crate::config::{BackendKind, TokenSettings};
use crate::storage::{AuthDatabase, IdentityKey, LoginTransaction, UserRecord};

/// Fields a login token may set.
const TOKEN_FIELDS: &[UserField] = &[
    UserField::Email,
    UserField::Username,
    UserField::FirstName,
    UserField::LastName,
];

/// Authenticates a request carrying an AES-CBC + HMAC-SHA1 login token.
pub struct TokenBackend {
    settings: TokenSettings,
    token: Option<String>,
    replay: ReplayGuard,
}

impl TokenBackend {
    pub fn new(settings: TokenSettings, token: Option<String>, replay_grace: Duration) -> Self {
        Self {
            settings,
            token,
            replay: ReplayGuard::new(replay_grace),
        }
    }

    fn token(&self) -> Result<&str, AuthError> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::NoTokenProvided)
    }
}

impl AuthenticationBackend for TokenBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Token
    }

    fn identity_key(&self) -> IdentityKey {
        IdentityKey::Email
    }

    fn writable_fields(&self) -> &[UserField] {
        TOKEN_FIELDS
    }

    fn authenticate_request(&self, db: &AuthDatabase) -> Result<Authentication, AuthError> {
        let token = self.token()?;

        // Replay check comes before any cryptographic work.
        let key = TokenCodec::replay_key(token)?;
        if let Some(user) = self.replay.check(db, &key)? {
            return Ok(Authentication::Repeated(user));
        }

        let data = self.settings.codec.decode(token)?;
        Ok(Authentication::Identity(IdentityAttributes::from(&data)))
    }

    fn sso_url(&self, target_url: Option<&str>) -> Result<String, AuthError> {
        let mut url = self.settings.sso_url.clone();
        if let Some(target) = target_url.filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair("url", target);
        }
        Ok(url.into())
    }

    fn finalize(
        &self,
        txn: &LoginTransaction,
        user: &UserRecord,
        attributes: &IdentityAttributes,
    ) -> Result<(), AuthError> {
        let key = TokenCodec::replay_key(self.token()?)?;
        let issued_at = attributes.issued_at().unwrap_or_else(Utc::now);
        self.replay.mark_used(txn, &key, issued_at, user)
    }
}
