// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local user records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Field used to find an existing user for an incoming identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    Email,
    RemoteId,
}

impl IdentityKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKey::Email => "email",
            IdentityKey::RemoteId => "remote_id",
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserRecord {
    /// Unique user identifier (UUID)
    pub id: String,
    /// Email address (identity key of the token backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Identifier assigned by the identity provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Unique login name
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub primary_language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// New active user with no attributes besides its identity.
    pub fn new(primary_language: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: None,
            remote_id: None,
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
            primary_language: primary_language.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Value of the given identity key, if set.
    pub fn identity(&self, key: IdentityKey) -> Option<&str> {
        match key {
            IdentityKey::Email => self.email.as_deref(),
            IdentityKey::RemoteId => self.remote_id.as_deref(),
        }
    }

    /// Set the value of the given identity key.
    pub fn set_identity(&mut self, key: IdentityKey, value: impl Into<String>) {
        match key {
            IdentityKey::Email => self.email = Some(value.into()),
            IdentityKey::RemoteId => self.remote_id = Some(value.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_active() {
        let user = UserRecord::new("nl");
        assert!(user.is_active);
        assert_eq!(user.primary_language, "nl");
        assert!(user.email.is_none());
        assert_eq!(user.created_at, user.updated_at);
    }

    #[test]
    fn identity_accessors() {
        let mut user = UserRecord::new("en");
        user.set_identity(IdentityKey::RemoteId, "remote-7");
        assert_eq!(user.identity(IdentityKey::RemoteId), Some("remote-7"));
        assert_eq!(user.identity(IdentityKey::Email), None);
    }

    #[test]
    fn serialization_skips_missing_identities() {
        let mut user = UserRecord::new("en");
        user.set_identity(IdentityKey::Email, "a@b.c");
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["email"], "a@b.c");
        assert!(json.get("remote_id").is_none());
    }
}
