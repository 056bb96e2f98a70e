// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity attributes extracted by a backend and the table of user fields
//! they may be written to.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::token::LoginData;
use crate::storage::{IdentityKey, UserRecord};

/// User fields an identity provider is allowed to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UserField {
    Email,
    RemoteId,
    Username,
    FirstName,
    LastName,
    PrimaryLanguage,
}

impl UserField {
    pub const ALL: [UserField; 6] = [
        UserField::Email,
        UserField::RemoteId,
        UserField::Username,
        UserField::FirstName,
        UserField::LastName,
        UserField::PrimaryLanguage,
    ];

    /// Attribute name as used in configuration and attribute maps.
    pub fn name(&self) -> &'static str {
        match self {
            UserField::Email => "email",
            UserField::RemoteId => "remote_id",
            UserField::Username => "username",
            UserField::FirstName => "first_name",
            UserField::LastName => "last_name",
            UserField::PrimaryLanguage => "primary_language",
        }
    }

    /// Parse an attribute name. Unknown names are not settable.
    pub fn from_name(name: &str) -> Option<UserField> {
        UserField::ALL.into_iter().find(|field| field.name() == name)
    }

    /// Write `value` into the matching field of `user`.
    ///
    /// Username is assigned by the resolver, which has to make it unique,
    /// so it is ignored here.
    pub fn apply(&self, user: &mut UserRecord, value: &str) {
        match self {
            UserField::Email => user.email = Some(value.to_string()),
            UserField::RemoteId => user.remote_id = Some(value.to_string()),
            UserField::Username => {}
            UserField::FirstName => user.first_name = value.to_string(),
            UserField::LastName => user.last_name = value.to_string(),
            UserField::PrimaryLanguage => user.primary_language = value.to_string(),
        }
    }
}

impl From<IdentityKey> for UserField {
    fn from(key: IdentityKey) -> Self {
        match key {
            IdentityKey::Email => UserField::Email,
            IdentityKey::RemoteId => UserField::RemoteId,
        }
    }
}

/// Attributes describing the authenticated identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityAttributes {
    values: BTreeMap<UserField, String>,
    issued_at: Option<DateTime<Utc>>,
}

impl IdentityAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: UserField, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: UserField, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn get(&self, field: UserField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserField, &str)> {
        self.values.iter().map(|(field, value)| (*field, value.as_str()))
    }

    /// When the credential was issued, if the backend knows.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }
}

impl From<&LoginData> for IdentityAttributes {
    fn from(data: &LoginData) -> Self {
        IdentityAttributes::new()
            .with(UserField::Email, data.email.clone())
            .with(UserField::Username, data.username.clone())
            .with(UserField::FirstName, data.first_name.clone())
            .with(UserField::LastName, data.last_name.clone())
            .with_issued_at(data.issued_at())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for field in UserField::ALL {
            assert_eq!(UserField::from_name(field.name()), Some(field));
        }
        assert_eq!(UserField::from_name("is_superuser"), None);
        assert_eq!(UserField::from_name("password"), None);
    }

    #[test]
    fn apply_sets_fields_but_not_username() {
        let mut user = UserRecord::new("en");
        user.username = "keep".to_string();

        UserField::FirstName.apply(&mut user, "Renko");
        UserField::LastName.apply(&mut user, "ter Kuile");
        UserField::PrimaryLanguage.apply(&mut user, "nl");
        UserField::Username.apply(&mut user, "other");

        assert_eq!(user.first_name, "Renko");
        assert_eq!(user.last_name, "ter Kuile");
        assert_eq!(user.primary_language, "nl");
        assert_eq!(user.username, "keep");
    }

    #[test]
    fn login_data_maps_to_attributes() {
        let data = LoginData {
            timestamp: Utc::now().naive_utc(),
            username: "johndoe".into(),
            first_name: "John".into(),
            last_name: "Doe".into(),
            email: "john.doe@test.com".into(),
        };
        let attributes = IdentityAttributes::from(&data);
        assert_eq!(attributes.get(UserField::Email), Some("john.doe@test.com"));
        assert_eq!(attributes.get(UserField::Username), Some("johndoe"));
        assert_eq!(attributes.get(UserField::RemoteId), None);
        assert_eq!(attributes.issued_at(), Some(data.issued_at()));
    }
}
