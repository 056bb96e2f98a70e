// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Map an authenticated identity onto a local user.
//!
//! Runs inside the login transaction: the lookup, the username collision
//! check and the write all see the same snapshot and commit together.

use chrono::Utc;

use super::attributes::{IdentityAttributes, UserField};
use super::error::AuthError;
use crate::storage::{DbResult, IdentityKey, LoginTransaction, UserRecord};

/// Find or create the user matching `attributes` and write back the fields
/// the backend is allowed to set.
///
/// Returns the stored user and whether it was created by this call.
pub fn resolve_user(
    txn: &LoginTransaction,
    key: IdentityKey,
    attributes: &IdentityAttributes,
    writable: &[UserField],
    default_language: &str,
) -> Result<(UserRecord, bool), AuthError> {
    let identity = attributes
        .get(UserField::from(key))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::MissingAttribute(key.as_str().to_string()))?;

    let existing = txn.find_user(key, identity)?;
    let created = existing.is_none();

    let mut user = match &existing {
        Some(user) => user.clone(),
        None => {
            let mut user = UserRecord::new(default_language);
            user.set_identity(key, identity);
            user
        }
    };

    for (field, value) in attributes.iter() {
        if writable.contains(&field) {
            field.apply(&mut user, value);
        } else {
            tracing::debug!(field = field.name(), "Ignoring attribute outside allow-list");
        }
    }
    // The identity that matched stays authoritative.
    user.set_identity(key, identity);

    let requested = attributes
        .get(UserField::Username)
        .filter(|_| writable.contains(&UserField::Username))
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let desired = match requested {
        Some(name) => Some(name.to_string()),
        None if created => Some(default_username(&user, identity)),
        None => None,
    };
    if let Some(desired) = desired {
        user.username = unique_username(txn, &desired, &user.id)?;
    }

    if !created {
        user.updated_at = Utc::now();
    }
    txn.put_user(&user, existing.as_ref())?;

    Ok((user, created))
}

/// Local part of the email, or the raw identity.
fn default_username(user: &UserRecord, identity: &str) -> String {
    user.email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .unwrap_or(identity)
        .to_string()
}

/// `desired` if free or already ours, else the first free `desired-N`.
fn unique_username(txn: &LoginTransaction, desired: &str, user_id: &str) -> DbResult<String> {
    let mut candidate = desired.to_string();
    let mut suffix = 0u32;
    loop {
        match txn.username_owner(&candidate)? {
            Some(owner) if owner != user_id => {
                suffix += 1;
                candidate = format!("{desired}-{suffix}");
            }
            _ => return Ok(candidate),
        }
    }
}
