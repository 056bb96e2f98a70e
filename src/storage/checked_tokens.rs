// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Consumed login tokens.
//!
//! One record per successful token login; records are never updated or
//! deleted.

use std::cmp::{Ordering, Reverse};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A token that has been used to log in.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct CheckedToken {
    /// The full encoded token
    pub token: String,
    /// Issuance time embedded in the token (not the check time)
    pub timestamp: DateTime<Utc>,
    /// User the token logged in
    pub user_id: String,
    /// Username at the time of the login
    pub username: String,
    /// When the token was consumed
    pub checked_at: DateTime<Utc>,
}

impl CheckedToken {
    /// Audit listing order: newest issuance first, then username.
    pub fn audit_order(a: &CheckedToken, b: &CheckedToken) -> Ordering {
        (Reverse(a.timestamp), &a.username).cmp(&(Reverse(b.timestamp), &b.username))
    }
}
