// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistent Storage Module
//!
//! Users and consumed login tokens live in a single embedded redb database
//! (`token_auth.redb` under `DATA_DIR`).
//!
//! ## Consistency Model
//!
//! - redb allows one write transaction at a time, so a "look up, then
//!   insert" sequence inside a [`LoginTransaction`] is atomic
//! - The checked-token table is keyed by the token string: a second insert
//!   of the same token is detected by the store and reported as
//!   [`DbError::DuplicateToken`]
//! - Email, remote id and username are indexed one-to-one; writing a value
//!   already owned by another user fails with [`DbError::Conflict`]
//! - A login transaction that is not committed leaves no trace

pub mod checked_tokens;
pub mod database;
pub mod users;

pub use checked_tokens::CheckedToken;
pub use database::{AuthDatabase, DbError, DbResult, LoginTransaction, DATABASE_FILE};
pub use users::{IdentityKey, UserRecord};
