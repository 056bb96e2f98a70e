// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded authentication database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized UserRecord
//! - `users_by_email`: email → user_id
//! - `users_by_remote_id`: remote_id → user_id
//! - `users_by_username`: username → user_id
//! - `checked_tokens`: token → serialized CheckedToken

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;

use super::checked_tokens::CheckedToken;
use super::users::{IdentityKey, UserRecord};

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "token_auth.redb";

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: user_id → serialized UserRecord (JSON bytes).
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

const USERS_BY_EMAIL: TableDefinition<&str, &str> = TableDefinition::new("users_by_email");

const USERS_BY_REMOTE_ID: TableDefinition<&str, &str> = TableDefinition::new("users_by_remote_id");

const USERS_BY_USERNAME: TableDefinition<&str, &str> = TableDefinition::new("users_by_username");

/// Append-only log of consumed tokens, keyed by the full token string.
const CHECKED_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("checked_tokens");

fn identity_index(key: IdentityKey) -> TableDefinition<'static, &'static str, &'static str> {
    match key {
        IdentityKey::Email => USERS_BY_EMAIL,
        IdentityKey::RemoteId => USERS_BY_REMOTE_ID,
    }
}

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{field} '{value}' already belongs to another user")]
    Conflict { field: &'static str, value: String },

    #[error("token already recorded")]
    DuplicateToken,
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// AuthDatabase
// =============================================================================

/// Embedded ACID database for users and consumed tokens.
pub struct AuthDatabase {
    db: Database,
}

impl AuthDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERS_BY_EMAIL)?;
            let _ = write_txn.open_table(USERS_BY_REMOTE_ID)?;
            let _ = write_txn.open_table(USERS_BY_USERNAME)?;
            let _ = write_txn.open_table(CHECKED_TOKENS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Open (or create) `token_auth.redb` inside `dir`.
    pub fn open_in(dir: &Path) -> DbResult<Self> {
        Self::open(&dir.join(DATABASE_FILE))
    }

    /// Start the write transaction that carries one login.
    pub fn begin_login(&self) -> DbResult<LoginTransaction> {
        Ok(LoginTransaction {
            txn: self.db.begin_write()?,
        })
    }

    /// Verify the database can be read.
    pub fn health_check(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Look up a user by id.
    pub fn get_user(&self, user_id: &str) -> DbResult<Option<UserRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        let user = match table.get(user_id)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(user)
    }

    /// Look up a user by identity key.
    pub fn find_user(&self, key: IdentityKey, value: &str) -> DbResult<Option<UserRecord>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(identity_index(key))?;
        let user_id = index.get(value)?.map(|v| v.value().to_string());
        match user_id {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    /// All users, in id order.
    pub fn list_users(&self) -> DbResult<Vec<UserRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        collect_json(&table)
    }

    // =========================================================================
    // Checked tokens
    // =========================================================================

    /// Look up the consumption record of a token.
    pub fn checked_token(&self, token: &str) -> DbResult<Option<CheckedToken>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHECKED_TOKENS)?;
        let record = match table.get(token)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(record)
    }

    /// All consumed tokens, newest issuance first, ties by username.
    pub fn list_checked_tokens(&self) -> DbResult<Vec<CheckedToken>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHECKED_TOKENS)?;
        let mut tokens: Vec<CheckedToken> = collect_json(&table)?;
        tokens.sort_by(CheckedToken::audit_order);
        Ok(tokens)
    }
}

fn collect_json<T, Tbl>(table: &Tbl) -> DbResult<Vec<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let mut items = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        items.push(serde_json::from_slice(value.value())?);
    }
    Ok(items)
}

// =============================================================================
// LoginTransaction
// =============================================================================

/// One write transaction spanning user upsert and token consumption.
///
/// Nothing is visible to other readers until [`LoginTransaction::commit`];
/// dropping or aborting the transaction discards every change.
pub struct LoginTransaction {
    txn: WriteTransaction,
}

impl LoginTransaction {
    /// Look up a user by id.
    pub fn get_user(&self, user_id: &str) -> DbResult<Option<UserRecord>> {
        let table = self.txn.open_table(USERS)?;
        let user = match table.get(user_id)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(user)
    }

    /// Look up a user by identity key.
    pub fn find_user(&self, key: IdentityKey, value: &str) -> DbResult<Option<UserRecord>> {
        let index = self.txn.open_table(identity_index(key))?;
        let user_id = index.get(value)?.map(|v| v.value().to_string());
        match user_id {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    /// Id of the user holding `username`, if any.
    pub fn username_owner(&self, username: &str) -> DbResult<Option<String>> {
        let index = self.txn.open_table(USERS_BY_USERNAME)?;
        let owner = index.get(username)?.map(|v| v.value().to_string());
        Ok(owner)
    }

    /// Insert or update a user and keep the unique indexes in sync.
    ///
    /// `previous` is the stored version of the user, `None` for new users.
    pub fn put_user(&self, user: &UserRecord, previous: Option<&UserRecord>) -> DbResult<()> {
        self.reindex(
            USERS_BY_EMAIL,
            "email",
            previous.and_then(|p| p.email.as_deref()),
            user.email.as_deref(),
            &user.id,
        )?;
        self.reindex(
            USERS_BY_REMOTE_ID,
            "remote_id",
            previous.and_then(|p| p.remote_id.as_deref()),
            user.remote_id.as_deref(),
            &user.id,
        )?;
        self.reindex(
            USERS_BY_USERNAME,
            "username",
            previous.map(|p| p.username.as_str()),
            Some(user.username.as_str()),
            &user.id,
        )?;

        let json = serde_json::to_vec(user)?;
        let mut table = self.txn.open_table(USERS)?;
        table.insert(user.id.as_str(), json.as_slice())?;
        Ok(())
    }

    fn reindex(
        &self,
        definition: TableDefinition<'static, &'static str, &'static str>,
        field: &'static str,
        old: Option<&str>,
        new: Option<&str>,
        user_id: &str,
    ) -> DbResult<()> {
        let old = old.filter(|v| !v.is_empty());
        let new = new.filter(|v| !v.is_empty());
        if old == new {
            return Ok(());
        }

        let mut index = self.txn.open_table(definition)?;
        if let Some(value) = new {
            let owner = index.get(value)?.map(|v| v.value().to_string());
            if owner.is_some_and(|owner| owner != user_id) {
                return Err(DbError::Conflict {
                    field,
                    value: value.to_string(),
                });
            }
        }
        if let Some(value) = old {
            index.remove(value)?;
        }
        if let Some(value) = new {
            index.insert(value, user_id)?;
        }
        Ok(())
    }

    /// Record a consumed token.
    ///
    /// Fails with [`DbError::DuplicateToken`] when the token is already
    /// recorded, including by a login that committed after this
    /// transaction's replay check.
    pub fn insert_checked_token(&self, record: &CheckedToken) -> DbResult<()> {
        let mut table = self.txn.open_table(CHECKED_TOKENS)?;
        if table.get(record.token.as_str())?.is_some() {
            return Err(DbError::DuplicateToken);
        }
        let json = serde_json::to_vec(record)?;
        table.insert(record.token.as_str(), json.as_slice())?;
        Ok(())
    }

    /// Make every change of this login durable.
    pub fn commit(self) -> DbResult<()> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard every change of this login.
    pub fn abort(self) -> DbResult<()> {
        self.txn.abort()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_db() -> (AuthDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = AuthDatabase::open_in(dir.path()).unwrap();
        (db, dir)
    }

    fn user(email: &str, username: &str) -> UserRecord {
        let mut user = UserRecord::new("en");
        user.email = Some(email.to_string());
        user.username = username.to_string();
        user
    }

    fn checked(token: &str, user: &UserRecord) -> CheckedToken {
        CheckedToken {
            token: token.to_string(),
            timestamp: Utc::now(),
            user_id: user.id.clone(),
            username: user.username.clone(),
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn put_and_find_user() {
        let (db, _dir) = temp_db();
        let alice = user("alice@example.com", "alice");

        let txn = db.begin_login().unwrap();
        txn.put_user(&alice, None).unwrap();
        txn.commit().unwrap();

        let found = db
            .find_user(IdentityKey::Email, "alice@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(found, alice);
        assert_eq!(db.get_user(&alice.id).unwrap().unwrap().username, "alice");
        assert!(db.find_user(IdentityKey::RemoteId, "x").unwrap().is_none());
    }

    #[test]
    fn uncommitted_login_leaves_no_trace() {
        let (db, _dir) = temp_db();
        let alice = user("alice@example.com", "alice");

        let txn = db.begin_login().unwrap();
        txn.put_user(&alice, None).unwrap();
        txn.insert_checked_token(&checked("tok", &alice)).unwrap();
        txn.abort().unwrap();

        assert!(db.list_users().unwrap().is_empty());
        assert!(db.checked_token("tok").unwrap().is_none());
    }

    #[test]
    fn duplicate_token_is_rejected() {
        let (db, _dir) = temp_db();
        let alice = user("alice@example.com", "alice");

        let txn = db.begin_login().unwrap();
        txn.put_user(&alice, None).unwrap();
        txn.insert_checked_token(&checked("tok", &alice)).unwrap();
        txn.commit().unwrap();

        let txn = db.begin_login().unwrap();
        let result = txn.insert_checked_token(&checked("tok", &alice));
        assert!(matches!(result, Err(DbError::DuplicateToken)));
    }

    #[test]
    fn identity_values_are_unique() {
        let (db, _dir) = temp_db();
        let alice = user("shared@example.com", "alice");
        let bob = user("shared@example.com", "bob");

        let txn = db.begin_login().unwrap();
        txn.put_user(&alice, None).unwrap();
        let result = txn.put_user(&bob, None);
        assert!(matches!(result, Err(DbError::Conflict { field: "email", .. })));
    }

    #[test]
    fn renaming_moves_the_index_entry() {
        let (db, _dir) = temp_db();
        let alice = user("alice@example.com", "alice");

        let txn = db.begin_login().unwrap();
        txn.put_user(&alice, None).unwrap();
        let mut renamed = alice.clone();
        renamed.username = "alice-smith".to_string();
        txn.put_user(&renamed, Some(&alice)).unwrap();

        assert_eq!(txn.username_owner("alice").unwrap(), None);
        assert_eq!(txn.username_owner("alice-smith").unwrap(), Some(alice.id.clone()));
        txn.commit().unwrap();
    }

    #[test]
    fn checked_tokens_listed_in_audit_order() {
        let (db, _dir) = temp_db();
        let alice = user("alice@example.com", "alice");
        let bob = user("bob@example.com", "bob");
        let earlier = Utc::now() - chrono::Duration::seconds(60);

        let txn = db.begin_login().unwrap();
        txn.put_user(&alice, None).unwrap();
        txn.put_user(&bob, None).unwrap();
        let mut old = checked("old", &alice);
        old.timestamp = earlier;
        let now = Utc::now();
        let mut by_bob = checked("b", &bob);
        by_bob.timestamp = now;
        let mut by_alice = checked("a", &alice);
        by_alice.timestamp = now;
        for record in [&old, &by_bob, &by_alice] {
            txn.insert_checked_token(record).unwrap();
        }
        txn.commit().unwrap();

        let tokens: Vec<_> = db
            .list_checked_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(tokens, ["a", "b", "old"]);
    }

    #[test]
    fn health_check_passes_on_open_database() {
        let (db, _dir) = temp_db();
        db.health_check().unwrap();
    }
}
