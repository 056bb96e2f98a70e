// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-use enforcement for login tokens.
//!
//! A token is consumed by inserting it into the `checked_tokens` table in
//! the same transaction that stores the user. The read-side check here
//! rejects obvious replays early; the insert is what settles concurrent
//! attempts with the same token.

use chrono::{DateTime, Duration, Utc};

use super::error::AuthError;
use crate::storage::{AuthDatabase, CheckedToken, LoginTransaction, UserRecord};

/// Tracks which tokens have been used.
#[derive(Debug, Clone, Copy)]
pub struct ReplayGuard {
    grace: Duration,
}

impl ReplayGuard {
    /// `grace` is the window after consumption in which the same token is
    /// answered with the user it logged in instead of a replay error.
    /// Zero disables it.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Whether the token has already been consumed.
    pub fn is_used(&self, db: &AuthDatabase, token: &str) -> Result<bool, AuthError> {
        Ok(db.checked_token(token)?.is_some())
    }

    /// Check a token before it is decoded.
    ///
    /// `Ok(None)` means unused. `Ok(Some(user))` means the token was
    /// consumed inside the grace window and `user` is the account it
    /// logged in.
    pub fn check(&self, db: &AuthDatabase, token: &str) -> Result<Option<UserRecord>, AuthError> {
        let Some(record) = db.checked_token(token)? else {
            return Ok(None);
        };

        if self.within_grace(&record, Utc::now()) {
            if let Some(user) = db.get_user(&record.user_id)? {
                tracing::debug!(user_id = %user.id, "Repeated token inside grace window");
                return Ok(Some(user));
            }
        }
        Err(AuthError::Replay)
    }

    /// Record the token as consumed by `user`.
    pub fn mark_used(
        &self,
        txn: &LoginTransaction,
        token: &str,
        issued_at: DateTime<Utc>,
        user: &UserRecord,
    ) -> Result<(), AuthError> {
        txn.insert_checked_token(&CheckedToken {
            token: token.to_string(),
            timestamp: issued_at,
            user_id: user.id.clone(),
            username: user.username.clone(),
            checked_at: Utc::now(),
        })?;
        Ok(())
    }

    fn within_grace(&self, record: &CheckedToken, now: DateTime<Utc>) -> bool {
        self.grace > Duration::zero() && now - record.checked_at <= self.grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (AuthDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = AuthDatabase::open_in(dir.path()).unwrap();
        (db, dir)
    }

    fn consume(db: &AuthDatabase, guard: &ReplayGuard, token: &str) -> UserRecord {
        let mut user = UserRecord::new("en");
        user.email = Some("a@b.c".into());
        user.username = "ab".into();
        let txn = db.begin_login().unwrap();
        txn.put_user(&user, None).unwrap();
        guard.mark_used(&txn, token, Utc::now(), &user).unwrap();
        txn.commit().unwrap();
        user
    }

    #[test]
    fn unused_token_passes() {
        let (db, _dir) = temp_db();
        let guard = ReplayGuard::new(Duration::zero());
        assert!(!guard.is_used(&db, "fresh").unwrap());
        assert_eq!(guard.check(&db, "fresh").unwrap(), None);
    }

    #[test]
    fn consumed_token_is_replay() {
        let (db, _dir) = temp_db();
        let guard = ReplayGuard::new(Duration::zero());
        consume(&db, &guard, "tok");

        assert!(guard.is_used(&db, "tok").unwrap());
        assert_eq!(guard.check(&db, "tok"), Err(AuthError::Replay));
    }

    #[test]
    fn grace_window_returns_recorded_user() {
        let (db, _dir) = temp_db();
        let guard = ReplayGuard::new(Duration::seconds(30));
        let user = consume(&db, &guard, "tok");

        assert_eq!(guard.check(&db, "tok").unwrap(), Some(user));
    }

    #[test]
    fn grace_window_expires() {
        let guard = ReplayGuard::new(Duration::seconds(30));
        let record = CheckedToken {
            token: "tok".into(),
            timestamp: Utc::now(),
            user_id: "u".into(),
            username: "u".into(),
            checked_at: Utc::now() - Duration::seconds(31),
        };
        assert!(!guard.within_grace(&record, Utc::now()));
    }

    #[test]
    fn second_insert_of_same_token_is_replay() {
        let (db, _dir) = temp_db();
        let guard = ReplayGuard::new(Duration::zero());
        let user = consume(&db, &guard, "tok");

        let txn = db.begin_login().unwrap();
        let err = guard.mark_used(&txn, "tok", Utc::now(), &user).unwrap_err();
        assert_eq!(err, AuthError::Replay);
    }
}
