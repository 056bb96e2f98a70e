// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication backends and the login flow they share.
//!
//! ## Flow
//!
//! ```text
//! authenticate_request ──> expiry check ──> resolve_user ──> finalize ──> commit
//!          │                     │                │              │
//!          └─────────────────────┴────────────────┴──────────────┴──> AuthError (nothing persisted)
//! ```
//!
//! User creation, attribute updates and the backend's finalize step run in
//! one [`LoginTransaction`].

use std::sync::Arc;

use chrono::Utc;

use super::attributes::{IdentityAttributes, UserField};
use super::error::AuthError;
use super::resolver::resolve_user;
use super::saml::{SamlBackend, SamlRequest, SamlToolkit};
use super::token::check_expiry;
use super::token_backend::TokenBackend;
use crate::config::{AuthSettings, BackendKind, ConfigError};
use crate::storage::{AuthDatabase, IdentityKey, LoginTransaction, UserRecord};

/// Result of reading the credential from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// A new identity to resolve against the user store.
    Identity(IdentityAttributes),
    /// The credential was already consumed inside the idempotency window.
    Repeated(UserRecord),
}

/// Contract implemented by every backend variant.
pub trait AuthenticationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Field used to find the local user.
    fn identity_key(&self) -> IdentityKey;

    /// User fields this backend may write.
    fn writable_fields(&self) -> &[UserField];

    /// Validate the credential and extract the identity.
    fn authenticate_request(&self, db: &AuthDatabase) -> Result<Authentication, AuthError>;

    /// Identity provider URL to send the browser to.
    fn sso_url(&self, target_url: Option<&str>) -> Result<String, AuthError>;

    /// Where the user wanted to go, if the request carries it.
    fn target_url(&self) -> Option<String> {
        None
    }

    /// Hook run inside the login transaction after the user is stored.
    fn finalize(
        &self,
        _txn: &LoginTransaction,
        _user: &UserRecord,
        _attributes: &IdentityAttributes,
    ) -> Result<(), AuthError> {
        Ok(())
    }

    /// Handle a single-logout message. Returns an optional redirect.
    fn process_logout(&self) -> Result<Option<String>, AuthError> {
        Ok(None)
    }

    /// Service provider metadata document.
    fn metadata(&self) -> Result<String, AuthError> {
        Err(AuthError::Metadata(
            "metadata is not supported by this backend".to_string(),
        ))
    }
}

/// Run the full login for `backend`.
///
/// Returns the user and whether it was created by this login.
pub fn authenticate(
    backend: &dyn AuthenticationBackend,
    db: &AuthDatabase,
    settings: &AuthSettings,
) -> Result<(UserRecord, bool), AuthError> {
    let result = run_login(backend, db, settings);
    match &result {
        Ok((user, created)) => tracing::info!(
            backend = %backend.kind(),
            user_id = %user.id,
            created = *created,
            "User authenticated"
        ),
        Err(e) if e.is_credential_error() => tracing::warn!(
            backend = %backend.kind(),
            error_code = e.error_code(),
            reason = %e,
            "Authentication rejected"
        ),
        Err(e) => tracing::error!(
            backend = %backend.kind(),
            error_code = e.error_code(),
            error = %e,
            "Authentication failed"
        ),
    }
    result
}

fn run_login(
    backend: &dyn AuthenticationBackend,
    db: &AuthDatabase,
    settings: &AuthSettings,
) -> Result<(UserRecord, bool), AuthError> {
    let attributes = match backend.authenticate_request(db)? {
        Authentication::Identity(attributes) => attributes,
        Authentication::Repeated(user) => return Ok((user, false)),
    };

    if let Some(issued_at) = attributes.issued_at() {
        check_expiry(issued_at, Utc::now(), settings.token_expiration)?;
    }

    let txn = db.begin_login()?;
    let outcome = resolve_user(
        &txn,
        backend.identity_key(),
        &attributes,
        backend.writable_fields(),
        &settings.default_language,
    )
    .and_then(|(user, created)| {
        backend.finalize(&txn, &user, &attributes)?;
        Ok((user, created))
    });

    match outcome {
        Ok(resolved) => {
            txn.commit()?;
            Ok(resolved)
        }
        Err(e) => {
            if let Err(abort_err) = txn.abort() {
                tracing::error!(error = %abort_err, "Failed to abort login transaction");
            }
            Err(e)
        }
    }
}

/// Everything a backend may need from the incoming request.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// Login token (token backend).
    pub token: Option<String>,
    /// HTTP request view (SAML backend).
    pub saml: SamlRequest,
}

impl AuthRequest {
    pub fn with_token(token: Option<String>) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    pub fn with_saml(saml: SamlRequest) -> Self {
        Self {
            token: None,
            saml,
        }
    }
}

/// Registered backend variants.
pub enum Backend {
    Token(TokenBackend),
    Saml(SamlBackend),
}

impl Backend {
    pub fn as_backend(&self) -> &dyn AuthenticationBackend {
        match self {
            Backend::Token(backend) => backend,
            Backend::Saml(backend) => backend,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.as_backend().kind()
    }

    /// See [`authenticate`].
    pub fn authenticate(
        &self,
        db: &AuthDatabase,
        settings: &AuthSettings,
    ) -> Result<(UserRecord, bool), AuthError> {
        authenticate(self.as_backend(), db, settings)
    }

    pub fn sso_url(&self, target_url: Option<&str>) -> Result<String, AuthError> {
        let url = self.as_backend().sso_url(target_url)?;
        tracing::debug!(backend = %self.kind(), "Built SSO redirect URL");
        Ok(url)
    }

    pub fn target_url(&self) -> Option<String> {
        self.as_backend().target_url()
    }

    pub fn process_logout(&self) -> Result<Option<String>, AuthError> {
        self.as_backend().process_logout()
    }

    pub fn metadata(&self) -> Result<String, AuthError> {
        self.as_backend().metadata()
    }
}

/// Build the configured backend for one request.
///
/// `saml_toolkit` is required when the SAML backend is configured.
pub fn get_auth(
    settings: &AuthSettings,
    request: AuthRequest,
    saml_toolkit: Option<Arc<dyn SamlToolkit>>,
) -> Result<Backend, ConfigError> {
    match settings.backend {
        BackendKind::Token => Ok(Backend::Token(TokenBackend::new(
            settings.token_settings()?.clone(),
            request.token,
            settings.replay_grace,
        ))),
        BackendKind::Saml => {
            let toolkit = saml_toolkit.ok_or(ConfigError::Missing("SAML toolkit"))?;
            let backend = SamlBackend::new(toolkit, settings.saml_settings()?, request.saml)?;
            Ok(Backend::Saml(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::saml::test_support::{saml_settings, FakeToolkit};
    use crate::config::{SessionSettings, TokenSettings};
    use crate::auth::token::TokenCodec;
    use chrono::{Duration, NaiveDate};
    use url::Url;

    const HMAC_KEY: &[u8] = b"bbbbbbbbbbbbbbbb";
    const AES_KEY: &[u8] = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn settings(backend: BackendKind) -> AuthSettings {
        AuthSettings {
            backend,
            token: Some(TokenSettings {
                codec: Arc::new(TokenCodec::new(AES_KEY, HMAC_KEY).unwrap()),
                sso_url: Url::parse("https://idp.example.com/login").unwrap(),
            }),
            token_expiration: Duration::seconds(120),
            replay_grace: Duration::zero(),
            default_language: "en".to_string(),
            saml: Some(saml_settings()),
            session: SessionSettings {
                secret: b"secret".to_vec(),
                ttl: Duration::seconds(60),
            },
            login_redirect_prefix: "/go/login-with/".to_string(),
        }
    }

    fn temp_db() -> (AuthDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = AuthDatabase::open_in(dir.path()).unwrap();
        (db, dir)
    }

    fn token_for(settings: &AuthSettings) -> String {
        settings
            .token_settings()
            .unwrap()
            .codec
            .encode("john.doe@test.com", "johndoe", "John", "Doe")
            .unwrap()
    }

    fn token_backend(settings: &AuthSettings, token: Option<String>) -> Backend {
        get_auth(settings, AuthRequest::with_token(token), None).unwrap()
    }

    #[test]
    fn valid_token_creates_active_user() {
        let (db, _dir) = temp_db();
        let settings = settings(BackendKind::Token);
        let token = token_for(&settings);

        let (user, created) = token_backend(&settings, Some(token.clone()))
            .authenticate(&db, &settings)
            .unwrap();

        assert!(created);
        assert!(user.is_active);
        assert_eq!(user.email.as_deref(), Some("john.doe@test.com"));
        assert_eq!(user.username, "johndoe");
        assert_eq!(user.first_name, "John");
        assert_eq!(user.last_name, "Doe");

        let record = db.checked_token(&token).unwrap().unwrap();
        assert_eq!(record.user_id, user.id);
        assert_eq!(record.username, "johndoe");
    }

    #[test]
    fn token_cannot_be_used_twice() {
        let (db, _dir) = temp_db();
        let settings = settings(BackendKind::Token);
        let token = token_for(&settings);

        token_backend(&settings, Some(token.clone()))
            .authenticate(&db, &settings)
            .unwrap();
        let err = token_backend(&settings, Some(token))
            .authenticate(&db, &settings)
            .unwrap_err();
        assert_eq!(err, AuthError::Replay);
        assert_eq!(err.to_string(), "Token was already used and is not valid");
    }

    #[test]
    fn stripping_padding_does_not_bypass_replay() {
        let (db, _dir) = temp_db();
        let settings = settings(BackendKind::Token);
        let token = token_for(&settings);
        assert!(token.ends_with('='));

        token_backend(&settings, Some(token.clone()))
            .authenticate(&db, &settings)
            .unwrap();
        let unpadded = token.trim_end_matches('=').to_string();
        let err = token_backend(&settings, Some(unpadded))
            .authenticate(&db, &settings)
            .unwrap_err();
        assert_eq!(err, AuthError::Replay);
        assert_eq!(db.list_checked_tokens().unwrap().len(), 1);
    }

    #[test]
    fn repeated_token_in_grace_window_returns_same_user() {
        let (db, _dir) = temp_db();
        let mut settings = settings(BackendKind::Token);
        settings.replay_grace = Duration::seconds(10);
        let token = token_for(&settings);

        let (first, _) = token_backend(&settings, Some(token.clone()))
            .authenticate(&db, &settings)
            .unwrap();
        let (second, created) = token_backend(&settings, Some(token))
            .authenticate(&db, &settings)
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn corrupted_token_fails_signature() {
        let (db, _dir) = temp_db();
        let settings = settings(BackendKind::Token);
        let token = token_for(&settings);
        let mid = token.len() / 2;
        let replacement = if &token[mid..mid + 1] == "A" { "B" } else { "A" };
        let corrupted = format!("{}{}{}", &token[..mid], replacement, &token[mid + 1..]);

        let err = token_backend(&settings, Some(corrupted))
            .authenticate(&db, &settings)
            .unwrap_err();
        assert_eq!(err, AuthError::Signature);
        assert!(db.list_users().unwrap().is_empty());
    }

    #[test]
    fn expired_token_persists_nothing() {
        let (db, _dir) = temp_db();
        let settings = settings(BackendKind::Token);
        let last_year = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let token = settings
            .token_settings()
            .unwrap()
            .codec
            .encode_at("john.doe@test.com", "johndoe", "John", "Doe", last_year)
            .unwrap();

        let err = token_backend(&settings, Some(token.clone()))
            .authenticate(&db, &settings)
            .unwrap_err();
        assert_eq!(err, AuthError::Expired);
        assert!(db.list_users().unwrap().is_empty());
        assert!(db.checked_token(&token).unwrap().is_none());
    }

    #[test]
    fn missing_token_is_rejected() {
        let (db, _dir) = temp_db();
        let settings = settings(BackendKind::Token);
        let err = token_backend(&settings, None)
            .authenticate(&db, &settings)
            .unwrap_err();
        assert_eq!(err, AuthError::NoTokenProvided);
    }

    #[test]
    fn colliding_usernames_get_suffix() {
        let (db, _dir) = temp_db();
        let settings = settings(BackendKind::Token);
        let codec = &settings.token_settings().unwrap().codec;

        let alice = codec.encode("alice@one.com", "alice", "Alice", "One").unwrap();
        let other = codec.encode("alice@two.com", "alice", "Alice", "Two").unwrap();

        let (first, _) = token_backend(&settings, Some(alice))
            .authenticate(&db, &settings)
            .unwrap();
        let (second, _) = token_backend(&settings, Some(other))
            .authenticate(&db, &settings)
            .unwrap();
        assert_eq!(first.username, "alice");
        assert_eq!(second.username, "alice-1");
    }

    #[test]
    fn saml_backend_requires_toolkit() {
        let settings = settings(BackendKind::Saml);
        let result = get_auth(&settings, AuthRequest::default(), None);
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn saml_login_resolves_by_remote_id() {
        let (db, _dir) = temp_db();
        let settings = settings(BackendKind::Saml);
        let toolkit: Arc<dyn SamlToolkit> = Arc::new(FakeToolkit::accepting(&[
            ("User.email", "jane@idp.test"),
            ("User.FirstName", "Jane"),
            ("User.LastName", "Roe"),
            ("User.uid", "jane-42"),
        ]));

        let backend = get_auth(&settings, AuthRequest::default(), Some(toolkit)).unwrap();
        assert_eq!(backend.kind(), BackendKind::Saml);
        let (user, created) = backend.authenticate(&db, &settings).unwrap();

        assert!(created);
        assert_eq!(user.remote_id.as_deref(), Some("jane-42"));
        assert_eq!(user.email.as_deref(), Some("jane@idp.test"));
        assert_eq!(user.first_name, "Jane");
        assert_eq!(user.username, "jane");
        assert!(db.list_checked_tokens().unwrap().is_empty());
    }

    #[test]
    fn token_backend_has_no_metadata() {
        let settings = settings(BackendKind::Token);
        let backend = token_backend(&settings, None);
        assert!(matches!(backend.metadata(), Err(AuthError::Metadata(_))));
        assert_eq!(backend.process_logout(), Ok(None));
    }
}
