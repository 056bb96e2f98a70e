// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! immutable [`AuthSettings`] loaded once at startup and injected into the
//! authentication backends.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TOKEN_AUTH_BACKEND` | Backend variant (`token` or `saml`) | `token` |
//! | `TOKEN_AUTH_HMAC_KEY` | HMAC-SHA1 key, at least 16 bytes | Required for `token` |
//! | `TOKEN_AUTH_AES_KEY` | AES key, 16 or 32 bytes | Required for `token` |
//! | `TOKEN_AUTH_EXPIRATION` | Token lifetime in seconds | `120` |
//! | `TOKEN_AUTH_REPLAY_GRACE` | Idempotency window for duplicate requests (seconds) | `0` |
//! | `TOKEN_AUTH_SSO_URL` | Identity provider login URL | Required for `token` |
//! | `TOKEN_AUTH_SAML_SETTINGS` | Path to the SAML settings JSON file | Required for `saml` |
//! | `TOKEN_AUTH_DEFAULT_LANGUAGE` | Language assigned to new users | `en` |
//! | `SESSION_JWT_SECRET` | HS256 secret for session tokens | Required |
//! | `SESSION_JWT_TTL` | Session token lifetime in seconds | `3600` |
//! | `LOGIN_REDIRECT_PREFIX` | Redirect target prefix after login | `/go/login-with/` |
//! | `DATA_DIR` | Directory holding the redb database | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files enabling HTTPS | Unset (plain HTTP) |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use url::Url;

use crate::auth::saml::SamlSettings;
use crate::auth::token::TokenCodec;

pub const BACKEND_ENV: &str = "TOKEN_AUTH_BACKEND";
pub const HMAC_KEY_ENV: &str = "TOKEN_AUTH_HMAC_KEY";
pub const AES_KEY_ENV: &str = "TOKEN_AUTH_AES_KEY";
pub const EXPIRATION_ENV: &str = "TOKEN_AUTH_EXPIRATION";
pub const REPLAY_GRACE_ENV: &str = "TOKEN_AUTH_REPLAY_GRACE";
pub const SSO_URL_ENV: &str = "TOKEN_AUTH_SSO_URL";
pub const SAML_SETTINGS_ENV: &str = "TOKEN_AUTH_SAML_SETTINGS";
pub const DEFAULT_LANGUAGE_ENV: &str = "TOKEN_AUTH_DEFAULT_LANGUAGE";
pub const SESSION_SECRET_ENV: &str = "SESSION_JWT_SECRET";
pub const SESSION_TTL_ENV: &str = "SESSION_JWT_TTL";
pub const LOGIN_REDIRECT_PREFIX_ENV: &str = "LOGIN_REDIRECT_PREFIX";

/// Environment variable name for the data directory path.
///
/// The redb database file `token_auth.redb` is created inside it.
///
/// # Default
/// `/data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "/data";

pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

pub const DEFAULT_TOKEN_EXPIRATION_SECS: i64 = 120;
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_LOGIN_REDIRECT_PREFIX: &str = "/go/login-with/";

/// Configuration error.
///
/// Raised while loading settings or constructing a backend. These are
/// operational faults and are never shown to the user being authenticated.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("unknown authentication backend '{0}'")]
    UnknownBackend(String),

    #[error("{name} must be {expected} bytes long, got {actual}")]
    InvalidKeyLength {
        name: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("invalid SAML settings: {0}")]
    SamlSettings(String),
}

/// Registered authentication backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// AES-CBC + HMAC-SHA1 login token.
    Token,
    /// SAML 2.0 assertion posted to the ACS endpoint.
    Saml,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Token => "token",
            BackendKind::Saml => "saml",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "token" | "symmetric" => Ok(BackendKind::Token),
            "saml" => Ok(BackendKind::Saml),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of the symmetric token backend.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Codec holding the AES and HMAC keys.
    pub codec: Arc<TokenCodec>,
    /// Identity provider login page.
    pub sso_url: Url,
}

/// Settings for the session JWT handed to the frontend after login.
#[derive(Clone)]
pub struct SessionSettings {
    pub secret: Vec<u8>,
    pub ttl: Duration,
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Process-wide authentication settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub backend: BackendKind,
    /// Present whenever token keys are configured; required for `token`.
    pub token: Option<TokenSettings>,
    /// Maximum token age. Tokens issued before `now - token_expiration` fail.
    pub token_expiration: Duration,
    /// Window in which a consumed token is answered idempotently.
    pub replay_grace: Duration,
    pub default_language: String,
    /// Required for `saml`.
    pub saml: Option<SamlSettings>,
    pub session: SessionSettings,
    pub login_redirect_prefix: String,
}

impl AuthSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let backend = match get(BACKEND_ENV) {
            Some(value) => value.parse()?,
            None => BackendKind::Token,
        };

        let token = match (get(AES_KEY_ENV), get(HMAC_KEY_ENV)) {
            (Some(aes_key), Some(hmac_key)) => {
                let codec = TokenCodec::new(aes_key.as_bytes(), hmac_key.as_bytes())?;
                let sso_url = get(SSO_URL_ENV).ok_or(ConfigError::Missing(SSO_URL_ENV))?;
                let sso_url = Url::parse(&sso_url).map_err(|e| ConfigError::Invalid {
                    name: SSO_URL_ENV,
                    reason: e.to_string(),
                })?;
                Some(TokenSettings {
                    codec: Arc::new(codec),
                    sso_url,
                })
            }
            (None, None) => None,
            (None, Some(_)) => return Err(ConfigError::Missing(AES_KEY_ENV)),
            (Some(_), None) => return Err(ConfigError::Missing(HMAC_KEY_ENV)),
        };

        let saml = match get(SAML_SETTINGS_ENV) {
            Some(path) => Some(SamlSettings::from_file(&path)?),
            None => None,
        };

        match backend {
            BackendKind::Token if token.is_none() => {
                return Err(ConfigError::Missing(HMAC_KEY_ENV));
            }
            BackendKind::Saml if saml.is_none() => {
                return Err(ConfigError::Missing(SAML_SETTINGS_ENV));
            }
            _ => {}
        }

        let token_expiration = parse_seconds(
            EXPIRATION_ENV,
            get(EXPIRATION_ENV),
            DEFAULT_TOKEN_EXPIRATION_SECS,
        )?;
        let replay_grace = parse_seconds(REPLAY_GRACE_ENV, get(REPLAY_GRACE_ENV), 0)?;

        let secret = get(SESSION_SECRET_ENV).ok_or(ConfigError::Missing(SESSION_SECRET_ENV))?;
        let session = SessionSettings {
            secret: secret.into_bytes(),
            ttl: parse_seconds(SESSION_TTL_ENV, get(SESSION_TTL_ENV), DEFAULT_SESSION_TTL_SECS)?,
        };

        Ok(Self {
            backend,
            token,
            token_expiration,
            replay_grace,
            default_language: get(DEFAULT_LANGUAGE_ENV)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            saml,
            session,
            login_redirect_prefix: get(LOGIN_REDIRECT_PREFIX_ENV)
                .unwrap_or_else(|| DEFAULT_LOGIN_REDIRECT_PREFIX.to_string()),
        })
    }

    /// Token settings, or a configuration error when the keys are absent.
    pub fn token_settings(&self) -> Result<&TokenSettings, ConfigError> {
        self.token.as_ref().ok_or(ConfigError::Missing(HMAC_KEY_ENV))
    }

    /// SAML settings, or a configuration error when they are absent.
    pub fn saml_settings(&self) -> Result<&SamlSettings, ConfigError> {
        self.saml.as_ref().ok_or(ConfigError::Missing(SAML_SETTINGS_ENV))
    }
}

fn parse_seconds(
    name: &'static str,
    value: Option<String>,
    default: i64,
) -> Result<Duration, ConfigError> {
    let secs = match value {
        Some(v) => v.trim().parse::<i64>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })?,
        None => default,
    };
    if secs < 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must not be negative".to_string(),
        });
    }
    Duration::try_seconds(secs).ok_or_else(|| ConfigError::Invalid {
        name,
        reason: "out of range".to_string(),
    })
}
