// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session tokens handed to the frontend after a successful login.
//!
//! HS256 JWTs signed with `SESSION_JWT_SECRET`. The login redirect carries
//! one; the [`Session`] extractor verifies it on later requests.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AuthError;
use crate::config::SessionSettings;
use crate::state::AppState;
use crate::storage::UserRecord;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies session tokens.
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionIssuer {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            encoding: EncodingKey::from_secret(&settings.secret),
            decoding: DecodingKey::from_secret(&settings.secret),
            ttl: settings.ttl,
        }
    }

    /// Sign a session token for `user`.
    pub fn issue(&self, user: &UserRecord) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("failed to sign session token: {e}")))
    }

    /// Verify signature and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::Signature,
                _ => AuthError::MalformedToken,
            }
        })?;
        Ok(data.claims)
    }
}

/// Extractor for requests carrying `Authorization: Bearer <session token>`.
pub struct Session(pub SessionClaims);

impl FromRequestParts<AppState> for Session {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::NoTokenProvided)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthHeader)?;

        Ok(Session(state.sessions.verify(token.trim())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(ttl: Duration) -> SessionIssuer {
        SessionIssuer::new(&SessionSettings {
            secret: b"test-session-secret".to_vec(),
            ttl,
        })
    }

    fn user() -> UserRecord {
        let mut user = UserRecord::new("en");
        user.email = Some("john.doe@test.com".into());
        user.username = "johndoe".into();
        user
    }

    #[test]
    fn issued_token_verifies() {
        let issuer = issuer(Duration::seconds(60));
        let user = user();
        let token = issuer.issue(&user).unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "johndoe");
        assert_eq!(claims.email.as_deref(), Some("john.doe@test.com"));
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = issuer(Duration::seconds(-120));
        let token = issuer.issue(&user()).unwrap();
        assert_eq!(issuer.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let token = issuer(Duration::seconds(60)).issue(&user()).unwrap();
        let other = SessionIssuer::new(&SessionSettings {
            secret: b"another-secret".to_vec(),
            ttl: Duration::seconds(60),
        });
        assert_eq!(other.verify(&token), Err(AuthError::Signature));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(
            issuer(Duration::seconds(60)).verify("not-a-jwt"),
            Err(AuthError::MalformedToken)
        );
    }
}
