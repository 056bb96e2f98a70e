// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::DbError;

/// Authentication error type.
///
/// Every failure of the login flow is reported through this type. The
/// `Display` text is the human-readable reason shown on the error page,
/// `error_code()` is the machine-readable kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential supplied
    #[error("No token provided")]
    NoTokenProvided,
    /// Authorization header is not `Bearer <token>`
    #[error("Invalid Authorization header")]
    InvalidAuthHeader,
    /// Token was consumed by an earlier login
    #[error("Token was already used and is not valid")]
    Replay,
    /// Token is not valid base64url
    #[error("Token is malformed")]
    MalformedToken,
    /// HMAC verification failed
    #[error("HMAC authentication failed")]
    Signature,
    /// Decrypted content does not follow the login data grammar
    #[error("Message does not contain valid login data")]
    MalformedPayload,
    /// Token issuance time is older than the configured expiration
    #[error("Authentication token expired")]
    Expired,
    /// The SAML toolkit rejected the response
    #[error("Saml login error: {0}")]
    SamlValidation(String),
    /// An identity attribute required by the backend is absent
    #[error("Missing identity attribute: {0}")]
    MissingAttribute(String),
    /// An identity value already belongs to a different user
    #[error("Identity already assigned to another user: {0}")]
    IdentityConflict(String),
    /// SP metadata could not be produced or failed validation
    #[error("Invalid SP metadata: {0}")]
    Metadata(String),
    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),
    /// Internal error
    #[error("Internal authentication error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::NoTokenProvided => "no_token_provided",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::Replay => "token_replayed",
            AuthError::MalformedToken => "malformed_token",
            AuthError::Signature => "invalid_signature",
            AuthError::MalformedPayload => "malformed_payload",
            AuthError::Expired => "token_expired",
            AuthError::SamlValidation(_) => "saml_validation_failed",
            AuthError::MissingAttribute(_) => "missing_attribute",
            AuthError::IdentityConflict(_) => "identity_conflict",
            AuthError::Metadata(_) => "invalid_metadata",
            AuthError::Storage(_) => "storage_error",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::NoTokenProvided
            | AuthError::InvalidAuthHeader
            | AuthError::Replay
            | AuthError::MalformedToken
            | AuthError::Signature
            | AuthError::MalformedPayload
            | AuthError::Expired
            | AuthError::SamlValidation(_)
            | AuthError::MissingAttribute(_) => StatusCode::UNAUTHORIZED,
            AuthError::IdentityConflict(_) => StatusCode::CONFLICT,
            AuthError::Metadata(_) | AuthError::Storage(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the failure comes from the presented credential rather than
    /// from the service itself.
    pub fn is_credential_error(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }
}

impl From<DbError> for AuthError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::DuplicateToken => AuthError::Replay,
            DbError::Conflict { value, .. } => AuthError::IdentityConflict(value),
            other => AuthError::Storage(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn reasons_match_login_page_messages() {
        assert_eq!(AuthError::Signature.to_string(), "HMAC authentication failed");
        assert_eq!(
            AuthError::Replay.to_string(),
            "Token was already used and is not valid"
        );
        assert_eq!(
            AuthError::MalformedPayload.to_string(),
            "Message does not contain valid login data"
        );
        assert_eq!(AuthError::Expired.to_string(), "Authentication token expired");
    }

    #[tokio::test]
    async fn signature_error_returns_401() {
        let response = AuthError::Signature.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "invalid_signature");
        assert_eq!(body["error"], "HMAC authentication failed");
    }

    #[test]
    fn storage_errors_are_not_credential_errors() {
        assert!(AuthError::Expired.is_credential_error());
        assert!(!AuthError::Storage("disk full".into()).is_credential_error());
        assert_eq!(
            AuthError::IdentityConflict("a@b.c".into()).status_code(),
            StatusCode::CONFLICT
        );
    }
}
