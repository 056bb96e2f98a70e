// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response structures of the SSO endpoints. All types derive
//! `ToSchema` or `IntoParams` for OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Redirect**: identity provider URL lookup
//! - **Token login**: query parameters of the token endpoints and the SAML form
//! - **Pages**: error and members-only payloads

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// =============================================================================
// Redirect
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct SsoRedirectQuery {
    /// Where the user should land after logging in
    pub url: Option<String>,
}

/// Identity provider login URL.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct SsoRedirectResponse {
    #[serde(rename = "sso-url")]
    pub sso_url: String,
}

// =============================================================================
// Token login
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct TokenLoginQuery {
    /// Login token issued by the identity provider
    pub token: Option<String>,
    /// Path to append to the login redirect
    pub link: Option<String>,
}

/// Form posted by the identity provider to the ACS endpoint.
///
/// Documentation only; the handler reads the raw form.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SamlAcsForm {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

// =============================================================================
// Pages
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct TokenErrorQuery {
    pub message: Option<String>,
}

/// Reason a login failed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct TokenErrorResponse {
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct MembersOnlyQuery {
    pub url: Option<String>,
}

/// Page shown when a members-only URL is opened without a session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct MembersOnlyResponse {
    /// Requested URL, empty when unknown
    pub url: String,
}
