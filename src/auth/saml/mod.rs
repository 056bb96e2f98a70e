// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SAML 2.0 backend.
//!
//! Assertion validation is delegated to a [`SamlToolkit`], normally the
//! samael-based [`RedirectBindingToolkit`]; this backend maps the asserted
//! attributes onto user fields and formats toolkit errors.

mod request;
mod settings;
mod toolkit;

use std::collections::HashMap;
use std::sync::Arc;

pub use request::SamlRequest;
pub use settings::{
    Endpoint, IdentityProvider, SamlSettings, SecuritySettings, ServiceProvider,
};
pub use toolkit::{
    validate_metadata, RedirectBindingToolkit, SamlOutcome, SamlToolkit, RELAY_STATE_PARAM,
    SAML_REQUEST_PARAM, SAML_RESPONSE_PARAM,
};

use super::attributes::{IdentityAttributes, UserField};
use super::backend::{Authentication, AuthenticationBackend};
use super::error::AuthError;
use crate::config::{BackendKind, ConfigError};
use crate::storage::{AuthDatabase, IdentityKey};

/// Authenticates a SAML response posted to the ACS endpoint.
pub struct SamlBackend {
    toolkit: Arc<dyn SamlToolkit>,
    mapping: Vec<(UserField, String)>,
    writable: Vec<UserField>,
    identity_key: IdentityKey,
    request: SamlRequest,
}

impl SamlBackend {
    pub fn new(
        toolkit: Arc<dyn SamlToolkit>,
        settings: &SamlSettings,
        request: SamlRequest,
    ) -> Result<Self, ConfigError> {
        let mapping = settings.field_mapping()?;
        let writable = mapping.iter().map(|(field, _)| *field).collect();
        Ok(Self {
            toolkit,
            mapping,
            writable,
            identity_key: settings.identity_key(),
            request,
        })
    }

    /// First value of every mapped attribute present in the assertion.
    fn parse_user(&self, attributes: &HashMap<String, Vec<String>>) -> IdentityAttributes {
        let mut identity = IdentityAttributes::new();
        for (field, attribute) in &self.mapping {
            if let Some(value) = attributes.get(attribute).and_then(|values| values.first()) {
                identity.insert(*field, value.clone());
            }
        }
        identity
    }
}

impl AuthenticationBackend for SamlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Saml
    }

    fn identity_key(&self) -> IdentityKey {
        self.identity_key
    }

    fn writable_fields(&self) -> &[UserField] {
        &self.writable
    }

    fn authenticate_request(&self, _db: &AuthDatabase) -> Result<Authentication, AuthError> {
        let outcome = self.toolkit.process_response(&self.request);
        if outcome.authenticated {
            return Ok(Authentication::Identity(self.parse_user(&outcome.attributes)));
        }

        let message = format_errors(&outcome.errors, outcome.last_error_reason.as_deref());
        tracing::error!("Saml login error: {message}");
        Err(AuthError::SamlValidation(message))
    }

    fn sso_url(&self, target_url: Option<&str>) -> Result<String, AuthError> {
        let relay_state = match target_url.filter(|t| !t.is_empty()) {
            Some(target) => target.to_string(),
            None => self.request.current_url(),
        };
        self.toolkit
            .login_url(&relay_state)
            .map_err(AuthError::SamlValidation)
    }

    fn target_url(&self) -> Option<String> {
        self.request
            .post_data
            .get(RELAY_STATE_PARAM)
            .filter(|state| !state.is_empty())
            .cloned()
    }

    fn process_logout(&self) -> Result<Option<String>, AuthError> {
        self.toolkit
            .process_slo(&self.request)
            .map_err(|errors| AuthError::SamlValidation(format_errors(&errors, None)))
    }

    fn metadata(&self) -> Result<String, AuthError> {
        let xml = self.toolkit.sp_metadata().map_err(AuthError::Metadata)?;
        let errors = self.toolkit.validate_metadata(&xml);
        if !errors.is_empty() {
            return Err(AuthError::Metadata(errors.join(", ")));
        }
        Ok(xml)
    }
}

/// `['a', 'b'], reason: r` when a reason is known, else `a, b`.
fn format_errors(errors: &[String], reason: Option<&str>) -> String {
    match reason {
        Some(reason) => {
            let quoted: Vec<String> = errors.iter().map(|e| format!("'{e}'")).collect();
            format!("[{}], reason: {reason}", quoted.join(", "))
        }
        None => errors.join(", "),
    }
}
