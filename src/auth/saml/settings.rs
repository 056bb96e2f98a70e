// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SAML service provider settings.
//!
//! Loaded from a JSON file using the key layout common to SAML toolkits
//! (`sp`, `idp`, `security`, ...), plus `assertion_mapping` which maps
//! user fields to SAML attribute names.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::attributes::UserField;
use crate::config::ConfigError;
use crate::storage::IdentityKey;

pub const DEFAULT_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProvider {
    pub entity_id: String,
    pub assertion_consumer_service: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_logout_service: Option<Endpoint>,
    #[serde(rename = "NameIDFormat", default = "default_name_id_format")]
    pub name_id_format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProvider {
    pub entity_id: String,
    pub single_sign_on_service: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_logout_service: Option<Endpoint>,
    #[serde(default)]
    pub x509cert: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    /// Reject responses whose signature cannot be verified against `idp.x509cert`.
    #[serde(default)]
    pub want_assertions_signed: bool,
}

/// Complete SAML settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamlSettings {
    #[serde(default)]
    pub strict: bool,
    pub sp: ServiceProvider,
    pub idp: IdentityProvider,
    #[serde(default)]
    pub security: SecuritySettings,
    /// User field name → SAML attribute name.
    #[serde(rename = "assertion_mapping", default = "default_assertion_mapping")]
    pub assertion_mapping: BTreeMap<String, String>,
}

fn default_name_id_format() -> String {
    DEFAULT_NAME_ID_FORMAT.to_string()
}

fn default_assertion_mapping() -> BTreeMap<String, String> {
    [
        ("email", "User.email"),
        ("first_name", "User.FirstName"),
        ("last_name", "User.LastName"),
    ]
    .into_iter()
    .map(|(field, attribute)| (field.to_string(), attribute.to_string()))
    .collect()
}

impl SamlSettings {
    /// Read and validate a settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::SamlSettings(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Parse and validate a settings document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: SamlSettings =
            serde_json::from_str(json).map_err(|e| ConfigError::SamlSettings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check URLs and the attribute mapping.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sp.entity_id.trim().is_empty() {
            return Err(ConfigError::SamlSettings("sp.entityId is empty".to_string()));
        }
        if self.idp.entity_id.trim().is_empty() {
            return Err(ConfigError::SamlSettings("idp.entityId is empty".to_string()));
        }
        check_url("sp.assertionConsumerService.url", &self.sp.assertion_consumer_service.url)?;
        check_url("idp.singleSignOnService.url", &self.idp.single_sign_on_service.url)?;
        if let Some(slo) = &self.sp.single_logout_service {
            check_url("sp.singleLogoutService.url", &slo.url)?;
        }
        if let Some(slo) = &self.idp.single_logout_service {
            check_url("idp.singleLogoutService.url", &slo.url)?;
        }
        self.field_mapping()?;
        Ok(())
    }

    /// The attribute mapping as typed user fields.
    ///
    /// Fails when a key is not a settable user field or when neither
    /// `email` nor `remote_id` is mapped.
    pub fn field_mapping(&self) -> Result<Vec<(UserField, String)>, ConfigError> {
        let mapping = self
            .assertion_mapping
            .iter()
            .map(|(field, attribute)| {
                UserField::from_name(field)
                    .map(|f| (f, attribute.clone()))
                    .ok_or_else(|| {
                        ConfigError::SamlSettings(format!(
                            "assertion_mapping key '{field}' is not a user field"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let has = |wanted: UserField| mapping.iter().any(|(field, _)| *field == wanted);
        if !has(UserField::Email) && !has(UserField::RemoteId) {
            return Err(ConfigError::SamlSettings(
                "assertion_mapping must map email or remote_id".to_string(),
            ));
        }
        Ok(mapping)
    }

    /// `remote_id` when mapped, else `email`.
    pub fn identity_key(&self) -> IdentityKey {
        if self.assertion_mapping.contains_key(UserField::RemoteId.name()) {
            IdentityKey::RemoteId
        } else {
            IdentityKey::Email
        }
    }
}

fn check_url(name: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::SamlSettings(format!("{name} '{value}' is not a valid URL: {e}")))
}
