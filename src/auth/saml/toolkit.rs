// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SAML toolkit capability.
//!
//! [`SamlToolkit`] is everything the SAML backend needs from a SAML
//! library. [`RedirectBindingToolkit`] implements it on top of `samael`:
//! AuthnRequests and logout messages travel over HTTP-Redirect, responses
//! arrive over HTTP-POST.
//!
//! XML signatures are only verified when the crate is built with the
//! `xmlsec` feature.

use std::collections::HashMap;
use std::io::{Read, Write};

use base64ct::{Base64, Encoding};
use chrono::Utc;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use samael::metadata::EntityDescriptor;
use samael::schema::{Assertion, Issuer, LogoutRequest, LogoutResponse, Status, StatusCode};
use samael::service_provider::{ServiceProvider, ServiceProviderBuilder};
use samael::traits::ToXml;
use url::Url;

use super::request::SamlRequest;
use super::settings::SamlSettings;
use crate::config::ConfigError;

pub const SAML_RESPONSE_PARAM: &str = "SAMLResponse";
pub const SAML_REQUEST_PARAM: &str = "SAMLRequest";
pub const RELAY_STATE_PARAM: &str = "RelayState";

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Result of processing an ACS request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamlOutcome {
    pub authenticated: bool,
    /// Attribute name → values, as asserted by the identity provider.
    pub attributes: HashMap<String, Vec<String>>,
    pub errors: Vec<String>,
    pub last_error_reason: Option<String>,
}

impl SamlOutcome {
    pub fn rejected(errors: Vec<String>, reason: Option<String>) -> Self {
        Self {
            authenticated: false,
            attributes: HashMap::new(),
            errors,
            last_error_reason: reason,
        }
    }
}

/// Capability consumed by the SAML backend.
pub trait SamlToolkit: Send + Sync {
    /// Validate the posted `SAMLResponse`.
    fn process_response(&self, request: &SamlRequest) -> SamlOutcome;

    /// Identity provider URL carrying a fresh AuthnRequest.
    fn login_url(&self, relay_state: &str) -> Result<String, String>;

    /// Service provider metadata XML.
    fn sp_metadata(&self) -> Result<String, String>;

    /// Validation errors of a metadata document; empty when valid.
    fn validate_metadata(&self, xml: &str) -> Vec<String>;

    /// Handle a single-logout request or response.
    ///
    /// Returns the URL to redirect to, if any.
    fn process_slo(&self, request: &SamlRequest) -> Result<Option<String>, Vec<String>>;
}

/// [`SamlToolkit`] for the HTTP-Redirect (requests) and HTTP-POST
/// (responses) bindings.
pub struct RedirectBindingToolkit {
    settings: SamlSettings,
    sp: ServiceProvider,
}

impl RedirectBindingToolkit {
    pub fn new(settings: SamlSettings) -> Result<Self, ConfigError> {
        check_signature_support(&settings)?;

        let idp_metadata = idp_metadata(&settings)?;
        let mut builder = ServiceProviderBuilder::default();
        builder
            .entity_id(settings.sp.entity_id.clone())
            .acs_url(settings.sp.assertion_consumer_service.url.clone())
            .idp_metadata(idp_metadata)
            .authn_name_id_format(settings.sp.name_id_format.clone())
            // Request IDs are not stored, so every response is treated as unsolicited.
            .allow_idp_initiated(true);
        if let Some(slo) = &settings.sp.single_logout_service {
            builder.slo_url(slo.url.clone());
        }
        let sp = builder
            .build()
            .map_err(|e| ConfigError::SamlSettings(format!("invalid service provider: {e}")))?;

        Ok(Self { settings, sp })
    }

    pub fn settings(&self) -> &SamlSettings {
        &self.settings
    }

    /// Inflate a `SAMLRequest`/`SAMLResponse` from the HTTP-Redirect binding.
    fn inflate(encoded: &str) -> Result<String, String> {
        let compressed =
            Base64::decode_vec(encoded.trim()).map_err(|e| format!("invalid base64: {e}"))?;
        let mut xml = String::new();
        DeflateDecoder::new(compressed.as_slice())
            .read_to_string(&mut xml)
            .map_err(|e| format!("inflate failed: {e}"))?;
        Ok(xml)
    }

    fn check_issuer(&self, issuer: Option<&Issuer>) -> Result<(), Vec<String>> {
        let issuer = issuer.and_then(|i| i.value.as_deref());
        if issuer != Some(self.settings.idp.entity_id.as_str()) {
            return Err(vec![
                "invalid_issuer".to_string(),
                format!("Unexpected issuer {}", issuer.unwrap_or("<none>")),
            ]);
        }
        Ok(())
    }

    fn logout_response(&self, destination: &str, in_response_to: String) -> LogoutResponse {
        LogoutResponse {
            id: Some(format!("_{}", uuid::Uuid::new_v4().simple())),
            in_response_to: Some(in_response_to),
            version: Some("2.0".to_string()),
            issue_instant: Some(Utc::now()),
            destination: Some(destination.to_string()),
            consent: None,
            issuer: Some(Issuer {
                value: Some(self.settings.sp.entity_id.clone()),
                ..Default::default()
            }),
            signature: None,
            status: Some(Status {
                status_code: StatusCode {
                    value: Some(STATUS_SUCCESS.to_string()),
                },
                status_message: None,
                status_detail: None,
            }),
        }
    }
}

impl SamlToolkit for RedirectBindingToolkit {
    fn process_response(&self, request: &SamlRequest) -> SamlOutcome {
        let Some(response) = request.post_data.get(SAML_RESPONSE_PARAM) else {
            return SamlOutcome::rejected(
                vec!["SAML Response not found, Only supported HTTP_POST Binding".to_string()],
                None,
            );
        };

        match self.sp.parse_base64_response(response.trim(), None) {
            Ok(assertion) => {
                let attributes = assertion_attributes(&assertion);
                tracing::debug!(attributes = attributes.len(), "SAML assertion accepted");
                SamlOutcome {
                    authenticated: true,
                    attributes,
                    errors: Vec::new(),
                    last_error_reason: None,
                }
            }
            Err(e) => SamlOutcome::rejected(
                vec!["invalid_response".to_string()],
                Some(e.to_string()),
            ),
        }
    }

    fn login_url(&self, relay_state: &str) -> Result<String, String> {
        let sso_url = &self.settings.idp.single_sign_on_service.url;
        let authn_request = self
            .sp
            .make_authentication_request(sso_url)
            .map_err(|e| format!("Failed to create AuthnRequest: {e}"))?;
        let url = authn_request
            .redirect(relay_state)
            .map_err(|e| format!("Failed to encode AuthnRequest: {e}"))?
            .ok_or_else(|| "AuthnRequest has no destination".to_string())?;
        Ok(url.to_string())
    }

    fn sp_metadata(&self) -> Result<String, String> {
        let metadata = self
            .sp
            .metadata()
            .map_err(|e| format!("Failed to build SP metadata: {e}"))?;
        ToXml::to_string(&metadata).map_err(|e| format!("Failed to serialize SP metadata: {e:?}"))
    }

    fn validate_metadata(&self, xml: &str) -> Vec<String> {
        validate_metadata(xml)
    }

    fn process_slo(&self, request: &SamlRequest) -> Result<Option<String>, Vec<String>> {
        let relay_state = request.get_data.get(RELAY_STATE_PARAM);

        if let Some(encoded) = request.get_data.get(SAML_RESPONSE_PARAM) {
            let xml = Self::inflate(encoded)
                .map_err(|e| vec!["invalid_logout_response".to_string(), e])?;
            let response: LogoutResponse = xml
                .parse()
                .map_err(|e| vec!["invalid_logout_response".to_string(), format!("{e}")])?;
            self.check_issuer(response.issuer.as_ref())?;

            let status = response
                .status
                .as_ref()
                .and_then(|s| s.status_code.value.as_deref());
            if status != Some(STATUS_SUCCESS) {
                return Err(vec![
                    "logout_not_success".to_string(),
                    format!("Logout status {}", status.unwrap_or("<none>")),
                ]);
            }
            return Ok(relay_state.cloned());
        }

        if let Some(encoded) = request.get_data.get(SAML_REQUEST_PARAM) {
            let xml = Self::inflate(encoded)
                .map_err(|e| vec!["invalid_logout_request".to_string(), e])?;
            let logout_request: LogoutRequest = xml
                .parse()
                .map_err(|e| vec!["invalid_logout_request".to_string(), format!("{e}")])?;
            self.check_issuer(logout_request.issuer.as_ref())?;
            let request_id = logout_request
                .id
                .ok_or_else(|| vec!["invalid_logout_request".to_string(), "Missing ID".to_string()])?;

            let Some(slo) = &self.settings.idp.single_logout_service else {
                return Err(vec!["idp.singleLogoutService is not configured".to_string()]);
            };
            let response = self.logout_response(&slo.url, request_id);
            let xml = ToXml::to_string(&response)
                .map_err(|e| vec![format!("Failed to serialize LogoutResponse: {e:?}")])?;

            let mut url =
                Url::parse(&slo.url).map_err(|e| vec![format!("invalid endpoint {}: {e}", slo.url)])?;
            let encoded = deflate_and_encode(&xml).map_err(|e| vec![e])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair(SAML_RESPONSE_PARAM, &encoded);
                if let Some(state) = relay_state {
                    query.append_pair(RELAY_STATE_PARAM, state);
                }
            }
            return Ok(Some(url.into()));
        }

        Err(vec![
            "SAML LogoutRequest/LogoutResponse not found. Only supported HTTP_REDIRECT Binding"
                .to_string(),
        ])
    }
}

fn check_signature_support(settings: &SamlSettings) -> Result<(), ConfigError> {
    if !settings.security.want_assertions_signed {
        tracing::warn!("SAML assertion signatures are not required");
        return Ok(());
    }
    if !cfg!(feature = "xmlsec") {
        return Err(ConfigError::SamlSettings(
            "security.wantAssertionsSigned needs the xmlsec feature".to_string(),
        ));
    }
    if settings.idp.x509cert.trim().is_empty() {
        return Err(ConfigError::SamlSettings(
            "security.wantAssertionsSigned needs idp.x509cert".to_string(),
        ));
    }
    Ok(())
}

/// Identity provider metadata assembled from the settings.
fn idp_metadata(settings: &SamlSettings) -> Result<EntityDescriptor, ConfigError> {
    let idp = &settings.idp;
    let certificate = strip_pem_headers(&idp.x509cert);
    let key_descriptor = if certificate.is_empty() {
        String::new()
    } else {
        format!(
            r#"<md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{certificate}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>"#
        )
    };
    let single_logout = idp
        .single_logout_service
        .as_ref()
        .map(|slo| {
            format!(
                r#"<md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{}"/>"#,
                escape_attribute(&slo.url)
            )
        })
        .unwrap_or_default();

    let xml = format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        {key_descriptor}
        {single_logout}
        <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{sso}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
        entity_id = escape_attribute(&idp.entity_id),
        sso = escape_attribute(&idp.single_sign_on_service.url),
    );

    samael::metadata::de::from_str(&xml)
        .map_err(|e| ConfigError::SamlSettings(format!("invalid idp settings: {e}")))
}

fn strip_pem_headers(pem: &str) -> String {
    pem.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----BEGIN") && !line.starts_with("-----END"))
        .collect()
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Attribute name → values of every attribute statement.
fn assertion_attributes(assertion: &Assertion) -> HashMap<String, Vec<String>> {
    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
    for statement in assertion.attribute_statements.iter().flatten() {
        for attr in &statement.attributes {
            let Some(name) = &attr.name else { continue };
            let values: Vec<String> = attr.values.iter().filter_map(|v| v.value.clone()).collect();
            if !values.is_empty() {
                attributes.entry(name.clone()).or_default().extend(values);
            }
        }
    }
    attributes
}

/// Deflate and base64 encode for the HTTP-Redirect binding.
fn deflate_and_encode(xml: &str) -> Result<String, String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| format!("deflate failed: {e}"))?;
    let compressed = encoder.finish().map_err(|e| format!("deflate failed: {e}"))?;
    Ok(Base64::encode_string(&compressed))
}

/// Structural checks of an SP metadata document.
pub fn validate_metadata(xml: &str) -> Vec<String> {
    let descriptor: EntityDescriptor = match samael::metadata::de::from_str(xml.trim()) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::debug!(error = %e, "Metadata is not an EntityDescriptor");
            return vec!["invalid_xml".to_string()];
        }
    };

    let mut errors = Vec::new();
    if !descriptor
        .entity_id
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty())
    {
        errors.push("entityID_not_found".to_string());
    }
    if descriptor
        .idp_sso_descriptors
        .as_ref()
        .is_some_and(|d| !d.is_empty())
    {
        errors.push("onlySPSSODescriptor_allowed_xml".to_string());
    }
    match descriptor.sp_sso_descriptors.as_deref() {
        None | Some([]) => errors.push("noSPSSODescriptor_xml".to_string()),
        Some(descriptors) => {
            if descriptors
                .iter()
                .any(|sp| sp.assertion_consumer_services.is_empty())
            {
                errors.push("noAssertionConsumerService_xml".to_string());
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::saml::test_support::saml_settings;

    const IDP_ISSUER: &str = "http://idp.example.com/";

    fn toolkit() -> RedirectBindingToolkit {
        RedirectBindingToolkit::new(saml_settings()).unwrap()
    }

    fn query_param(url: &str, name: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    fn slo_request(param: &str, xml: &str) -> SamlRequest {
        SamlRequest {
            get_data: HashMap::from([
                (param.to_string(), deflate_and_encode(xml).unwrap()),
                (RELAY_STATE_PARAM.to_string(), "/bye".to_string()),
            ]),
            ..Default::default()
        }
    }

    fn logout_request_xml(issuer: &str) -> String {
        format!(
            r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_logout-42" Version="2.0" IssueInstant="2026-10-19T10:00:00Z" Destination="http://stuff.com/endpoints/endpoints/sls.php"><saml:Issuer>{issuer}</saml:Issuer><saml:NameID>jane</saml:NameID></samlp:LogoutRequest>"#
        )
    }

    fn logout_response_xml(status: &str) -> String {
        format!(
            r#"<samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp-1" Version="2.0" IssueInstant="2026-10-19T10:00:00Z" InResponseTo="_req-1"><saml:Issuer>{IDP_ISSUER}</saml:Issuer><samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status></samlp:LogoutResponse>"#
        )
    }

    #[test]
    fn missing_response_is_reported() {
        let outcome = toolkit().process_response(&SamlRequest::default());
        assert!(!outcome.authenticated);
        assert_eq!(
            outcome.errors,
            ["SAML Response not found, Only supported HTTP_POST Binding"]
        );
        assert_eq!(outcome.last_error_reason, None);
    }

    #[test]
    fn unparseable_response_is_rejected() {
        let request = SamlRequest {
            post_data: HashMap::from([(
                SAML_RESPONSE_PARAM.to_string(),
                Base64::encode_string(b"<not a response"),
            )]),
            ..Default::default()
        };
        let outcome = toolkit().process_response(&request);
        assert!(!outcome.authenticated);
        assert_eq!(outcome.errors, ["invalid_response"]);
        assert!(outcome.last_error_reason.is_some());
    }

    #[test]
    fn login_url_carries_deflated_request_and_relay_state() {
        let url = toolkit().login_url("http://www.stuff.com/members/").unwrap();

        assert!(url.starts_with("http://idp.example.com/SSOService.php?"));
        assert_eq!(
            query_param(&url, RELAY_STATE_PARAM).as_deref(),
            Some("http://www.stuff.com/members/")
        );
        let xml = RedirectBindingToolkit::inflate(&query_param(&url, SAML_REQUEST_PARAM).unwrap())
            .unwrap();
        assert!(xml.contains("AuthnRequest"));
        assert!(xml.contains("http://stuff.com/endpoints/metadata.php"));
        assert!(xml.contains("http://stuff.com/endpoints/endpoints/acs.php"));
    }

    #[test]
    fn own_metadata_is_valid() {
        let toolkit = toolkit();
        let xml = toolkit.sp_metadata().unwrap();
        assert!(xml.contains("http://stuff.com/endpoints/metadata.php"));
        assert!(xml.contains("SPSSODescriptor"));
        assert!(toolkit.validate_metadata(&xml).is_empty());
    }

    #[test]
    fn metadata_validation_reports_problems() {
        assert_eq!(validate_metadata("not xml"), ["invalid_xml"]);

        let idp = idp_metadata(&saml_settings()).unwrap();
        let idp_xml = ToXml::to_string(&idp).unwrap();
        let errors = validate_metadata(&idp_xml);
        assert!(errors.contains(&"onlySPSSODescriptor_allowed_xml".to_string()));
        assert!(errors.contains(&"noSPSSODescriptor_xml".to_string()));

        let no_acs = r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="http://sp.example.com"/>"#;
        assert_eq!(validate_metadata(no_acs), ["noSPSSODescriptor_xml"]);
    }

    #[test]
    fn idp_certificate_loses_pem_armour() {
        assert_eq!(
            strip_pem_headers("-----BEGIN CERTIFICATE-----\nMIIC\ngTCC\n-----END CERTIFICATE-----\n"),
            "MIICgTCC"
        );
    }

    #[test]
    fn required_signatures_need_verification_support() {
        let mut settings = saml_settings();
        settings.security.want_assertions_signed = true;
        settings.idp.x509cert = String::new();
        assert!(matches!(
            RedirectBindingToolkit::new(settings),
            Err(ConfigError::SamlSettings(_))
        ));
    }

    #[test]
    fn logout_request_is_answered_at_idp() {
        let request = slo_request(SAML_REQUEST_PARAM, &logout_request_xml(IDP_ISSUER));
        let url = toolkit().process_slo(&request).unwrap().unwrap();

        assert!(url.starts_with("http://idp.example.com/SingleLogoutService.php?"));
        let xml = RedirectBindingToolkit::inflate(&query_param(&url, SAML_RESPONSE_PARAM).unwrap())
            .unwrap();
        assert!(xml.contains("LogoutResponse"));
        assert!(xml.contains("_logout-42"));
        assert!(xml.contains(STATUS_SUCCESS));
        assert_eq!(query_param(&url, RELAY_STATE_PARAM).as_deref(), Some("/bye"));
    }

    #[test]
    fn logout_request_from_unknown_issuer_is_rejected() {
        let request = slo_request(SAML_REQUEST_PARAM, &logout_request_xml("http://evil.example.com/"));
        let errors = toolkit().process_slo(&request).unwrap_err();
        assert_eq!(errors[0], "invalid_issuer");
    }

    #[test]
    fn successful_logout_response_returns_relay_state() {
        let request = slo_request(SAML_RESPONSE_PARAM, &logout_response_xml(STATUS_SUCCESS));
        assert_eq!(
            toolkit().process_slo(&request).unwrap().as_deref(),
            Some("/bye")
        );
    }

    #[test]
    fn failed_logout_response_returns_errors() {
        let request = slo_request(
            SAML_RESPONSE_PARAM,
            &logout_response_xml("urn:oasis:names:tc:SAML:2.0:status:Requester"),
        );
        let errors = toolkit().process_slo(&request).unwrap_err();
        assert_eq!(errors[0], "logout_not_success");
    }

    #[test]
    fn logout_without_message_is_an_error() {
        let errors = toolkit().process_slo(&SamlRequest::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("HTTP_REDIRECT"));
    }
}
