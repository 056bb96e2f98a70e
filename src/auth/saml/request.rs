// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transport-neutral view of the HTTP request handed to the SAML toolkit.

use std::collections::HashMap;

use axum::http::{header, HeaderMap, Uri};

/// The parts of an HTTP request a SAML toolkit needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamlRequest {
    pub https: bool,
    pub http_host: String,
    /// Request path.
    pub script_name: String,
    /// Only set when not behind a proxy.
    pub server_port: Option<u16>,
    pub get_data: HashMap<String, String>,
    pub post_data: HashMap<String, String>,
}

impl SamlRequest {
    /// Build from request parts.
    ///
    /// Behind a proxy (`X-Forwarded-For` present) the scheme comes from
    /// `X-Forwarded-Proto` and the port is left out.
    pub fn from_parts(
        headers: &HeaderMap,
        uri: &Uri,
        get_data: HashMap<String, String>,
        post_data: HashMap<String, String>,
    ) -> Self {
        let header_value =
            |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

        let host = header_value(header::HOST.as_str())
            .or_else(|| uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let (https, server_port) = if headers.contains_key("x-forwarded-for") {
            let https = header_value("x-forwarded-proto").is_some_and(|proto| proto == "https");
            (https, None)
        } else {
            let https = uri.scheme_str() == Some("https");
            let port = uri
                .port_u16()
                .or_else(|| host.rsplit_once(':').and_then(|(_, port)| port.parse().ok()));
            (https, port)
        };

        Self {
            https,
            http_host: host,
            script_name: uri.path().to_string(),
            server_port,
            get_data,
            post_data,
        }
    }

    /// Absolute URL of the request, without the query string.
    pub fn current_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        let host = match self.server_port {
            Some(port) if !self.http_host.contains(':') && !is_default_port(self.https, port) => {
                format!("{}:{port}", self.http_host)
            }
            _ => self.http_host.clone(),
        };
        format!("{scheme}://{host}{}", self.script_name)
    }
}

fn is_default_port(https: bool, port: u16) -> bool {
    (https && port == 443) || (!https && port == 80)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn direct_request_keeps_host_and_port() {
        let uri: Uri = "/api/sso/redirect?url=/x".parse().unwrap();
        let request = SamlRequest::from_parts(
            &headers(&[("host", "www.stuff.com:8000")]),
            &uri,
            HashMap::new(),
            HashMap::new(),
        );
        assert!(!request.https);
        assert_eq!(request.http_host, "www.stuff.com:8000");
        assert_eq!(request.server_port, Some(8000));
        assert_eq!(request.script_name, "/api/sso/redirect");
        assert_eq!(request.current_url(), "http://www.stuff.com:8000/api/sso/redirect");
    }

    #[test]
    fn proxied_request_uses_forwarded_proto() {
        let uri: Uri = "/api/sso/auth".parse().unwrap();
        let request = SamlRequest::from_parts(
            &headers(&[
                ("host", "www.stuff.com"),
                ("x-forwarded-for", "10.0.0.1"),
                ("x-forwarded-proto", "https"),
            ]),
            &uri,
            HashMap::new(),
            HashMap::from([("RelayState".to_string(), "/next".to_string())]),
        );
        assert!(request.https);
        assert_eq!(request.server_port, None);
        assert_eq!(request.current_url(), "https://www.stuff.com/api/sso/auth");
        assert_eq!(request.post_data["RelayState"], "/next");
    }

    #[test]
    fn default_port_is_omitted() {
        let request = SamlRequest {
            https: true,
            http_host: "idp.test".into(),
            script_name: "/acs".into(),
            server_port: Some(443),
            ..Default::default()
        };
        assert_eq!(request.current_url(), "https://idp.test/acs");
    }
}
