// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{get_auth, AuthRequest, Backend, SamlToolkit, SessionIssuer};
use crate::config::{AuthSettings, ConfigError};
use crate::storage::AuthDatabase;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AuthSettings>,
    pub db: Arc<AuthDatabase>,
    pub sessions: Arc<SessionIssuer>,
    /// Required when the SAML backend is configured.
    pub saml_toolkit: Option<Arc<dyn SamlToolkit>>,
}

impl AppState {
    pub fn new(settings: AuthSettings, db: AuthDatabase) -> Self {
        let sessions = SessionIssuer::new(&settings.session);
        Self {
            settings: Arc::new(settings),
            db: Arc::new(db),
            sessions: Arc::new(sessions),
            saml_toolkit: None,
        }
    }

    pub fn with_saml_toolkit(mut self, toolkit: Arc<dyn SamlToolkit>) -> Self {
        self.saml_toolkit = Some(toolkit);
        self
    }

    /// Configured backend for one request.
    pub fn backend(&self, request: AuthRequest) -> Result<Backend, ConfigError> {
        get_auth(&self.settings, request, self.saml_toolkit.clone())
    }
}
