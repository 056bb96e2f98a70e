// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr, path::PathBuf, process, sync::Arc};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use token_auth::{
    api::router,
    auth::RedirectBindingToolkit,
    config::{
        AuthSettings, DATA_DIR_ENV, DEFAULT_DATA_DIR, TLS_CERT_PATH_ENV,
        TLS_KEY_PATH_ENV,
    },
    logging::{self, LogFormat},
    shutdown,
    state::AppState,
    storage::AuthDatabase,
};

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init(LogFormat::from_env()) {
        eprintln!("Failed to initialise logging: {e}");
        process::exit(1);
    }

    let settings = match AuthSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Invalid authentication settings");
            process::exit(1);
        }
    };

    let saml_toolkit = match &settings.saml {
        Some(saml) => match RedirectBindingToolkit::new(saml.clone()) {
            Ok(toolkit) => Some(Arc::new(toolkit)),
            Err(e) => {
                tracing::error!(error = %e, "Invalid SAML settings");
                process::exit(1);
            }
        },
        None => None,
    };

    let data_dir =
        PathBuf::from(env::var(DATA_DIR_ENV).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string()));
    let db = match AuthDatabase::open_in(&data_dir) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, path = %data_dir.display(), "Failed to open database");
            process::exit(1);
        }
    };

    let backend = settings.backend;
    let mut state = AppState::new(settings, db);
    if let Some(toolkit) = saml_toolkit {
        state = state.with_saml_toolkit(toolkit);
    }
    let app = router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);
    let addr: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, %host, port, "Failed to parse bind address");
            process::exit(1);
        }
    };

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown::wait().await {
            tracing::error!(error = %e, "Shutdown signal handler failed");
        }
        shutdown_handle.graceful_shutdown(Some(shutdown::GRACE_PERIOD));
    });

    let result = match (env::var(TLS_CERT_PATH_ENV), env::var(TLS_KEY_PATH_ENV)) {
        (Ok(cert), Ok(key)) => {
            // Install the ring crypto provider for rustls (must be done before any TLS operations)
            rustls::crypto::ring::default_provider()
                .install_default()
                .expect("Failed to install rustls crypto provider");

            let tls_config = match RustlsConfig::from_pem_file(&cert, &key).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(error = %e, %cert, %key, "Failed to load TLS credentials");
                    process::exit(1);
                }
            };

            tracing::info!(%addr, %backend, "token-auth listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        _ => {
            tracing::info!(%addr, %backend, "token-auth listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Server failed");
        process::exit(1);
    }
    tracing::info!("Server stopped");
}
