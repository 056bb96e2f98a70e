// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::SessionClaims,
    models::{
        MembersOnlyResponse, SamlAcsForm, SsoRedirectResponse, TokenErrorResponse,
    },
    state::AppState,
    storage::UserRecord,
};

pub mod health;
pub mod sso;

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/api/sso/redirect", get(sso::sso_redirect))
        .route("/api/sso/authenticate", get(sso::authenticate_token))
        .route("/api/sso/auth", post(sso::saml_acs))
        .route("/api/sso/metadata", get(sso::metadata))
        .route("/api/sso/logout", get(sso::logout))
        .route("/api/sso/me", get(sso::current_user))
        .route("/token/login/{token}", get(sso::token_login))
        .route("/token/link/{token}/{*link}", get(sso::token_login_link))
        .route("/token/error", get(sso::token_error))
        .route("/token/missing", get(sso::members_only))
        .with_state(state);

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        sso::sso_redirect,
        sso::authenticate_token,
        sso::token_login,
        sso::token_login_link,
        sso::saml_acs,
        sso::metadata,
        sso::logout,
        sso::current_user,
        sso::token_error,
        sso::members_only
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            SsoRedirectResponse,
            SamlAcsForm,
            TokenErrorResponse,
            MembersOnlyResponse,
            SessionClaims,
            UserRecord
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "SSO", description = "Single sign-on login, metadata and logout")
    )
)]
struct ApiDoc;
