// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SSO endpoints.
//!
//! Login endpoints never answer with an error body: the browser is always
//! redirected, either to the frontend with a session token or to the
//! token error page with the failure reason.

use std::collections::HashMap;

use axum::{
    extract::{Form, Path, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use tokio::task::JoinError;
use url::form_urlencoded;

use crate::auth::{AuthError, AuthRequest, SamlRequest, Session};
use crate::error::ApiError;
use crate::models::{
    MembersOnlyQuery, MembersOnlyResponse, SamlAcsForm, SsoRedirectQuery, SsoRedirectResponse,
    TokenErrorQuery, TokenErrorResponse, TokenLoginQuery,
};
use crate::state::AppState;
use crate::storage::UserRecord;

pub const TOKEN_ERROR_PATH: &str = "/token/error";

/// Identity provider URL to send the user to.
#[utoipa::path(
    get,
    path = "/api/sso/redirect",
    params(SsoRedirectQuery),
    tag = "SSO",
    responses(
        (status = 200, body = SsoRedirectResponse),
        (status = 500, description = "Authentication backend misconfigured")
    )
)]
pub async fn sso_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Query(params): Query<SsoRedirectQuery>,
) -> Result<Json<SsoRedirectResponse>, ApiError> {
    let request = AuthRequest::with_saml(saml_request(&headers, &uri, HashMap::new()));
    let backend = state.backend(request)?;
    let sso_url = backend.sso_url(params.url.as_deref())?;
    Ok(Json(SsoRedirectResponse { sso_url }))
}

/// Log in with a token passed as query parameter.
#[utoipa::path(
    get,
    path = "/api/sso/authenticate",
    params(TokenLoginQuery),
    tag = "SSO",
    responses((status = 302, description = "Redirect to the frontend or to the token error page"))
)]
pub async fn authenticate_token(
    State(state): State<AppState>,
    Query(params): Query<TokenLoginQuery>,
) -> Response {
    login(state, AuthRequest::with_token(params.token), params.link).await
}

/// Log in with a token passed in the path.
#[utoipa::path(
    get,
    path = "/token/login/{token}",
    params(("token" = String, Path, description = "Login token issued by the identity provider")),
    tag = "SSO",
    responses((status = 302, description = "Redirect to the frontend or to the token error page"))
)]
pub async fn token_login(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    login(state, AuthRequest::with_token(Some(token)), None).await
}

/// Log in with a token and continue to `link` afterwards.
#[utoipa::path(
    get,
    path = "/token/link/{token}/{link}",
    params(
        ("token" = String, Path, description = "Login token issued by the identity provider"),
        ("link" = String, Path, description = "Path to open after login")
    ),
    tag = "SSO",
    responses((status = 302, description = "Redirect to the frontend or to the token error page"))
)]
pub async fn token_login_link(
    State(state): State<AppState>,
    Path((token, link)): Path<(String, String)>,
) -> Response {
    login(state, AuthRequest::with_token(Some(token)), Some(link)).await
}

/// SAML assertion consumer service.
#[utoipa::path(
    post,
    path = "/api/sso/auth",
    tag = "SSO",
    request_body(content = SamlAcsForm, content_type = "application/x-www-form-urlencoded"),
    responses((status = 302, description = "Redirect to the frontend or to the token error page"))
)]
pub async fn saml_acs(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let request = AuthRequest::with_saml(saml_request(&headers, &uri, form));
    login(state, request, None).await
}

/// Service provider metadata.
#[utoipa::path(
    get,
    path = "/api/sso/metadata",
    tag = "SSO",
    responses(
        (status = 200, description = "SP metadata", content_type = "application/xml", body = String),
        (status = 500, description = "Metadata unavailable or invalid")
    )
)]
pub async fn metadata(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> Response {
    let request = AuthRequest::with_saml(saml_request(&headers, &uri, HashMap::new()));
    let backend = match state.backend(request) {
        Ok(backend) => backend,
        Err(e) => return ApiError::from(e).into_response(),
    };
    match backend.metadata() {
        Ok(xml) => ([(header::CONTENT_TYPE, "application/xml")], xml).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to produce SP metadata");
            e.into_response()
        }
    }
}

/// Single logout.
#[utoipa::path(
    get,
    path = "/api/sso/logout",
    tag = "SSO",
    responses(
        (status = 302, description = "Redirect requested by the identity provider"),
        (status = 204, description = "Nothing to do"),
        (status = 401, description = "Logout message rejected")
    )
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> Response {
    let request = AuthRequest::with_saml(saml_request(&headers, &uri, HashMap::new()));
    let backend = match state.backend(request) {
        Ok(backend) => backend,
        Err(e) => return ApiError::from(e).into_response(),
    };
    match backend.process_logout() {
        Ok(Some(location)) => found(&location),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// User behind the presented session token.
#[utoipa::path(
    get,
    path = "/api/sso/me",
    tag = "SSO",
    responses(
        (status = 200, body = UserRecord),
        (status = 401, description = "Missing or invalid session token"),
        (status = 404, description = "User no longer exists")
    )
)]
pub async fn current_user(
    State(state): State<AppState>,
    Session(claims): Session,
) -> Result<Json<UserRecord>, ApiError> {
    let user = state
        .db
        .get_user(&claims.sub)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user))
}

/// Login failure page.
#[utoipa::path(
    get,
    path = "/token/error",
    params(TokenErrorQuery),
    tag = "SSO",
    responses((status = 200, body = TokenErrorResponse))
)]
pub async fn token_error(Query(params): Query<TokenErrorQuery>) -> Json<TokenErrorResponse> {
    Json(TokenErrorResponse {
        message: params.message.unwrap_or_else(|| "Unknown".to_string()),
    })
}

/// Members-only page.
#[utoipa::path(
    get,
    path = "/token/missing",
    params(MembersOnlyQuery),
    tag = "SSO",
    responses((status = 200, body = MembersOnlyResponse))
)]
pub async fn members_only(Query(params): Query<MembersOnlyQuery>) -> Json<MembersOnlyResponse> {
    Json(MembersOnlyResponse {
        url: params.url.unwrap_or_default(),
    })
}

/// Authenticate and redirect.
async fn login(state: AppState, request: AuthRequest, link: Option<String>) -> Response {
    let backend = match state.backend(request) {
        Ok(backend) => backend,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let link = link
        .filter(|link| !link.is_empty())
        .or_else(|| backend.target_url());
    let prefix = state.settings.login_redirect_prefix.clone();

    // redb commits block on fsync.
    let outcome = tokio::task::spawn_blocking(move || {
        let (user, _created) = backend.authenticate(&state.db, &state.settings)?;
        state.sessions.issue(&user)
    })
    .await
    .unwrap_or_else(|e| Err(login_task_failed(e)));

    match outcome {
        Ok(session_token) => found(&login_location(&prefix, &session_token, link.as_deref())),
        Err(e) => found(&error_location(&e.to_string())),
    }
}

/// Log a crashed login task and hide its details from the redirect.
fn login_task_failed(e: JoinError) -> AuthError {
    tracing::error!(error = %e, "Login task failed");
    AuthError::Internal("login failed".to_string())
}

fn saml_request(headers: &HeaderMap, uri: &Uri, post_data: HashMap<String, String>) -> SamlRequest {
    let get_data = form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
        .into_owned()
        .collect();
    SamlRequest::from_parts(headers, uri, get_data, post_data)
}

fn quote_plus(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `{prefix}{token}`, plus `?{link}` form-encoded when a link is given.
pub fn login_location(prefix: &str, session_token: &str, link: Option<&str>) -> String {
    match link {
        Some(link) => format!("{prefix}{session_token}?{}", quote_plus(link)),
        None => format!("{prefix}{session_token}"),
    }
}

pub fn error_location(reason: &str) -> String {
    format!("{TOKEN_ERROR_PATH}?message={}", quote_plus(reason))
}

/// 302 Found.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
