//! HTTP rendering of middleware auth failures.

use std::collections::BTreeSet;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use mcpengine_auth::{join_scopes, AuthError};

/// 401 or 403 with a `WWW-Authenticate` challenge and a plain-text body.
pub fn challenge_response(err: &AuthError, application_scopes: &BTreeSet<String>) -> Response {
    let status = if err.is_authorization() {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::UNAUTHORIZED
    };
    let challenge = format!("Bearer scope=\"{}\"", join_scopes(application_scopes));
    (
        status,
        [(header::WWW_AUTHENTICATE, challenge)],
        err.to_string(),
    )
        .into_response()
}
