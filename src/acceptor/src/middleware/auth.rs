//! Shared-token check for submission endpoints
//!
//! The token is read from `x-auth-token` or from `Authorization: Bearer`.
//! Without a configured token every request passes.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// The expected token, if authentication is enabled.
pub type SharedToken = Arc<Option<String>>;

/// Token presented by the caller, `x-auth-token` first.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token);
    }

    let auth_header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = auth_header.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    Some(token.trim()).filter(|t| !t.is_empty())
}

/// Compare over equal-length buffers so timing does not leak the length.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    let max_len = provided.len().max(expected.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided.len()].copy_from_slice(provided);
    padded_expected[..expected.len()].copy_from_slice(expected);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided.len() == expected.len()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        axum::Json(json!({"error": "Forbidden: Invalid or missing x-auth-token header"})),
    )
        .into_response()
}

pub async fn auth_middleware(
    State(expected): State<SharedToken>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected.as_deref() else {
        return next.run(request).await;
    };

    let verdict = extract_token(request.headers()).map(|provided| tokens_match(provided, expected));

    match verdict {
        Some(true) => next.run(request).await,
        Some(false) => {
            tracing::warn!(path = %request.uri().path(), "Invalid auth token");
            forbidden()
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Missing auth token");
            forbidden()
        }
    }
}
