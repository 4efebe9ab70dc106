use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Shared secret clients must present as `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerToken(Arc<str>);

impl BearerToken {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check a request's headers against the token.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let token = extract_bearer(headers).ok_or(AuthError::Missing)?;
        if token.as_bytes().ct_eq(self.0.as_bytes()).into() {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

/// Extract a Bearer token from the Authorization header.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    Missing,
    Invalid,
}

impl AuthError {
    pub fn message(self) -> &'static str {
        match self {
            AuthError::Missing => "Missing or invalid authorization header",
            AuthError::Invalid => "Invalid authentication token",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Unauthorized",
                "message": self.message()
            })),
        )
            .into_response()
    }
}

/// Middleware guarding every `/mcp` path. Other paths pass through untouched.
pub async fn require_bearer_for_mcp(
    State(token): State<BearerToken>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let path = req.uri().path();
    if path == "/mcp" || path.starts_with("/mcp/") {
        if let Err(e) = token.authorize(req.headers()) {
            tracing::warn!("Rejected {} request to {}: {}", req.method(), path, e.message());
            return Err(e);
        }
    }
    Ok(next.run(req).await)
}
