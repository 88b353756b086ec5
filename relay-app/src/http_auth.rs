use axum::Json;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Bearer token guarding the admin routes. With no token configured the admin
/// surface is open, which is only sensible on a private network.
#[derive(Debug, Clone, Default)]
pub struct AdminAuthPolicy {
    pub token: Option<String>,
}

impl AdminAuthPolicy {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminAuthPolicyExt(pub AdminAuthPolicy);

fn parse_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let mut diff = left_bytes.len() ^ right_bytes.len();
    let max_len = left_bytes.len().max(right_bytes.len());
    for index in 0..max_len {
        let l = left_bytes.get(index).copied().unwrap_or(0);
        let r = right_bytes.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

fn unauthorized(code: &str, message: &str) -> Response {
    tracing::warn!(error_code = code, error = %message, "admin auth rejected");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "success": false,
            "status": "error",
            "error": message,
            "error_code": code,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_admin_auth(req: Request<Body>, next: Next) -> Response {
    let policy = req
        .extensions()
        .get::<AdminAuthPolicyExt>()
        .map(|v| v.0.clone())
        .unwrap_or_default();
    let Some(expected) = policy.token.as_deref() else {
        return next.run(req).await;
    };
    let Some(provided) = parse_bearer_token(req.headers()) else {
        return unauthorized("missing_bearer_token", "missing bearer token");
    };
    if !constant_time_eq(&provided, expected) {
        return unauthorized("invalid_bearer_token", "invalid bearer token");
    }
    next.run(req).await
}
