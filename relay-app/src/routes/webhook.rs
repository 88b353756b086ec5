use crate::server::AppState;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Extension, Json};
use bytes::Bytes;
use relay_channels::{InboundPayload, validate_signature};
use std::sync::Arc;

const SIGNATURE_HEADER: &str = "x-twilio-signature";

pub fn router() -> axum::Router {
    axum::Router::new().route("/webhook", post(receive))
}

fn decode_payload(headers: &HeaderMap, body: &[u8]) -> Result<InboundPayload, relay_channels::ParseError> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().to_ascii_lowercase().starts_with("application/json"));
    if is_json {
        InboundPayload::from_json(body)
    } else {
        InboundPayload::from_form(body)
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn receive(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let payload = match decode_payload(&headers, &body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable webhook body");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "status": "error", "error": e.to_string() })),
            );
        }
    };

    if let Some(check) = &state.settings.signature {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !validate_signature(&check.auth_token, &check.public_url, payload.fields(), provided) {
            tracing::warn!(signature_present = !provided.is_empty(), "webhook signature rejected");
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "status": "error", "error": "invalid signature" })),
            );
        }
    }

    let outcome = state.pipeline.handle(&payload).await;
    (
        outcome.status,
        Json(serde_json::json!({ "status": outcome.label })),
    )
}
