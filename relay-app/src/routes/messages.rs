use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json};
use relay_channels::{SendOutcome, strip_transport_prefix};
use relay_llm::detect_language;
use relay_store::{Direction, NewMessage};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    destination: String,
    text: String,
    #[serde(default)]
    tenant_key: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/admin/send-message", post(send_message))
}

#[tracing::instrument(level = "info", skip_all)]
async fn send_message(
    Extension(state): Extension<Arc<AppState>>,
    req: Result<Json<SendRequest>, JsonRejection>,
) -> (StatusCode, Json<serde_json::Value>) {
    let req = match req {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "success": false, "error": rejection.body_text() })),
            );
        }
    };
    if req.destination.trim().is_empty() || req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "success": false, "error": "destination and text are required" })),
        );
    }

    let outcome = state.messaging.send(&req.destination, &req.text).await;
    match &outcome {
        SendOutcome::Delivered { .. } => {
            let tenant_key = req
                .tenant_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .unwrap_or(&state.settings.default_tenant_key)
                .to_string();
            let normalized = state.messaging.normalize_destination(&req.destination);
            state
                .store
                .append_message(NewMessage {
                    tenant_key,
                    sender_id: strip_transport_prefix(&normalized).to_string(),
                    direction: Direction::Outbound,
                    body: req.text.clone(),
                    language: Some(detect_language(&req.text).tag().to_string()),
                })
                .await;
            (
                StatusCode::OK,
                Json(serde_json::json!({ "success": true, "result": outcome })),
            )
        }
        SendOutcome::Failed { error } => {
            tracing::warn!(error = %error, "admin send failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "success": false, "error": error, "result": outcome })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::http_auth::AdminAuthPolicy;
    use crate::server::app_router;
    use crate::server::tests::{test_app, test_settings};
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{Request, StatusCode};
    use relay_store::{Direction, TenantStore};
    use tower::util::ServiceExt;

    fn send(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/admin/send-message")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn delivered_sends_are_logged_outbound() {
        let app = test_app(test_settings());
        let response = app_router(app.state.clone(), AdminAuthPolicy::default())
            .oneshot(send(serde_json::json!({
                "destination": "+880 1711-111111",
                "text": "Your order is ready",
            })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.messenger.sent()[0].0, "+880 1711-111111");

        let history = app.store.recent_history("+8801711111111", "default", 10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].direction, Direction::Outbound);
        assert_eq!(history[0].body, "Your order is ready");
    }

    #[tokio::test]
    async fn failed_sends_are_not_logged() {
        let app = test_app(test_settings());
        app.messenger.fail_sends(true);
        let response = app_router(app.state.clone(), AdminAuthPolicy::default())
            .oneshot(send(serde_json::json!({ "destination": "+111", "text": "hi" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(app.store.recent_history("+111", "default", 10).await.is_empty());
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let app = test_app(test_settings());
        let response = app_router(app.state.clone(), AdminAuthPolicy::default())
            .oneshot(send(serde_json::json!({ "destination": "+111", "text": "  " })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.messenger.sent().is_empty());
    }
}
