use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json};
use relay_llm::ProviderKind;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SetProviderRequest {
    /// `null`, `""` or `"default"` clears the preference.
    #[serde(default)]
    provider: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/admin/provider", get(get_provider).post(set_provider))
}

fn snapshot(state: &AppState) -> serde_json::Value {
    let preferred = state.preference.get();
    serde_json::json!({
        "success": true,
        "primary": state.replies.primary(),
        "preferred": preferred,
        "effective": preferred.unwrap_or(state.replies.primary()),
        "available": state.replies.providers(),
    })
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_provider(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(snapshot(&state))
}

#[tracing::instrument(level = "info", skip_all)]
async fn set_provider(
    Extension(state): Extension<Arc<AppState>>,
    req: Result<Json<SetProviderRequest>, JsonRejection>,
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
    let requested = req
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("default"));
    let kind = match requested {
        None => None,
        Some(name) => match ProviderKind::parse(name) {
            Some(kind) if state.replies.has_provider(kind) => Some(kind),
            Some(kind) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "success": false,
                        "error": format!("provider {kind} has no credentials configured"),
                    })),
                );
            }
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "success": false,
                        "error": format!("unknown provider {name:?}; expected openai, anthropic (claude) or gemini"),
                    })),
                );
            }
        },
    };
    let previous = state.preference.set(kind);
    tracing::info!(previous = ?previous, preferred = ?kind, "provider preference changed");
    let mut body = snapshot(&state);
    body["previous"] = serde_json::json!(previous);
    (StatusCode::OK, Json(body))
}

#[cfg(test)]
mod tests {
    use crate::http_auth::AdminAuthPolicy;
    use crate::server::app_router;
    use crate::server::tests::{test_app, test_settings};
    use axum::body::{Body, to_bytes};
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{Request, StatusCode};
    use relay_llm::ProviderKind;
    use relay_store::{TenantStore, TenantUpsert};
    use tower::util::ServiceExt;

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/admin/provider")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn switching_provider_changes_effective_choice() {
        let app = test_app(test_settings());
        let router = app_router(app.state.clone(), AdminAuthPolicy::default());

        let response = router
            .clone()
            .oneshot(post(serde_json::json!({ "provider": "gemini" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let body: serde_json::Value = serde_json::from_slice(&body).expect("response json");
        assert_eq!(body["effective"], "gemini");
        assert!(body["previous"].is_null());
        assert_eq!(app.state.preference.get(), Some(ProviderKind::Gemini));

        let response = router
            .oneshot(post(serde_json::json!({ "provider": null })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.state.preference.get(), None);
    }

    #[tokio::test]
    async fn unconfigured_or_unknown_providers_are_rejected() {
        let app = test_app(test_settings());
        let router = app_router(app.state.clone(), AdminAuthPolicy::default());
        let response = router
            .clone()
            .oneshot(post(serde_json::json!({ "provider": "claude" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(post(serde_json::json!({ "provider": "mistral" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.state.preference.get(), None);
    }

    #[tokio::test]
    async fn preference_reorders_pipeline_attempts() {
        let app = test_app(test_settings());
        app.store
            .upsert_tenant(TenantUpsert {
                key: "default".to_string(),
                name: "Demo Business".to_string(),
                routing_number: "whatsapp:+14155238886".to_string(),
                ..TenantUpsert::default()
            })
            .await
            .expect("seed tenant");
        let router = app_router(app.state.clone(), AdminAuthPolicy::default());
        router
            .clone()
            .oneshot(post(serde_json::json!({ "provider": "gemini" })))
            .await
            .expect("response");

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "From=whatsapp%3A%2B111&To=whatsapp%3A%2B14155238886&Body=hello",
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.messenger.sent()[0].1, "Gemini here");
    }
}
