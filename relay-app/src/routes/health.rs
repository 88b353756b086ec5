use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/", get(get_health))
        .route("/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let providers = state.replies.providers();
    Json(serde_json::json!({
        "status": "running",
        "service": "warelay",
        "channel": state.messaging.channel_id(),
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "providers": {
            "primary": state.replies.primary(),
            "preferred": state.preference.get(),
            "configured": providers,
        },
        "rate_limit": {
            "limit": state.settings.rate_limit,
            "window_seconds": state.settings.rate_window.as_secs(),
            "tracked_senders": state.rate_limiter.tracked_senders(),
        },
    }))
}
