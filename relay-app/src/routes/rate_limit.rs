use crate::server::AppState;
use axum::extract::Path;
use axum::routing::get;
use axum::{Extension, Json};
use relay_channels::strip_transport_prefix;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/admin/rate-limit/{sender}", get(get_rate_limit))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_rate_limit(
    Extension(state): Extension<Arc<AppState>>,
    Path(sender): Path<String>,
) -> Json<serde_json::Value> {
    let sender = strip_transport_prefix(&sender);
    let status = state.rate_limiter.status(
        sender,
        state.settings.rate_limit,
        state.settings.rate_window,
    );
    Json(serde_json::json!({
        "success": true,
        "sender": sender,
        "count": status.count,
        "limit": status.limit,
        "remaining": status.remaining,
        "windowSeconds": state.settings.rate_window.as_secs(),
    }))
}
