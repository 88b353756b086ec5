use crate::server::AppState;
use axum::extract::{Path, Query};
use axum::routing::get;
use axum::{Extension, Json};
use relay_channels::strip_transport_prefix;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    tenant_key: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/admin/conversations/{sender}", get(get_conversation))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_conversation(
    Extension(state): Extension<Arc<AppState>>,
    Path(sender): Path<String>,
    Query(query): Query<ConversationQuery>,
) -> Json<serde_json::Value> {
    let sender = strip_transport_prefix(&sender).to_string();
    let tenant_key = query
        .tenant_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or(&state.settings.default_tenant_key)
        .to_string();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let messages = state
        .store
        .recent_history(&sender, &tenant_key, limit)
        .await;
    Json(serde_json::json!({
        "success": true,
        "sender": sender,
        "tenantKey": tenant_key,
        "count": messages.len(),
        "messages": messages,
    }))
}
