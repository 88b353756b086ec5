use crate::server::AppState;
use axum::extract::Path;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Extension, Json};
use relay_store::{SchedulePatch, StoreError, TenantUpsert};
use serde::Deserialize;
use std::sync::Arc;

type Reply = (StatusCode, Json<serde_json::Value>);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddClientRequest {
    tenant_key: String,
    business_name: String,
    routing_number: String,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    language_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetActiveRequest {
    active: bool,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/admin/clients", get(list_clients))
        .route("/admin/add-client", post(add_client))
        .route("/admin/clients/{key}/schedule", put(update_schedule))
        .route("/admin/clients/{key}/active", put(set_active))
}

fn error(status: StatusCode, message: impl Into<String>) -> Reply {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message.into() })),
    )
}

fn store_error(e: StoreError) -> Reply {
    match e {
        StoreError::Invalid(message) => error(StatusCode::BAD_REQUEST, message),
        other => {
            tracing::error!(error = %other, "tenant store write failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_clients(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let clients = state.store.list_tenants().await;
    Json(serde_json::json!({
        "success": true,
        "count": clients.len(),
        "clients": clients,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn add_client(
    Extension(state): Extension<Arc<AppState>>,
    req: Result<Json<AddClientRequest>, JsonRejection>,
) -> Reply {
    let Json(req) = match req {
        Ok(req) => req,
        Err(rejection) => return error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let upsert = TenantUpsert {
        key: req.tenant_key,
        name: req.business_name,
        routing_number: req.routing_number,
        instructions: req.instructions,
        language: req.language_tag,
    };
    match state.store.upsert_tenant(upsert).await {
        Ok(tenant) => {
            tracing::info!(tenant = %tenant.key, routing_number = %tenant.routing_number, "client saved");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "success": true, "client": tenant })),
            )
        }
        Err(e) => store_error(e),
    }
}

#[tracing::instrument(level = "info", skip_all, fields(tenant = %key))]
async fn update_schedule(
    Extension(state): Extension<Arc<AppState>>,
    Path(key): Path<String>,
    patch: Result<Json<SchedulePatch>, JsonRejection>,
) -> Reply {
    let Json(patch) = match patch {
        Ok(patch) => patch,
        Err(rejection) => return error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if patch.is_empty() {
        return error(StatusCode::BAD_REQUEST, "no schedule fields supplied");
    }
    match state.store.update_schedule(&key, patch).await {
        Ok(Some(tenant)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "client": tenant })),
        ),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("client {key} not found")),
        Err(e) => store_error(e),
    }
}

#[tracing::instrument(level = "info", skip_all, fields(tenant = %key))]
async fn set_active(
    Extension(state): Extension<Arc<AppState>>,
    Path(key): Path<String>,
    req: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Reply {
    let Json(req) = match req {
        Ok(req) => req,
        Err(rejection) => return error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match state.store.set_active(&key, req.active).await {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "key": key, "active": req.active })),
        ),
        Ok(false) => error(StatusCode::NOT_FOUND, format!("client {key} not found")),
        Err(e) => store_error(e),
    }
}
