pub mod conversations;
pub mod health;
pub mod messages;
pub mod provider;
pub mod rate_limit;
pub mod tenants;
pub mod webhook;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhook::router())
}

/// Operator surface; mounted behind the admin bearer check.
pub fn admin_router() -> Router {
    Router::new()
        .merge(tenants::router())
        .merge(conversations::router())
        .merge(messages::router())
        .merge(rate_limit::router())
        .merge(provider::router())
}
