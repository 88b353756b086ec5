//! warelay server.
//!
//! Wires the tenant store, reply gateway and Twilio transport into the inbound
//! pipeline and mounts the webhook and admin routes on top.

use crate::config::RelayConfig;
use crate::http_auth::{self, AdminAuthPolicy, AdminAuthPolicyExt};
use crate::pipeline::{InboundPipeline, PipelineSettings};
use crate::preference::ProviderPreference;
use crate::rate_limit::RateLimiter;
use crate::routes;
use crate::scheduler::{Scheduler, SchedulerSettings};
use anyhow::Result;
use axum::Extension;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use chrono_tz::Tz;
use relay_channels::{MessagingGateway, SendOutcome, TwilioWhatsApp};
use relay_llm::{ReplyGateway, ReplyGatewayConfig, build_http_client, build_providers};
use relay_store::{SqliteStore, StoreConfig, TenantStore, TenantUpsert};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Twilio signs every webhook with the account auth token over the public URL.
#[derive(Clone)]
pub struct SignatureCheck {
    pub auth_token: String,
    pub public_url: String,
}

#[derive(Clone)]
pub struct AppSettings {
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub history_limit: usize,
    pub default_timezone: Tz,
    pub default_tenant_key: String,
    pub signature: Option<SignatureCheck>,
}

impl AppSettings {
    pub fn from_config(cfg: &RelayConfig) -> Result<Self> {
        let twilio = &cfg.channels.twilio;
        let signature = if twilio.validate_signatures {
            let public_url = twilio
                .public_webhook_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    anyhow::anyhow!("signature validation requires channels.twilio.public_webhook_url")
                })?;
            Some(SignatureCheck {
                auth_token: twilio.auth_token.trim().to_string(),
                public_url: public_url.to_string(),
            })
        } else {
            None
        };
        Ok(Self {
            rate_limit: cfg.relay.rate_limit,
            rate_window: cfg.rate_limit_window(),
            history_limit: cfg.relay.history_limit,
            default_timezone: cfg.default_timezone()?,
            default_tenant_key: cfg.relay.default_tenant_key.trim().to_string(),
            signature,
        })
    }
}

pub struct AppState {
    pub store: Arc<dyn TenantStore>,
    pub replies: Arc<ReplyGateway>,
    pub messaging: Arc<dyn MessagingGateway>,
    pub rate_limiter: Arc<RateLimiter>,
    pub preference: Arc<ProviderPreference>,
    pub pipeline: Arc<InboundPipeline>,
    pub settings: AppSettings,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TenantStore>,
        replies: Arc<ReplyGateway>,
        messaging: Arc<dyn MessagingGateway>,
        settings: AppSettings,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new());
        let preference = Arc::new(ProviderPreference::default());
        let pipeline = Arc::new(InboundPipeline::new(
            store.clone(),
            replies.clone(),
            messaging.clone(),
            rate_limiter.clone(),
            preference.clone(),
            PipelineSettings {
                rate_limit: settings.rate_limit,
                rate_window: settings.rate_window,
                history_limit: settings.history_limit,
                default_timezone: settings.default_timezone,
            },
        ));
        Self {
            store,
            replies,
            messaging,
            rate_limiter,
            preference,
            pipeline,
            settings,
            started_at: Instant::now(),
        }
    }
}

/// Public webhook and health routes plus the token-guarded admin surface.
pub fn app_router(state: Arc<AppState>, admin_policy: AdminAuthPolicy) -> axum::Router {
    let admin = routes::admin_router()
        .layer(axum::middleware::from_fn(http_auth::require_admin_auth))
        .layer(Extension(AdminAuthPolicyExt(admin_policy)));
    routes::router().merge(admin).layer(Extension(state))
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = RelayConfig::load_with_path(config_path).await?;
    let credentials = cfg.provider_credentials();
    let configured: Vec<&str> = credentials.iter().map(|c| c.kind.as_str()).collect();
    let bind_addr = cfg.bind_addr()?;
    let primary = cfg.primary_provider()?;
    tracing::info!(
        config_path = %path.display(),
        bind_addr = %bind_addr,
        database_path = %cfg.database.path,
        primary_provider = %primary,
        configured_providers = ?configured,
        twilio_configured = cfg.twilio_configured(),
        signature_validation = cfg.channels.twilio.validate_signatures,
        admin_auth = cfg.admin_token().is_some(),
        scheduler_enabled = cfg.scheduler.enabled,
        "config ok"
    );
    if credentials.is_empty() {
        tracing::warn!("no llm provider has an api key; every reply will be the apology notice");
    } else if !credentials.iter().any(|c| c.kind == primary) {
        tracing::warn!(primary = %cfg.llm.primary, "primary provider has no api key; fallbacks will answer");
    }
    if !cfg.twilio_configured() {
        tracing::warn!("twilio credentials incomplete; serve and send will refuse to start");
    }
    if cfg.admin_token().is_none() {
        tracing::warn!("admin.token not set; admin routes are unauthenticated");
    }
    let store = open_store(&cfg)?;
    let tenants = store.try_list_tenants().await?;
    tracing::info!(tenant_count = tenants.len(), "tenant store ok");
    Ok(())
}

pub async fn send_one_shot(config_path: Option<PathBuf>, destination: &str, text: &str) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let twilio = build_twilio(&cfg)?;
    match twilio.send(destination, text).await {
        SendOutcome::Delivered {
            provider_message_id,
        } => {
            tracing::info!(destination = %destination, provider_message_id = ?provider_message_id, "message delivered");
            Ok(())
        }
        SendOutcome::Failed { error } => Err(anyhow::anyhow!("send to {destination} failed: {error}")),
    }
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = RelayConfig::load_with_path(config_path).await?;
    let addr = cfg.bind_addr()?;
    let primary = cfg.primary_provider()?;
    tracing::info!(
        config_path = %cfg_path.display(),
        bind_addr = %addr,
        database_path = %cfg.database.path,
        primary_provider = %primary,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        rate_limit = cfg.relay.rate_limit,
        rate_limit_window_seconds = cfg.relay.rate_limit_window_seconds,
        history_limit = cfg.relay.history_limit,
        default_timezone = %cfg.relay.default_timezone,
        signature_validation = cfg.channels.twilio.validate_signatures,
        admin_auth = cfg.admin_token().is_some(),
        scheduler_enabled = cfg.scheduler.enabled,
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let store = Arc::new(open_store(&cfg)?);
    seed_default_tenant(&store, &cfg).await?;

    let twilio = Arc::new(build_twilio(&cfg)?);
    let attempt_timeout = Duration::from_secs(cfg.llm.timeout_seconds);
    let providers = build_providers(&build_http_client(attempt_timeout), &cfg.provider_credentials());
    if providers.is_empty() {
        tracing::warn!("no llm providers configured; replies will fall back to the apology notice");
    }
    let replies = Arc::new(ReplyGateway::new(
        providers,
        ReplyGatewayConfig {
            primary,
            default_business_name: cfg.relay.default_business_name.clone(),
            attempt_timeout,
        },
    ));
    tracing::info!(
        providers = ?replies.providers(),
        from_number = %twilio.from_number(),
        "reply gateway and transport initialized"
    );

    let settings = AppSettings::from_config(&cfg)?;
    let state = Arc::new(AppState::new(
        store.clone(),
        replies,
        twilio.clone(),
        settings,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = state.rate_limiter.clone().spawn_sweeper(
        Duration::from_secs(cfg.relay.rate_limit_sweep_seconds),
        cfg.rate_limit_window(),
        shutdown.child_token(),
    );
    let scheduler = if cfg.scheduler.enabled {
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            twilio.clone(),
            SchedulerSettings {
                tick: Duration::from_secs(cfg.scheduler.tick_seconds),
                summary_recipient: cfg
                    .scheduler
                    .summary_recipient
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
                broadcast_window_days: cfg.scheduler.broadcast_window_days,
                default_timezone: state.settings.default_timezone,
            },
        ));
        Some(scheduler.spawn(shutdown.child_token()))
    } else {
        None
    };

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = app_router(state, AdminAuthPolicy::new(cfg.admin_token()))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "warelay serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "rate limit sweeper join failed during shutdown");
    }
    if let Some(handle) = scheduler {
        match handle.await {
            Ok(()) => tracing::info!("scheduler shutdown completed"),
            Err(e) => tracing::error!(error = %e, "scheduler task join failed during shutdown"),
        }
    }
    Ok(())
}

fn open_store(cfg: &RelayConfig) -> Result<SqliteStore> {
    let store = SqliteStore::open(StoreConfig {
        path: PathBuf::from(cfg.database.path.trim()),
        max_connections: cfg.database.max_connections,
        busy_timeout: Duration::from_millis(cfg.database.busy_timeout_ms),
        default_tenant_key: cfg.relay.default_tenant_key.trim().to_string(),
        default_timezone: cfg.default_timezone()?,
    })?;
    Ok(store)
}

fn build_twilio(cfg: &RelayConfig) -> Result<TwilioWhatsApp> {
    let twilio = &cfg.channels.twilio;
    TwilioWhatsApp::new(&twilio.account_sid, &twilio.auth_token, &twilio.whatsapp_number)
        .map_err(|e| anyhow::anyhow!("twilio transport: {e}"))
}

/// Creates the fallback tenant on first start. An existing record, active or
/// not, is left alone so admin edits survive restarts.
async fn seed_default_tenant(store: &SqliteStore, cfg: &RelayConfig) -> Result<()> {
    let key = cfg.relay.default_tenant_key.trim();
    if store.try_list_tenants().await?.iter().any(|t| t.key == key) {
        tracing::debug!(tenant = %key, "default tenant already present");
        return Ok(());
    }
    let tenant = store
        .upsert_tenant(TenantUpsert {
            key: key.to_string(),
            name: cfg.relay.seed_tenant_name.trim().to_string(),
            routing_number: cfg.channels.twilio.whatsapp_number.trim().to_string(),
            instructions: None,
            language: None,
        })
        .await?;
    tracing::info!(tenant = %tenant.key, name = %tenant.name, routing_number = %tenant.routing_number, "default tenant seeded");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
