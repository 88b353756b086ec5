//! Inbound message handling: one webhook delivery in, at most one reply out.

use crate::notices;
use crate::preference::ProviderPreference;
use crate::rate_limit::RateLimiter;
use axum::http::StatusCode;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use relay_channels::{InboundMessage, InboundPayload, MessagingGateway, SendOutcome};
use relay_llm::{
    ChatMessage, ReplyGateway, TenantContext, detect_language,
};
use relay_store::{Direction, NewMessage, StoredMessage, Tenant, TenantStore};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub history_limit: usize,
    pub default_timezone: Tz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub status: StatusCode,
    pub label: &'static str,
}

impl PipelineOutcome {
    const fn new(status: StatusCode, label: &'static str) -> Self {
        Self { status, label }
    }

    pub const INVALID_PAYLOAD: Self = Self::new(StatusCode::BAD_REQUEST, "invalid_payload");
    pub const UNKNOWN_TENANT: Self = Self::new(StatusCode::INTERNAL_SERVER_ERROR, "unknown_tenant");
    pub const RATE_LIMITED: Self = Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited");
    pub const MEDIA_REJECTED: Self = Self::new(StatusCode::OK, "media_rejected");
    pub const EMPTY_BODY: Self = Self::new(StatusCode::OK, "empty_body");
    pub const CLOSED: Self = Self::new(StatusCode::OK, "closed");
    pub const REPLIED: Self = Self::new(StatusCode::OK, "replied");
    pub const APOLOGIZED: Self = Self::new(StatusCode::OK, "apologized");
}

pub struct InboundPipeline {
    store: Arc<dyn TenantStore>,
    replies: Arc<ReplyGateway>,
    messaging: Arc<dyn MessagingGateway>,
    rate_limiter: Arc<RateLimiter>,
    preference: Arc<ProviderPreference>,
    settings: PipelineSettings,
}

impl InboundPipeline {
    pub fn new(
        store: Arc<dyn TenantStore>,
        replies: Arc<ReplyGateway>,
        messaging: Arc<dyn MessagingGateway>,
        rate_limiter: Arc<RateLimiter>,
        preference: Arc<ProviderPreference>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            replies,
            messaging,
            rate_limiter,
            preference,
            settings,
        }
    }

    pub async fn handle(&self, payload: &InboundPayload) -> PipelineOutcome {
        self.handle_at(payload, Utc::now()).await
    }

    /// `now` decides business hours; the rate limiter keeps its own monotonic clock.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn handle_at(&self, payload: &InboundPayload, now: DateTime<Utc>) -> PipelineOutcome {
        let inbound = match self.messaging.parse_inbound(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting unparseable webhook");
                return PipelineOutcome::INVALID_PAYLOAD;
            }
        };
        let sender = inbound.sender_id.as_str();
        tracing::info!(
            sender = %sender,
            profile = %inbound.profile_name,
            message_id = ?inbound.message_id,
            media_count = inbound.media_count,
            "inbound message"
        );

        let Some(tenant) = self.store.tenant_by_routing_number(&inbound.routing_number).await else {
            tracing::error!(routing_number = %inbound.routing_number, "no tenant for routing number and no default tenant");
            return PipelineOutcome::UNKNOWN_TENANT;
        };
        let notice_language = detect_language(&inbound.text);

        if !self
            .rate_limiter
            .allow(sender, self.settings.rate_limit, self.settings.rate_window)
        {
            tracing::warn!(sender = %sender, tenant = %tenant.key, "rate limit exceeded");
            self.send_logged(sender, notices::rate_limited(notice_language))
                .await;
            return PipelineOutcome::RATE_LIMITED;
        }

        if inbound.has_media() {
            tracing::info!(sender = %sender, "media message rejected");
            self.send_logged(sender, notices::media_unsupported(notice_language))
                .await;
            return PipelineOutcome::MEDIA_REJECTED;
        }

        let text = inbound.text.trim();
        if text.is_empty() {
            tracing::debug!(sender = %sender, "empty message ignored");
            return PipelineOutcome::EMPTY_BODY;
        }

        if let Some((open, close)) = tenant.business_hours() {
            let tz = tenant.tz().unwrap_or(self.settings.default_timezone);
            let local_hour = now.with_timezone(&tz).hour();
            if !within_hours(local_hour, open, close) {
                tracing::info!(tenant = %tenant.key, local_hour, open, close, "outside business hours");
                let notice = notices::closed(notice_language, open, close);
                self.send_logged(sender, &notice).await;
                self.store
                    .append_message(NewMessage {
                        tenant_key: tenant.key.clone(),
                        sender_id: sender.to_string(),
                        direction: Direction::Outbound,
                        body: notice,
                        language: Some(notice_language.tag().to_string()),
                    })
                    .await;
                return PipelineOutcome::CLOSED;
            }
        }

        self.reply(&tenant, &inbound, text).await
    }

    async fn reply(&self, tenant: &Tenant, inbound: &InboundMessage, text: &str) -> PipelineOutcome {
        let sender = inbound.sender_id.as_str();

        let history = self
            .store
            .recent_history(sender, &tenant.key, self.settings.history_limit)
            .await;
        let history = history_turns(&history);

        self.store
            .append_message(NewMessage {
                tenant_key: tenant.key.clone(),
                sender_id: sender.to_string(),
                direction: Direction::Inbound,
                body: text.to_string(),
                language: Some(detect_language(text).tag().to_string()),
            })
            .await;

        let context = TenantContext {
            business_name: Some(tenant.name.clone()),
            instructions: tenant.instructions.clone(),
        };
        let reply = self
            .replies
            .generate_reply(text, &history, &context, self.preference.get())
            .await;

        self.store
            .append_message(NewMessage {
                tenant_key: tenant.key.clone(),
                sender_id: sender.to_string(),
                direction: Direction::Outbound,
                body: reply.text.clone(),
                language: Some(reply.language.tag().to_string()),
            })
            .await;

        self.send_logged(sender, &reply.text).await;

        if reply.success {
            PipelineOutcome::REPLIED
        } else {
            PipelineOutcome::APOLOGIZED
        }
    }

    async fn send_logged(&self, destination: &str, text: &str) -> SendOutcome {
        let outcome = self.messaging.send(destination, text).await;
        match &outcome {
            SendOutcome::Delivered {
                provider_message_id,
            } => {
                tracing::info!(destination = %destination, provider_message_id = ?provider_message_id, "reply delivered");
            }
            SendOutcome::Failed { error } => {
                tracing::error!(destination = %destination, error = %error, "reply delivery failed");
            }
        }
        outcome
    }
}

/// `[open, close)` in local hours; wraps past midnight when `open > close`.
pub fn within_hours(hour: u32, open: u8, close: u8) -> bool {
    let (open, close) = (u32::from(open), u32::from(close));
    if open < close {
        hour >= open && hour < close
    } else {
        hour >= open || hour < close
    }
}

fn history_turns(history: &[StoredMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|m| match m.direction {
            Direction::Inbound => ChatMessage::user(m.body.clone()),
            Direction::Outbound => ChatMessage::assistant(m.body.clone()),
        })
        .collect()
}
