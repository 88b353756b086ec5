use crate::notices;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use relay_channels::MessagingGateway;
use relay_store::{Direction, NewMessage, Tenant, TenantStore, parse_hhmm};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    /// Owner contact for daily summaries; summaries are skipped when unset.
    pub summary_recipient: Option<String>,
    pub broadcast_window_days: u32,
    pub default_timezone: Tz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Job {
    DailySummary,
    Broadcast,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub summaries_sent: usize,
    pub broadcasts_delivered: usize,
    pub broadcasts_failed: usize,
}

/// Fires per-tenant daily summaries and broadcasts at their local `HH:MM`.
pub struct Scheduler {
    store: Arc<dyn TenantStore>,
    messaging: Arc<dyn MessagingGateway>,
    settings: SchedulerSettings,
    last_fired: DashMap<(String, Job), NaiveDate>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TenantStore>,
        messaging: Arc<dyn MessagingGateway>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            messaging,
            settings,
            last_fired: DashMap::new(),
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("scheduler received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.tick_at(Utc::now()).await;
                        if report != TickReport::default() {
                            tracing::info!(
                                summaries_sent = report.summaries_sent,
                                broadcasts_delivered = report.broadcasts_delivered,
                                broadcasts_failed = report.broadcasts_failed,
                                "scheduler tick"
                            );
                        }
                    }
                }
            }
        })
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        for tenant in self.store.list_tenants().await {
            if !tenant.active {
                continue;
            }
            let tz = tenant.tz().unwrap_or(self.settings.default_timezone);
            let local = now.with_timezone(&tz);
            let minute = local.format("%H:%M").to_string();
            let today = local.date_naive();

            if is_due(tenant.daily_summary_time.as_deref(), &minute)
                && self.claim(&tenant.key, Job::DailySummary, today)
                && self.send_summary(&tenant, today).await
            {
                report.summaries_sent += 1;
            }

            if is_due(tenant.broadcast_time.as_deref(), &minute)
                && self.claim(&tenant.key, Job::Broadcast, today)
            {
                let (delivered, failed) = self.broadcast(&tenant).await;
                report.broadcasts_delivered += delivered;
                report.broadcasts_failed += failed;
            }
        }
        report
    }

    /// True the first time a job is claimed for a tenant on a given local day.
    fn claim(&self, tenant_key: &str, job: Job, day: NaiveDate) -> bool {
        let key = (tenant_key.to_string(), job);
        match self.last_fired.get(&key) {
            Some(fired) if *fired >= day => false,
            _ => {
                self.last_fired.insert(key, day);
                true
            }
        }
    }

    async fn send_summary(&self, tenant: &Tenant, day: NaiveDate) -> bool {
        let Some(recipient) = self.settings.summary_recipient.as_deref() else {
            tracing::debug!(tenant = %tenant.key, "no summary recipient configured; skipping");
            return false;
        };
        let counts = self.store.today_message_counts(&tenant.key).await;
        let text = notices::daily_summary(&tenant.name, day, counts);
        let outcome = self.messaging.send(recipient, &text).await;
        if outcome.is_delivered() {
            tracing::info!(tenant = %tenant.key, total = counts.total, "daily summary sent");
            true
        } else {
            tracing::error!(tenant = %tenant.key, outcome = ?outcome, "daily summary delivery failed");
            false
        }
    }

    async fn broadcast(&self, tenant: &Tenant) -> (usize, usize) {
        let Some(message) = tenant
            .broadcast_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        else {
            return (0, 0);
        };
        let recipients = self
            .store
            .recent_unique_senders(&tenant.key, self.settings.broadcast_window_days)
            .await;
        let (mut delivered, mut failed) = (0, 0);
        for sender in recipients {
            if self.messaging.send(&sender, message).await.is_delivered() {
                delivered += 1;
                self.store
                    .append_message(NewMessage {
                        tenant_key: tenant.key.clone(),
                        sender_id: sender,
                        direction: Direction::Outbound,
                        body: message.to_string(),
                        language: Some(relay_llm::detect_language(message).tag().to_string()),
                    })
                    .await;
            } else {
                failed += 1;
                tracing::warn!(tenant = %tenant.key, sender = %sender, "broadcast delivery failed");
            }
        }
        tracing::info!(tenant = %tenant.key, delivered, failed, "broadcast finished");
        (delivered, failed)
    }
}

fn is_due(configured: Option<&str>, minute: &str) -> bool {
    configured
        .and_then(parse_hhmm)
        .is_some_and(|t| t.format("%H:%M").to_string() == minute)
}
