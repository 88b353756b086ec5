use crate::error::Result;
use crate::models::{MessageCounts, NewMessage, SchedulePatch, StoredMessage, Tenant, TenantUpsert};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Tenant configuration and the per-conversation message log.
///
/// Reads degrade to empty/absent on backend failure (logged). Message logging
/// never fails the caller. Tenant writes propagate errors.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Active tenants only.
    async fn tenant(&self, key: &str) -> Option<Tenant>;

    /// Active tenant whose routing number matches `number` with or without the
    /// transport prefix, else the default tenant.
    async fn tenant_by_routing_number(&self, number: &str) -> Option<Tenant>;

    async fn upsert_tenant(&self, upsert: TenantUpsert) -> Result<Tenant>;

    async fn append_message(&self, message: NewMessage);

    /// The most recent `limit` messages of one conversation, oldest first.
    async fn recent_history(&self, sender_id: &str, tenant_key: &str, limit: usize)
    -> Vec<StoredMessage>;

    /// Counts for the current calendar day in the tenant's timezone.
    async fn today_message_counts(&self, tenant_key: &str) -> MessageCounts;

    async fn recent_unique_senders(&self, tenant_key: &str, window_days: u32) -> BTreeSet<String>;

    /// Active and inactive tenants.
    async fn list_tenants(&self) -> Vec<Tenant>;

    /// `Ok(None)` when the tenant does not exist.
    async fn update_schedule(&self, key: &str, patch: SchedulePatch) -> Result<Option<Tenant>>;

    /// `Ok(false)` when the tenant does not exist.
    async fn set_active(&self, key: &str, active: bool) -> Result<bool>;
}
