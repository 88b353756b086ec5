use crate::error::{Result, StoreError};
use crate::models::{
    DEFAULT_LANGUAGE_TAG, Direction, MessageCounts, NewMessage, SchedulePatch, StoredMessage,
    Tenant, TenantUpsert, format_timestamp, parse_timestamp,
};
use crate::pool::ConnectionPool;
use crate::traits::TenantStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

const ROUTING_PREFIX: &str = "whatsapp:";

const TENANT_COLUMNS: &str = "key, name, routing_number, instructions, language, active, \
     open_hour, close_hour, daily_summary_time, timezone, broadcast_message, broadcast_time, \
     created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, tenant_key, sender_id, direction, body, language, created_at";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub max_connections: usize,
    pub busy_timeout: Duration,
    pub default_tenant_key: String,
    /// Used for day boundaries when a tenant has no timezone of its own.
    pub default_timezone: Tz,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            default_tenant_key: "default".to_string(),
            default_timezone: Tz::UTC,
        }
    }
}

pub struct SqliteStore {
    pool: ConnectionPool,
    default_tenant_key: String,
    default_timezone: Tz,
}

impl SqliteStore {
    #[tracing::instrument(level = "info", skip_all, fields(path = %config.path.display()))]
    pub fn open(config: StoreConfig) -> Result<Self> {
        let pool = ConnectionPool::open(config.path, config.max_connections, config.busy_timeout)?;
        tracing::info!(
            max_connections = config.max_connections,
            "tenant store ready"
        );
        Ok(Self {
            pool,
            default_tenant_key: config.default_tenant_key,
            default_timezone: config.default_timezone,
        })
    }

    pub fn default_tenant_key(&self) -> &str {
        &self.default_tenant_key
    }

    pub async fn try_tenant(&self, key: &str) -> Result<Option<Tenant>> {
        let key = key.to_string();
        self.pool
            .run(move |conn| select_tenant(conn, &key, true))
            .await
    }

    pub async fn try_tenant_by_routing_number(&self, number: &str) -> Result<Option<Tenant>> {
        let trimmed = number.trim();
        let bare = trimmed.strip_prefix(ROUTING_PREFIX).unwrap_or(trimmed).to_string();
        let prefixed = format!("{ROUTING_PREFIX}{bare}");
        let default_key = self.default_tenant_key.clone();
        self.pool
            .run(move |conn| {
                let sql = format!(
                    "SELECT {TENANT_COLUMNS} FROM tenants
                     WHERE active = 1 AND (routing_number = ?1 OR routing_number = ?2)
                     ORDER BY created_at ASC, key ASC LIMIT 1"
                );
                let found = conn
                    .query_row(&sql, params![bare, prefixed], tenant_from_row)
                    .optional()?;
                match found {
                    Some(t) => Ok(Some(t)),
                    None => select_tenant(conn, &default_key, true),
                }
            })
            .await
    }

    pub async fn try_append_message(&self, message: NewMessage) -> Result<i64> {
        let created_at = format_timestamp(Utc::now());
        self.pool
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO messages (tenant_key, sender_id, direction, body, language, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        message.tenant_key,
                        message.sender_id,
                        message.direction.as_str(),
                        message.body,
                        message.language,
                        created_at,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn try_recent_history(
        &self,
        sender_id: &str,
        tenant_key: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let sender_id = sender_id.to_string();
        let tenant_key = tenant_key.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.pool
            .run(move |conn| {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE tenant_key = ?1 AND sender_id = ?2
                     ORDER BY created_at DESC, id DESC LIMIT ?3"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![tenant_key, sender_id, limit], message_from_row)?;
                let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                messages.reverse();
                Ok(messages)
            })
            .await
    }

    /// Counts for the calendar day containing `now` in the tenant's timezone.
    pub async fn message_counts_on(
        &self,
        tenant_key: &str,
        now: DateTime<Utc>,
    ) -> Result<MessageCounts> {
        let tenant_key = tenant_key.to_string();
        let fallback_tz = self.default_timezone;
        self.pool
            .run(move |conn| {
                let tz = select_tenant(conn, &tenant_key, false)?
                    .and_then(|t| t.tz())
                    .unwrap_or(fallback_tz);
                let (start, end) = local_day_bounds(now, tz);
                let mut stmt = conn.prepare(
                    "SELECT direction, COUNT(*) FROM messages
                     WHERE tenant_key = ?1 AND created_at >= ?2 AND created_at < ?3
                     GROUP BY direction",
                )?;
                let rows = stmt.query_map(
                    params![tenant_key, format_timestamp(start), format_timestamp(end)],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )?;
                let mut counts = MessageCounts::default();
                for row in rows {
                    let (direction, n) = row?;
                    let n = u64::try_from(n).unwrap_or_default();
                    match Direction::parse(&direction) {
                        Some(Direction::Inbound) => counts.inbound += n,
                        Some(Direction::Outbound) => counts.outbound += n,
                        None => {}
                    }
                }
                counts.total = counts.inbound + counts.outbound;
                Ok(counts)
            })
            .await
    }

    pub async fn unique_senders_since(
        &self,
        tenant_key: &str,
        since: DateTime<Utc>,
    ) -> Result<BTreeSet<String>> {
        let tenant_key = tenant_key.to_string();
        self.pool
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT sender_id FROM messages
                     WHERE tenant_key = ?1 AND direction = 'inbound' AND created_at >= ?2",
                )?;
                let rows = stmt.query_map(params![tenant_key, format_timestamp(since)], |row| {
                    row.get::<_, String>(0)
                })?;
                Ok(rows.collect::<rusqlite::Result<BTreeSet<_>>>()?)
            })
            .await
    }

    pub async fn try_list_tenants(&self) -> Result<Vec<Tenant>> {
        self.pool
            .run(|conn| {
                let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY created_at ASC, key ASC");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], tenant_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }
}

fn degrade<T: Default>(operation: &'static str, result: Result<T>) -> T {
    result.unwrap_or_else(|e| {
        tracing::warn!(operation, error = %e, "tenant store read failed");
        T::default()
    })
}

#[async_trait]
impl TenantStore for SqliteStore {
    async fn tenant(&self, key: &str) -> Option<Tenant> {
        degrade("tenant", self.try_tenant(key).await)
    }

    async fn tenant_by_routing_number(&self, number: &str) -> Option<Tenant> {
        degrade(
            "tenant_by_routing_number",
            self.try_tenant_by_routing_number(number).await,
        )
    }

    #[tracing::instrument(level = "info", skip_all, fields(tenant = %upsert.key))]
    async fn upsert_tenant(&self, upsert: TenantUpsert) -> Result<Tenant> {
        upsert.validate()?;
        let now = format_timestamp(Utc::now());
        self.pool
            .run(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO tenants (key, name, routing_number, instructions, language, active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, COALESCE(?5, ?6), 1, ?7, ?7)
                     ON CONFLICT(key) DO UPDATE SET
                         name = excluded.name,
                         routing_number = excluded.routing_number,
                         instructions = COALESCE(?4, tenants.instructions),
                         language = COALESCE(?5, tenants.language),
                         active = 1,
                         updated_at = excluded.updated_at",
                    params![
                        upsert.key.trim(),
                        upsert.name.trim(),
                        upsert.routing_number.trim(),
                        upsert.instructions,
                        upsert.language.as_deref().map(str::trim),
                        DEFAULT_LANGUAGE_TAG,
                        now,
                    ],
                )?;
                let tenant = select_tenant(&tx, upsert.key.trim(), false)?.ok_or_else(|| {
                    StoreError::Invalid(format!("tenant {} vanished after upsert", upsert.key))
                })?;
                tx.commit()?;
                Ok(tenant)
            })
            .await
    }

    async fn append_message(&self, message: NewMessage) {
        let tenant_key = message.tenant_key.clone();
        let direction = message.direction;
        if let Err(e) = self.try_append_message(message).await {
            tracing::warn!(tenant = %tenant_key, %direction, error = %e, "failed to log message");
        }
    }

    async fn recent_history(
        &self,
        sender_id: &str,
        tenant_key: &str,
        limit: usize,
    ) -> Vec<StoredMessage> {
        degrade(
            "recent_history",
            self.try_recent_history(sender_id, tenant_key, limit).await,
        )
    }

    async fn today_message_counts(&self, tenant_key: &str) -> MessageCounts {
        degrade(
            "today_message_counts",
            self.message_counts_on(tenant_key, Utc::now()).await,
        )
    }

    async fn recent_unique_senders(&self, tenant_key: &str, window_days: u32) -> BTreeSet<String> {
        let since = Utc::now() - ChronoDuration::days(i64::from(window_days));
        degrade(
            "recent_unique_senders",
            self.unique_senders_since(tenant_key, since).await,
        )
    }

    async fn list_tenants(&self) -> Vec<Tenant> {
        degrade("list_tenants", self.try_list_tenants().await)
    }

    #[tracing::instrument(level = "info", skip_all, fields(tenant = %key))]
    async fn update_schedule(&self, key: &str, patch: SchedulePatch) -> Result<Option<Tenant>> {
        let key = key.to_string();
        let now = Utc::now();
        self.pool
            .run(move |conn| {
                let tx = conn.transaction()?;
                let Some(mut tenant) = select_tenant(&tx, &key, false)? else {
                    return Ok(None);
                };
                patch.apply(&mut tenant)?;
                tenant.updated_at = now;
                tx.execute(
                    "UPDATE tenants SET open_hour = ?2, close_hour = ?3, daily_summary_time = ?4,
                         timezone = ?5, broadcast_message = ?6, broadcast_time = ?7, updated_at = ?8
                     WHERE key = ?1",
                    params![
                        key,
                        tenant.open_hour,
                        tenant.close_hour,
                        tenant.daily_summary_time,
                        tenant.timezone,
                        tenant.broadcast_message,
                        tenant.broadcast_time,
                        format_timestamp(now),
                    ],
                )?;
                tx.commit()?;
                Ok(Some(tenant))
            })
            .await
    }

    async fn set_active(&self, key: &str, active: bool) -> Result<bool> {
        let key = key.to_string();
        let now = format_timestamp(Utc::now());
        self.pool
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE tenants SET active = ?2, updated_at = ?3 WHERE key = ?1",
                    params![key, active, now],
                )?;
                Ok(changed > 0)
            })
            .await
    }
}

fn select_tenant(conn: &Connection, key: &str, active_only: bool) -> Result<Option<Tenant>> {
    let filter = if active_only { " AND active = 1" } else { "" };
    let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE key = ?1{filter}");
    Ok(conn.query_row(&sql, params![key], tenant_from_row).optional()?)
}

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        key: row.get(0)?,
        name: row.get(1)?,
        routing_number: row.get(2)?,
        instructions: row.get(3)?,
        language: row.get(4)?,
        active: row.get(5)?,
        open_hour: row.get(6)?,
        close_hour: row.get(7)?,
        daily_summary_time: row.get(8)?,
        timezone: row.get(9)?,
        broadcast_message: row.get(10)?,
        broadcast_time: row.get(11)?,
        created_at: parse_timestamp(&row.get::<_, String>(12)?)?,
        updated_at: parse_timestamp(&row.get::<_, String>(13)?)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let direction: String = row.get(3)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        tenant_key: row.get(1)?,
        sender_id: row.get(2)?,
        direction: Direction::parse(&direction).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(3, direction.clone(), rusqlite::types::Type::Text)
        })?,
        body: row.get(4)?,
        language: row.get(5)?,
        created_at: parse_timestamp(&row.get::<_, String>(6)?)?,
    })
}

/// UTC instants of local midnight starting the day that contains `now`, and of the
/// following local midnight.
fn local_day_bounds(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = now.with_timezone(&tz).date_naive();
    let start_of = |date: chrono::NaiveDate| {
        tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            // Midnight skipped by a DST jump: fall back to the UTC reading.
            .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
    };
    let next = day.succ_opt().unwrap_or(day);
    (start_of(day), start_of(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(StoreConfig::new(dir.path().join("relay.db")))
            .expect("open store");
        (dir, store)
    }

    fn cafe() -> TenantUpsert {
        TenantUpsert {
            key: "cafe-1".to_string(),
            name: "Cafe One".to_string(),
            routing_number: "whatsapp:+14155238886".to_string(),
            instructions: Some("Be brief about {BUSINESS_NAME}.".to_string()),
            language: Some("en".to_string()),
        }
    }

    fn message(sender: &str, direction: Direction, body: &str) -> NewMessage {
        NewMessage {
            tenant_key: "cafe-1".to_string(),
            sender_id: sender.to_string(),
            direction,
            body: body.to_string(),
            language: Some("en".to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_omitted_fields() {
        let (_dir, store) = open_store();
        let first = store.upsert_tenant(cafe()).await.expect("first upsert");
        let second = store.upsert_tenant(cafe()).await.expect("second upsert");
        assert_eq!(first.key, second.key);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.list_tenants().await.len(), 1);

        let renamed = store
            .upsert_tenant(TenantUpsert {
                name: "Cafe Uno".to_string(),
                instructions: None,
                language: None,
                ..cafe()
            })
            .await
            .expect("rename");
        assert_eq!(renamed.name, "Cafe Uno");
        assert_eq!(renamed.instructions.as_deref(), Some("Be brief about {BUSINESS_NAME}."));
        assert_eq!(renamed.language, "en");
    }

    #[tokio::test]
    async fn upsert_rejects_blank_required_fields() {
        let (_dir, store) = open_store();
        let err = store
            .upsert_tenant(TenantUpsert {
                name: "  ".to_string(),
                ..cafe()
            })
            .await
            .expect_err("blank name");
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn routing_lookup_ignores_prefix_and_falls_back_to_default() {
        let (_dir, store) = open_store();
        store.upsert_tenant(cafe()).await.expect("upsert cafe");
        store
            .upsert_tenant(TenantUpsert {
                key: "default".to_string(),
                name: "Demo Business".to_string(),
                routing_number: "+10000000000".to_string(),
                ..TenantUpsert::default()
            })
            .await
            .expect("upsert default");

        let hit = store.tenant_by_routing_number("+14155238886").await.expect("bare match");
        assert_eq!(hit.key, "cafe-1");
        let hit = store
            .tenant_by_routing_number("whatsapp:+14155238886")
            .await
            .expect("prefixed match");
        assert_eq!(hit.key, "cafe-1");
        let fallback = store
            .tenant_by_routing_number("whatsapp:+19999999999")
            .await
            .expect("default fallback");
        assert_eq!(fallback.key, "default");

        assert!(store.set_active("cafe-1", false).await.expect("deactivate"));
        let after = store
            .tenant_by_routing_number("+14155238886")
            .await
            .expect("falls back once inactive");
        assert_eq!(after.key, "default");
        assert!(store.tenant("cafe-1").await.is_none());
        assert!(!store.set_active("nope", true).await.expect("unknown tenant"));
    }

    #[tokio::test]
    async fn no_default_tenant_means_no_match() {
        let (_dir, store) = open_store();
        assert!(store.tenant_by_routing_number("+1").await.is_none());
    }

    #[tokio::test]
    async fn history_is_most_recent_window_oldest_first() {
        let (_dir, store) = open_store();
        for i in 0..7 {
            let direction = if i % 2 == 0 { Direction::Inbound } else { Direction::Outbound };
            store
                .append_message(message("+8801711111111", direction, &format!("m{i}")))
                .await;
        }
        store
            .append_message(message("+15550000000", Direction::Inbound, "other sender"))
            .await;

        let history = store.recent_history("+8801711111111", "cafe-1", 5).await;
        let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m3", "m4", "m5", "m6"]);
        assert!(history.windows(2).all(|w| (w[0].created_at, w[0].id) < (w[1].created_at, w[1].id)));
        assert!(store.recent_history("+8801711111111", "other", 5).await.is_empty());
    }

    #[tokio::test]
    async fn counts_and_unique_senders() {
        let (_dir, store) = open_store();
        store.upsert_tenant(cafe()).await.expect("upsert");
        store.append_message(message("+1", Direction::Inbound, "a")).await;
        store.append_message(message("+1", Direction::Outbound, "b")).await;
        store.append_message(message("+2", Direction::Inbound, "c")).await;
        store.append_message(message("+3", Direction::Outbound, "broadcast")).await;

        let counts = store.today_message_counts("cafe-1").await;
        assert_eq!(
            counts,
            MessageCounts {
                total: 4,
                inbound: 2,
                outbound: 2
            }
        );
        let yesterday = store
            .message_counts_on("cafe-1", Utc::now() - ChronoDuration::days(2))
            .await
            .expect("counts");
        assert_eq!(yesterday.total, 0);

        let senders = store.recent_unique_senders("cafe-1", 7).await;
        assert_eq!(senders.into_iter().collect::<Vec<_>>(), vec!["+1", "+2"]);
        let none = store
            .unique_senders_since("cafe-1", Utc::now() + ChronoDuration::minutes(1))
            .await
            .expect("senders");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn schedule_update_validates_and_persists() {
        let (_dir, store) = open_store();
        store.upsert_tenant(cafe()).await.expect("upsert");

        let patch: SchedulePatch = serde_json::from_str(
            r#"{"openHour": 9, "closeHour": 21, "timezone": "Asia/Dhaka", "dailySummaryTime": "20:00"}"#,
        )
        .expect("patch");
        let updated = store
            .update_schedule("cafe-1", patch)
            .await
            .expect("update")
            .expect("tenant exists");
        assert_eq!(updated.business_hours(), Some((9, 21)));

        let reread = store.tenant("cafe-1").await.expect("tenant");
        assert_eq!(reread.timezone.as_deref(), Some("Asia/Dhaka"));
        assert_eq!(reread.daily_summary_time.as_deref(), Some("20:00"));

        let bad: SchedulePatch = serde_json::from_str(r#"{"closeHour": 9}"#).expect("patch");
        assert!(matches!(
            store.update_schedule("cafe-1", bad).await,
            Err(StoreError::Invalid(_))
        ));
        let unchanged = store.tenant("cafe-1").await.expect("tenant");
        assert_eq!(unchanged.close_hour, Some(21));

        let missing = store
            .update_schedule("ghost", SchedulePatch::default())
            .await
            .expect("no error");
        assert!(missing.is_none());
    }

    #[test]
    fn day_bounds_follow_tenant_timezone() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 20, 0, 0).single().expect("valid");
        let (start, end) = local_day_bounds(now, chrono_tz::Asia::Dhaka);
        // Dhaka is UTC+6: 20:00Z is 02:00 on the 11th locally.
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).single().expect("valid"));
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 11, 18, 0, 0).single().expect("valid"));
    }
}
