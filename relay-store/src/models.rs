use crate::error::{Result, StoreError};
use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const DEFAULT_LANGUAGE_TAG: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub key: String,
    pub name: String,
    pub routing_number: String,
    pub instructions: Option<String>,
    pub language: String,
    pub active: bool,
    pub open_hour: Option<u8>,
    pub close_hour: Option<u8>,
    pub daily_summary_time: Option<String>,
    pub timezone: Option<String>,
    pub broadcast_message: Option<String>,
    pub broadcast_time: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Parsed IANA zone; `None` when unset or unknown.
    pub fn tz(&self) -> Option<Tz> {
        self.timezone.as_deref().and_then(|name| name.parse().ok())
    }

    /// Only meaningful when both hours are configured.
    pub fn business_hours(&self) -> Option<(u8, u8)> {
        Some((self.open_hour?, self.close_hour?))
    }
}

/// Admin create-or-update. `None` for `instructions`/`language` keeps what is stored.
#[derive(Debug, Clone, Default)]
pub struct TenantUpsert {
    pub key: String,
    pub name: String,
    pub routing_number: String,
    pub instructions: Option<String>,
    pub language: Option<String>,
}

impl TenantUpsert {
    pub(crate) fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("key", &self.key),
            ("name", &self.name),
            ("routing number", &self.routing_number),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::Invalid(format!("tenant {field} is required")));
            }
        }
        if let Some(tag) = &self.language {
            if tag.trim().is_empty() {
                return Err(StoreError::Invalid("language tag is empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Partial schedule update. Outer `None` leaves a field alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePatch {
    #[serde(default, deserialize_with = "present")]
    pub open_hour: Option<Option<u8>>,
    #[serde(default, deserialize_with = "present")]
    pub close_hour: Option<Option<u8>>,
    #[serde(default, deserialize_with = "present")]
    pub daily_summary_time: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub timezone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub broadcast_message: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub broadcast_time: Option<Option<String>>,
}

fn present<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SchedulePatch {
    pub fn is_empty(&self) -> bool {
        self.open_hour.is_none()
            && self.close_hour.is_none()
            && self.daily_summary_time.is_none()
            && self.timezone.is_none()
            && self.broadcast_message.is_none()
            && self.broadcast_time.is_none()
    }

    /// Applies the patch to `tenant` and checks the merged schedule.
    pub(crate) fn apply(self, tenant: &mut Tenant) -> Result<()> {
        if let Some(v) = self.open_hour {
            tenant.open_hour = v;
        }
        if let Some(v) = self.close_hour {
            tenant.close_hour = v;
        }
        if let Some(v) = self.daily_summary_time {
            tenant.daily_summary_time = v.map(|t| t.trim().to_string());
        }
        if let Some(v) = self.timezone {
            tenant.timezone = v.map(|t| t.trim().to_string());
        }
        if let Some(v) = self.broadcast_message {
            tenant.broadcast_message = v;
        }
        if let Some(v) = self.broadcast_time {
            tenant.broadcast_time = v.map(|t| t.trim().to_string());
        }
        validate_schedule(tenant)
    }
}

fn validate_schedule(t: &Tenant) -> Result<()> {
    for (field, hour) in [("open hour", t.open_hour), ("close hour", t.close_hour)] {
        if let Some(h) = hour {
            if h > 23 {
                return Err(StoreError::Invalid(format!("{field} must be 0-23, got {h}")));
            }
        }
    }
    if let Some((open, close)) = t.business_hours() {
        if open == close {
            return Err(StoreError::Invalid(
                "open and close hours must differ".to_string(),
            ));
        }
    }
    for (field, time) in [
        ("daily summary time", &t.daily_summary_time),
        ("broadcast time", &t.broadcast_time),
    ] {
        if let Some(value) = time {
            parse_hhmm(value).ok_or_else(|| {
                StoreError::Invalid(format!("{field} must be HH:MM, got {value:?}"))
            })?;
        }
    }
    if let Some(name) = &t.timezone {
        name.parse::<Tz>()
            .map_err(|_| StoreError::Invalid(format!("unknown timezone {name:?}")))?;
    }
    if t.broadcast_time.is_some()
        && t.broadcast_message
            .as_deref()
            .is_none_or(|m| m.trim().is_empty())
    {
        return Err(StoreError::Invalid(
            "broadcast time requires a broadcast message".to_string(),
        ));
    }
    Ok(())
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    if value.len() != 5 {
        return None;
    }
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_key: String,
    pub sender_id: String,
    pub direction: Direction,
    pub body: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub tenant_key: String,
    pub sender_id: String,
    pub direction: Direction,
    pub body: String,
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageCounts {
    pub total: u64,
    pub inbound: u64,
    pub outbound: u64,
}

/// Fixed-width so that lexical order in SQL equals chronological order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}
