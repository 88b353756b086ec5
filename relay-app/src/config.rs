//! Relay configuration loader.
//!
//! TOML file first (missing file means defaults), then environment overrides.

use chrono_tz::Tz;
use relay_channels::SEND_TIMEOUT;
use relay_llm::{ProviderCredentials, ProviderKind};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub channels: ChannelsConfig,
    pub llm: LlmConfig,
    pub relay: RelaySettings,
    pub admin: AdminConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub http_timeout_seconds: u64,
    pub http_max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            http_timeout_seconds: 150,
            http_max_in_flight: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: usize,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data/warelay.db".to_string(),
            max_connections: 4,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub twilio: TwilioConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub whatsapp_number: String,
    /// Reject webhooks whose `X-Twilio-Signature` does not verify.
    pub validate_signatures: bool,
    /// Public URL Twilio posts to; the signature covers it.
    pub public_webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub primary: String,
    pub timeout_seconds: u64,
    pub openai: VendorConfig,
    pub anthropic: VendorConfig,
    pub gemini: VendorConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::OpenAi.as_str().to_string(),
            timeout_seconds: 30,
            openai: VendorConfig::default(),
            anthropic: VendorConfig::default(),
            gemini: VendorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub api_key: String,
    /// Blank selects the vendor default model.
    pub model: String,
    pub base_url: Option<String>,
}

impl VendorConfig {
    pub fn configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub default_tenant_key: String,
    /// Fallback business name in prompts when a tenant has none.
    pub default_business_name: String,
    /// Name given to the default tenant when it is seeded at startup.
    pub seed_tenant_name: String,
    pub rate_limit: u32,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_sweep_seconds: u64,
    pub history_limit: usize,
    pub default_timezone: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            default_tenant_key: "default".to_string(),
            default_business_name: relay_llm::DEFAULT_BUSINESS_NAME.to_string(),
            seed_tenant_name: "Demo Business".to_string(),
            rate_limit: 50,
            rate_limit_window_seconds: 3600,
            rate_limit_sweep_seconds: 600,
            history_limit: 5,
            default_timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_seconds: u64,
    /// Receives every tenant's daily summary; summaries are skipped when unset.
    pub summary_recipient: Option<String>,
    pub broadcast_window_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: 60,
            summary_recipient: None,
            broadcast_window_days: 7,
        }
    }
}

impl RelayConfig {
    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str::<RelayConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(config_path = %path.display(), "config file not found; using defaults");
                RelayConfig::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|name| std::env::var(name).ok());
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    /// `lookup` returns the raw value of an environment variable; blank values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("PORT") {
            match v.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %v, "ignoring non-numeric PORT"),
            }
        }
        if let Some(v) = var("DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = var("TWILIO_ACCOUNT_SID") {
            self.channels.twilio.account_sid = v;
        }
        if let Some(v) = var("TWILIO_AUTH_TOKEN") {
            self.channels.twilio.auth_token = v;
        }
        if let Some(v) = var("TWILIO_WHATSAPP_NUMBER") {
            self.channels.twilio.whatsapp_number = v;
        }
        if let Some(v) = var("WEBHOOK_PUBLIC_URL") {
            self.channels.twilio.public_webhook_url = Some(v);
        }
        if let Some(v) = var("AI_PROVIDER") {
            self.llm.primary = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.openai.api_key = v;
        }
        if let Some(v) = var("OPENAI_MODEL") {
            self.llm.openai.model = v;
        }
        if let Some(v) = var("ANTHROPIC_API_KEY") {
            self.llm.anthropic.api_key = v;
        }
        if let Some(v) = var("CLAUDE_MODEL") {
            self.llm.anthropic.model = v;
        }
        if let Some(v) = var("GEMINI_API_KEY") {
            self.llm.gemini.api_key = v;
        }
        if let Some(v) = var("GEMINI_MODEL") {
            self.llm.gemini.model = v;
        }
        if let Some(v) = var("BUSINESS_NAME") {
            self.relay.default_business_name = v.clone();
            self.relay.seed_tenant_name = v;
        }
        if let Some(v) = var("RATE_LIMIT") {
            match v.trim().parse() {
                Ok(limit) => self.relay.rate_limit = limit,
                Err(_) => tracing::warn!(value = %v, "ignoring non-numeric RATE_LIMIT"),
            }
        }
        if let Some(v) = var("DEFAULT_TIMEZONE") {
            self.relay.default_timezone = v;
        }
        if let Some(v) = var("ADMIN_TOKEN") {
            self.admin.token = Some(v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        self.bind_addr()?;
        if self.database.path.trim().is_empty() {
            return Err(anyhow::anyhow!("database.path is required"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("database.max_connections must be > 0"));
        }
        self.primary_provider()?;
        if self.llm.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("llm.timeout_seconds must be > 0"));
        }
        if self.relay.default_tenant_key.trim().is_empty() {
            return Err(anyhow::anyhow!("relay.default_tenant_key is required"));
        }
        if self.relay.rate_limit == 0 {
            return Err(anyhow::anyhow!("relay.rate_limit must be > 0"));
        }
        if self.relay.rate_limit_window_seconds == 0 || self.relay.rate_limit_sweep_seconds == 0 {
            return Err(anyhow::anyhow!(
                "relay.rate_limit_window_seconds and relay.rate_limit_sweep_seconds must be > 0"
            ));
        }
        self.default_timezone()?;
        let budget = self.worst_case_reply_duration();
        if Duration::from_secs(self.server.http_timeout_seconds) <= budget {
            return Err(anyhow::anyhow!(
                "server.http_timeout_seconds={} must exceed the worst-case reply time of {}s \
                 (every configured provider timing out at llm.timeout_seconds, then the send)",
                self.server.http_timeout_seconds,
                budget.as_secs()
            ));
        }
        if self.scheduler.enabled && self.scheduler.tick_seconds == 0 {
            return Err(anyhow::anyhow!("scheduler.tick_seconds must be > 0"));
        }
        let twilio = &self.channels.twilio;
        if twilio.validate_signatures
            && twilio
                .public_webhook_url
                .as_deref()
                .is_none_or(|u| u.trim().is_empty())
        {
            return Err(anyhow::anyhow!(
                "channels.twilio.validate_signatures requires channels.twilio.public_webhook_url"
            ));
        }
        if twilio.validate_signatures && twilio.auth_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "channels.twilio.validate_signatures requires channels.twilio.auth_token"
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.server.host.trim(), self.server.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server.host {:?}: {e}", self.server.host))
    }

    pub fn primary_provider(&self) -> anyhow::Result<ProviderKind> {
        ProviderKind::parse(&self.llm.primary).ok_or_else(|| {
            anyhow::anyhow!(
                "unsupported llm.primary={:?}; expected one of: openai, anthropic, gemini",
                self.llm.primary
            )
        })
    }

    pub fn default_timezone(&self) -> anyhow::Result<Tz> {
        self.relay
            .default_timezone
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown relay.default_timezone {:?}", self.relay.default_timezone))
    }

    /// Longest a webhook can legitimately take: one timed-out attempt per
    /// configured provider followed by the outbound send.
    pub fn worst_case_reply_duration(&self) -> Duration {
        let providers = u32::try_from(self.provider_credentials().len()).unwrap_or(u32::MAX);
        Duration::from_secs(self.llm.timeout_seconds)
            .saturating_mul(providers)
            .saturating_add(SEND_TIMEOUT)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.relay.rate_limit_window_seconds)
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Credentials for every vendor that has an API key, in a fixed order.
    pub fn provider_credentials(&self) -> Vec<ProviderCredentials> {
        [
            (ProviderKind::OpenAi, &self.llm.openai),
            (ProviderKind::Anthropic, &self.llm.anthropic),
            (ProviderKind::Gemini, &self.llm.gemini),
        ]
        .into_iter()
        .filter(|(_, v)| v.configured())
        .map(|(kind, v)| ProviderCredentials {
            kind,
            api_key: v.api_key.trim().to_string(),
            model: v.model.trim().to_string(),
            base_url: v.base_url.clone(),
        })
        .collect()
    }

    pub fn twilio_configured(&self) -> bool {
        let t = &self.channels.twilio;
        !t.account_sid.trim().is_empty()
            && !t.auth_token.trim().is_empty()
            && !t.whatsapp_number.trim().is_empty()
    }
}

pub fn default_config_path() -> PathBuf {
    Path::new(".").join("warelay.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = RelayConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.relay.history_limit, 5);
        assert_eq!(cfg.relay.rate_limit, 50);
        assert_eq!(cfg.primary_provider().expect("primary"), ProviderKind::OpenAi);
        assert!(cfg.provider_credentials().is_empty());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: RelayConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [llm]
            primary = "claude"

            [llm.anthropic]
            api_key = "ak"

            [relay]
            rate_limit = 3
            default_timezone = "Asia/Dhaka"
            "#,
        )
        .expect("parse toml");
        cfg.validate().expect("valid");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.primary_provider().expect("primary"), ProviderKind::Anthropic);
        assert_eq!(cfg.default_timezone().expect("tz"), chrono_tz::Asia::Dhaka);
        let creds = cfg.provider_credentials();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].kind, ProviderKind::Anthropic);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut cfg = RelayConfig::default();
        cfg.apply_env_overrides(env(&[
            ("PORT", "4000"),
            ("AI_PROVIDER", "gemini"),
            ("GEMINI_API_KEY", "g-key"),
            ("OPENAI_API_KEY", "   "),
            ("BUSINESS_NAME", "Cafe One"),
            ("RATE_LIMIT", "3"),
            ("ADMIN_TOKEN", "s3cret"),
            ("TWILIO_WHATSAPP_NUMBER", "whatsapp:+14155238886"),
        ]));
        cfg.validate().expect("valid");
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.primary_provider().expect("primary"), ProviderKind::Gemini);
        assert_eq!(cfg.relay.default_business_name, "Cafe One");
        assert_eq!(cfg.relay.seed_tenant_name, "Cafe One");
        assert_eq!(cfg.relay.rate_limit, 3);
        assert_eq!(cfg.admin_token(), Some("s3cret"));
        assert!(!cfg.llm.openai.configured());
        assert!(!cfg.twilio_configured());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = RelayConfig::default();
        cfg.llm.primary = "mistral".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.relay.default_timezone = "Nowhere/Special".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = RelayConfig::default();
        cfg.channels.twilio.validate_signatures = true;
        assert!(cfg.validate().is_err());
        cfg.channels.twilio.public_webhook_url = Some("https://relay.example.com/webhook".to_string());
        assert!(cfg.validate().is_err());
        cfg.channels.twilio.auth_token = "twilio-token".to_string();
        cfg.validate().expect("valid with public url and auth token");
    }

    #[test]
    fn http_timeout_must_outlast_the_provider_chain_and_send() {
        let mut cfg = RelayConfig::default();
        cfg.llm.openai.api_key = "sk".to_string();
        cfg.llm.anthropic.api_key = "ak".to_string();
        cfg.llm.gemini.api_key = "g".to_string();
        assert_eq!(cfg.worst_case_reply_duration(), Duration::from_secs(120));
        cfg.validate().expect("default http timeout covers three providers");

        cfg.server.http_timeout_seconds = 120;
        assert!(cfg.validate().is_err());

        cfg.llm.gemini.api_key.clear();
        cfg.validate().expect("two providers fit in 120s");

        cfg.llm.timeout_seconds = 60;
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cfg, path) = RelayConfig::load_with_path(Some(dir.path().join("absent.toml")))
            .await
            .expect("load defaults");
        assert!(path.ends_with("absent.toml"));
        assert_eq!(cfg.relay.default_tenant_key, "default");
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warelay.toml");
        tokio::fs::write(&path, "[server\nport = ")
            .await
            .expect("write config");
        assert!(RelayConfig::load(Some(path)).await.is_err());
    }
}
