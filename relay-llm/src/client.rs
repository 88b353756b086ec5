use crate::anthropic::AnthropicAdapter;
use crate::error::{LlmError, Result};
use crate::gemini::GeminiAdapter;
use crate::openai::OpenAiAdapter;
use crate::types::{ChatMessage, Completion, ProviderKind};
use crate::vendor::VendorAdapter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// One hosted model reachable over the network.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<Completion>;
}

/// Drives a `VendorAdapter` over HTTP.
pub struct VendorClient<A> {
    http: reqwest::Client,
    adapter: A,
}

impl<A: VendorAdapter> VendorClient<A> {
    pub fn new(http: reqwest::Client, adapter: A) -> Self {
        Self { http, adapter }
    }
}

#[async_trait]
impl<A: VendorAdapter> CompletionProvider for VendorClient<A> {
    fn kind(&self) -> ProviderKind {
        self.adapter.kind()
    }

    fn model(&self) -> &str {
        self.adapter.model()
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.adapter.kind(), model = %self.adapter.model()))]
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<Completion> {
        let req = self.adapter.build_request(system_prompt, messages)?;

        let mut builder = self.http.post(&req.url).json(&req.body);
        for (name, value) in &req.headers {
            builder = builder.header(*name, value);
        }
        let response = builder.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Http(format!(
                "{} status={status} body={body}",
                self.adapter.kind()
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&body)?;
        let text = self.adapter.extract_text(&value)?;
        let usage = self.adapter.extract_usage(&value);
        tracing::debug!(chars = text.len(), ?usage, "completion received");
        Ok(Completion { text, usage })
    }
}

/// Credentials and model choice for one provider, as read from configuration.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
    /// Overrides the vendor endpoint; used for proxies and tests.
    pub base_url: Option<String>,
}

/// `timeout` should match the gateway's per-attempt budget so a request abandoned
/// by the gateway does not keep its connection busy.
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(%e, "reqwest client build failed; falling back to default client");
            reqwest::Client::new()
        })
}

#[tracing::instrument(level = "debug", skip_all, fields(provider = %creds.kind))]
pub fn build_provider(
    http: reqwest::Client,
    creds: &ProviderCredentials,
) -> Result<Arc<dyn CompletionProvider>> {
    let provider: Arc<dyn CompletionProvider> = match creds.kind {
        ProviderKind::OpenAi => {
            let mut a = OpenAiAdapter::new(&creds.api_key, &creds.model)?;
            if let Some(url) = &creds.base_url {
                a = a.with_url(url.clone());
            }
            Arc::new(VendorClient::new(http, a))
        }
        ProviderKind::Anthropic => {
            let mut a = AnthropicAdapter::new(&creds.api_key, &creds.model)?;
            if let Some(url) = &creds.base_url {
                a = a.with_url(url.clone());
            }
            Arc::new(VendorClient::new(http, a))
        }
        ProviderKind::Gemini => {
            let mut a = GeminiAdapter::new(&creds.api_key, &creds.model)?;
            if let Some(url) = &creds.base_url {
                a = a.with_base_url(url.clone());
            }
            Arc::new(VendorClient::new(http, a))
        }
    };
    Ok(provider)
}

/// Builds every provider whose credentials are present, skipping (with a warning)
/// the ones that fail validation.
pub fn build_providers(
    http: &reqwest::Client,
    creds: &[ProviderCredentials],
) -> Vec<Arc<dyn CompletionProvider>> {
    creds
        .iter()
        .filter_map(|c| match build_provider(http.clone(), c) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(provider = %c.kind, error = %e, "provider not configured");
                None
            }
        })
        .collect()
}
