use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ProviderKind, Role, Usage};
use crate::vendor::{VendorAdapter, VendorRequest};
use serde::{Deserialize, Serialize};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Clone)]
pub struct AnthropicAdapter {
    api_key: String,
    model: String,
    url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::MissingCredentials("anthropic".to_string()));
        }
        let model = model.trim();
        Ok(Self {
            api_key: api_key.to_string(),
            model: if model.is_empty() {
                ANTHROPIC_DEFAULT_MODEL.to_string()
            } else {
                model.to_string()
            },
            url: ANTHROPIC_MESSAGES_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl VendorAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<VendorRequest> {
        let req = AnthropicRequest::new(&self.model, system_prompt, messages)?;
        Ok(VendorRequest {
            url: self.url.clone(),
            headers: vec![
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: serde_json::to_value(req)?,
        })
    }

    fn extract_text(&self, body: &serde_json::Value) -> Result<String> {
        let parsed: AnthropicResponse = serde_json::from_value(body.clone())?;
        parsed
            .content
            .into_iter()
            .find_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .ok_or_else(|| {
                LlmError::ResponseFormat("anthropic response has no text block".to_string())
            })
    }

    fn extract_usage(&self, body: &serde_json::Value) -> Option<Usage> {
        let usage: AnthropicUsage = serde_json::from_value(body.get("usage")?.clone()).ok()?;
        Some(Usage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
}

impl AnthropicRequest {
    /// The messages API requires the conversation to open with a user turn and to
    /// alternate roles, so leading assistant turns are dropped and runs of the same
    /// role are joined.
    fn new(model: &str, system_prompt: &str, messages: &[ChatMessage]) -> Result<Self> {
        let mut out: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());
        for m in messages {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => continue,
            };
            if out.is_empty() && role == "assistant" {
                continue;
            }
            match out.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push('\n');
                    last.content.push_str(&m.content);
                }
                _ => out.push(AnthropicMessage {
                    role,
                    content: m.content.clone(),
                }),
            }
        }
        if out.is_empty() {
            return Err(LlmError::InvalidInput(
                "anthropic request needs at least one user message".to_string(),
            ));
        }

        Ok(Self {
            model: model.to_string(),
            max_tokens: 600,
            system: system_prompt.to_string(),
            messages: out,
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
