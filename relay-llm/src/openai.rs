use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ProviderKind, Role, Usage};
use crate::vendor::{VendorAdapter, VendorRequest};
use serde::{Deserialize, Serialize};

const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Clone)]
pub struct OpenAiAdapter {
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::MissingCredentials("openai".to_string()));
        }
        let model = model.trim();
        Ok(Self {
            api_key: api_key.to_string(),
            model: if model.is_empty() {
                OPENAI_DEFAULT_MODEL.to_string()
            } else {
                model.to_string()
            },
            url: OPENAI_CHAT_COMPLETIONS_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl VendorAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<VendorRequest> {
        let req = OpenAiChatRequest::new(&self.model, system_prompt, messages);
        Ok(VendorRequest {
            url: self.url.clone(),
            headers: vec![("authorization", format!("Bearer {}", self.api_key))],
            body: serde_json::to_value(req)?,
        })
    }

    fn extract_text(&self, body: &serde_json::Value) -> Result<String> {
        let parsed: OpenAiChatResponse = serde_json::from_value(body.clone())?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("openai response missing choices".to_string())
        })?;
        choice.message.content.ok_or_else(|| {
            LlmError::ResponseFormat("openai response missing message content".to_string())
        })
    }

    fn extract_usage(&self, body: &serde_json::Value) -> Option<Usage> {
        let usage: OpenAiUsage = serde_json::from_value(body.get("usage")?.clone()).ok()?;
        Some(Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

impl OpenAiChatRequest {
    fn new(model: &str, system_prompt: &str, messages: &[ChatMessage]) -> Self {
        let mut out = Vec::with_capacity(messages.len() + 1);
        out.push(OpenAiMessage {
            role: "system",
            content: system_prompt.to_string(),
        });
        out.extend(messages.iter().map(to_openai_message));
        Self {
            model: model.to_string(),
            messages: out,
            max_tokens: 500,
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.3,
            presence_penalty: 0.3,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    OpenAiMessage {
        role,
        content: m.content.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
