use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ProviderKind, Role, Usage};
use crate::vendor::{VendorAdapter, VendorRequest};
use serde::{Deserialize, Serialize};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1/models";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini receives the whole exchange as one flattened prompt: the system prompt,
/// a `Recent conversation:` transcript, then the current user turn.
#[derive(Clone)]
pub struct GeminiAdapter {
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::MissingCredentials("gemini".to_string()));
        }
        let model = model.trim();
        Ok(Self {
            api_key: api_key.to_string(),
            model: if model.is_empty() {
                GEMINI_DEFAULT_MODEL.to_string()
            } else {
                model.to_string()
            },
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl VendorAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<VendorRequest> {
        let prompt = flatten_prompt(system_prompt, messages)?;
        let req = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: 500,
            },
        };
        Ok(VendorRequest {
            url: format!("{}/{}:generateContent", self.base_url, self.model),
            // Header auth keeps the key out of request URLs and therefore out of logs.
            headers: vec![("x-goog-api-key", self.api_key.clone())],
            body: serde_json::to_value(req)?,
        })
    }

    fn extract_text(&self, body: &serde_json::Value) -> Result<String> {
        let parsed: GeminiResponse = serde_json::from_value(body.clone())?;
        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("gemini response missing candidates".to_string())
        })?;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::ResponseFormat(
                "gemini candidate has no text parts".to_string(),
            ));
        }
        Ok(text)
    }

    fn extract_usage(&self, body: &serde_json::Value) -> Option<Usage> {
        let usage: GeminiUsage =
            serde_json::from_value(body.get("usageMetadata")?.clone()).ok()?;
        Some(Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
        })
    }
}

fn flatten_prompt(system_prompt: &str, messages: &[ChatMessage]) -> Result<String> {
    let Some((current, earlier)) = messages.split_last() else {
        return Err(LlmError::InvalidInput(
            "gemini request needs at least one message".to_string(),
        ));
    };

    let mut prompt = format!("{system_prompt}\n\n");
    let transcript: Vec<&ChatMessage> = earlier
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    if !transcript.is_empty() {
        prompt.push_str("Recent conversation:\n");
        for m in transcript {
            let speaker = if m.role == Role::User { "User" } else { "Assistant" };
            prompt.push_str(&format!("{speaker}: {}\n", m.content));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("User: {}\nAssistant:", current.content));
    Ok(prompt)
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}
