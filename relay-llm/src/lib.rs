//! Reply generation over hosted LLM vendors.
//!
//! Pure HTTP clients plus the fallback gateway; no storage or messaging concerns.

mod anthropic;
mod client;
mod error;
mod gateway;
mod gemini;
mod language;
mod openai;
mod types;
mod vendor;

pub use anthropic::{ANTHROPIC_DEFAULT_MODEL, AnthropicAdapter};
pub use client::{
    CompletionProvider, ProviderCredentials, VendorClient, build_http_client, build_provider,
    build_providers,
};
pub use error::{LlmError, Result};
pub use gateway::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BUSINESS_NAME, ReplyGateway, ReplyGatewayConfig,
    build_messages,
};
pub use gemini::{GEMINI_DEFAULT_MODEL, GeminiAdapter};
pub use language::{Language, detect_language, render_system_prompt};
pub use openai::{OPENAI_DEFAULT_MODEL, OpenAiAdapter};
pub use types::{
    ChatMessage, Completion, ProviderKind, ProviderReply, ProviderSummary, Role, TenantContext,
    Usage,
};
pub use vendor::{VendorAdapter, VendorRequest};
