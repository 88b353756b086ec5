use crate::error::Result;
use crate::types::{ChatMessage, ProviderKind, Usage};

/// A fully-specified HTTP call to a vendor, built before any I/O happens.
#[derive(Debug, Clone)]
pub struct VendorRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: serde_json::Value,
}

/// Request/response mapping for one hosted completion API.
///
/// Adapters are pure: they never perform I/O, which keeps the wire mapping testable
/// against captured payloads. `VendorClient` does the HTTP part.
pub trait VendorAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// `messages` holds only user/assistant turns in chronological order; the system
    /// prompt is passed separately because vendors place it differently.
    fn build_request(&self, system_prompt: &str, messages: &[ChatMessage])
    -> Result<VendorRequest>;

    fn extract_text(&self, body: &serde_json::Value) -> Result<String>;

    /// Not every vendor reports token usage.
    fn extract_usage(&self, body: &serde_json::Value) -> Option<Usage>;
}
