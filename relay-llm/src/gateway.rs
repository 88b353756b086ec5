use crate::client::CompletionProvider;
use crate::error::LlmError;
use crate::language::{Language, detect_language, render_system_prompt};
use crate::types::{ChatMessage, ProviderKind, ProviderReply, ProviderSummary, TenantContext};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BUSINESS_NAME: &str = "our business";
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ReplyGatewayConfig {
    pub primary: ProviderKind,
    pub default_business_name: String,
    pub attempt_timeout: Duration,
}

impl Default for ReplyGatewayConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::OpenAi,
            default_business_name: DEFAULT_BUSINESS_NAME.to_string(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// Produces a reply for one inbound message, falling back across providers.
///
/// Every configured provider is tried at most once per call. The gateway never
/// fails: when all providers are exhausted the caller gets the localized apology
/// with `success = false`.
pub struct ReplyGateway {
    providers: Vec<Arc<dyn CompletionProvider>>,
    config: ReplyGatewayConfig,
}

impl ReplyGateway {
    pub fn new(providers: Vec<Arc<dyn CompletionProvider>>, config: ReplyGatewayConfig) -> Self {
        Self { providers, config }
    }

    pub fn primary(&self) -> ProviderKind {
        self.config.primary
    }

    pub fn providers(&self) -> Vec<ProviderSummary> {
        self.providers
            .iter()
            .map(|p| ProviderSummary {
                kind: p.kind(),
                model: p.model().to_string(),
            })
            .collect()
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.iter().any(|p| p.kind() == kind)
    }

    /// Providers in the order they will be tried: the override (or configured
    /// primary) first, the rest in registration order.
    pub fn attempt_order(
        &self,
        primary_override: Option<ProviderKind>,
    ) -> Vec<Arc<dyn CompletionProvider>> {
        let first = primary_override.unwrap_or(self.config.primary);
        let mut ordered: Vec<Arc<dyn CompletionProvider>> = self
            .providers
            .iter()
            .filter(|p| p.kind() == first)
            .cloned()
            .collect();
        ordered.extend(self.providers.iter().filter(|p| p.kind() != first).cloned());
        ordered
    }

    pub fn build_system_prompt(&self, tenant: &TenantContext, language: Language) -> String {
        let business_name = tenant
            .business_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.config.default_business_name);
        let template = tenant
            .instructions
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| language.default_system_prompt());
        render_system_prompt(template, business_name)
    }

    #[tracing::instrument(level = "info", skip_all, fields(history = history.len()))]
    pub async fn generate_reply(
        &self,
        user_text: &str,
        history: &[ChatMessage],
        tenant: &TenantContext,
        primary_override: Option<ProviderKind>,
    ) -> ProviderReply {
        let language = detect_language(user_text);
        let system_prompt = self.build_system_prompt(tenant, language);
        let messages = build_messages(history, user_text);

        let mut last_error: Option<String> = None;
        for provider in self.attempt_order(primary_override) {
            let kind = provider.kind();
            let attempt = tokio::time::timeout(
                self.config.attempt_timeout,
                provider.complete(&system_prompt, &messages),
            )
            .await;

            let error = match attempt {
                Ok(Ok(completion)) => {
                    let text = completion.text.trim();
                    if !text.is_empty() {
                        tracing::info!(provider = %kind, model = provider.model(), %language, "reply generated");
                        return ProviderReply {
                            success: true,
                            text: text.to_string(),
                            language,
                            provider: Some(kind),
                            model: Some(provider.model().to_string()),
                            usage: completion.usage,
                            error: None,
                        };
                    }
                    "provider returned empty text".to_string()
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => LlmError::Timeout(self.config.attempt_timeout).to_string(),
            };
            tracing::warn!(provider = %kind, error = %error, "provider attempt failed; trying next");
            last_error = Some(format!("{kind}: {error}"));
        }

        let error = last_error.unwrap_or_else(|| "no providers configured".to_string());
        tracing::error!(error = %error, "all providers failed; replying with apology");
        ProviderReply {
            success: false,
            text: language.apology().to_string(),
            language,
            provider: None,
            model: None,
            usage: None,
            error: Some(error),
        }
    }
}

/// Prior turns in chronological order followed by the new user message.
pub fn build_messages(history: &[ChatMessage], user_text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(user_text));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LlmError, Result};
    use crate::types::{Completion, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Reply(&'static str),
        Fail,
        Hang,
    }

    struct FakeProvider {
        kind: ProviderKind,
        behavior: Behavior,
        calls: AtomicUsize,
        last_system: Mutex<Option<String>>,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior,
                calls: AtomicUsize::new(0),
                last_system: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn model(&self) -> &str {
            "fake-model"
        }

        async fn complete(&self, system_prompt: &str, _messages: &[ChatMessage]) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_system.lock().expect("lock") = Some(system_prompt.to_string());
            match self.behavior {
                Behavior::Reply(text) => Ok(Completion {
                    text: text.to_string(),
                    usage: Some(Usage {
                        prompt_tokens: 10,
                        completion_tokens: 2,
                    }),
                }),
                Behavior::Fail => Err(LlmError::Http("status=500".to_string())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(LlmError::Timeout(Duration::from_secs(3600)))
                }
            }
        }
    }

    fn gateway(providers: Vec<Arc<dyn CompletionProvider>>, primary: ProviderKind) -> ReplyGateway {
        ReplyGateway::new(
            providers,
            ReplyGatewayConfig {
                primary,
                default_business_name: DEFAULT_BUSINESS_NAME.to_string(),
                attempt_timeout: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn secondary_provider_answers_when_primary_fails() {
        let openai = FakeProvider::new(ProviderKind::OpenAi, Behavior::Fail);
        let claude = FakeProvider::new(ProviderKind::Anthropic, Behavior::Reply("  Yes, we do!  "));
        let gw = gateway(vec![openai.clone(), claude.clone()], ProviderKind::OpenAi);

        let reply = gw
            .generate_reply("Do you deliver?", &[], &TenantContext::default(), None)
            .await;
        assert!(reply.success);
        assert_eq!(reply.text, "Yes, we do!");
        assert_eq!(reply.provider, Some(ProviderKind::Anthropic));
        assert_eq!(reply.language, Language::English);
        assert_eq!(openai.calls(), 1);
        assert_eq!(claude.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_chain_returns_localized_apology() {
        let openai = FakeProvider::new(ProviderKind::OpenAi, Behavior::Fail);
        let gemini = FakeProvider::new(ProviderKind::Gemini, Behavior::Reply("   "));
        let gw = gateway(vec![openai.clone(), gemini.clone()], ProviderKind::OpenAi);

        let reply = gw
            .generate_reply("আপনারা কি খোলা?", &[], &TenantContext::default(), None)
            .await;
        assert!(!reply.success);
        assert_eq!(reply.language, Language::Bengali);
        assert_eq!(reply.text, Language::Bengali.apology());
        assert!(reply.error.as_deref().unwrap_or_default().starts_with("gemini:"));
        assert_eq!(openai.calls(), 1);
        assert_eq!(gemini.calls(), 1);
    }

    #[tokio::test]
    async fn hung_provider_is_abandoned_after_attempt_timeout() {
        let slow = FakeProvider::new(ProviderKind::Anthropic, Behavior::Hang);
        let fast = FakeProvider::new(ProviderKind::OpenAi, Behavior::Reply("ok"));
        let gw = gateway(vec![fast.clone(), slow.clone()], ProviderKind::Anthropic);

        let reply = gw
            .generate_reply("hi", &[], &TenantContext::default(), None)
            .await;
        assert!(reply.success);
        assert_eq!(reply.provider, Some(ProviderKind::OpenAi));
        assert_eq!(slow.calls(), 1);
    }

    #[tokio::test]
    async fn timed_out_attempt_is_reported_as_timeout() {
        let slow = FakeProvider::new(ProviderKind::Anthropic, Behavior::Hang);
        let gw = gateway(vec![slow.clone()], ProviderKind::Anthropic);

        let reply = gw
            .generate_reply("hi", &[], &TenantContext::default(), None)
            .await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("anthropic: timed out after 50ms"));
    }

    #[tokio::test]
    async fn override_takes_precedence_over_configured_primary() {
        let openai = FakeProvider::new(ProviderKind::OpenAi, Behavior::Reply("from openai"));
        let gemini = FakeProvider::new(ProviderKind::Gemini, Behavior::Reply("from gemini"));
        let gw = gateway(vec![openai.clone(), gemini.clone()], ProviderKind::OpenAi);

        let reply = gw
            .generate_reply("hi", &[], &TenantContext::default(), Some(ProviderKind::Gemini))
            .await;
        assert_eq!(reply.text, "from gemini");
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn no_providers_yields_apology() {
        let gw = gateway(Vec::new(), ProviderKind::OpenAi);
        let reply = gw
            .generate_reply("hello", &[], &TenantContext::default(), None)
            .await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("no providers configured"));
    }

    #[tokio::test]
    async fn tenant_instructions_replace_default_prompt() {
        let openai = FakeProvider::new(ProviderKind::OpenAi, Behavior::Reply("ok"));
        let gw = gateway(vec![openai.clone()], ProviderKind::OpenAi);
        let tenant = TenantContext {
            business_name: Some("Cafe One".to_string()),
            instructions: Some("Answer only about {BUSINESS_NAME} coffee.".to_string()),
        };
        gw.generate_reply("hi", &[], &tenant, None).await;
        let system = openai.last_system.lock().expect("lock").clone();
        assert_eq!(system.as_deref(), Some("Answer only about Cafe One coffee."));

        let default_prompt = gw.build_system_prompt(&TenantContext::default(), Language::English);
        assert!(default_prompt.contains("for our business."));
    }

    #[test]
    fn new_message_is_appended_after_history() {
        let history = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        let messages = build_messages(&history, "c");
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }
}
