//! In-process doubles shared by the app's unit tests.

use async_trait::async_trait;
use relay_channels::{
    InboundMessage, InboundPayload, MessagingGateway, ParseError, SendOutcome,
    normalize_whatsapp_address, parse_twilio_inbound,
};
use relay_llm::{ChatMessage, Completion, CompletionProvider, LlmError, ProviderKind};
use relay_store::{SqliteStore, StoreConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn temp_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = SqliteStore::open(StoreConfig::new(dir.path().join("relay.db")))
        .expect("open temp store");
    (dir, Arc::new(store))
}

/// Parses like Twilio and records sends instead of delivering them.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagingGateway for RecordingMessenger {
    fn channel_id(&self) -> &str {
        "recording"
    }

    fn parse_inbound(&self, payload: &InboundPayload) -> Result<InboundMessage, ParseError> {
        parse_twilio_inbound(payload)
    }

    async fn send(&self, destination: &str, text: &str) -> SendOutcome {
        self.sent
            .lock()
            .expect("sent lock")
            .push((destination.to_string(), text.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            SendOutcome::Failed {
                error: "simulated transport failure".to_string(),
            }
        } else {
            SendOutcome::Delivered {
                provider_message_id: Some("SM-test".to_string()),
            }
        }
    }

    fn normalize_destination(&self, raw: &str) -> String {
        normalize_whatsapp_address(raw)
    }
}

/// Returns a fixed reply, or fails when constructed without one.
pub struct ScriptedProvider {
    kind: ProviderKind,
    reply: Option<&'static str>,
    calls: AtomicUsize,
    last: Mutex<Option<(String, Vec<ChatMessage>)>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind, reply: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reply,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_system_prompt(&self) -> Option<String> {
        self.last
            .lock()
            .expect("last lock")
            .as_ref()
            .map(|(system, _)| system.clone())
    }

    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.last
            .lock()
            .expect("last lock")
            .as_ref()
            .map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> relay_llm::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().expect("last lock") =
            Some((system_prompt.to_string(), messages.to_vec()));
        match self.reply {
            Some(text) => Ok(Completion {
                text: text.to_string(),
                usage: None,
            }),
            None => Err(LlmError::Http("503 service unavailable".to_string())),
        }
    }
}
