use crate::types::{InboundMessage, InboundPayload, ParseError, SendOutcome};
use async_trait::async_trait;

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Unique channel identifier: "twilio_whatsapp".
    fn channel_id(&self) -> &str;

    /// Interpret a webhook body. Pure; never performs I/O.
    fn parse_inbound(&self, payload: &InboundPayload) -> Result<InboundMessage, ParseError>;

    /// Deliver a text message. Transport failures are reported in the outcome,
    /// never as an error, so callers can always continue.
    async fn send(&self, destination: &str, text: &str) -> SendOutcome;

    /// Canonical transport address for a user-supplied destination.
    fn normalize_destination(&self, raw: &str) -> String;
}
