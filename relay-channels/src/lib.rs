//! Messaging transports for the relay.
//!
//! Adapters are pure I/O: they turn webhook bodies into `InboundMessage`s and
//! deliver outbound text. Policy lives in `relay-app`.

mod traits;
mod twilio;
mod types;

pub use traits::MessagingGateway;
pub use twilio::{
    SEND_TIMEOUT, TwilioWhatsApp, normalize_whatsapp_address, parse_twilio_inbound, strip_transport_prefix,
    twilio_signature, validate_signature,
};
pub use types::{
    Attachment, ChannelError, InboundMessage, InboundPayload, MessageId, ParseError, SendOutcome,
    SenderId, WHATSAPP_PREFIX,
};
