use crate::traits::MessagingGateway;
use crate::types::{
    Attachment, ChannelError, InboundMessage, InboundPayload, MessageId, ParseError, SendOutcome,
    SenderId, WHATSAPP_PREFIX,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use std::collections::BTreeMap;
use std::time::Duration;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
/// Upper bound on one outbound REST call.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PROFILE_NAME: &str = "Unknown";
/// Twilio attaches at most ten media items to one WhatsApp message.
const MAX_MEDIA_PER_MESSAGE: u32 = 10;

/// WhatsApp over the Twilio Programmable Messaging API.
#[derive(Clone)]
pub struct TwilioWhatsApp {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_base: String,
}

impl TwilioWhatsApp {
    pub fn new(account_sid: &str, auth_token: &str, from_number: &str) -> Result<Self, ChannelError> {
        let account_sid = account_sid.trim();
        if account_sid.is_empty() {
            return Err(ChannelError::MissingCredential("twilio account sid"));
        }
        let auth_token = auth_token.trim();
        if auth_token.is_empty() {
            return Err(ChannelError::MissingCredential("twilio auth token"));
        }
        let from_number = from_number.trim();
        if from_number.is_empty() {
            return Err(ChannelError::MissingCredential("twilio whatsapp number"));
        }
        let http = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            http,
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: normalize_whatsapp_address(from_number),
            api_base: TWILIO_API_BASE.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_number(&self) -> &str {
        &self.from_number
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }

    /// Checks an `X-Twilio-Signature` header against the public webhook URL and
    /// the posted form fields.
    pub fn validate_signature(&self, url: &str, payload: &InboundPayload, signature: &str) -> bool {
        validate_signature(&self.auth_token, url, payload.fields(), signature)
    }
}

#[async_trait]
impl MessagingGateway for TwilioWhatsApp {
    fn channel_id(&self) -> &str {
        "twilio_whatsapp"
    }

    fn parse_inbound(&self, payload: &InboundPayload) -> Result<InboundMessage, ParseError> {
        parse_twilio_inbound(payload)
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn send(&self, destination: &str, text: &str) -> SendOutcome {
        let to = self.normalize_destination(destination);
        if to.len() <= WHATSAPP_PREFIX.len() + 1 {
            return SendOutcome::Failed {
                error: "destination is empty".to_string(),
            };
        }
        if text.trim().is_empty() {
            return SendOutcome::Failed {
                error: "message text is empty".to_string(),
            };
        }

        let form = [
            ("From", self.from_number.as_str()),
            ("To", to.as_str()),
            ("Body", text),
        ];
        let response = match self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%e, "twilio send request failed");
                return SendOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let detail = serde_json::from_str::<TwilioErrorBody>(&body)
                .map(|e| format!("code={} message={}", e.code.unwrap_or_default(), e.message))
                .unwrap_or(body);
            tracing::warn!(%status, %detail, "twilio send rejected");
            return SendOutcome::Failed {
                error: format!("twilio send failed: status={status} {detail}"),
            };
        }

        let sid = serde_json::from_str::<TwilioMessageResource>(&body)
            .ok()
            .and_then(|m| m.sid);
        tracing::debug!(sid = ?sid, "twilio message accepted");
        SendOutcome::Delivered {
            provider_message_id: sid,
        }
    }

    fn normalize_destination(&self, raw: &str) -> String {
        normalize_whatsapp_address(raw)
    }
}

/// `whatsapp:+<digits>`, tolerating an existing prefix, spaces and punctuation.
pub fn normalize_whatsapp_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix(WHATSAPP_PREFIX).unwrap_or(trimmed);
    let digits: String = bare
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if digits.starts_with('+') {
        format!("{WHATSAPP_PREFIX}{digits}")
    } else {
        format!("{WHATSAPP_PREFIX}+{digits}")
    }
}

pub fn strip_transport_prefix(address: &str) -> &str {
    let trimmed = address.trim();
    trimmed.strip_prefix(WHATSAPP_PREFIX).unwrap_or(trimmed)
}

pub fn parse_twilio_inbound(payload: &InboundPayload) -> Result<InboundMessage, ParseError> {
    let from = payload
        .non_empty("From")
        .map(strip_transport_prefix)
        .filter(|v| !v.is_empty())
        .ok_or(ParseError::MissingField("From"))?;
    let to = payload
        .non_empty("To")
        .filter(|v| !strip_transport_prefix(v).is_empty())
        .ok_or(ParseError::MissingField("To"))?;

    let media_count = match payload.non_empty("NumMedia") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidPayload(format!("NumMedia is not a count: {raw}")))?,
        None => 0,
    };
    if media_count > MAX_MEDIA_PER_MESSAGE {
        return Err(ParseError::InvalidPayload(format!(
            "NumMedia {media_count} exceeds {MAX_MEDIA_PER_MESSAGE}"
        )));
    }
    let mut indexed: Vec<(u32, Attachment)> = payload
        .fields()
        .iter()
        .filter_map(|(key, url)| {
            let index = key.strip_prefix("MediaUrl")?.parse::<u32>().ok()?;
            let url = url.trim();
            if url.is_empty() {
                return None;
            }
            Some((
                index,
                Attachment {
                    url: url.to_string(),
                    content_type: payload
                        .non_empty(&format!("MediaContentType{index}"))
                        .map(str::to_string),
                },
            ))
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    let attachments = indexed.into_iter().map(|(_, a)| a).collect();

    Ok(InboundMessage {
        message_id: payload.non_empty("MessageSid").map(MessageId::from),
        sender_id: SenderId::new(from),
        routing_number: to.to_string(),
        profile_name: payload
            .non_empty("ProfileName")
            .unwrap_or(DEFAULT_PROFILE_NAME)
            .to_string(),
        text: payload.get("Body").unwrap_or_default().to_string(),
        media_count,
        attachments,
        received_at: chrono::Utc::now(),
    })
}

/// Base64 HMAC-SHA1 over the URL followed by every field name and value, sorted
/// by name.
pub fn twilio_signature(
    auth_token: &str,
    url: &str,
    fields: &BTreeMap<String, String>,
) -> Option<String> {
    let mac = signature_mac(auth_token, url, fields)?;
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

pub fn validate_signature(
    auth_token: &str,
    url: &str,
    fields: &BTreeMap<String, String>,
    signature: &str,
) -> bool {
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Some(mac) = signature_mac(auth_token, url, fields) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

fn signature_mac(
    auth_token: &str,
    url: &str,
    fields: &BTreeMap<String, String>,
) -> Option<Hmac<Sha1>> {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(auth_token.as_bytes()).ok()?;
    mac.update(url.as_bytes());
    for (key, value) in fields {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Some(mac)
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResource {
    #[serde(default)]
    sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> TwilioWhatsApp {
        TwilioWhatsApp::new("AC123", "secret-token", "+14155238886").expect("build adapter")
    }

    fn payload(fields: &[(&str, &str)]) -> InboundPayload {
        InboundPayload::from_fields(fields.iter().copied())
    }

    #[test]
    fn parses_text_message_and_strips_prefix() {
        let msg = adapter()
            .parse_inbound(&payload(&[
                ("From", "whatsapp:+8801711111111"),
                ("To", "whatsapp:+14155238886"),
                ("Body", "Do you have vegan options?"),
                ("MessageSid", "SM1"),
                ("ProfileName", "Rahim"),
            ]))
            .expect("parse");
        assert_eq!(msg.sender_id.as_str(), "+8801711111111");
        assert_eq!(msg.routing_number, "whatsapp:+14155238886");
        assert_eq!(msg.text, "Do you have vegan options?");
        assert_eq!(msg.profile_name, "Rahim");
        assert_eq!(msg.message_id.as_deref(), Some("SM1"));
        assert!(!msg.has_media());
    }

    #[test]
    fn optional_fields_take_defaults() {
        let msg = adapter()
            .parse_inbound(&payload(&[("From", "+15550001111"), ("To", "+14155238886")]))
            .expect("parse");
        assert_eq!(msg.text, "");
        assert_eq!(msg.profile_name, "Unknown");
        assert_eq!(msg.media_count, 0);
        assert!(msg.message_id.is_none());
    }

    #[test]
    fn media_fields_become_attachments() {
        let msg = adapter()
            .parse_inbound(&payload(&[
                ("From", "whatsapp:+1"),
                ("To", "whatsapp:+2"),
                ("NumMedia", "2"),
                ("MediaUrl0", "https://api.twilio.com/m/0"),
                ("MediaContentType0", "image/jpeg"),
                ("MediaUrl1", "https://api.twilio.com/m/1"),
            ]))
            .expect("parse");
        assert!(msg.has_media());
        assert_eq!(msg.attachments.len(), 2);
        assert_eq!(msg.attachments[0].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(msg.attachments[1].content_type, None);
    }

    #[test]
    fn missing_sender_or_routing_is_rejected() {
        let a = adapter();
        assert_eq!(
            a.parse_inbound(&payload(&[("To", "whatsapp:+2"), ("Body", "hi")]))
                .expect_err("no From"),
            ParseError::MissingField("From")
        );
        assert_eq!(
            a.parse_inbound(&payload(&[("From", "whatsapp:+1")]))
                .expect_err("no To"),
            ParseError::MissingField("To")
        );
        assert!(matches!(
            a.parse_inbound(&payload(&[("From", "1"), ("To", "2"), ("NumMedia", "many")])),
            Err(ParseError::InvalidPayload(_))
        ));
    }

    #[test]
    fn bare_transport_prefix_counts_as_missing() {
        let a = adapter();
        assert_eq!(
            a.parse_inbound(&payload(&[("From", "whatsapp:"), ("To", "whatsapp:+2"), ("Body", "hi")]))
                .expect_err("empty sender"),
            ParseError::MissingField("From")
        );
        assert_eq!(
            a.parse_inbound(&payload(&[("From", "whatsapp:+1"), ("To", " whatsapp: "), ("Body", "hi")]))
                .expect_err("empty routing number"),
            ParseError::MissingField("To")
        );
    }

    #[test]
    fn oversized_media_count_is_rejected_without_scanning() {
        let started = std::time::Instant::now();
        let err = adapter()
            .parse_inbound(&payload(&[
                ("From", "whatsapp:+1"),
                ("To", "whatsapp:+2"),
                ("NumMedia", "4294967295"),
            ]))
            .expect_err("huge NumMedia");
        assert!(matches!(err, ParseError::InvalidPayload(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        let err = adapter()
            .parse_inbound(&payload(&[("From", "whatsapp:+1"), ("To", "whatsapp:+2"), ("NumMedia", "11")]))
            .expect_err("above the per-message limit");
        assert!(matches!(err, ParseError::InvalidPayload(_)));
    }

    #[test]
    fn attachments_come_from_present_media_keys_in_index_order() {
        let msg = adapter()
            .parse_inbound(&payload(&[
                ("From", "whatsapp:+1"),
                ("To", "whatsapp:+2"),
                ("NumMedia", "10"),
                ("MediaUrl9", "https://api.twilio.com/m/9"),
                ("MediaUrl2", "https://api.twilio.com/m/2"),
                ("MediaUrlX", "https://api.twilio.com/m/x"),
            ]))
            .expect("parse");
        assert_eq!(msg.media_count, 10);
        let urls: Vec<&str> = msg.attachments.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://api.twilio.com/m/2", "https://api.twilio.com/m/9"]);
    }

    #[test]
    fn destinations_are_normalized() {
        assert_eq!(normalize_whatsapp_address("+1 (555) 010-2000"), "whatsapp:+15550102000");
        assert_eq!(normalize_whatsapp_address("8801711111111"), "whatsapp:+8801711111111");
        assert_eq!(normalize_whatsapp_address("whatsapp:+8801711111111"), "whatsapp:+8801711111111");
    }

    #[test]
    fn signature_round_trip_and_tamper_detection() {
        let mut fields = BTreeMap::new();
        fields.insert("To".to_string(), "whatsapp:+14155238886".to_string());
        fields.insert("From".to_string(), "whatsapp:+8801711111111".to_string());
        fields.insert("Body".to_string(), "hi".to_string());
        let url = "https://relay.example.com/webhook";

        let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(b"secret-token").expect("hmac key");
        mac.update(b"https://relay.example.com/webhookBodyhiFromwhatsapp:+8801711111111Towhatsapp:+14155238886");
        let independent = BASE64.encode(mac.finalize().into_bytes());

        assert_eq!(
            twilio_signature("secret-token", url, &fields).as_deref(),
            Some(independent.as_str())
        );
        assert!(validate_signature("secret-token", url, &fields, &independent));
        assert!(!validate_signature("other-token", url, &fields, &independent));
        assert!(!validate_signature("secret-token", url, &fields, "not base64!"));

        fields.insert("Body".to_string(), "hi!".to_string());
        assert!(!validate_signature("secret-token", url, &fields, &independent));
    }

    #[tokio::test]
    async fn send_posts_form_and_returns_message_sid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=whatsapp%3A%2B8801711111111"))
            .and(body_string_contains("From=whatsapp%3A%2B14155238886"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({ "sid": "SM42", "status": "queued" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = adapter()
            .with_api_base(server.uri())
            .send("+8801711111111", "Yes, we do!")
            .await;
        assert_eq!(
            outcome,
            SendOutcome::Delivered {
                provider_message_id: Some("SM42".to_string())
            }
        );
    }

    #[tokio::test]
    async fn rejected_send_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": 21211,
                "message": "Invalid 'To' Phone Number"
            })))
            .mount(&server)
            .await;

        let outcome = adapter()
            .with_api_base(server.uri())
            .send("+1", "hello")
            .await;
        let SendOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("21211"));

        let empty = adapter().send("   ", "hello").await;
        assert!(!empty.is_delivered());
    }
}
