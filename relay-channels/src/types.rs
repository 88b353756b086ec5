use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// Transport prefix carried on WhatsApp addresses (`whatsapp:+15551234567`).
pub const WHATSAPP_PREFIX: &str = "whatsapp:";

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(SenderId);

/// A webhook body flattened to string fields, whether it arrived form-encoded or
/// as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundPayload {
    fields: BTreeMap<String, String>,
}

impl InboundPayload {
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn from_form(body: &[u8]) -> Result<Self, ParseError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
            .map_err(|e| ParseError::InvalidPayload(format!("form body: {e}")))?;
        Ok(Self::from_fields(pairs))
    }

    /// Scalars are stringified; nested objects and arrays are rejected.
    pub fn from_json(body: &[u8]) -> Result<Self, ParseError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ParseError::InvalidPayload(format!("json body: {e}")))?;
        let serde_json::Value::Object(map) = value else {
            return Err(ParseError::InvalidPayload(
                "json body must be an object".to_string(),
            ));
        };
        let mut fields = BTreeMap::new();
        for (key, value) in map {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => continue,
                _ => {
                    return Err(ParseError::InvalidPayload(format!(
                        "field `{key}` must be a scalar"
                    )));
                }
            };
            fields.insert(key, text);
        }
        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Present and not blank after trimming.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: Option<MessageId>,
    /// Sender address with the transport prefix removed.
    pub sender_id: SenderId,
    /// The business line the message was addressed to, exactly as received.
    pub routing_number: String,
    pub profile_name: String,
    pub text: String,
    pub media_count: u32,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn has_media(&self) -> bool {
        self.media_count > 0 || !self.attachments.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered { provider_message_id: Option<String> },
    Failed { error: String },
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("missing {0}")]
    MissingCredential(&'static str),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}
