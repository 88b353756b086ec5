//! Coarse language classification and the localized canned texts keyed on it.
//!
//! Only Bengali and English are distinguished: any character in the Bengali block
//! (U+0980..=U+09FF) classifies a message as Bengali, anything else is English.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const BUSINESS_NAME_PLACEHOLDER: &str = "{BUSINESS_NAME}";

const BENGALI_BLOCK: std::ops::RangeInclusive<char> = '\u{0980}'..='\u{09FF}';

const SYSTEM_PROMPT_EN: &str = "You are a helpful and friendly WhatsApp assistant for {BUSINESS_NAME}.

Your responsibilities:
- Answer customer questions about products, services, and business information
- Help with orders, bookings, and reservations
- Provide accurate information in a conversational, friendly tone
- Keep responses concise (2-4 sentences) since this is WhatsApp
- If you don't know something, politely say so and offer to connect them with a human

Be professional, warm, and helpful!";

const SYSTEM_PROMPT_BN: &str = "আপনি {BUSINESS_NAME} এর একজন সহায়ক এবং বন্ধুত্বপূর্ণ WhatsApp সহায়ক।

আপনার দায়িত্ব:
- পণ্য, সেবা এবং ব্যবসা সম্পর্কে গ্রাহকদের প্রশ্নের উত্তর দিন
- অর্ডার, বুকিং এবং সংরক্ষণে সাহায্য করুন
- কথোপকথন এবং বন্ধুত্বপূর্ণ সুরে সঠিক তথ্য প্রদান করুন
- যেহেতু এটি WhatsApp, উত্তর সংক্ষিপ্ত রাখুন (২-৪ বাক্য)
- যদি আপনি কিছু না জানেন, ভদ্রভাবে বলুন এবং তাদের একজন মানুষের সাথে সংযুক্ত করার প্রস্তাব দিন

পেশাদার, উষ্ণ এবং সহায়ক হন!";

const APOLOGY_EN: &str = "I apologize, but I'm having trouble processing your message right now. Please try again in a moment, or contact us directly for immediate assistance.";

const APOLOGY_BN: &str = "দুঃখিত, আমি এই মুহূর্তে আপনার বার্তা প্রক্রিয়া করতে সমস্যা হচ্ছে। অনুগ্রহ করে কিছুক্ষণ পরে আবার চেষ্টা করুন, অথবা তাৎক্ষণিক সহায়তার জন্য আমাদের সরাসরি যোগাযোগ করুন।";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "bn")]
    Bengali,
}

impl Language {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Bengali => "bn",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::English),
            "bn" => Some(Self::Bengali),
            _ => None,
        }
    }

    pub fn default_system_prompt(&self) -> &'static str {
        match self {
            Self::English => SYSTEM_PROMPT_EN,
            Self::Bengali => SYSTEM_PROMPT_BN,
        }
    }

    pub fn apology(&self) -> &'static str {
        match self {
            Self::English => APOLOGY_EN,
            Self::Bengali => APOLOGY_BN,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

pub fn detect_language(text: &str) -> Language {
    if text.chars().any(|c| BENGALI_BLOCK.contains(&c)) {
        Language::Bengali
    } else {
        Language::English
    }
}

pub fn render_system_prompt(template: &str, business_name: &str) -> String {
    template.replace(BUSINESS_NAME_PLACEHOLDER, business_name)
}
