//! Short user-facing texts sent instead of an AI reply.

use chrono::NaiveDate;
use relay_llm::Language;
use relay_store::MessageCounts;

pub fn rate_limited(language: Language) -> &'static str {
    match language {
        Language::English => {
            "⚠️ Sorry, you have exceeded the message limit. Please try again in 1 hour."
        }
        Language::Bengali => {
            "⚠️ দুঃখিত, আপনি অনেকগুলি বার্তা পাঠিয়েছেন। অনুগ্রহ করে ১ ঘন্টা পরে আবার চেষ্টা করুন।"
        }
    }
}

pub fn media_unsupported(language: Language) -> &'static str {
    match language {
        Language::English => {
            "🖼️ Sorry, I cannot process images or videos yet. Please send your question as text."
        }
        Language::Bengali => {
            "🖼️ দুঃখিত, আমি এখনও ছবি বা ভিডিও প্রক্রিয়া করতে পারি না। অনুগ্রহ করে আপনার প্রশ্ন টেক্সটে লিখুন।"
        }
    }
}

pub fn closed(language: Language, open_hour: u8, close_hour: u8) -> String {
    match language {
        Language::English => {
            format!("We are currently closed.\nHours: {open_hour}:00–{close_hour}:00")
        }
        Language::Bengali => {
            format!("আমরা এখন বন্ধ আছি।\nসময়: {open_hour}:00–{close_hour}:00")
        }
    }
}

pub fn daily_summary(business_name: &str, day: NaiveDate, counts: MessageCounts) -> String {
    format!(
        "📊 Daily summary for {business_name} ({day})\nTotal messages: {}\nFrom customers: {}\nReplies sent: {}",
        counts.total, counts.inbound, counts.outbound
    )
}
