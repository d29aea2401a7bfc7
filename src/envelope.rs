// src/envelope.rs
//! Item model coming off a surface and the wire envelope sent to subscribers.

use serde::{Deserialize, Serialize};

use crate::extract::{self, ExtractedSignals};

pub const MESSAGE_TYPE: &str = "twitter.message";
pub const MESSAGE_SOURCE: &str = "twitter";
pub const MESSAGE_SENDER: &str = "x_extension";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(rename = "type")]
    pub kind: String, // "photo" | "video"
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRef {
    pub url: String,
    #[serde(default)]
    pub display_url: String,
}

/// One rendered item as read off a surface. Consumed once per pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub urls: Vec<UrlRef>,
}

impl RawItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            author: String::new(),
            timestamp,
            media: Vec::new(),
            urls: Vec::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Items without an id or without visible text are never relayed.
    pub fn is_relayable(&self) -> bool {
        !self.id.trim().is_empty() && !self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub message_id: String,
    pub list_url: String,
    pub user_id: String,
    pub username: String,
    /// Item timestamp (ms).
    pub date: i64,
    pub text: String,
    pub raw_text: String,
    pub media: Vec<MediaRef>,
    pub urls: Vec<UrlRef>,
    pub extracted_data: ExtractedSignals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    /// Assembly time (ms).
    pub timestamp: i64,
    pub source: String,
    pub sender: String,
    pub data: MessageData,
}

impl OutboundMessage {
    /// Build the envelope for `item` seen on `surface`, with signals already
    /// extracted.
    pub fn new(item: RawItem, surface: &str, signals: ExtractedSignals, now_ms: i64) -> Self {
        Self {
            kind: MESSAGE_TYPE.to_string(),
            timestamp: now_ms,
            source: MESSAGE_SOURCE.to_string(),
            sender: MESSAGE_SENDER.to_string(),
            data: MessageData {
                message_id: item.id,
                list_url: surface.to_string(),
                user_id: item.author.clone(),
                username: item.author,
                date: item.timestamp,
                raw_text: item.text.clone(),
                text: item.text,
                media: item.media,
                urls: item.urls,
                extracted_data: signals,
            },
        }
    }

    /// Extract signals from the item text and wrap it, stamped with the current time.
    pub fn from_item(item: RawItem, surface: &str) -> Self {
        let signals = extract::extract(&item.text);
        Self::new(item, surface, signals, chrono::Utc::now().timestamp_millis())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
