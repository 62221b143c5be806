use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::PAIRING_INSTRUCTION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Qr,
    ChatbotResult,
    ChatbotError,
    DownloadResult,
}

/// Structured event written to the orchestrator as
/// `{"type": ..., "content": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub content: Map<String, Value>,
}

impl OutboundEvent {
    #[must_use]
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            content: Map::new(),
        }
    }

    /// Add a content field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.content.insert(key.to_owned(), value.into());
        self
    }

    /// Pairing code ready to be rendered as a QR code.
    #[must_use]
    pub fn qr(code: &str) -> Self {
        Self::new(EventType::Qr)
            .with("code", code)
            .with("message", PAIRING_INSTRUCTION)
    }

    #[must_use]
    pub fn chatbot_error(chat: &str, error: &str) -> Self {
        Self::new(EventType::ChatbotError)
            .with("chat", chat)
            .with("error", error)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }
}
