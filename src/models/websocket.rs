use serde::{ Serialize, Deserialize };
use serde_json::Value;

use crate::emitter::DeliveryMode;
use crate::error::ChatError;

/// Inbound frame: `{ "message": string, "stream"?: boolean }`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ClientMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let value: Value = serde_json
            ::from_str(text)
            .map_err(|e| ChatError::MalformedInput(e.to_string()))?;
        if !value.is_object() {
            return Err(ChatError::MalformedInput("expected a JSON object".to_string()));
        }
        serde_json::from_value(value).map_err(|e| ChatError::MalformedInput(e.to_string()))
    }

    pub fn text(&self) -> Result<&str, ChatError> {
        match self.message.as_deref() {
            Some(message) if !message.trim().is_empty() => Ok(message),
            _ => Err(ChatError::EmptyMessage),
        }
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        if self.stream.unwrap_or(true) {
            DeliveryMode::Streaming
        } else {
            DeliveryMode::Atomic
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplyEvent {
    Chunk {
        content: String,
        conversation_id: String,
    },
    Done {
        conversation_id: String,
        full_response: String,
    },
    Complete {
        response: String,
        conversation_id: String,
    },
}

/// One outbound frame. Errors carry no `type` tag on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerMessage {
    Reply(ReplyEvent),
    Error {
        error: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { error: message.into() }
    }

    pub fn is_chunk(&self) -> bool {
        matches!(self, ServerMessage::Reply(ReplyEvent::Chunk { .. }))
    }
}

impl From<ReplyEvent> for ServerMessage {
    fn from(event: ReplyEvent) -> Self {
        ServerMessage::Reply(event)
    }
}
