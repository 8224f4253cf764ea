use thiserror::Error;

use crate::responder::ResponderError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    #[error("responder failure: {0}")]
    ResponderFailure(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ChatError {
    /// Text placed in the `error` event sent to the client. Responder
    /// details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::MalformedInput(_) => "Invalid JSON".to_string(),
            ChatError::EmptyMessage => "Empty message".to_string(),
            ChatError::MessageTooLarge { .. } => "Message too large".to_string(),
            ChatError::InvalidConversationId(_) => "Invalid conversation id".to_string(),
            ChatError::ResponderFailure(_) => "Failed to generate a response".to_string(),
            ChatError::TransportClosed => "Connection closed".to_string(),
            ChatError::Encode(_) => "Internal error".to_string(),
        }
    }
}

impl From<ResponderError> for ChatError {
    fn from(err: ResponderError) -> Self {
        ChatError::ResponderFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_detail_is_not_sent_to_client() {
        let err: ChatError = ResponderError::Generation("db password=hunter2".into()).into();
        assert!(err.to_string().contains("hunter2"));
        assert_eq!(err.client_message(), "Failed to generate a response");
    }

    #[test]
    fn input_errors_map_to_protocol_text() {
        assert_eq!(ChatError::MalformedInput("eof".into()).client_message(), "Invalid JSON");
        assert_eq!(ChatError::EmptyMessage.client_message(), "Empty message");
        assert_eq!(
            (ChatError::MessageTooLarge { size: 10, limit: 5 }).client_message(),
            "Message too large"
        );
    }
}
