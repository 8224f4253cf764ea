use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Args;
use crate::history::ConversationStore;
use crate::registry::ConnectionRegistry;
use crate::responder::{ new_responder, Responder, ResponderKind };

const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(20);
const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub chunk_delay: Duration,
    pub max_message_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            chunk_delay: DEFAULT_CHUNK_DELAY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl From<&Args> for SessionSettings {
    fn from(args: &Args) -> Self {
        Self {
            chunk_delay: Duration::from_millis(args.chunk_delay_ms),
            max_message_size: args.max_message_size,
        }
    }
}

/// Everything a session or HTTP handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConversationStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub responder: Arc<dyn Responder>,
    pub settings: SessionSettings,
}

impl AppState {
    pub fn new(responder: Arc<dyn Responder>, settings: SessionSettings) -> Self {
        Self::with_store(Arc::new(ConversationStore::new()), responder, settings)
    }

    pub fn with_store(
        store: Arc<ConversationStore>,
        responder: Arc<dyn Responder>,
        settings: SessionSettings
    ) -> Self {
        Self {
            store,
            registry: Arc::new(ConnectionRegistry::new()),
            responder,
            settings,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let kind: ResponderKind = args.responder.parse()?;
        let responder = new_responder(kind, args.responder_seed);
        let store = Arc::new(ConversationStore::with_capacity(args.max_conversations));
        Ok(Self::with_store(store, responder, SessionSettings::from(args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn builds_from_args() {
        let args = Args::parse_from(["chat-relay", "--responder", "echo", "--chunk-delay-ms", "5"]);
        let state = AppState::from_args(&args).unwrap();
        assert_eq!(state.responder.name(), "echo");
        assert_eq!(state.settings.chunk_delay, Duration::from_millis(5));
        assert!(state.store.is_empty());
    }

    #[test]
    fn rejects_unknown_responder() {
        let args = Args::parse_from(["chat-relay", "--responder", "oracle"]);
        assert!(AppState::from_args(&args).is_err());
    }
}
