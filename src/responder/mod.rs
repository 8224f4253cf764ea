pub mod canned;
pub mod echo;

use async_trait::async_trait;
use futures::FutureExt;
use log::error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::error::ChatError;
use crate::models::chat::Turn;
use self::canned::CannedResponder;
use self::echo::EchoResponder;

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("responder unavailable: {0}")]
    Unavailable(String),
}

/// Produces the assistant reply for one user message.
///
/// `history` already contains the user turn being answered as its last
/// element.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn generate(&self, history: &[Turn], message: &str) -> Result<String, ResponderError>;

    fn name(&self) -> &'static str;
}

/// Calls the responder, turning both returned errors and panics into
/// [`ChatError::ResponderFailure`].
pub async fn generate_reply(
    responder: &dyn Responder,
    history: &[Turn],
    message: &str
) -> Result<String, ChatError> {
    match AssertUnwindSafe(responder.generate(history, message)).catch_unwind().await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => {
            error!("Responder '{}' failed: {}", responder.name(), e);
            Err(e.into())
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Responder '{}' panicked: {}", responder.name(), detail);
            Err(ChatError::ResponderFailure(format!("panicked: {}", detail)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderKind {
    Canned,
    Echo,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseResponderKindError {
    message: String,
}

impl fmt::Display for ParseResponderKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseResponderKindError {}

impl FromStr for ResponderKind {
    type Err = ParseResponderKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "canned" => Ok(ResponderKind::Canned),
            "echo" => Ok(ResponderKind::Echo),
            _ =>
                Err(ParseResponderKindError {
                    message: format!("Invalid responder type: '{}'", s),
                }),
        }
    }
}

pub fn new_responder(kind: ResponderKind, seed: Option<u64>) -> Arc<dyn Responder> {
    match kind {
        ResponderKind::Canned => {
            let responder = match seed {
                Some(seed) => CannedResponder::with_seed(seed),
                None => CannedResponder::new(),
            };
            Arc::new(responder)
        }
        ResponderKind::Echo => Arc::new(EchoResponder),
    }
}
