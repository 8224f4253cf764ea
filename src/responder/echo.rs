use async_trait::async_trait;

use super::{ Responder, ResponderError };
use crate::models::chat::Turn;

/// Repeats the message back. Handy for demos and load tests.
pub struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    async fn generate(&self, _history: &[Turn], message: &str) -> Result<String, ResponderError> {
        Ok(format!("You said: {}", message))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}
