use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{ Responder, ResponderError };
use crate::models::chat::Turn;

const ECHO_PREVIEW_CHARS: usize = 50;

const GREETING_WORDS: &[&str] = &["hello", "hi", "hey"];
const SELF_PHRASES: &[&str] = &["how are you", "how do you work"];
const TOPIC_PHRASES: &[&str] = &["what is", "explain", "tell me about"];
const HELP_PHRASES: &[&str] = &["help", "capabilities", "what can you do"];

const GREETINGS: &[&str] = &[
    "Hello! Good to have you here. What's on your mind today?",
    "Hi there! Happy to chat. What would you like to talk about?",
    "Hey! Welcome in. What brings you by?",
];

const SELF_DESCRIPTION: &str =
    "I'm doing well, thanks for asking! I'm a small demo bot behind a WebSocket server written in Rust. Every connection runs as its own async task, so lots of people can chat at once. How about you?";

const CAPABILITIES: &str =
    "I'm a demo of real-time chat over WebSockets. I can:\n\n• Hold a conversation as it happens\n• Stream replies one character at a time\n• Keep track of what we've said in this conversation\n• Run anywhere a single binary can run\n\nNot bad for a small demo, right?";

const FALLBACKS: &[&str] = &[
    "That's an interesting way to look at it. Tell me more.",
    "I see what you mean. How do you feel about that?",
    "Interesting! What made you think of that?",
    "Good point. Have you considered the other side of it?",
    "I'm enjoying this conversation. What else is on your mind?",
    "That's a sharp observation. Where could we take it next?",
    "Thanks for sharing that. What do you think happens next?",
    "That gives me something to think about. Let's dig into it.",
];

/// Keyword-driven canned replies with a seedable random pick.
pub struct CannedResponder {
    rng: Mutex<StdRng>,
}

impl CannedResponder {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn pick(&self, options: &[&'static str]) -> &'static str {
        let mut rng = self.rng.lock();
        options.choose(&mut *rng).copied().unwrap_or_default()
    }

    pub fn reply_to(&self, message: &str) -> String {
        let lower = message.to_lowercase();

        let has_word = |words: &[&str]| {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|token| words.contains(&token))
        };
        let has_phrase = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

        if has_word(GREETING_WORDS) {
            return self.pick(GREETINGS).to_string();
        }
        if has_phrase(SELF_PHRASES) {
            return SELF_DESCRIPTION.to_string();
        }
        if has_phrase(TOPIC_PHRASES) {
            return format!(
                "You asked about '{}'. Great topic! I'm only a demo bot, but I'm happy to explore it with you. Which part interests you most?",
                message
            );
        }
        if has_phrase(HELP_PHRASES) {
            return CAPABILITIES.to_string();
        }

        let preview: String = message.chars().take(ECHO_PREVIEW_CHARS).collect();
        let ellipsis = if message.chars().count() > ECHO_PREVIEW_CHARS { "..." } else { "" };
        format!("{}\n\n(You said: \"{}{}\")", self.pick(FALLBACKS), preview, ellipsis)
    }
}

impl Default for CannedResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Responder for CannedResponder {
    async fn generate(&self, _history: &[Turn], message: &str) -> Result<String, ResponderError> {
        Ok(self.reply_to(message))
    }

    fn name(&self) -> &'static str {
        "canned"
    }
}
