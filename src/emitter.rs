//! Turns a generated reply into the ordered frames sent to the client.
//!
//! [`emit`] is a pure iterator and can be cloned to replay the exact same
//! sequence. [`Emission::paced`] drives it in real time with a delay between
//! chunks and stops as soon as the session's cancellation token fires.

use std::time::Duration;

use futures::stream::{ self, BoxStream, StreamExt };
use tokio_util::sync::CancellationToken;
use unicode_segmentation::UnicodeSegmentation;

use crate::models::websocket::{ ReplyEvent, ServerMessage };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One `chunk` per grapheme, then `done`.
    Streaming,
    /// A single `complete`.
    Atomic,
}

#[derive(Debug, Clone)]
pub struct Emission {
    reply: String,
    conversation_id: String,
    mode: DeliveryMode,
    cursor: usize,
    finished: bool,
}

pub fn emit(reply: &str, conversation_id: &str, mode: DeliveryMode) -> Emission {
    Emission {
        reply: reply.to_string(),
        conversation_id: conversation_id.to_string(),
        mode,
        cursor: 0,
        finished: false,
    }
}

impl Emission {
    /// Yields the same events as the iterator, sleeping `delay` before every
    /// chunk that directly follows another chunk. Once `cancel` fires the
    /// stream ends without producing anything further.
    pub fn paced(
        self,
        delay: Duration,
        cancel: CancellationToken
    ) -> BoxStream<'static, ServerMessage> {
        stream
            ::unfold((self, cancel, false), move |(mut emission, cancel, after_chunk)| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let event = emission.next()?;
                if after_chunk && event.is_chunk() && !delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let is_chunk = event.is_chunk();
                Some((event, (emission, cancel, is_chunk)))
            })
            .boxed()
    }
}

impl Iterator for Emission {
    type Item = ServerMessage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let event = match self.mode {
            DeliveryMode::Atomic => {
                self.finished = true;
                ReplyEvent::Complete {
                    response: self.reply.clone(),
                    conversation_id: self.conversation_id.clone(),
                }
            }
            DeliveryMode::Streaming => {
                match self.reply[self.cursor..].graphemes(true).next() {
                    Some(grapheme) => {
                        self.cursor += grapheme.len();
                        ReplyEvent::Chunk {
                            content: grapheme.to_string(),
                            conversation_id: self.conversation_id.clone(),
                        }
                    }
                    None => {
                        self.finished = true;
                        ReplyEvent::Done {
                            conversation_id: self.conversation_id.clone(),
                            full_response: self.reply.clone(),
                        }
                    }
                }
            }
        };
        Some(event.into())
    }
}
