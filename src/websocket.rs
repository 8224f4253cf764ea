//! One WebSocket session: receive loop, dispatch to the responder, and
//! streamed or atomic delivery of the reply.
//!
//! Frames are read by a separate task and queued, so a disconnect is seen
//! while a reply is still being streamed. The queue itself is drained one
//! frame at a time: every event for one message is written before the next
//! message is looked at.

use crate::emitter::{ self, Emission };
use crate::error::ChatError;
use crate::history::{ format_history_for_log, ConversationHandle };
use crate::models::chat::Role;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::responder::generate_reply;
use crate::state::AppState;

use futures::stream::SplitStream;
use futures::{ Sink, SinkExt, StreamExt };
use log::{ debug, error, info, warn };
use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{ self, protocol::Message };
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

enum Inbound {
    Text(String),
    Rejected(ChatError),
}

pub struct Session {
    id: Uuid,
    peer: SocketAddr,
    conversation: ConversationHandle,
    app: AppState,
    cancel: CancellationToken,
    state: SessionState,
}

impl Session {
    pub fn new(id: Uuid, peer: SocketAddr, conversation: ConversationHandle, app: AppState) -> Self {
        Self {
            id,
            peer,
            conversation,
            app,
            cancel: CancellationToken::new(),
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Fires when the peer goes away.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {} ({}): {:?} -> {:?}", self.id, self.peer, self.state, next);
        self.state = next;
    }

    /// Parses one frame, records both turns and returns the events to send.
    pub async fn process(&self, frame: &str) -> Result<Emission, ChatError> {
        let request = ClientMessage::parse(frame)?;
        let message = request.text()?;

        self.conversation.append(Role::User, message);
        let history = self.conversation.history();

        let reply = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ChatError::TransportClosed),
            reply = generate_reply(&*self.app.responder, &history, message) => reply?,
        };

        self.conversation.append(Role::Assistant, reply.as_str());
        Ok(emitter::emit(&reply, self.conversation.id(), request.delivery_mode()))
    }

    pub async fn respond<W>(&self, tx: &mut W, frame: &str) -> Result<(), ChatError>
        where W: Sink<Message> + Unpin, W::Error: Display
    {
        match self.process(frame).await {
            Ok(emission) => self.deliver(tx, emission).await,
            Err(ChatError::TransportClosed) => Err(ChatError::TransportClosed),
            Err(err) => self.report(tx, &err).await,
        }
    }

    /// Writes the emission in order, pacing chunks. Returns
    /// `TransportClosed` if the peer left before the last event.
    pub async fn deliver<W>(&self, tx: &mut W, emission: Emission) -> Result<(), ChatError>
        where W: Sink<Message> + Unpin, W::Error: Display
    {
        let mut events = emission.paced(self.app.settings.chunk_delay, self.cancel.clone());
        while let Some(event) = events.next().await {
            send_event(tx, &event).await?;
        }
        if self.cancel.is_cancelled() {
            return Err(ChatError::TransportClosed);
        }
        Ok(())
    }

    /// Decides whether the session goes on after one frame. Failures other
    /// than a closed transport become an `error` event.
    async fn settle<W>(&self, tx: &mut W, outcome: Result<(), ChatError>) -> ControlFlow<()>
        where W: Sink<Message> + Unpin, W::Error: Display
    {
        let err = match outcome {
            Ok(()) => {
                return ControlFlow::Continue(());
            }
            Err(ChatError::TransportClosed) => {
                return ControlFlow::Break(());
            }
            Err(err) => err,
        };

        error!("Failed to answer {} on conversation '{}': {}", self.peer, self.conversation.id(), err);
        match self.report(tx, &err).await {
            Err(ChatError::TransportClosed) => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }

    async fn report<W>(&self, tx: &mut W, err: &ChatError) -> Result<(), ChatError>
        where W: Sink<Message> + Unpin, W::Error: Display
    {
        warn!(
            "Rejected frame from {} on conversation '{}': {}",
            self.peer,
            self.conversation.id(),
            err
        );
        send_event(tx, &ServerMessage::error(err.client_message())).await
    }
}

async fn send_event<W>(tx: &mut W, event: &ServerMessage) -> Result<(), ChatError>
    where W: Sink<Message> + Unpin, W::Error: Display
{
    let json = serde_json::to_string(event)?;
    tx.send(Message::Text(json)).await.map_err(|e| {
        debug!("Write failed: {}", e);
        ChatError::TransportClosed
    })
}

/// Runs the session until the peer disconnects. Returns the final state.
pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    conversation_id: String,
    app: AppState
) -> SessionState
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let conversation = match app.store.get_or_create(&conversation_id) {
        Ok(conversation) => conversation,
        Err(e) => {
            warn!("Refusing session for {}: {}", peer, e);
            let mut websocket = websocket;
            let _ = websocket.close(None).await;
            return SessionState::Closed;
        }
    };

    let registration = app.registry.register(&conversation_id, peer);
    let max_message_size = app.settings.max_message_size;
    let mut session = Session::new(registration.session_id(), peer, conversation, app);
    session.transition(SessionState::Open);
    info!(
        "New WebSocket session {} for {} on conversation '{}'",
        session.id,
        peer,
        conversation_id
    );

    let (mut tx, rx) = websocket.split();
    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    let reader = tokio::spawn(
        read_frames(peer, rx, frames_tx, session.cancellation(), max_message_size)
    );

    loop {
        let inbound = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break,
            inbound = frames.recv() => match inbound {
                Some(inbound) => inbound,
                None => break,
            },
        };

        let outcome = match inbound {
            Inbound::Text(text) => session.respond(&mut tx, &text).await,
            Inbound::Rejected(err) => session.report(&mut tx, &err).await,
        };

        if session.settle(&mut tx, outcome).await.is_break() {
            break;
        }
    }

    session.transition(SessionState::Closing);
    session.cancel.cancel();
    reader.abort();
    let _ = tx.close().await;
    drop(registration);
    session.transition(SessionState::Closed);

    debug!(
        "Conversation '{}' after session {}:\n{}",
        conversation_id,
        session.id,
        format_history_for_log(&session.conversation.snapshot())
    );
    info!("WebSocket connection closed for {} (Conv ID: {})", peer, conversation_id);
    session.state()
}

async fn read_frames<S>(
    peer: SocketAddr,
    mut rx: SplitStream<WebSocketStream<S>>,
    frames: mpsc::UnboundedSender<Inbound>,
    cancel: CancellationToken,
    max_message_size: usize
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    while let Some(msg) = rx.next().await {
        let inbound = match msg {
            Ok(message) if message.len() > max_message_size => {
                Inbound::Rejected(ChatError::MessageTooLarge {
                    size: message.len(),
                    limit: max_message_size,
                })
            }
            Ok(Message::Text(text)) => Inbound::Text(text),
            Ok(Message::Binary(bytes)) =>
                match String::from_utf8(bytes) {
                    Ok(text) => Inbound::Text(text),
                    Err(_) => {
                        Inbound::Rejected(
                            ChatError::MalformedInput("binary frame is not valid UTF-8".to_string())
                        )
                    }
                }
            Ok(Message::Close(_)) => {
                info!("Received close frame from {}", peer);
                break;
            }
            // tungstenite queues the Pong for a Ping itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                continue;
            }
            Err(e) => {
                log_receive_error(peer, &e);
                break;
            }
        };

        if frames.send(inbound).is_err() {
            break;
        }
    }
    cancel.cancel();
}

fn log_receive_error(peer: SocketAddr, e: &tungstenite::Error) {
    match e {
        | tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(_)
        | tungstenite::Error::Utf8 => {
            info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
        }
        tungstenite::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::ConnectionReset => {
            info!("WebSocket connection reset by peer {}", peer);
        }
        tungstenite::Error::Capacity(cap_err) => {
            warn!("WebSocket capacity error for {}: {}", peer, cap_err);
        }
        _ => {
            error!("Error receiving message from {}: {}", peer, e);
        }
    }
}
