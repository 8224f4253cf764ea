pub mod api;
pub mod tls;

use crate::cli::Args;
use crate::history::spawn_sweeper;
use crate::state::AppState;
use crate::websocket::handle_connection;

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{ error, info, warn };
use percent_encoding::percent_decode_str;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const MIN_FRAME_CEILING: usize = 64 << 20;

pub struct Server {
    args: Args,
    state: AppState,
}

impl Server {
    pub fn new(args: Args, state: AppState) -> Self {
        Self { args, state }
    }

    /// Serves until Ctrl-C.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let tls_acceptor = tls::acceptor_from_args(&self.args)?;

        if let Some(http_port) = self.args.http_port {
            api::start_http_server(http_port, self.state.clone(), &self.args).await?;
        }

        let sweeper = if self.args.conversation_ttl_secs > 0 {
            let ttl = Duration::from_secs(self.args.conversation_ttl_secs);
            let every = Duration::from_secs(self.args.eviction_interval_secs.max(1));
            info!("Evicting conversations idle for more than {:?}, checked every {:?}", ttl, every);
            Some(spawn_sweeper(Arc::clone(&self.state.store), ttl, every))
        } else {
            None
        };

        let listener = TcpListener::bind(&self.args.server_addr).await?;
        let protocol = if tls_acceptor.is_some() { "WSS" } else { "WS" };
        info!("{} server listening on: {}", protocol, self.args.server_addr);

        let result = tokio::select! {
            result = serve_ws(listener, self.state.clone(), tls_acceptor) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping server");
                Ok(())
            }
        };

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result
    }
}

/// Accepts connections forever, one task per connection.
pub async fn serve_ws(
    listener: TcpListener,
    state: AppState,
    tls_acceptor: Option<TlsAcceptor>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        info!("Incoming connection from: {}", peer);
        let state = state.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(peer, tls_stream, state).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, state).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    state: AppState
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let mut requested = None;
    let route_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match conversation_id_from_path(req.uri().path()) {
            Some(conversation_id) => {
                requested = Some(conversation_id);
                Ok(response)
            }
            None => {
                warn!("Rejecting handshake from {} for path {}", peer, req.uri().path());
                Err(not_found())
            }
        }
    };

    let config = frame_limits(state.settings.max_message_size);
    let websocket = match accept_hdr_async_with_config(stream, route_callback, Some(config)).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            return Err(Box::new(e) as _);
        }
    };

    let Some(conversation_id) = requested else {
        return Err("handshake completed without a conversation id".into());
    };
    handle_connection(peer, websocket, conversation_id, state).await;
    Ok(())
}

/// Extracts `{id}` from `/ws/{id}`, percent-decoded. Ids that do not decode
/// to UTF-8 are rejected.
pub fn conversation_id_from_path(path: &str) -> Option<String> {
    let raw = path.strip_prefix("/ws/")?;
    let raw = raw.strip_suffix('/').unwrap_or(raw);
    if raw.contains('/') {
        return None;
    }
    let id = percent_decode_str(raw).decode_utf8().ok()?;
    if id.trim().is_empty() {
        return None;
    }
    Some(id.into_owned())
}

/// tungstenite's own message and frame caps. They sit well above
/// `max_message_size` so oversized messages still reach the session and get
/// an error event; only messages past this ceiling end the connection.
pub fn frame_limits(max_message_size: usize) -> WebSocketConfig {
    let ceiling = max_message_size.saturating_mul(4).max(MIN_FRAME_CEILING);
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(ceiling);
    config.max_frame_size = Some(ceiling);
    config
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
