pub mod cli;
pub mod emitter;
pub mod error;
pub mod history;
pub mod models;
pub mod registry;
pub mod responder;
pub mod server;
pub mod state;
pub mod websocket;

use cli::Args;
use log::info;
use server::Server;
use state::AppState;
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    match args.http_port {
        Some(port) => info!("HTTP API Port: {}", port),
        None => info!("HTTP API: disabled"),
    }
    info!("Responder: {}", args.responder);
    info!("Chunk Delay: {}ms", args.chunk_delay_ms);
    info!("Max Message Size: {} bytes", args.max_message_size);
    match args.max_conversations {
        Some(limit) => info!("Max Conversations: {}", limit),
        None => info!("Max Conversations: unbounded"),
    }
    if args.conversation_ttl_secs > 0 {
        info!("Conversation TTL: {}s", args.conversation_ttl_secs);
    }
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let state = AppState::from_args(&args)?;
    info!("Using '{}' responder", state.responder.name());
    let server = Server::new(args, state);
    server.run().await?;

    Ok(())
}
