use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:8000")]
    pub server_addr: String,

    /// Port for the HTTP API (/, /health, /chat). The API is disabled when unset.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    // --- Streaming Args ---
    /// Delay in milliseconds between streamed chunks.
    #[arg(long, env = "CHUNK_DELAY_MS", default_value = "20")]
    pub chunk_delay_ms: u64,

    /// Largest inbound frame, in bytes, that will be processed.
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value = "1048576")]
    pub max_message_size: usize,

    // --- Responder Args ---
    /// Reply generator (canned, echo)
    #[arg(long, env = "RESPONDER", default_value = "canned")]
    pub responder: String,

    /// Seed for the responder's random choices. Random when unset.
    #[arg(long, env = "RESPONDER_SEED")]
    pub responder_seed: Option<u64>,

    // --- Conversation Store Args ---
    /// Upper bound on stored conversations. Unbounded when unset.
    #[arg(long, env = "MAX_CONVERSATIONS")]
    pub max_conversations: Option<usize>,

    /// Seconds a conversation without sessions may stay idle before eviction. 0 disables.
    #[arg(long, env = "CONVERSATION_TTL_SECS", default_value = "0")]
    pub conversation_ttl_secs: u64,

    /// How often, in seconds, idle conversations are swept.
    #[arg(long, env = "EVICTION_INTERVAL_SECS", default_value = "60")]
    pub eviction_interval_secs: u64,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling WSS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
