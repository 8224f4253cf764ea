use crate::cli::Args;
use crate::error::ChatError;
use crate::models::chat::{ ChatRequest, ChatResponse, Role };
use crate::responder::generate_reply;
use crate::server::tls::{ load_tls_config, tls_paths };
use crate::state::AppState;

use std::error::Error;
use std::net::SocketAddr;

use axum::{
    extract::{ rejection::JsonRejection, State },
    http::StatusCode,
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use chrono::Utc;
use log::{ debug, error, info, warn };
use serde::Serialize;
use serde_json::{ json, Value };
use thiserror::Error;
use tower_http::cors::{ Any, CorsLayer };

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Responder error: {0}")]
    Responder(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => {
                warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::Responder(msg) => {
                error!("Responder error: {}", msg);
                (StatusCode::BAD_GATEWAY, "ResponderError", "Failed to generate a response".to_string())
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "Internal error".to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            | ChatError::MalformedInput(_)
            | ChatError::EmptyMessage
            | ChatError::MessageTooLarge { .. }
            | ChatError::InvalidConversationId(_) => ApiError::BadRequest(err.client_message()),
            ChatError::ResponderFailure(detail) => ApiError::Responder(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    conversations: usize,
    active_sessions: usize,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    http_port: u16,
    state: AppState,
    args: &Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    let app = router(state);

    if let Some((cert_path, key_path)) = tls_paths(args)? {
        info!("Starting HTTPS API server on: https://{}", addr);
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_config(
            load_tls_config(cert_path, key_path)?
        );

        tokio::spawn(async move {
            let result = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await;

            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });
    } else {
        info!("Starting HTTP API server on: http://{}", addr);

        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                        error!("HTTP server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                }
            }
        });
    }

    Ok(())
}

async fn root_handler() -> Json<Value> {
    Json(
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
            "endpoints": {
                "websocket": "/ws/{conversation_id}",
                "chat": "/chat",
                "health": "/health",
            },
        })
    )
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        conversations: state.store.len(),
        active_sessions: state.registry.session_count(),
    })
}

/// Non-streaming chat. Both turns are recorded like a WebSocket exchange.
async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let conversation_id = request.conversation_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("conversation_id is required".to_string()))?;
    if request.message.trim().is_empty() {
        return Err(ChatError::EmptyMessage.into());
    }
    debug!("POST /chat on '{}' (stream flag {:?} ignored)", conversation_id, request.stream);

    let conversation = state.store.get_or_create(conversation_id)?;
    conversation.append(Role::User, request.message.as_str());
    let history = conversation.history();

    let reply = generate_reply(&*state.responder, &history, &request.message).await?;
    conversation.append(Role::Assistant, reply.as_str());

    Ok(
        Json(ChatResponse {
            response: reply,
            conversation_id: conversation_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Turn;
    use crate::responder::echo::EchoResponder;
    use crate::responder::{ Responder, ResponderError };
    use crate::state::SessionSettings;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{ header, Request };
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Broken;

    #[async_trait]
    impl Responder for Broken {
        async fn generate(&self, _: &[Turn], _: &str) -> Result<String, ResponderError> {
            Err(ResponderError::Unavailable("upstream timed out".into()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn echo_state() -> AppState {
        AppState::new(Arc::new(EchoResponder), SessionSettings::default())
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_chat(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let state = echo_state();
        state.store.get_or_create("a").unwrap();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = call(router(state), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["conversations"], 1);
        assert_eq!(body["active_sessions"], 0);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn root_lists_endpoints() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = call(router(echo_state()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["endpoints"]["websocket"], "/ws/{conversation_id}");
    }

    #[tokio::test]
    async fn chat_replies_and_records_both_turns() {
        let state = echo_state();
        let store = Arc::clone(&state.store);

        let (status, body) = call(
            router(state),
            post_chat(r#"{"message": "hi", "conversation_id": "c1", "stream": true}"#)
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "You said: hi");
        assert_eq!(body["conversation_id"], "c1");
        assert!(body["timestamp"].is_string());

        let turns = store.get("c1").unwrap().messages;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].content, "You said: hi");
    }

    #[tokio::test]
    async fn chat_requires_conversation_id() {
        let (status, body) = call(router(echo_state()), post_chat(r#"{"message": "hi"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BadRequest");

        let (status, _) = call(
            router(echo_state()),
            post_chat(r#"{"message": "hi", "conversation_id": "  "}"#)
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_rejects_empty_and_malformed_bodies() {
        let state = echo_state();
        let store = Arc::clone(&state.store);

        let (status, body) = call(
            router(state.clone()),
            post_chat(r#"{"message": "", "conversation_id": "c2"}"#)
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Empty message");

        let (status, _) = call(router(state), post_chat("{oops")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn responder_failure_is_a_bad_gateway() {
        let state = AppState::new(Arc::new(Broken), SessionSettings::default());
        let (status, body) = call(
            router(state),
            post_chat(r#"{"message": "hi", "conversation_id": "c3"}"#)
        ).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "ResponderError");
        assert_eq!(body["message"], "Failed to generate a response");
    }
}
