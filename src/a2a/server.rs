//! A2A server: the HTTP face of the conversation orchestrator.
//!
//! Two entry points share one request shape. The unary one collects the full
//! conversation turn with tools forbidden; the streaming one allows tools and
//! relays every orchestrator message as an SSE frame.

use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use futures_util::StreamExt;
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use super::{
    A2aMessage, ErrorDetail, ErrorFrame, Part, Role, SendMessageRequest, SendMessageResponse,
    StreamResponse, message_to_a2a,
};
use crate::error::CoreError;
use crate::ids::UserId;
use crate::messages::UserMessage;
use crate::orchestrator::{ChatService, GenerateOptions};
use crate::toolset::ToolChoice;

/// Maximum request body size.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Unary requests run a full conversation turn; give them room.
pub const REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Clone)]
pub struct A2aServerState {
    service: ChatService,
    /// Used for every request without an authenticated principal.
    anonymous_user: UserId,
}

impl A2aServerState {
    pub fn new(service: ChatService, anonymous_user: UserId) -> Self {
        Self {
            service,
            anonymous_user,
        }
    }
}

pub fn router(state: A2aServerState) -> Router {
    Router::new()
        .route("/v1/message:send", post(send_message))
        .route("/v1/message:stream", post(send_streaming_message))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .with_state(state)
}

fn parse_request(request: &SendMessageRequest) -> Result<(String, UserMessage), CoreError> {
    let text = request.request.text();
    if text.is_empty() {
        return Err(CoreError::validation("message content cannot be empty"));
    }

    let thread_id = request
        .request
        .context_id
        .clone()
        .filter(|context_id| !context_id.is_empty())
        .ok_or_else(|| CoreError::validation("context id is required"))?;

    Ok((thread_id, UserMessage::new(text)?))
}

async fn send_message(
    State(state): State<A2aServerState>,
    Json(request): Json<SendMessageRequest>,
) -> axum::response::Response {
    let (thread_id, message) = match parse_request(&request) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&err),
    };

    let stream = state
        .service
        .generate_response(
            state.anonymous_user,
            &thread_id,
            message,
            GenerateOptions {
                tool_choice: ToolChoice::Forbidden,
                model: None,
            },
        )
        .await;

    let mut stream = match stream {
        Ok(stream) => stream,
        Err(err) => return error_response(&err),
    };

    let mut parts: Vec<Part> = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                if let Some(mapped) = message_to_a2a(&message) {
                    parts.extend(mapped.content);
                }
            }
            Err(err) => return error_response(&err),
        }
    }

    Json(SendMessageResponse {
        msg: A2aMessage {
            message_id: None,
            context_id: request.request.context_id.clone(),
            role: Role::Agent,
            content: parts,
            metadata: None,
        },
    })
    .into_response()
}

async fn send_streaming_message(
    State(state): State<A2aServerState>,
    Json(request): Json<SendMessageRequest>,
) -> axum::response::Response {
    let (thread_id, message) = match parse_request(&request) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&err),
    };

    let stream = state
        .service
        .generate_response(
            state.anonymous_user,
            &thread_id,
            message,
            GenerateOptions {
                tool_choice: ToolChoice::Allowed,
                model: None,
            },
        )
        .await;

    let mut stream = match stream {
        Ok(stream) => stream,
        Err(err) => return error_response(&err),
    };

    let frames = async_stream::stream! {
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    let Some(mapped) = message_to_a2a(&message) else {
                        continue;
                    };
                    let frame = StreamResponse { msg: mapped };
                    if let Ok(encoded) = serde_json::to_string(&frame) {
                        yield Ok::<_, std::convert::Infallible>(format!("data: {encoded}\n\n"));
                    }
                }
                Err(err) => {
                    let frame = ErrorFrame {
                        error: ErrorDetail::from_error(&err),
                    };
                    if let Ok(encoded) = serde_json::to_string(&frame) {
                        yield Ok(format!("data: {encoded}\n\n"));
                    }
                    return;
                }
            }
        }
    };

    let mut response = Response::new(Body::from_stream(frames));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response
}

pub(crate) fn error_response(err: &CoreError) -> axum::response::Response {
    let status = match err {
        CoreError::Validation(_) | CoreError::MessageTooLarge => StatusCode::BAD_REQUEST,
        CoreError::NotFound => StatusCode::NOT_FOUND,
        CoreError::AuthRequired(_) | CoreError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
        CoreError::AuthUnsupported | CoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Deadline => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Cancelled | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let detail = ErrorDetail::from_error(err);
    (status, Json(json!({ "error": detail }))).into_response()
}
