//! Webhook ingress: decode messenger updates into domain values and hand
//! them to the pipeline.
//!
//! The webhook contract is at-most-once: the handler acknowledges with 200
//! even when processing fails, so the messenger never retries. Failures are
//! logged and, where possible, explained to the user by the pipeline itself.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::gateway::GatewayService;
use crate::gateway::types::{ChannelId, InboundMessage, MessageId, MessageText, UserId};

const MAX_BODY_SIZE: usize = 65_536;
const REQUEST_TIMEOUT_SECS: u64 = 300;

const PROVIDER: &str = "telegram";

#[derive(Debug, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessage {
    pub message_id: i32,
    pub chat: ChatRef,
    #[serde(default)]
    pub from: Option<UserRef>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRef {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UserRef {
    pub id: i64,
}

pub fn router(service: Arc<GatewayService>) -> Router {
    Router::new()
        .route("/telegram/webhook", post(handle_update))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .with_state(service)
}

async fn handle_update(
    State(service): State<Arc<GatewayService>>,
    body: Result<axum::Json<Update>, axum::extract::rejection::JsonRejection>,
) -> StatusCode {
    let axum::Json(update) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "undecodable webhook payload");
            return StatusCode::OK;
        }
    };

    let Some(message) = update.message else {
        tracing::debug!(update_id = update.update_id, "ignoring non-message update");
        return StatusCode::OK;
    };

    let inbound = match decode_message(&message) {
        Ok(inbound) => inbound,
        Err(issue) => {
            tracing::warn!(update_id = update.update_id, issue, "dropping inbound update");
            return StatusCode::OK;
        }
    };

    if let Err(err) = service.receive_new_message_event(&inbound).await {
        tracing::warn!(
            update_id = update.update_id,
            error = %err,
            "processing inbound message failed"
        );
    }

    StatusCode::OK
}

fn decode_message(message: &UpdateMessage) -> Result<InboundMessage, String> {
    let channel = ChannelId::new(PROVIDER, message.chat.id.to_string())
        .map_err(|err| format!("invalid channel id: {err}"))?;
    let id = MessageId::new(channel, message.message_id.to_string())
        .map_err(|err| format!("invalid message id: {err}"))?;

    let Some(from) = &message.from else {
        return Err("message has no sender".to_string());
    };
    let from = UserId::new(PROVIDER, from.id.to_string())
        .map_err(|err| format!("invalid user id: {err}"))?;

    let text = match message.text.as_deref() {
        None | Some("") => None,
        Some(text) => {
            Some(MessageText::new(text).map_err(|err| format!("invalid message text: {err}"))?)
        }
    };

    Ok(InboundMessage::new(id, from, text))
}
