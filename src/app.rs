//! Composition roots for the two processes.
//!
//! Leaves are constructed first and handed upward as trait objects; no
//! framework wiring. Each process follows configure → acquire → serve →
//! shutdown, with shutdown driven by SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use url::Url;

use crate::a2a::client::A2aClient;
use crate::a2a::server::{A2aServerState, error_response};
use crate::config::Config;
use crate::gateway::telegram::TelegramMessenger;
use crate::gateway::{GatewayService, webhook};
use crate::ids::{ServerId, UserId};
use crate::llm::OpenAiChatModel;
use crate::mcp::McpToolManager;
use crate::oauth::{AccountService, HttpOAuthHandler};
use crate::orchestrator::{ChatService, TracingCallbacks};
use crate::ports::{OsRandom, SystemClock};
use crate::storage::{FileStorage, MemoryThreadStorage};

/// Run the agent core: A2A endpoints plus OAuth/admin plumbing.
pub async fn run_agent(config: Config) -> Result<()> {
    let storage = Arc::new(FileStorage::new(config.agent.storage_path.clone()));
    let threads = Arc::new(MemoryThreadStorage::new());
    let http = reqwest::Client::new();
    let clock = Arc::new(SystemClock);
    let random = Arc::new(OsRandom);

    let oauth = Arc::new(HttpOAuthHandler::new(
        http.clone(),
        config.agent.oauth_scopes.clone(),
    ));
    let tools = Arc::new(McpToolManager::new(
        storage.clone(),
        storage.clone(),
        oauth.clone(),
        clock.clone(),
    ));
    let model = Arc::new(OpenAiChatModel::new(
        http,
        config.agent.model_api_base.clone(),
        config.agent.model_api_key.clone(),
    ));

    let chat = ChatService::new(
        threads,
        model,
        tools.clone(),
        storage.clone(),
        storage.clone(),
        config.agent.default_model,
        Arc::new(TracingCallbacks),
    );

    let accounts = Arc::new(AccountService::new(
        storage.clone(),
        tools.clone(),
        oauth,
        clock,
        random,
        config.agent.state_key,
        chrono::Duration::from_std(config.agent.state_expiration)
            .context("state expiration out of range")?,
        config.agent.oauth_client_name.clone(),
        config.agent.oauth_callback_url.clone(),
    ));

    let router = crate::a2a::server::router(A2aServerState::new(
        chat,
        config.agent.anonymous_user,
    ))
    .merge(admin_router(accounts));

    let listener = tokio::net::TcpListener::bind(config.agent.listen)
        .await
        .with_context(|| format!("binding agent listener on {}", config.agent.listen))?;
    tracing::info!(listen = %config.agent.listen, "agent core is serving");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving agent core")?;

    tools.close();
    tracing::info!("agent core stopped");
    Ok(())
}

/// Run the gateway: Telegram webhook ingress wired to the A2A client.
pub async fn run_gateway(config: Config) -> Result<()> {
    if config.gateway.telegram_token.is_empty() {
        anyhow::bail!("CYNOSURE_TELEGRAM_TOKEN is required for the gateway");
    }

    let http = reqwest::Client::new();
    let messenger = Arc::new(TelegramMessenger::with_api_base(
        http.clone(),
        config.gateway.telegram_token.clone(),
        config.gateway.telegram_api_base.clone(),
    ));
    let agent = Arc::new(A2aClient::new(http, config.gateway.a2a_url.clone()));

    let service = Arc::new(GatewayService::new(messenger, agent));
    let router = webhook::router(service);

    let listener = tokio::net::TcpListener::bind(config.gateway.listen)
        .await
        .with_context(|| format!("binding gateway listener on {}", config.gateway.listen))?;
    tracing::info!(listen = %config.gateway.listen, "gateway is serving");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving gateway")?;

    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    tracing::info!("shutdown signal received");
}

// ── OAuth / admin routes ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct AddServerRequest {
    url: Url,
}

#[derive(Debug, Deserialize)]
struct AuthLinkRequest {
    server: String,
    user: String,
    name: String,
    description: String,
}

fn admin_router(accounts: Arc<AccountService>) -> Router {
    Router::new()
        .route("/oauth/callback", get(oauth_callback))
        .route("/admin/servers", post(add_server))
        .route("/admin/auth-link", post(auth_link))
        .with_state(accounts)
}

async fn oauth_callback(
    State(accounts): State<Arc<AccountService>>,
    Query(query): Query<CallbackQuery>,
) -> axum::response::Response {
    match accounts.exchange_token(&query.code, &query.state).await {
        Ok(()) => "Account connected. You can close this page.".into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "oauth exchange failed");
            error_response(&err)
        }
    }
}

async fn add_server(
    State(accounts): State<Arc<AccountService>>,
    axum::Json(request): axum::Json<AddServerRequest>,
) -> axum::response::Response {
    let server = ServerId::random();
    match accounts.add_server(server, &request.url).await {
        Ok(()) => axum::Json(serde_json::json!({ "server_id": server.to_string() })).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn auth_link(
    State(accounts): State<Arc<AccountService>>,
    axum::Json(request): axum::Json<AuthLinkRequest>,
) -> axum::response::Response {
    let parsed = ServerId::from_string(&request.server)
        .and_then(|server| UserId::from_string(&request.user).map(|user| (server, user)));
    let (server, user) = match parsed {
        Ok(ids) => ids,
        Err(err) => return error_response(&err),
    };

    match accounts
        .setup_auth_link(server, user, &request.name, &request.description)
        .await
    {
        Ok(url) => axum::Json(serde_json::json!({ "url": url.to_string() })).into_response(),
        Err(err) => error_response(&err),
    }
}
