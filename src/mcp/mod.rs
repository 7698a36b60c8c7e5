//! MCP tool manager: SSE sessions per account, cached with singleflight.
//!
//! A session is expensive (transport handshake plus `initialize`), so live
//! sessions are cached per account with a short TTL and a small cap. Session
//! construction refreshes a stale OAuth token when a refresh token exists and
//! persists the updated account.

pub mod content;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, RawContent};
use rmcp::service::{RoleClient, RunningService, ServiceExt};
use rmcp::transport::sse_client::{SseClientConfig, SseClientTransport};
use serde_json::Value;
use std::collections::HashMap;

use crate::account::{Account, OAuthToken, ToolInfo};
use crate::cache::{Cache, CacheError, Constructor, Destructor};
use crate::error::CoreError;
use crate::ids::{AccountId, UserId};
use crate::messages::{Message, ToolErrorMessage, ToolResponseMessage};
use crate::ports::{AccountStorage, Clock, OAuthHandler, ServerInfo, ServerStorage, ToolManager};
use crate::toolset::ToolCall;
use content::{McpContent, result_payload};

const SESSION_CACHE_CAPACITY: usize = 5;
const SESSION_TTL: Duration = Duration::from_secs(600);

/// One live MCP connection. Cloning shares the underlying service.
#[derive(Clone)]
pub struct McpSession {
    service: Arc<RunningService<RoleClient, ()>>,
}

impl McpSession {
    /// Connect and complete the `initialize` handshake. A token turns into a
    /// bearer header on every transport request.
    pub async fn connect(sse_url: &url::Url, token: Option<&OAuthToken>) -> Result<Self, CoreError> {
        let mut builder = reqwest::Client::builder();
        if let Some(token) = token {
            let mut headers = reqwest::header::HeaderMap::new();
            let value =
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token.access_token))
                    .map_err(|err| CoreError::validation(format!("invalid access token: {err}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        let http = builder
            .build()
            .map_err(|err| CoreError::internal(format!("building http client: {err}")))?;

        let transport = SseClientTransport::start_with_client(
            http,
            SseClientConfig {
                sse_endpoint: sse_url.to_string().into(),
                use_message_endpoint: None,
                ..Default::default()
            },
        )
        .await
        .map_err(|err| {
            CoreError::unavailable(format!("establishing sse connection to {sse_url}: {err}"))
        })?;

        let service = ().serve(transport).await.map_err(|err| {
            CoreError::unavailable(format!("initializing mcp session at {sse_url}: {err}"))
        })?;

        Ok(Self {
            service: Arc::new(service),
        })
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, CoreError> {
        let response = self
            .service
            .list_tools(None)
            .await
            .map_err(|err| CoreError::unavailable(format!("listing tools: {err}")))?;

        response
            .tools
            .into_iter()
            .map(|tool| {
                let input_schema = Value::Object(Arc::unwrap_or_clone(tool.input_schema));
                let output_schema = tool
                    .output_schema
                    .map(|schema| Value::Object(Arc::unwrap_or_clone(schema)));
                ToolInfo::new(
                    tool.name.to_string(),
                    tool.description.unwrap_or_default().to_string(),
                    input_schema,
                    output_schema,
                )
            })
            .collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<(Option<Value>, Vec<McpContent>, bool), CoreError> {
        let result = self
            .service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|err| CoreError::unavailable(format!("calling tool {name:?}: {err}")))?;

        let contents = result
            .content
            .into_iter()
            .map(|item| match item.raw {
                RawContent::Text(text) => McpContent::Text(text.text),
                _ => McpContent::Other,
            })
            .collect();

        Ok((
            result.structured_content,
            contents,
            result.is_error.unwrap_or(false),
        ))
    }

    /// Sever the session's worker. The derived cancellation token makes this
    /// safe from synchronous contexts (cache destructor).
    fn shutdown(&self) {
        self.service.cancellation_token().cancel();
    }
}

pub struct McpToolManager {
    sessions: Cache<AccountId, McpSession>,
    accounts: Arc<dyn AccountStorage>,
    servers: Arc<dyn ServerStorage>,
}

impl McpToolManager {
    pub fn new(
        accounts: Arc<dyn AccountStorage>,
        servers: Arc<dyn ServerStorage>,
        oauth: Arc<dyn OAuthHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let constructor: Constructor<AccountId, McpSession> = {
            let accounts = accounts.clone();
            let servers = servers.clone();
            Arc::new(move |account_id: AccountId| {
                let accounts = accounts.clone();
                let servers = servers.clone();
                let oauth = oauth.clone();
                let clock = clock.clone();
                Box::pin(async move {
                    let mut account = accounts.get_account(account_id).await?;
                    let info = servers.get_server_info(account_id.server()).await?;

                    if let Some(token) =
                        refreshed_token(&account, &info, &*oauth, clock.now()).await?
                    {
                        account.update_token(token)?;
                        accounts.save_account(&account).await?;
                        account.clear_events();
                    }

                    McpSession::connect(&info.sse_url, account.token()).await
                })
            })
        };

        let destructor: Destructor<AccountId, McpSession> =
            Arc::new(|account_id, session: McpSession| {
                tracing::debug!(account = %account_id, "closing mcp session");
                session.shutdown();
            });

        Self {
            sessions: Cache::new(constructor, destructor, SESSION_CACHE_CAPACITY, SESSION_TTL),
            accounts,
            servers,
        }
    }

    pub fn close(&self) {
        let _ = self.sessions.close();
    }
}

/// A stale token with a refresh token gets refreshed before connecting.
async fn refreshed_token(
    account: &Account,
    info: &ServerInfo,
    oauth: &dyn OAuthHandler,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Option<OAuthToken>, CoreError> {
    let Some(token) = account.token() else {
        return Ok(None);
    };
    if token.is_usable(now) {
        return Ok(None);
    }
    let Some(auth) = &info.auth else {
        return Ok(None);
    };
    if token.refresh_token.is_none() {
        return Err(CoreError::AuthRequired(format!(
            "token for account {} expired and cannot be refreshed",
            account.id()
        )));
    }

    oauth.refresh_token(auth, token).await.map(Some)
}

fn cache_error(err: CacheError) -> CoreError {
    match err {
        CacheError::Closed => CoreError::unavailable("mcp session cache is closed"),
        CacheError::Construction(inner) => inner,
        CacheError::Panicked(message) => {
            CoreError::internal(format!("mcp session constructor panicked: {message}"))
        }
        CacheError::Aborted => CoreError::Cancelled,
    }
}

#[async_trait]
impl ToolManager for McpToolManager {
    async fn register_tools(
        &self,
        account: AccountId,
        name: &str,
        description: &str,
        token: Option<OAuthToken>,
    ) -> Result<(), CoreError> {
        let info = self.servers.get_server_info(account.server()).await?;

        let session = McpSession::connect(&info.sse_url, token.as_ref()).await?;
        let tools = session.list_tools().await;
        session.shutdown();
        let tools = tools?;

        for tool in &tools {
            tracing::info!(account = %account, tool = tool.name(), "registered tool");
        }

        let entity = Account::new(account, name, description, tools, token)?;
        self.accounts.save_account(&entity).await
    }

    async fn retrieve_relevant_tools(
        &self,
        user: UserId,
        _input: &[Message],
    ) -> Result<HashMap<AccountId, Vec<ToolInfo>>, CoreError> {
        // Every account with its full catalog; content-based relevance
        // filtering plugs in here once a ranking signal exists.
        let account_ids = self.accounts.list_accounts(user).await?;

        let mut result = HashMap::with_capacity(account_ids.len());
        for account_id in account_ids {
            let account = self.accounts.get_account(account_id).await?;
            result.insert(account_id, account.tools().to_vec());
        }

        Ok(result)
    }

    async fn execute_tool(&self, call: ToolCall) -> Result<Message, CoreError> {
        let session = self
            .sessions
            .get(call.account())
            .await
            .map_err(cache_error)?;

        let (structured, contents, is_error) = session
            .call_tool(call.tool_name(), call.arguments().clone())
            .await?;
        let payload = result_payload(structured, &contents);

        if is_error {
            let message = ToolErrorMessage::new(payload, call.tool_name(), call.call_id())?;
            return Ok(Message::ToolError(message));
        }

        let message = ToolResponseMessage::new(payload, call.tool_name(), call.call_id())?;
        Ok(Message::ToolResponse(message))
    }
}
