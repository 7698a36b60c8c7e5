//! Port contracts between the agent core and its collaborators.
//!
//! All ports are object-safe, `Send + Sync`, and safe for concurrent use
//! unless stated otherwise. Implementations live in the adapter modules; the
//! composition root hands them in as trait objects.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::account::{Account, OAuthToken, ToolInfo};
use crate::error::CoreError;
use crate::history::ChatHistory;
use crate::ids::{AccountId, ModelConfigId, ServerId, UserId};
use crate::messages::{Message, MessageStream};
use crate::model_settings::ModelSettings;
use crate::toolset::{RawToolInfo, ToolCall, ToolChoice};

/// Per-call parameters for a model stream.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Virtual toolset exposed to the model; empty when tools are forbidden.
    pub tools: Vec<RawToolInfo>,
    pub tool_choice: ToolChoice,
}

/// A streaming large-language-model provider. The returned stream emits
/// message fragments tagged for [`crate::messages::merge_messages_streaming`].
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream(
        &self,
        input: &[Message],
        settings: &ModelSettings,
        options: StreamOptions,
    ) -> Result<MessageStream, CoreError>;
}

/// Registration, discovery and execution of external tools.
///
/// An [`AccountId`] already names the user, the server and the authorization,
/// so implementations know where to connect without extra context.
#[async_trait]
pub trait ToolManager: Send + Sync {
    /// Connect to the account's server, enumerate its tool catalog and
    /// persist the resulting account. Idempotent per account. With no token
    /// the connection is attempted anonymously.
    async fn register_tools(
        &self,
        account: AccountId,
        name: &str,
        description: &str,
        token: Option<OAuthToken>,
    ) -> Result<(), CoreError>;

    /// Tools relevant to the user's conversation so far, grouped by account.
    async fn retrieve_relevant_tools(
        &self,
        user: UserId,
        input: &[Message],
    ) -> Result<HashMap<AccountId, Vec<ToolInfo>>, CoreError>;

    /// Execute a decoded tool call and shape the result as a tool message.
    /// An oversized payload surfaces as [`CoreError::MessageTooLarge`].
    async fn execute_tool(&self, call: ToolCall) -> Result<Message, CoreError>;
}

/// Chat-history persistence, keyed by `(user, thread_id)`.
#[async_trait]
pub trait ThreadStorage: Send + Sync {
    async fn create_thread(&self, thread: &ChatHistory) -> Result<(), CoreError>;
    async fn get_thread(&self, user: UserId, thread_id: &str) -> Result<ChatHistory, CoreError>;
    async fn save_thread(&self, thread: &ChatHistory) -> Result<(), CoreError>;
}

#[async_trait]
pub trait AccountStorage: Send + Sync {
    async fn list_accounts(&self, user: UserId) -> Result<Vec<AccountId>, CoreError>;
    async fn get_account(&self, account: AccountId) -> Result<Account, CoreError>;
    async fn get_accounts_batch(&self, accounts: &[AccountId]) -> Result<Vec<Account>, CoreError>;
    async fn save_account(&self, account: &Account) -> Result<(), CoreError>;
    async fn delete_account(&self, account: AccountId) -> Result<(), CoreError>;
}

/// A registered OAuth client at an MCP server's authorization endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub auth_url: Url,
    pub token_url: Url,
    pub redirect_url: Url,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Connection endpoint of one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub sse_url: Url,
    /// Absent when the server does not support (or need) authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<OAuthClientConfig>,
    /// Absent means the registration does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_expiration: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ServerStorage: Send + Sync {
    async fn add_server(&self, id: ServerId, info: ServerInfo) -> Result<(), CoreError>;
    async fn list_servers(&self) -> Result<HashMap<ServerId, ServerInfo>, CoreError>;
    async fn get_server_info(&self, id: ServerId) -> Result<ServerInfo, CoreError>;
    async fn lookup_by_url(&self, url: &Url) -> Result<(ServerId, ServerInfo), CoreError>;
}

#[async_trait]
pub trait ModelSettingsStorage: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelSettings>, CoreError>;
    async fn get_model(&self, id: ModelConfigId) -> Result<ModelSettings, CoreError>;
    async fn save_model(&self, settings: &ModelSettings) -> Result<(), CoreError>;
    async fn delete_model(&self, id: ModelConfigId) -> Result<(), CoreError>;
}

/// OAuth wire operations the account service depends on.
#[async_trait]
pub trait OAuthHandler: Send + Sync {
    /// Dynamically register a client when the server supports it; returns the
    /// client config and its optional expiry. Servers without authorization
    /// respond with [`CoreError::AuthUnsupported`].
    async fn register_client(
        &self,
        server_url: &Url,
        client_name: &str,
        redirect: &Url,
    ) -> Result<(OAuthClientConfig, Option<DateTime<Utc>>), CoreError>;

    async fn refresh_token(
        &self,
        config: &OAuthClientConfig,
        token: &OAuthToken,
    ) -> Result<OAuthToken, CoreError>;

    /// Exchange an authorization code for tokens, proving the PKCE verifier.
    async fn exchange(
        &self,
        config: &OAuthClientConfig,
        code: &str,
        verifier: &[u8],
    ) -> Result<OAuthToken, CoreError>;
}

/// Injected wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Injected entropy source for PKCE verifiers and AEAD nonces.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buf);
    }
}
