//! Persistence adapters.
//!
//! `FileStorage` keeps models, accounts and servers in one YAML document;
//! every update rewrites the whole file under a mutex, which is plenty for
//! the catalog sizes involved. `MemoryThreadStorage` backs chat histories
//! in-process for the default composition and for tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::account::{Account, OAuthToken, ToolInfo};
use crate::error::CoreError;
use crate::history::ChatHistory;
use crate::ids::{AccountId, ModelConfigId, ServerId, UserId};
use crate::model_settings::ModelSettings;
use crate::ports::{
    AccountStorage, ModelSettingsStorage, OAuthClientConfig, ServerInfo, ServerStorage,
    ThreadStorage,
};

// ── Document schema ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageSchema {
    #[serde(default)]
    models: BTreeMap<String, ModelRecord>,
    /// user id → server id → account id → record
    #[serde(default)]
    accounts: BTreeMap<String, BTreeMap<String, BTreeMap<String, AccountRecord>>>,
    #[serde(default)]
    servers: BTreeMap<String, ServerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelRecord {
    model: String,
    #[serde(default)]
    system_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stop_words: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccountRecord {
    name: String,
    desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<OAuthToken>,
    #[serde(default)]
    tools: Vec<ToolRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolRecord {
    name: String,
    desc: String,
    input: Value,
    output: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerRecord {
    url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<OAuthClientConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiration: Option<DateTime<Utc>>,
}

// ── File adapter ─────────────────────────────────────────────────────────────

pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_schema(&self) -> Result<StorageSchema, CoreError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StorageSchema::default()),
            Err(err) => {
                return Err(CoreError::internal(format!(
                    "reading storage file {:?}: {err}",
                    self.path
                )));
            }
        };
        if data.is_empty() {
            return Ok(StorageSchema::default());
        }

        serde_yaml::from_slice(&data)
            .map_err(|err| CoreError::internal(format!("parsing storage file: {err}")))
    }

    async fn write_schema(&self, schema: &StorageSchema) -> Result<(), CoreError> {
        let data = serde_yaml::to_string(schema)
            .map_err(|err| CoreError::internal(format!("encoding storage file: {err}")))?;
        tokio::fs::write(&self.path, data).await.map_err(|err| {
            CoreError::internal(format!("writing storage file {:?}: {err}", self.path))
        })
    }
}

fn account_to_record(account: &Account) -> AccountRecord {
    AccountRecord {
        name: account.name().to_string(),
        desc: account.description().to_string(),
        token: account.token().cloned(),
        tools: account
            .tools()
            .iter()
            .map(|tool| ToolRecord {
                name: tool.name().to_string(),
                desc: tool.description().to_string(),
                input: tool.params_schema().clone(),
                output: tool.response_schema().clone(),
            })
            .collect(),
    }
}

fn record_to_account(id: AccountId, record: &AccountRecord) -> Result<Account, CoreError> {
    let tools = record
        .tools
        .iter()
        .map(|tool| {
            ToolInfo::new(
                tool.name.clone(),
                tool.desc.clone(),
                tool.input.clone(),
                Some(tool.output.clone()),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Account::new(
        id,
        record.name.clone(),
        record.desc.clone(),
        tools,
        record.token.clone(),
    )
}

fn record_to_settings(id: ModelConfigId, record: &ModelRecord) -> Result<ModelSettings, CoreError> {
    let mut settings =
        ModelSettings::new(id, record.model.clone())?.with_system_message(record.system_message.clone());
    if let Some(temperature) = record.temperature {
        settings = settings.with_temperature(temperature);
    }
    if let Some(top_p) = record.top_p {
        settings = settings.with_top_p(top_p);
    }
    if let Some(stop_words) = &record.stop_words {
        settings = settings.with_stop_words(stop_words.clone());
    }
    Ok(settings)
}

#[async_trait]
impl AccountStorage for FileStorage {
    async fn list_accounts(&self, user: UserId) -> Result<Vec<AccountId>, CoreError> {
        let _guard = self.lock.lock().await;
        let schema = self.read_schema().await?;

        let Some(servers) = schema.accounts.get(&user.to_string()) else {
            return Ok(Vec::new());
        };

        let mut ids = Vec::new();
        for (server_key, accounts) in servers {
            let server = ServerId::from_string(server_key)?;
            for account_key in accounts.keys() {
                ids.push(AccountId::from_string(user, server, account_key)?);
            }
        }
        Ok(ids)
    }

    async fn get_account(&self, account: AccountId) -> Result<Account, CoreError> {
        let _guard = self.lock.lock().await;
        let schema = self.read_schema().await?;

        let record = schema
            .accounts
            .get(&account.user().to_string())
            .and_then(|servers| servers.get(&account.server().to_string()))
            .and_then(|accounts| accounts.get(&account.to_string()))
            .ok_or(CoreError::NotFound)?;

        record_to_account(account, record)
    }

    async fn get_accounts_batch(&self, accounts: &[AccountId]) -> Result<Vec<Account>, CoreError> {
        let _guard = self.lock.lock().await;
        let schema = self.read_schema().await?;

        accounts
            .iter()
            .map(|id| {
                let record = schema
                    .accounts
                    .get(&id.user().to_string())
                    .and_then(|servers| servers.get(&id.server().to_string()))
                    .and_then(|records| records.get(&id.to_string()))
                    .ok_or(CoreError::NotFound)?;
                record_to_account(*id, record)
            })
            .collect()
    }

    async fn save_account(&self, account: &Account) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let mut schema = self.read_schema().await?;

        schema
            .accounts
            .entry(account.id().user().to_string())
            .or_default()
            .entry(account.id().server().to_string())
            .or_default()
            .insert(account.id().to_string(), account_to_record(account));

        self.write_schema(&schema).await
    }

    async fn delete_account(&self, account: AccountId) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let mut schema = self.read_schema().await?;

        if let Some(servers) = schema.accounts.get_mut(&account.user().to_string()) {
            if let Some(accounts) = servers.get_mut(&account.server().to_string()) {
                accounts.remove(&account.to_string());
            }
        }

        self.write_schema(&schema).await
    }
}

#[async_trait]
impl ServerStorage for FileStorage {
    async fn add_server(&self, id: ServerId, info: ServerInfo) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let mut schema = self.read_schema().await?;

        schema.servers.insert(
            id.to_string(),
            ServerRecord {
                url: info.sse_url,
                config: info.auth,
                expiration: info.config_expiration,
            },
        );

        self.write_schema(&schema).await
    }

    async fn list_servers(&self) -> Result<HashMap<ServerId, ServerInfo>, CoreError> {
        let _guard = self.lock.lock().await;
        let schema = self.read_schema().await?;

        let mut servers = HashMap::with_capacity(schema.servers.len());
        for (key, record) in &schema.servers {
            servers.insert(
                ServerId::from_string(key)?,
                ServerInfo {
                    sse_url: record.url.clone(),
                    auth: record.config.clone(),
                    config_expiration: record.expiration,
                },
            );
        }
        Ok(servers)
    }

    async fn get_server_info(&self, id: ServerId) -> Result<ServerInfo, CoreError> {
        let _guard = self.lock.lock().await;
        let schema = self.read_schema().await?;

        let record = schema.servers.get(&id.to_string()).ok_or(CoreError::NotFound)?;
        Ok(ServerInfo {
            sse_url: record.url.clone(),
            auth: record.config.clone(),
            config_expiration: record.expiration,
        })
    }

    async fn lookup_by_url(&self, url: &Url) -> Result<(ServerId, ServerInfo), CoreError> {
        let _guard = self.lock.lock().await;
        let schema = self.read_schema().await?;

        for (key, record) in &schema.servers {
            if &record.url == url {
                return Ok((
                    ServerId::from_string(key)?,
                    ServerInfo {
                        sse_url: record.url.clone(),
                        auth: record.config.clone(),
                        config_expiration: record.expiration,
                    },
                ));
            }
        }
        Err(CoreError::NotFound)
    }
}

#[async_trait]
impl ModelSettingsStorage for FileStorage {
    async fn list_models(&self) -> Result<Vec<ModelSettings>, CoreError> {
        let _guard = self.lock.lock().await;
        let schema = self.read_schema().await?;

        schema
            .models
            .iter()
            .map(|(key, record)| record_to_settings(ModelConfigId::from_string(key)?, record))
            .collect()
    }

    async fn get_model(&self, id: ModelConfigId) -> Result<ModelSettings, CoreError> {
        let _guard = self.lock.lock().await;
        let schema = self.read_schema().await?;

        let record = schema.models.get(&id.to_string()).ok_or(CoreError::NotFound)?;
        record_to_settings(id, record)
    }

    async fn save_model(&self, settings: &ModelSettings) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let mut schema = self.read_schema().await?;

        schema.models.insert(
            settings.id().to_string(),
            ModelRecord {
                model: settings.model().to_string(),
                system_message: settings.system_message().to_string(),
                temperature: settings.temperature(),
                top_p: settings.top_p(),
                stop_words: if settings.stop_words().is_empty() {
                    None
                } else {
                    Some(settings.stop_words().to_vec())
                },
            },
        );

        self.write_schema(&schema).await
    }

    async fn delete_model(&self, id: ModelConfigId) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let mut schema = self.read_schema().await?;

        schema.models.remove(&id.to_string());
        self.write_schema(&schema).await
    }
}

// ── In-memory thread storage ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryThreadStorage {
    threads: StdMutex<HashMap<(UserId, String), ChatHistory>>,
}

impl MemoryThreadStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStorage for MemoryThreadStorage {
    async fn create_thread(&self, thread: &ChatHistory) -> Result<(), CoreError> {
        self.threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((thread.user(), thread.thread_id().to_string()), thread.clone());
        Ok(())
    }

    async fn get_thread(&self, user: UserId, thread_id: &str) -> Result<ChatHistory, CoreError> {
        self.threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(user, thread_id.to_string()))
            .cloned()
            .ok_or(CoreError::NotFound)
    }

    async fn save_thread(&self, thread: &ChatHistory) -> Result<(), CoreError> {
        self.threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((thread.user(), thread.thread_id().to_string()), thread.clone());
        Ok(())
    }
}
