//! Shared mock ports for integration suites.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{Value, json};

use cynosure::account::{Account, OAuthToken, ToolInfo};
use cynosure::error::CoreError;
use cynosure::ids::{AccountId, ModelConfigId, ServerId, UserId};
use cynosure::messages::{Message, MessageStream};
use cynosure::model_settings::ModelSettings;
use cynosure::orchestrator::{ChatService, NoopCallbacks};
use cynosure::ports::{
    AccountStorage, ChatModel, ModelSettingsStorage, StreamOptions, ToolManager,
};
use cynosure::storage::MemoryThreadStorage;
use cynosure::toolset::ToolCall;

/// Replays scripted model turns in order; repeats the last turn once the
/// script runs out.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<Vec<Result<Message, CoreError>>>>,
    last: Mutex<Option<Vec<Result<Message, CoreError>>>>,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(turns: Vec<Vec<Result<Message, CoreError>>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream(
        &self,
        _input: &[Message],
        _settings: &ModelSettings,
        _options: StreamOptions,
    ) -> Result<MessageStream, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let turn = {
            let mut turns = self.turns.lock().unwrap();
            match turns.pop_front() {
                Some(turn) => {
                    *self.last.lock().unwrap() = Some(clone_turn(&turn));
                    turn
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|turn| clone_turn(turn))
                    .unwrap_or_default(),
            }
        };

        Ok(Box::pin(stream::iter(turn)))
    }
}

fn clone_turn(turn: &[Result<Message, CoreError>]) -> Vec<Result<Message, CoreError>> {
    turn.iter().cloned().collect()
}

/// Serves a fixed account catalog and records every executed call.
pub struct RecordingToolManager {
    catalog: HashMap<AccountId, Vec<ToolInfo>>,
    responses: HashMap<String, Value>,
    pub executed: Mutex<Vec<ToolCall>>,
    pub oversize_tools: Vec<String>,
}

impl RecordingToolManager {
    pub fn new(
        catalog: HashMap<AccountId, Vec<ToolInfo>>,
        responses: HashMap<String, Value>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            responses,
            executed: Mutex::new(Vec::new()),
            oversize_tools: Vec::new(),
        })
    }

    pub fn with_oversize_tools(
        catalog: HashMap<AccountId, Vec<ToolInfo>>,
        oversize_tools: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            responses: HashMap::new(),
            executed: Mutex::new(Vec::new()),
            oversize_tools,
        })
    }

    pub fn executed_calls(&self) -> Vec<ToolCall> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolManager for RecordingToolManager {
    async fn register_tools(
        &self,
        _account: AccountId,
        _name: &str,
        _description: &str,
        _token: Option<OAuthToken>,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    async fn retrieve_relevant_tools(
        &self,
        _user: UserId,
        _input: &[Message],
    ) -> Result<HashMap<AccountId, Vec<ToolInfo>>, CoreError> {
        Ok(self.catalog.clone())
    }

    async fn execute_tool(&self, call: ToolCall) -> Result<Message, CoreError> {
        self.executed.lock().unwrap().push(call.clone());

        if self.oversize_tools.iter().any(|name| name == call.tool_name()) {
            return Err(CoreError::MessageTooLarge);
        }

        let payload = self
            .responses
            .get(call.tool_name())
            .cloned()
            .unwrap_or_else(|| json!({"ok": true}));

        Ok(Message::ToolResponse(
            cynosure::messages::ToolResponseMessage::new(
                payload,
                call.tool_name(),
                call.call_id(),
            )?,
        ))
    }
}

/// Serves exactly the accounts it was given.
pub struct StaticAccounts {
    accounts: Vec<Account>,
}

impl StaticAccounts {
    pub fn new(accounts: Vec<Account>) -> Arc<Self> {
        Arc::new(Self { accounts })
    }
}

#[async_trait]
impl AccountStorage for StaticAccounts {
    async fn list_accounts(&self, _user: UserId) -> Result<Vec<AccountId>, CoreError> {
        Ok(self.accounts.iter().map(Account::id).collect())
    }

    async fn get_account(&self, account: AccountId) -> Result<Account, CoreError> {
        self.accounts
            .iter()
            .find(|candidate| candidate.id() == account)
            .cloned()
            .ok_or(CoreError::NotFound)
    }

    async fn get_accounts_batch(&self, accounts: &[AccountId]) -> Result<Vec<Account>, CoreError> {
        accounts
            .iter()
            .map(|id| {
                self.accounts
                    .iter()
                    .find(|candidate| candidate.id() == *id)
                    .cloned()
                    .ok_or(CoreError::NotFound)
            })
            .collect()
    }

    async fn save_account(&self, _account: &Account) -> Result<(), CoreError> {
        Ok(())
    }

    async fn delete_account(&self, _account: AccountId) -> Result<(), CoreError> {
        Ok(())
    }
}

/// One model configuration, served for its own id only.
pub struct StaticModels {
    settings: ModelSettings,
}

impl StaticModels {
    pub fn new(settings: ModelSettings) -> Arc<Self> {
        Arc::new(Self { settings })
    }
}

#[async_trait]
impl ModelSettingsStorage for StaticModels {
    async fn list_models(&self) -> Result<Vec<ModelSettings>, CoreError> {
        Ok(vec![self.settings.clone()])
    }

    async fn get_model(&self, id: ModelConfigId) -> Result<ModelSettings, CoreError> {
        if id == self.settings.id() {
            Ok(self.settings.clone())
        } else {
            Err(CoreError::NotFound)
        }
    }

    async fn save_model(&self, _settings: &ModelSettings) -> Result<(), CoreError> {
        Ok(())
    }

    async fn delete_model(&self, _id: ModelConfigId) -> Result<(), CoreError> {
        Ok(())
    }
}

pub struct TestDeps {
    pub service: ChatService,
    pub threads: Arc<MemoryThreadStorage>,
    pub model: Arc<ScriptedModel>,
    pub tools: Arc<RecordingToolManager>,
    pub model_id: ModelConfigId,
    pub user: UserId,
}

/// One weather account whose catalog exposes `get_weather`.
pub fn weather_account(user: UserId) -> Account {
    let id = AccountId::random(user, ServerId::random());
    Account::new(
        id,
        "weather",
        "weather lookups",
        vec![
            ToolInfo::new(
                "get_weather",
                "Current weather for a city",
                json!({"type": "object", "properties": {"city": {"type": "string"}}}),
                None,
            )
            .unwrap(),
        ],
        None,
    )
    .unwrap()
}

/// Wire a ChatService over scripted mocks.
pub fn service_with(
    accounts: Vec<Account>,
    turns: Vec<Vec<Result<Message, CoreError>>>,
    responses: HashMap<String, Value>,
) -> TestDeps {
    let catalog = catalog_of(&accounts);
    build(
        accounts,
        turns,
        RecordingToolManager::new(catalog, responses),
        Arc::new(NoopCallbacks),
    )
}

/// One weather account, no scripted tool responses.
pub fn service_with_defaults(turns: Vec<Vec<Result<Message, CoreError>>>) -> TestDeps {
    let account = weather_account(UserId::random());
    service_with(vec![account], turns, HashMap::new())
}

pub fn service_with_callbacks(
    accounts: Vec<Account>,
    turns: Vec<Vec<Result<Message, CoreError>>>,
    responses: HashMap<String, Value>,
    callbacks: Arc<dyn cynosure::orchestrator::GenerateCallbacks>,
) -> TestDeps {
    let catalog = catalog_of(&accounts);
    build(
        accounts,
        turns,
        RecordingToolManager::new(catalog, responses),
        callbacks,
    )
}

pub fn service_with_oversize(
    accounts: Vec<Account>,
    turns: Vec<Vec<Result<Message, CoreError>>>,
    oversize_tools: Vec<String>,
) -> TestDeps {
    let catalog = catalog_of(&accounts);
    build(
        accounts,
        turns,
        RecordingToolManager::with_oversize_tools(catalog, oversize_tools),
        Arc::new(NoopCallbacks),
    )
}

fn catalog_of(accounts: &[Account]) -> HashMap<AccountId, Vec<ToolInfo>> {
    accounts
        .iter()
        .map(|account| (account.id(), account.tools().to_vec()))
        .collect()
}

fn build(
    accounts: Vec<Account>,
    turns: Vec<Vec<Result<Message, CoreError>>>,
    tools: Arc<RecordingToolManager>,
    callbacks: Arc<dyn cynosure::orchestrator::GenerateCallbacks>,
) -> TestDeps {
    let user = accounts
        .first()
        .map(|account| account.id().user())
        .unwrap_or_else(UserId::random);

    let threads = Arc::new(MemoryThreadStorage::new());
    let model = ScriptedModel::new(turns);
    let model_id = ModelConfigId::random();
    let settings = ModelSettings::new(model_id, "test-model").unwrap();

    let service = ChatService::new(
        threads.clone(),
        model.clone(),
        tools.clone(),
        StaticAccounts::new(accounts),
        StaticModels::new(settings),
        model_id,
        callbacks,
    );

    TestDeps {
        service,
        threads,
        model,
        tools,
        model_id,
        user,
    }
}
