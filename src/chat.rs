//! Chat aggregate root: one thread's history together with the virtual
//! toolset resolved for its current state.
//!
//! Every successful append re-resolves tools and persists the thread before
//! clearing the event journal; any failure along the way rolls the history
//! back so the aggregate never drifts from storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::history::ChatHistory;
use crate::ids::UserId;
use crate::messages::Message;
use crate::ports::{AccountStorage, ThreadStorage, ToolManager};
use crate::toolset::{RawToolInfo, ToolCall, resolve_toolset};

pub struct Chat {
    thread: ChatHistory,
    virtual_tools: BTreeMap<String, RawToolInfo>,

    storage: Arc<dyn ThreadStorage>,
    tools: Arc<dyn ToolManager>,
    accounts: Arc<dyn AccountStorage>,
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chat")
            .field("thread", &self.thread)
            .field("virtual_tools", &self.virtual_tools)
            .finish_non_exhaustive()
    }
}

impl Chat {
    /// Load an existing thread; fails with [`CoreError::NotFound`] when it
    /// does not exist yet.
    pub async fn load(
        storage: Arc<dyn ThreadStorage>,
        tools: Arc<dyn ToolManager>,
        accounts: Arc<dyn AccountStorage>,
        user: UserId,
        thread_id: &str,
    ) -> Result<Self, CoreError> {
        let thread = storage.get_thread(user, thread_id).await?;
        let virtual_tools = pull_tools_and_accounts(&*tools, &*accounts, &thread).await?;

        Ok(Self {
            thread,
            virtual_tools,
            storage,
            tools,
            accounts,
        })
    }

    /// Create and persist a fresh thread.
    pub async fn create(
        storage: Arc<dyn ThreadStorage>,
        tools: Arc<dyn ToolManager>,
        accounts: Arc<dyn AccountStorage>,
        user: UserId,
        thread_id: &str,
        messages: Vec<Message>,
    ) -> Result<Self, CoreError> {
        let thread = ChatHistory::new(user, thread_id, messages)?;
        storage.create_thread(&thread).await?;
        let virtual_tools = pull_tools_and_accounts(&*tools, &*accounts, &thread).await?;

        Ok(Self {
            thread,
            virtual_tools,
            storage,
            tools,
            accounts,
        })
    }

    /// Append a message: validate, journal, re-resolve tools, persist. On any
    /// failure the thread rolls back to its last persisted state.
    pub async fn add_message(&mut self, message: Message) -> Result<(), CoreError> {
        self.thread.add_message(message)?;

        let virtual_tools =
            match pull_tools_and_accounts(&*self.tools, &*self.accounts, &self.thread).await {
                Ok(tools) => tools,
                Err(err) => {
                    self.thread.reset();
                    return Err(err);
                }
            };

        if let Err(err) = self.storage.save_thread(&self.thread).await {
            self.thread.reset();
            return Err(err);
        }

        self.thread.clear_events();
        self.virtual_tools = virtual_tools;
        Ok(())
    }

    /// Resolve a model-emitted call against the current virtual toolset.
    pub fn decode_tool_call(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCall, CoreError> {
        let Some(info) = self.virtual_tools.get(tool_name) else {
            return Err(CoreError::validation(format!("unknown tool {tool_name:?}")));
        };

        info.select_tool_from_call(arguments)
    }

    pub fn relevant_tools(&self) -> Vec<RawToolInfo> {
        self.virtual_tools.values().cloned().collect()
    }

    pub fn messages(&self) -> &[Message] {
        self.thread.messages()
    }

    pub fn thread_id(&self) -> &str {
        self.thread.thread_id()
    }

    pub fn user(&self) -> UserId {
        self.thread.user()
    }
}

async fn pull_tools_and_accounts(
    tools: &dyn ToolManager,
    accounts: &dyn AccountStorage,
    thread: &ChatHistory,
) -> Result<BTreeMap<String, RawToolInfo>, CoreError> {
    let relevant = tools
        .retrieve_relevant_tools(thread.user(), thread.messages())
        .await?;

    let lookup_ids: Vec<_> = relevant.keys().copied().collect();
    let resolved_accounts = accounts.get_accounts_batch(&lookup_ids).await?;

    resolve_toolset(&relevant, &resolved_accounts)
}
