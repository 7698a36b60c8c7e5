//! Account entity: one authorization of one MCP server for one user, plus
//! the tool catalog enumerated from that server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::CoreError;
use crate::ids::AccountId;

/// OAuth credentials attached to an account. Accounts may be anonymous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// A tool as enumerated from an MCP server. Schemas are JSON Schema; the
/// input schema must describe an object, and a missing output schema is
/// substituted with a plain string schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    name: String,
    description: String,
    params_schema: Value,
    response_schema: Value,
}

impl ToolInfo {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        params_schema: Value,
        response_schema: Option<Value>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::validation("tool name cannot be empty"));
        }

        if params_schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(CoreError::validation(format!(
                "params schema for tool {name:?} must be an object schema"
            )));
        }

        let response_schema = match response_schema {
            Some(Value::Null) | None => json!({"type": "string"}),
            Some(schema) => schema,
        };

        Ok(Self {
            name,
            description: description.into(),
            params_schema,
            response_schema,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params_schema(&self) -> &Value {
        &self.params_schema
    }

    pub fn response_schema(&self) -> &Value {
        &self.response_schema
    }
}

#[derive(Debug, Clone)]
pub enum AccountEvent {
    ToolsSet { tools: Vec<ToolInfo> },
    TokenUpdated { token: OAuthToken },
}

#[derive(Debug, Clone)]
pub struct Account {
    id: AccountId,
    name: String,
    description: String,
    token: Option<OAuthToken>,
    tools: Vec<ToolInfo>,
    pending_events: Vec<AccountEvent>,
}

impl Account {
    pub fn new(
        id: AccountId,
        name: impl Into<String>,
        description: impl Into<String>,
        tools: Vec<ToolInfo>,
        token: Option<OAuthToken>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let description = description.into();
        if name.is_empty() {
            return Err(CoreError::validation("account name is required"));
        }
        if description.is_empty() {
            return Err(CoreError::validation("account description is required"));
        }
        validate_tools(&tools)?;

        Ok(Self {
            id,
            name,
            description,
            token,
            tools,
            pending_events: Vec::new(),
        })
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn token(&self) -> Option<&OAuthToken> {
        self.token.as_ref()
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn set_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), CoreError> {
        validate_tools(&tools)?;

        self.tools = tools.clone();
        self.pending_events.push(AccountEvent::ToolsSet { tools });
        Ok(())
    }

    pub fn update_token(&mut self, token: OAuthToken) -> Result<(), CoreError> {
        if token.access_token.is_empty() {
            return Err(CoreError::validation("access token cannot be empty"));
        }

        self.token = Some(token.clone());
        self.pending_events.push(AccountEvent::TokenUpdated { token });
        Ok(())
    }

    pub fn pending_events(&self) -> &[AccountEvent] {
        &self.pending_events
    }

    pub fn clear_events(&mut self) {
        self.pending_events.clear();
    }

    pub fn synchronized(&self) -> bool {
        self.pending_events.is_empty()
    }
}

fn validate_tools(tools: &[ToolInfo]) -> Result<(), CoreError> {
    let mut seen = std::collections::HashSet::with_capacity(tools.len());
    for tool in tools {
        if !seen.insert(tool.name()) {
            return Err(CoreError::validation(format!(
                "duplicated tool name: {:?}",
                tool.name()
            )));
        }
    }
    Ok(())
}
