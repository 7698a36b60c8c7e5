//! Virtual toolset construction and the inverse call decoding.
//!
//! Language models do not understand multi-accounting: exposing
//! `jira_work.list_issues` and `jira_personal.list_issues` as separate tools
//! measurably degrades call quality. Instead, same-named tools across
//! accounts collapse into one entry whose parameter schema gains a synthetic
//! `_target_account` discriminator, and the model's answer is decoded back to
//! a concrete account before execution.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::account::{Account, ToolInfo};
use crate::error::CoreError;
use crate::ids::AccountId;

/// Property injected into colliding tool schemas.
pub const TARGET_ACCOUNT_KEY: &str = "_target_account";

/// How the model may use tools in one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Forbidden,
    Allowed,
    Forced,
}

impl std::str::FromStr for ToolChoice {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "forbidden" => Ok(Self::Forbidden),
            "allowed" => Ok(Self::Allowed),
            "forced" => Ok(Self::Forced),
            other => Err(CoreError::validation(format!("unknown tool choice {other:?}"))),
        }
    }
}

/// What to do when the same tool name appears with divergent schemas.
/// Only `Leave` is active; the alternatives stay as configuration hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
enum CollisionStrategy {
    Replace,
    Leave,
    ThrowError,
}

const STRATEGY: CollisionStrategy = CollisionStrategy::Leave;

/// A fully resolved tool invocation, ready for the tool manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    account: AccountId,
    call_id: String,
    tool_name: String,
    arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(
        account: AccountId,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Result<Self, CoreError> {
        let call_id = call_id.into();
        let tool_name = tool_name.into();
        if call_id.is_empty() {
            return Err(CoreError::validation("tool call id cannot be empty"));
        }
        if tool_name.is_empty() {
            return Err(CoreError::validation("tool call name cannot be empty"));
        }

        Ok(Self {
            account,
            call_id,
            tool_name,
            arguments,
        })
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }
}

/// One entry of the virtual toolset: the converted, model-facing form of a
/// tool, with back-links from account names to account ids.
#[derive(Debug, Clone, PartialEq)]
pub struct RawToolInfo {
    name: String,
    description: String,
    encoded_accounts: BTreeMap<String, AccountId>,
    params_schema: Value,
    response_schema: Value,
}

impl RawToolInfo {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        encoded_accounts: BTreeMap<String, AccountId>,
        params_schema: Value,
        response_schema: Value,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::validation("tool name cannot be empty"));
        }
        if encoded_accounts.is_empty() {
            return Err(CoreError::validation(
                "tool must be associated with at least one account",
            ));
        }

        Ok(Self {
            name,
            description: description.into(),
            encoded_accounts,
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

    pub fn encoded_accounts(&self) -> &BTreeMap<String, AccountId> {
        &self.encoded_accounts
    }

    pub fn params_schema(&self) -> &Value {
        &self.params_schema
    }

    pub fn response_schema(&self) -> &Value {
        &self.response_schema
    }

    /// Left inverse of the discriminator injection: resolve a model-emitted
    /// call to a concrete account and strip the synthetic property.
    pub fn select_tool_from_call(
        &self,
        mut arguments: Map<String, Value>,
    ) -> Result<ToolCall, CoreError> {
        if self.encoded_accounts.is_empty() {
            return Err(CoreError::internal(
                "invalid chat state: there are no accounts for any tool",
            ));
        }
        if self.encoded_accounts.len() == 1 {
            let account = *self.encoded_accounts.values().next().expect("len checked");
            return ToolCall::new(account, Uuid::new_v4().to_string(), &self.name, arguments);
        }

        let Some(raw_name) = arguments.remove(TARGET_ACCOUNT_KEY) else {
            return Err(CoreError::validation(format!(
                "arguments are missing {TARGET_ACCOUNT_KEY:?}, unable to determine target account"
            )));
        };
        let Value::String(account_name) = raw_name else {
            return Err(CoreError::validation(format!(
                "{TARGET_ACCOUNT_KEY:?} must be a string"
            )));
        };
        let Some(account) = self.encoded_accounts.get(&account_name).copied() else {
            return Err(CoreError::validation(format!(
                "unknown account {account_name:?}"
            )));
        };

        ToolCall::new(account, Uuid::new_v4().to_string(), &self.name, arguments)
    }
}

struct GroupedTool {
    description: String,
    accounts: BTreeMap<String, GroupedAccount>,
    params_schema: Value,
    response_schema: Value,
}

struct GroupedAccount {
    id: AccountId,
    description: String,
}

/// Flatten per-account tool catalogs into the virtual toolset the model sees.
///
/// `relevant` lists the tool names retained per account; `accounts` carries
/// the catalogs themselves. Tools that collide on name with identical schemas
/// merge into one multi-account entry; divergent schemas follow the fixed
/// collision strategy (keep the first occurrence).
pub fn resolve_toolset(
    relevant: &HashMap<AccountId, Vec<ToolInfo>>,
    accounts: &[Account],
) -> Result<BTreeMap<String, RawToolInfo>, CoreError> {
    let mut retained: HashMap<AccountId, HashSet<&str>> = HashMap::with_capacity(relevant.len());
    for (account_id, tools) in relevant {
        retained.insert(*account_id, tools.iter().map(ToolInfo::name).collect());
    }

    let mut grouped: BTreeMap<String, GroupedTool> = BTreeMap::new();
    for account in accounts {
        let Some(names) = retained.get(&account.id()) else {
            continue;
        };

        for tool in account.tools() {
            if !names.contains(tool.name()) {
                continue;
            }

            let Some(existing) = grouped.get_mut(tool.name()) else {
                grouped.insert(
                    tool.name().to_string(),
                    GroupedTool {
                        description: tool.description().to_string(),
                        accounts: BTreeMap::from([(
                            account.name().to_string(),
                            GroupedAccount {
                                id: account.id(),
                                description: account.description().to_string(),
                            },
                        )]),
                        params_schema: tool.params_schema().clone(),
                        response_schema: tool.response_schema().clone(),
                    },
                );
                continue;
            };

            if tool.params_schema() == &existing.params_schema
                && tool.response_schema() == &existing.response_schema
            {
                // Description drift alone is not worth a conflict: the first
                // occurrence wins and the account still joins the entry.
                if tool.description() != existing.description {
                    tracing::debug!(
                        tool = tool.name(),
                        account = account.name(),
                        "tool description differs between accounts"
                    );
                }
                existing.accounts.insert(
                    account.name().to_string(),
                    GroupedAccount {
                        id: account.id(),
                        description: account.description().to_string(),
                    },
                );
                continue;
            }

            match STRATEGY {
                CollisionStrategy::Leave => continue,
                CollisionStrategy::Replace => {
                    *existing = GroupedTool {
                        description: tool.description().to_string(),
                        accounts: BTreeMap::from([(
                            account.name().to_string(),
                            GroupedAccount {
                                id: account.id(),
                                description: account.description().to_string(),
                            },
                        )]),
                        params_schema: tool.params_schema().clone(),
                        response_schema: tool.response_schema().clone(),
                    };
                }
                CollisionStrategy::ThrowError => {
                    return Err(CoreError::validation(format!(
                        "tool {:?} collided with divergent schemas",
                        tool.name()
                    )));
                }
            }
        }
    }

    let mut toolset = BTreeMap::new();
    for (name, group) in grouped {
        let encoded_accounts: BTreeMap<String, AccountId> = group
            .accounts
            .iter()
            .map(|(account_name, account)| (account_name.clone(), account.id))
            .collect();

        let params_schema = if group.accounts.len() > 1 {
            inject_target_account(&name, group.params_schema, &group.accounts)?
        } else {
            group.params_schema
        };

        let info = RawToolInfo::new(
            &name,
            group.description,
            encoded_accounts,
            params_schema,
            group.response_schema,
        )?;
        toolset.insert(name, info);
    }

    Ok(toolset)
}

fn inject_target_account(
    tool_name: &str,
    mut schema: Value,
    accounts: &BTreeMap<String, GroupedAccount>,
) -> Result<Value, CoreError> {
    let Some(root) = schema.as_object_mut() else {
        return Err(CoreError::internal(format!(
            "params schema for tool {tool_name:?} is not a JSON object"
        )));
    };

    let properties = root
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(properties) = properties.as_object_mut() else {
        return Err(CoreError::internal(format!(
            "properties of tool {tool_name:?} is not a JSON object"
        )));
    };

    if properties.contains_key(TARGET_ACCOUNT_KEY) {
        return Err(CoreError::internal(format!(
            "schema of tool {tool_name:?} already has property {TARGET_ACCOUNT_KEY:?}"
        )));
    }

    let account_names: Vec<Value> = accounts.keys().map(|name| json!(name)).collect();
    properties.insert(
        TARGET_ACCOUNT_KEY.to_string(),
        json!({
            "type": "string",
            "enum": account_names,
            "description": render_account_description(accounts),
        }),
    );

    let required = root
        .entry("required")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(required) = required.as_array_mut() else {
        return Err(CoreError::internal(format!(
            "required of tool {tool_name:?} is not a JSON array"
        )));
    };
    required.push(json!(TARGET_ACCOUNT_KEY));

    Ok(schema)
}

fn render_account_description(accounts: &BTreeMap<String, GroupedAccount>) -> String {
    let mut rendered = String::from(
        "The account that will be used to perform this action.\n\
         Different accounts may have different access rights or contexts.\n\
         \n\
         Allowed values:\n",
    );
    for (name, account) in accounts {
        rendered.push_str(&format!("- `{name}` — {}\n", account.description));
    }

    rendered
}
