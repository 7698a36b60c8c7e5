//! Typed configuration, ingested from `CYNOSURE_*` environment variables.
//!
//! Every effect-bearing entry is an explicit field with a documented default;
//! required entries fail loudly at startup, not at first use.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::CoreError;
use crate::ids::{ModelConfigId, UserId};
use crate::oauth::state::STATE_KEY_LEN;

#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub agent: AgentConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. `info` or `cynosure=debug`.
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen: SocketAddr,
    pub default_model: ModelConfigId,
    /// Identity assumed for A2A requests without an authenticated principal.
    pub anonymous_user: UserId,
    pub state_key: [u8; STATE_KEY_LEN],
    pub state_expiration: Duration,
    pub storage_path: PathBuf,
    pub oauth_callback_url: Url,
    pub oauth_scopes: Vec<String>,
    pub oauth_client_name: String,
    pub model_api_base: String,
    pub model_api_key: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen: SocketAddr,
    pub telegram_token: String,
    pub telegram_api_base: String,
    pub a2a_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::load(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup. Split out
    /// so tests never touch process environment.
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let logging = LoggingConfig {
            level: optional(&lookup, "CYNOSURE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        let agent = AgentConfig {
            listen: parse_addr(
                &optional(&lookup, "CYNOSURE_AGENT_LISTEN")
                    .unwrap_or_else(|| "127.0.0.1:50051".to_string()),
            )?,
            default_model: ModelConfigId::from_string(&required(
                &lookup,
                "CYNOSURE_DEFAULT_MODEL",
            )?)?,
            anonymous_user: UserId::from_string(&required(&lookup, "CYNOSURE_ANONYMOUS_USER")?)?,
            state_key: parse_state_key(&required(&lookup, "CYNOSURE_STATE_KEY")?)?,
            state_expiration: Duration::from_secs(parse_u64(
                &optional(&lookup, "CYNOSURE_STATE_EXPIRATION_SECS")
                    .unwrap_or_else(|| "600".to_string()),
                "CYNOSURE_STATE_EXPIRATION_SECS",
            )?),
            storage_path: PathBuf::from(
                optional(&lookup, "CYNOSURE_STORAGE_PATH")
                    .unwrap_or_else(|| "storage.yaml".to_string()),
            ),
            oauth_callback_url: parse_url(&required(&lookup, "CYNOSURE_OAUTH_CALLBACK_URL")?)?,
            oauth_scopes: optional(&lookup, "CYNOSURE_OAUTH_SCOPES")
                .map(|scopes| {
                    scopes
                        .split_whitespace()
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_else(|| vec!["mcp.read".to_string(), "mcp.write".to_string()]),
            oauth_client_name: optional(&lookup, "CYNOSURE_OAUTH_CLIENT_NAME")
                .unwrap_or_else(|| "cynosure".to_string()),
            model_api_base: optional(&lookup, "CYNOSURE_MODEL_API_BASE")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model_api_key: optional(&lookup, "CYNOSURE_MODEL_API_KEY").unwrap_or_default(),
        };

        let gateway = GatewayConfig {
            listen: parse_addr(
                &optional(&lookup, "CYNOSURE_GATEWAY_LISTEN")
                    .unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            )?,
            telegram_token: optional(&lookup, "CYNOSURE_TELEGRAM_TOKEN").unwrap_or_default(),
            telegram_api_base: optional(&lookup, "CYNOSURE_TELEGRAM_API_BASE")
                .unwrap_or_else(|| crate::gateway::telegram::DEFAULT_API_BASE.to_string()),
            a2a_url: optional(&lookup, "CYNOSURE_A2A_URL")
                .unwrap_or_else(|| "http://127.0.0.1:50051".to_string()),
        };

        Ok(Self {
            logging,
            agent,
            gateway,
        })
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|value| !value.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, CoreError> {
    optional(lookup, name)
        .ok_or_else(|| CoreError::validation(format!("environment variable {name} is required")))
}

fn parse_addr(value: &str) -> Result<SocketAddr, CoreError> {
    value
        .parse()
        .map_err(|err| CoreError::validation(format!("invalid listen address {value:?}: {err}")))
}

fn parse_url(value: &str) -> Result<Url, CoreError> {
    Url::parse(value).map_err(|err| CoreError::validation(format!("invalid URL {value:?}: {err}")))
}

fn parse_u64(value: &str, name: &str) -> Result<u64, CoreError> {
    value
        .parse()
        .map_err(|err| CoreError::validation(format!("invalid {name}: {err}")))
}

/// The state key arrives as 32 hex characters.
fn parse_state_key(value: &str) -> Result<[u8; STATE_KEY_LEN], CoreError> {
    if value.len() != STATE_KEY_LEN * 2 {
        return Err(CoreError::validation(format!(
            "state key must be {} hex characters",
            STATE_KEY_LEN * 2
        )));
    }

    let mut key = [0u8; STATE_KEY_LEN];
    for (index, byte) in key.iter_mut().enumerate() {
        let pair = &value[index * 2..index * 2 + 2];
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|err| CoreError::validation(format!("state key is not hex: {err}")))?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            (
                "CYNOSURE_DEFAULT_MODEL",
                "e0689c78-4fd0-4eca-a907-8e00515bc88d".to_string(),
            ),
            (
                "CYNOSURE_ANONYMOUS_USER",
                "620ccadd-dcb4-4007-a316-6fed71487cfd".to_string(),
            ),
            (
                "CYNOSURE_STATE_KEY",
                "0102030405060708090a0b0c0d0e0f10".to_string(),
            ),
            (
                "CYNOSURE_OAUTH_CALLBACK_URL",
                "https://bot.example.com/oauth/callback".to_string(),
            ),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config, CoreError> {
        Config::load(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_fill_optional_entries() {
        let config = load(&minimal_vars()).unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.agent.listen.port(), 50051);
        assert_eq!(config.agent.state_expiration, Duration::from_secs(600));
        assert_eq!(config.agent.storage_path, PathBuf::from("storage.yaml"));
        assert_eq!(config.agent.oauth_scopes, vec!["mcp.read", "mcp.write"]);
        assert_eq!(config.gateway.listen.port(), 8080);
        assert_eq!(config.gateway.a2a_url, "http://127.0.0.1:50051");
    }

    #[test]
    fn missing_required_entry_fails() {
        let mut vars = minimal_vars();
        vars.remove("CYNOSURE_STATE_KEY");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn state_key_parses_hex() {
        let key = parse_state_key("0102030405060708090a0b0c0d0e0f10").unwrap();
        assert_eq!(key[0], 1);
        assert_eq!(key[15], 16);

        assert!(parse_state_key("too short").is_err());
        assert!(parse_state_key("zz02030405060708090a0b0c0d0e0f10").is_err());
    }

    #[test]
    fn scopes_split_on_whitespace() {
        let mut vars = minimal_vars();
        vars.insert("CYNOSURE_OAUTH_SCOPES", "a b  c".to_string());
        let config = load(&vars).unwrap();
        assert_eq!(config.agent.oauth_scopes, vec!["a", "b", "c"]);
    }

    #[test]
    fn invalid_listen_address_fails() {
        let mut vars = minimal_vars();
        vars.insert("CYNOSURE_AGENT_LISTEN", "not-an-addr".to_string());
        assert!(load(&vars).is_err());
    }
}
