//! OAuth account setup: authorization links, the callback exchange, and
//! dynamic server registration.

pub mod state;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::account::OAuthToken;
use crate::error::CoreError;
use crate::ids::{AccountId, ServerId, UserId};
use crate::ports::{
    Clock, OAuthClientConfig, OAuthHandler, RandomSource, ServerInfo, ServerStorage, ToolManager,
};
use state::{STATE_KEY_LEN, State};

const VERIFIER_LEN: usize = 32;

pub struct AccountService {
    servers: Arc<dyn ServerStorage>,
    tools: Arc<dyn ToolManager>,
    oauth: Arc<dyn OAuthHandler>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,

    state_key: [u8; STATE_KEY_LEN],
    state_expiration: chrono::Duration,
    client_name: String,
    redirect_url: Url,
}

impl AccountService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        servers: Arc<dyn ServerStorage>,
        tools: Arc<dyn ToolManager>,
        oauth: Arc<dyn OAuthHandler>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        state_key: [u8; STATE_KEY_LEN],
        state_expiration: chrono::Duration,
        client_name: impl Into<String>,
        redirect_url: Url,
    ) -> Self {
        Self {
            servers,
            tools,
            oauth,
            clock,
            random,
            state_key,
            state_expiration,
            client_name: client_name.into(),
            redirect_url,
        }
    }

    /// Build the authorization URL a user follows to connect an account.
    ///
    /// Allocates a fresh account id, seals it with the PKCE verifier into the
    /// state token, and attaches the S256 challenge.
    pub async fn setup_auth_link(
        &self,
        server: ServerId,
        user: UserId,
        account_name: &str,
        account_description: &str,
    ) -> Result<Url, CoreError> {
        let info = self.servers.get_server_info(server).await?;
        let Some(auth) = info.auth else {
            return Err(CoreError::AuthUnsupported);
        };

        let mut verifier = [0u8; VERIFIER_LEN];
        self.random.fill(&mut verifier);

        let account = AccountId::random(user, server);
        let state = State::new(
            account,
            account_name,
            account_description,
            verifier.to_vec(),
            self.clock.now() + self.state_expiration,
        )?;
        let state_token = state.to_token(&*self.random, &self.state_key)?;

        Ok(build_auth_url(&auth, &state_token, &verifier))
    }

    /// Callback side: open the state, exchange the code, and register the
    /// server's tools under the new account.
    pub async fn exchange_token(&self, code: &str, state_token: &str) -> Result<(), CoreError> {
        if state_token.is_empty() {
            return Err(CoreError::validation("state parameter is required"));
        }
        if code.is_empty() {
            return Err(CoreError::validation("exchange code is required"));
        }

        let state = State::from_token(state_token, &self.state_key, self.clock.now())?;

        let info = self.servers.get_server_info(state.account().server()).await?;
        let Some(auth) = info.auth else {
            return Err(CoreError::AuthUnsupported);
        };

        let token = self.oauth.exchange(&auth, code, state.challenge()).await?;

        self.tools
            .register_tools(state.account(), state.name(), state.description(), Some(token))
            .await
    }

    /// Register a new MCP server endpoint, with dynamic OAuth client
    /// registration when the server supports it.
    pub async fn add_server(&self, server: ServerId, url: &Url) -> Result<(), CoreError> {
        match self.servers.get_server_info(server).await {
            Ok(_) => return Err(CoreError::validation("server already registered")),
            Err(CoreError::NotFound) => {}
            Err(err) => return Err(err),
        }

        let (auth, config_expiration) = match self
            .oauth
            .register_client(url, &self.client_name, &self.redirect_url)
            .await
        {
            Ok((config, expiration)) => (Some(config), expiration),
            // No authorization at all is fine: the server is registered for
            // anonymous connections.
            Err(CoreError::AuthUnsupported) => (None, None),
            Err(err) => return Err(err),
        };

        self.servers
            .add_server(
                server,
                ServerInfo {
                    sse_url: url.clone(),
                    auth,
                    config_expiration,
                },
            )
            .await
    }
}

/// PKCE S256: the challenge is the base64url digest of the base64url-encoded
/// verifier bytes, which also travel inside the state token.
fn build_auth_url(config: &OAuthClientConfig, state_token: &str, verifier: &[u8]) -> Url {
    let verifier_encoded = URL_SAFE_NO_PAD.encode(verifier);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier_encoded.as_bytes()));

    let mut url = config.auth_url.clone();
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", config.redirect_url.as_str())
        .append_pair("scope", &config.scopes.join(" "))
        .append_pair("state", state_token)
        .append_pair("code_challenge", &challenge)
        .append_pair("code_challenge_method", "S256");
    url
}

/// OAuth wire operations over plain HTTP, with RFC 9728 / RFC 8414 metadata
/// discovery and RFC 7591 dynamic client registration.
pub struct HttpOAuthHandler {
    http: reqwest::Client,
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ServerMetadata {
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    registration_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProtectedResource {
    #[serde(default)]
    authorization_servers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterClientResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    client_secret_expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl HttpOAuthHandler {
    pub fn new(http: reqwest::Client, scopes: Vec<String>) -> Self {
        Self { http, scopes }
    }

    /// Discover the authorization server: protected-resource metadata first,
    /// then OIDC discovery, then plain OAuth server metadata, finally the
    /// conventional endpoint paths.
    async fn server_metadata(&self, server_url: &Url) -> Result<ServerMetadata, CoreError> {
        let mut auth_base = base_of(server_url)?;

        let resource_url = join_path(&auth_base, "/.well-known/oauth-protected-resource");
        if let Ok(resource) = self.fetch_json::<ProtectedResource>(&resource_url).await {
            if let Some(first) = resource.authorization_servers.first() {
                let parsed = Url::parse(first).map_err(|err| {
                    CoreError::validation(format!("invalid authorization server URL: {err}"))
                })?;
                auth_base = base_of(&parsed)?;
            }
        }

        for well_known in [
            "/.well-known/openid-configuration",
            "/.well-known/oauth-authorization-server",
        ] {
            let metadata_url = join_path(&auth_base, well_known);
            if let Ok(metadata) = self.fetch_json::<ServerMetadata>(&metadata_url).await {
                return Ok(metadata);
            }
        }

        Ok(ServerMetadata {
            authorization_endpoint: join_path(&auth_base, "/authorize").to_string(),
            token_endpoint: join_path(&auth_base, "/token").to_string(),
            registration_endpoint: Some(join_path(&auth_base, "/register").to_string()),
        })
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> Result<T, CoreError> {
        let response = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| CoreError::unavailable(format!("fetching {url}: {err}")))?;

        if !response.status().is_success() {
            return Err(CoreError::unavailable(format!(
                "fetching {url}: status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| CoreError::unavailable(format!("decoding {url}: {err}")))
    }
}

fn base_of(url: &Url) -> Result<Url, CoreError> {
    let mut base = url.clone();
    base.set_path("");
    base.set_query(None);
    base.set_fragment(None);
    Ok(base)
}

fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url
}

#[async_trait::async_trait]
impl OAuthHandler for HttpOAuthHandler {
    async fn register_client(
        &self,
        server_url: &Url,
        client_name: &str,
        redirect: &Url,
    ) -> Result<(OAuthClientConfig, Option<DateTime<Utc>>), CoreError> {
        let metadata = self.server_metadata(server_url).await?;

        let Some(registration_endpoint) = metadata.registration_endpoint else {
            return Err(CoreError::AuthUnsupported);
        };

        let response = self
            .http
            .post(&registration_endpoint)
            .json(&serde_json::json!({
                "client_name": client_name,
                "redirect_uris": [redirect.as_str()],
                "token_endpoint_auth_method": "client_secret_basic",
                "grant_types": ["authorization_code", "refresh_token"],
                "response_types": ["code"],
                "scope": self.scopes.join(" "),
            }))
            .send()
            .await
            .map_err(|err| CoreError::unavailable(format!("registering client: {err}")))?;

        if !response.status().is_success() {
            return Err(CoreError::unavailable(format!(
                "registering client: status {}",
                response.status()
            )));
        }

        let registered: RegisterClientResponse = response
            .json()
            .await
            .map_err(|err| CoreError::unavailable(format!("decoding registration: {err}")))?;

        let expires_at = registered
            .client_secret_expires_at
            .filter(|expires_at| *expires_at > 0)
            .and_then(|expires_at| Utc.timestamp_opt(expires_at, 0).single());

        let config = OAuthClientConfig {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            auth_url: Url::parse(&metadata.authorization_endpoint).map_err(|err| {
                CoreError::validation(format!("invalid authorization endpoint: {err}"))
            })?,
            token_url: Url::parse(&metadata.token_endpoint)
                .map_err(|err| CoreError::validation(format!("invalid token endpoint: {err}")))?,
            redirect_url: redirect.clone(),
            scopes: self.scopes.clone(),
        };

        Ok((config, expires_at))
    }

    async fn refresh_token(
        &self,
        config: &OAuthClientConfig,
        token: &OAuthToken,
    ) -> Result<OAuthToken, CoreError> {
        let Some(refresh_token) = &token.refresh_token else {
            return Err(CoreError::AuthRequired("no refresh token available".into()));
        };

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.clone()),
            ("client_id", config.client_id.clone()),
        ];
        if let Some(secret) = &config.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        self.request_token(config, &form).await
    }

    async fn exchange(
        &self,
        config: &OAuthClientConfig,
        code: &str,
        verifier: &[u8],
    ) -> Result<OAuthToken, CoreError> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", config.redirect_url.to_string()),
            ("client_id", config.client_id.clone()),
            ("code_verifier", URL_SAFE_NO_PAD.encode(verifier)),
        ];
        if let Some(secret) = &config.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        self.request_token(config, &form).await
    }
}

impl HttpOAuthHandler {
    async fn request_token(
        &self,
        config: &OAuthClientConfig,
        form: &[(&str, String)],
    ) -> Result<OAuthToken, CoreError> {
        let response = self
            .http
            .post(config.token_url.clone())
            .form(form)
            .send()
            .await
            .map_err(|err| CoreError::unavailable(format!("token request: {err}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::BAD_REQUEST
        {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::AuthFailed(format!(
                "token endpoint rejected the request: {body}"
            )));
        }
        if !status.is_success() {
            return Err(CoreError::unavailable(format!(
                "token endpoint returned status {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| CoreError::unavailable(format!("decoding token response: {err}")))?;

        Ok(OAuthToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|expires_in| Utc::now() + chrono::Duration::seconds(expires_in)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_url_carries_pkce_and_state() {
        let config = OAuthClientConfig {
            client_id: "client-1".into(),
            client_secret: None,
            auth_url: Url::parse("https://auth.example.com/authorize").unwrap(),
            token_url: Url::parse("https://auth.example.com/token").unwrap(),
            redirect_url: Url::parse("https://bot.example.com/callback").unwrap(),
            scopes: vec!["mcp.read".into(), "mcp.write".into()],
        };

        let verifier = [7u8; VERIFIER_LEN];
        let url = build_auth_url(&config, "state-token", &verifier);

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["state"], "state-token");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["scope"], "mcp.read mcp.write");

        // RFC 7636: challenge = b64url(sha256(b64url(verifier))).
        let verifier_encoded = URL_SAFE_NO_PAD.encode(verifier);
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier_encoded.as_bytes()));
        assert_eq!(pairs["code_challenge"], expected);
    }

    #[test]
    fn base_of_strips_path_and_query() {
        let url = Url::parse("https://mcp.example.com/sse/endpoint?session=1").unwrap();
        let base = base_of(&url).unwrap();
        assert_eq!(base.as_str(), "https://mcp.example.com/");

        let joined = join_path(&base, "/.well-known/openid-configuration");
        assert_eq!(
            joined.as_str(),
            "https://mcp.example.com/.well-known/openid-configuration"
        );
    }
}
