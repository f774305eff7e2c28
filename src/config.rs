//! Discovery of the local Codex CLI configuration.
//!
//! Reads `config.toml` and `auth.json` from the Codex home directory and
//! resolves the server, credentials and headers for the selected model
//! provider.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-5-codex";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Which OpenAI-compatible endpoint family a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireApi {
    Chat,
    Responses,
}

/// Connection details for one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: Some(base_url.into()),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Server overrides that apply only when a given model is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelServerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<HashMap<String, ServerConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

/// Options for the HTTP-backed [`crate::CodexProvider`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodexProviderOptions {
    /// Provider name reported by models. Defaults to `codex`.
    pub name: Option<String>,
    /// Overrides `$CODEX_HOME` and `~/.codex`.
    pub codex_home: Option<PathBuf>,
    /// Servers merged over the ones found in `config.toml`.
    pub servers: HashMap<String, ServerConfig>,
    /// Server to use instead of the configured `model_provider`.
    pub server: Option<String>,
    /// Per-model server overrides, keyed by the configured model name.
    pub model_servers: HashMap<String, ModelServerOverride>,
}

impl CodexProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn codex_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.codex_home = Some(home.into());
        self
    }

    pub fn with_server(mut self, id: impl Into<String>, server: ServerConfig) -> Self {
        self.servers.insert(id.into(), server);
        self
    }

    pub fn server(mut self, id: impl Into<String>) -> Self {
        self.server = Some(id.into());
        self
    }

    pub fn with_model_servers(
        mut self,
        model: impl Into<String>,
        overrides: ModelServerOverride,
    ) -> Self {
        self.model_servers.insert(model.into(), overrides);
        self
    }
}

/// `config.toml` as far as it concerns model selection.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    model_provider: Option<String>,
    model: Option<String>,
    #[serde(default)]
    model_providers: HashMap<String, ProviderTable>,
}

/// One `[model_providers.<id>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
struct ProviderTable {
    base_url: Option<String>,
    env_key: Option<String>,
    #[serde(default)]
    query_params: BTreeMap<String, toml::Value>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
    #[serde(default)]
    env_http_headers: BTreeMap<String, String>,
    requires_openai_auth: Option<bool>,
    wire_api: Option<WireApi>,
}

impl ProviderTable {
    fn base_url(&self, provider_id: &str) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| (provider_id == DEFAULT_PROVIDER_ID).then(|| OPENAI_BASE_URL.to_string()))
    }

    fn requires_openai_auth(&self, provider_id: &str) -> bool {
        self.requires_openai_auth
            .unwrap_or(provider_id == DEFAULT_PROVIDER_ID)
    }

    fn env_key(&self, provider_id: &str) -> Option<&str> {
        match &self.env_key {
            Some(key) => Some(key),
            None if self.requires_openai_auth(provider_id) => Some(OPENAI_API_KEY),
            None => None,
        }
    }

    fn wire_api(&self, provider_id: &str) -> WireApi {
        self.wire_api.unwrap_or(if provider_id == DEFAULT_PROVIDER_ID {
            WireApi::Responses
        } else {
            WireApi::Chat
        })
    }

    /// Scalar query values rendered as strings. Tables and arrays are skipped.
    fn query_params(&self) -> BTreeMap<String, String> {
        self.query_params
            .iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    toml::Value::String(s) => s.clone(),
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    _ => return None,
                };
                Some((key.clone(), value))
            })
            .collect()
    }
}

/// The resolved configuration for one provider instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexConfig {
    pub codex_home: PathBuf,
    /// Id of the selected server.
    pub provider_id: String,
    /// Model configured in `config.toml`.
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub wire_api: WireApi,
}

impl CodexConfig {
    /// Load using the process environment.
    pub fn load(options: &CodexProviderOptions) -> Result<Self> {
        Self::load_with_env(options, |name| std::env::var(name).ok())
    }

    /// Load with an explicit environment lookup.
    pub fn load_with_env<E>(options: &CodexProviderOptions, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let codex_home = match options
            .codex_home
            .clone()
            .or_else(|| env("CODEX_HOME").map(PathBuf::from))
        {
            Some(home) => home,
            None => default_codex_home(&env)?,
        };

        let auth = read_auth(&codex_home.join("auth.json"));
        let config = read_config(&codex_home.join("config.toml"))?;

        let provider_id = config
            .model_provider
            .clone()
            .unwrap_or_else(|| DEFAULT_PROVIDER_ID.to_string());
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let mut servers: HashMap<String, ServerConfig> = config
            .model_providers
            .iter()
            .map(|(id, table)| {
                let server = ServerConfig {
                    api_key: resolve_api_key(table.env_key(id), &auth, &env),
                    base_url: table.base_url(id),
                };
                (id.clone(), server)
            })
            .collect();
        servers.extend(options.servers.clone());

        let model_override = options.model_servers.get(&model);
        if let Some(overrides) = model_override.and_then(|o| o.servers.as_ref()) {
            servers.extend(overrides.clone());
        }

        let selected_id = model_override
            .and_then(|o| o.server.clone())
            .or_else(|| options.server.clone())
            .unwrap_or(provider_id);
        let selected = servers.get(&selected_id);
        let table = config
            .model_providers
            .get(&selected_id)
            .cloned()
            .unwrap_or_default();

        let base_url = selected
            .and_then(|s| s.base_url.clone())
            .or_else(|| table.base_url(&selected_id));
        let api_key = selected
            .and_then(|s| s.api_key.clone())
            .or_else(|| resolve_api_key(table.env_key(&selected_id), &auth, &env));

        let mut headers = table.http_headers.clone();
        for (header, var) in &table.env_http_headers {
            if let Some(value) = env(var).filter(|v| !v.trim().is_empty()) {
                headers.insert(header.clone(), value);
            }
        }

        debug!(
            codex_home = %codex_home.display(),
            provider = %selected_id,
            model = %model,
            has_api_key = api_key.is_some(),
            "resolved codex config"
        );

        Ok(Self {
            codex_home,
            wire_api: table.wire_api(&selected_id),
            query_params: table.query_params(),
            provider_id: selected_id,
            model,
            base_url,
            api_key,
            headers,
        })
    }

    /// Base URL with the configured query parameters applied.
    pub fn request_base_url(&self) -> Result<Option<String>> {
        self.base_url
            .as_deref()
            .map(|base| apply_query_params(base, &self.query_params))
            .transpose()
    }
}

/// `$HOME/.codex`, falling back to the platform home directory.
fn default_codex_home<E: Fn(&str) -> Option<String>>(env: &E) -> Result<PathBuf> {
    let home = env("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .ok_or_else(|| Error::config("Could not determine home directory; set CODEX_HOME"))?;
    Ok(home.join(".codex"))
}

/// Absent file means an empty config. A malformed one is an error.
fn read_config(path: &Path) -> Result<ConfigFile> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(toml::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(e.into()),
    }
}

/// Missing or unreadable `auth.json` is treated as empty.
fn read_auth(path: &Path) -> HashMap<String, Value> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return HashMap::new(),
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "ignoring invalid auth.json");
        HashMap::new()
    })
}

fn resolve_api_key<E: Fn(&str) -> Option<String>>(
    env_key: Option<&str>,
    auth: &HashMap<String, Value>,
    env: &E,
) -> Option<String> {
    let from_env = |name: &str| env(name).filter(|v| !v.is_empty());
    let from_auth = |name: &str| {
        auth.get(name)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    match env_key {
        Some(key) => from_env(key).or_else(|| from_auth(key)),
        None => from_env(OPENAI_API_KEY)
            .or_else(|| from_auth(OPENAI_API_KEY))
            .or_else(|| from_auth("_OPENAI_API_KEY")),
    }
}

/// A requested model id wins unless it is absent or `"default"`.
pub fn resolve_model(config_model: &str, model_id: Option<&str>) -> String {
    match model_id {
        Some(id) if !id.is_empty() && id != "default" => id.to_string(),
        _ => config_model.to_string(),
    }
}

/// Set each parameter on the URL's query, replacing existing values.
pub fn apply_query_params(base_url: &str, params: &BTreeMap<String, String>) -> Result<String> {
    if params.is_empty() {
        return Ok(base_url.to_string());
    }
    let mut url = Url::parse(base_url)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !params.contains_key(key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .extend_pairs(params.iter());
    Ok(url.to_string())
}

/// Build a config from a Codex home without touching the process environment.
#[cfg(test)]
pub(crate) fn load_for_test(home: &Path, env: &[(&str, &str)]) -> Result<CodexConfig> {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    CodexConfig::load_with_env(&CodexProviderOptions::new().codex_home(home), |name| {
        env.get(name).cloned()
    })
}
