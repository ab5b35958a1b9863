use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;

use crate::{DEFAULT_CHUNK_TOKENS, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GoogleConfig {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeConfig {
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    #[serde(default)]
    pub keep_repetitive: bool,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: default_chunk_tokens(),
            keep_repetitive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_host() -> String {
    DEFAULT_SERVER_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_chunk_tokens() -> usize {
    DEFAULT_CHUNK_TOKENS
}

fn default_retention_days() -> u64 {
    14
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    cli: Value,
}

/// Layered JSON configuration: global, then project, then environment,
/// then command-line overrides. Later layers win key by key.
#[derive(Clone)]
pub struct ConfigStore {
    layers: Arc<ConfigLayers>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let global_path = resolve_global_config_path().await?;
        Self::with_global_path(path, global_path, cli_overrides).await
    }

    pub async fn with_global_path(
        path: impl AsRef<Path>,
        global_path: impl AsRef<Path>,
        cli_overrides: Option<Value>,
    ) -> anyhow::Result<Self> {
        let project_path = path.as_ref().to_path_buf();
        let global_path = global_path.as_ref().to_path_buf();
        if let Some(parent) = project_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut global = read_json_file(&global_path)
            .await
            .unwrap_or_else(|_| empty_object());
        let mut project = read_json_file(&project_path)
            .await
            .unwrap_or_else(|_| empty_object());

        scrub_persisted_secrets(&mut global, &global_path).await?;
        scrub_persisted_secrets(&mut project, &project_path).await?;

        let layers = ConfigLayers {
            global,
            project,
            env: env_layer(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };

        Ok(Self {
            layers: Arc::new(layers),
        })
    }

    pub async fn get(&self) -> AppConfig {
        let merged = self.effective_value();
        match serde_json::from_value(merged) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("ignoring malformed configuration: {err}");
                AppConfig::default()
            }
        }
    }

    fn effective_value(&self) -> Value {
        let layers = &self.layers;
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        merged
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut to_write = value.clone();
    strip_persisted_secrets(&mut to_write);
    let raw = serde_json::to_string_pretty(&to_write)?;
    fs::write(path, raw).await?;
    Ok(())
}

/// Drops secrets from a persisted layer when the environment already
/// supplies them, so rotated env credentials never go stale on disk.
fn strip_persisted_secrets(value: &mut Value) {
    let Value::Object(root) = value else {
        return;
    };

    if let Some(google) = root.get_mut("google").and_then(|v| v.as_object_mut()) {
        for (key, env_name) in GOOGLE_ENV_KEYS {
            if matches!(key, "client_id" | "token_uri") {
                continue;
            }
            if env_is_set(env_name) {
                google.remove(key);
            }
        }
    }

    let Some(providers) = root.get_mut("providers").and_then(|v| v.as_object_mut()) else {
        return;
    };
    for (provider_id, provider_cfg) in providers.iter_mut() {
        let Value::Object(cfg) = provider_cfg else {
            continue;
        };
        if !cfg.contains_key("api_key") && !cfg.contains_key("apiKey") {
            continue;
        }
        if provider_has_runtime_secret(provider_id) {
            cfg.remove("api_key");
            cfg.remove("apiKey");
        }
    }
}

async fn scrub_persisted_secrets(value: &mut Value, path: &Path) -> anyhow::Result<()> {
    let before = value.clone();
    strip_persisted_secrets(value);
    if *value != before {
        write_json_file(path, value).await?;
    }
    Ok(())
}

const GOOGLE_ENV_KEYS: [(&str, &str); 5] = [
    ("access_token", "GOOGLE_ACCESS_TOKEN"),
    ("refresh_token", "GOOGLE_REFRESH_TOKEN"),
    ("client_id", "GOOGLE_CLIENT_ID"),
    ("client_secret", "GOOGLE_CLIENT_SECRET"),
    ("token_uri", "GOOGLE_TOKEN_URI"),
];

const PROVIDER_ENV_KEYS: [(&str, &str); 5] = [
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("groq", "GROQ_API_KEY"),
    ("mistral", "MISTRAL_API_KEY"),
];

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_is_set(name: &str) -> bool {
    env_value(name).is_some()
}

fn provider_has_runtime_secret(provider_id: &str) -> bool {
    PROVIDER_ENV_KEYS
        .iter()
        .filter(|(id, _)| id.eq_ignore_ascii_case(provider_id))
        .any(|(_, env_name)| env_is_set(env_name))
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| empty_object()))
}

async fn resolve_global_config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = env_value("COURIER_GLOBAL_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    if let Some(config_dir) = dirs::config_dir() {
        return Ok(config_dir.join("courier").join("config.json"));
    }
    Ok(PathBuf::from(".courier/global_config.json"))
}

fn env_layer() -> Value {
    let mut root = empty_object();

    let mut google = Map::new();
    for (key, env_name) in GOOGLE_ENV_KEYS {
        if let Some(value) = env_value(env_name) {
            google.insert(key.to_string(), Value::String(value));
        }
    }
    if !google.is_empty() {
        deep_merge(&mut root, &json!({ "google": google }));
    }

    for (provider, env_name) in PROVIDER_ENV_KEYS {
        if let Some(api_key) = env_value(env_name) {
            deep_merge(
                &mut root,
                &json!({ "providers": { provider: { "api_key": api_key } } }),
            );
        }
    }

    if let Some(provider) = env_value("COURIER_LLM_PROVIDER") {
        deep_merge(
            &mut root,
            &json!({ "default_provider": provider.trim().to_lowercase() }),
        );
    }
    if let Some(host) = env_value("COURIER_HOST") {
        deep_merge(&mut root, &json!({ "server": { "host": host } }));
    }
    if let Some(port) = env_value("PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        deep_merge(&mut root, &json!({ "server": { "port": port } }));
    }
    if let Some(chunk) = env_value("COURIER_CHUNK_TOKENS").and_then(|v| v.trim().parse::<usize>().ok())
    {
        deep_merge(&mut root, &json!({ "summarize": { "chunk_tokens": chunk } }));
    }

    root
}

pub fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

impl From<ProviderConfig> for courier_providers::ProviderConfig {
    fn from(value: ProviderConfig) -> Self {
        Self {
            api_key: value.api_key,
            url: value.url,
            default_model: value.default_model,
        }
    }
}

impl From<AppConfig> for courier_providers::ProvidersConfig {
    fn from(value: AppConfig) -> Self {
        Self {
            providers: value
                .providers
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
            default_provider: value.default_provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_in(dir: &Path, project: Option<Value>, cli: Option<Value>) -> ConfigStore {
        let project_path = dir.join("config.json");
        if let Some(project) = project {
            std::fs::write(&project_path, project.to_string()).expect("write project");
        }
        ConfigStore::with_global_path(project_path, dir.join("global.json"), cli)
            .await
            .expect("store")
    }

    #[test]
    fn deep_merge_overlays_nested_objects_and_skips_nulls() {
        let mut base = json!({"server": {"host": "0.0.0.0", "port": 8001}, "x": 1});
        deep_merge(
            &mut base,
            &json!({"server": {"port": 9000}, "x": null, "y": [1, 2]}),
        );
        assert_eq!(base["server"]["host"], "0.0.0.0");
        assert_eq!(base["server"]["port"], 9000);
        assert_eq!(base["x"], 1);
        assert_eq!(base["y"], json!([1, 2]));
    }

    #[tokio::test]
    async fn defaults_apply_when_no_layers_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path(), None, None).await;
        let config = store.get().await;
        assert_eq!(config.summarize.chunk_tokens, DEFAULT_CHUNK_TOKENS);
        assert!(!config.summarize.keep_repetitive);
        assert_eq!(config.logging.retention_days, 14);
    }

    #[tokio::test]
    async fn cli_layer_wins_over_project_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(
            dir.path(),
            Some(json!({"default_provider": "openai", "summarize": {"chunk_tokens": 500}})),
            Some(json!({"default_provider": "anthropic"})),
        )
        .await;
        let config = store.get().await;
        assert_eq!(config.default_provider.as_deref(), Some("anthropic"));
        assert_eq!(config.summarize.chunk_tokens, 500);
    }

    #[test]
    fn strip_persisted_secrets_keeps_values_without_runtime_env() {
        let mut value = json!({
            "providers": {"cohere": {"api_key": "persisted"}},
            "google": {"client_id": "id"}
        });
        strip_persisted_secrets(&mut value);
        assert_eq!(value["providers"]["cohere"]["api_key"], "persisted");
        assert_eq!(value["google"]["client_id"], "id");
    }
}
