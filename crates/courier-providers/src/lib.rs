use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use courier_types::{ModelInfo, ProviderInfo};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model_override: Option<&str>,
    ) -> anyhow::Result<String>;
}

/// Providers built from configuration. Selection order is the explicit id,
/// then the configured default, then the first registered provider.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<Vec<Arc<dyn Provider>>>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new(config: ProvidersConfig) -> Self {
        let providers = build_providers(&config);
        Self::from_providers(providers, config.default_provider)
    }

    pub fn from_providers(
        providers: Vec<Arc<dyn Provider>>,
        default_provider: Option<String>,
    ) -> Self {
        let providers = if providers.is_empty() {
            vec![Arc::new(LocalEchoProvider) as Arc<dyn Provider>]
        } else {
            providers
        };
        Self {
            providers: Arc::new(providers),
            default_provider,
        }
    }

    pub async fn complete_for_provider(
        &self,
        provider_id: Option<&str>,
        messages: &[ChatMessage],
        model_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let provider = self.select_provider(provider_id)?;
        provider.complete(messages, model_id).await
    }

    pub fn select_provider(&self, provider_id: Option<&str>) -> anyhow::Result<Arc<dyn Provider>> {
        let providers = &self.providers;
        let available = providers.iter().map(|p| p.info().id).collect::<Vec<_>>();

        if let Some(id) = provider_id {
            if let Some(provider) = providers.iter().find(|p| p.info().id == id) {
                return Ok(provider.clone());
            }
            anyhow::bail!(
                "provider `{}` is not configured. configured providers: {}",
                id,
                available.join(", ")
            );
        };

        if let Some(default_id) = self.default_provider.as_deref() {
            if let Some(provider) = providers.iter().find(|p| p.info().id == default_id) {
                return Ok(provider.clone());
            }
        };

        let Some(provider) = providers.first() else {
            anyhow::bail!("No provider configured.");
        };
        Ok(provider.clone())
    }
}

const OPENAI_COMPATIBLE: [(&str, &str, &str, &str, bool); 5] = [
    ("openai", "OpenAI", "https://api.openai.com/v1", "gpt-4o", true),
    (
        "openrouter",
        "OpenRouter",
        "https://openrouter.ai/api/v1",
        "openai/gpt-4o-mini",
        true,
    ),
    (
        "groq",
        "Groq",
        "https://api.groq.com/openai/v1",
        "llama-3.1-8b-instant",
        true,
    ),
    (
        "mistral",
        "Mistral",
        "https://api.mistral.ai/v1",
        "mistral-small-latest",
        true,
    ),
    (
        "ollama",
        "Ollama",
        "http://127.0.0.1:11434/v1",
        "llama3.1:8b",
        false,
    ),
];

fn build_providers(config: &ProvidersConfig) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    for (id, name, default_url, default_model, use_api_key) in OPENAI_COMPATIBLE {
        let Some(entry) = config.providers.get(id) else {
            continue;
        };
        providers.push(Arc::new(OpenAICompatibleProvider {
            id: id.to_string(),
            name: name.to_string(),
            base_url: normalize_base(entry.url.as_deref().unwrap_or(default_url)),
            api_key: if use_api_key {
                resolve_api_key(entry, id)
            } else {
                None
            },
            default_model: entry
                .default_model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            client: Client::new(),
        }));
    }

    if let Some(anthropic) = config.providers.get("anthropic") {
        providers.push(Arc::new(AnthropicProvider {
            api_key: resolve_api_key(anthropic, "anthropic"),
            base_url: normalize_base(
                anthropic
                    .url
                    .as_deref()
                    .unwrap_or("https://api.anthropic.com/v1"),
            ),
            default_model: anthropic
                .default_model
                .clone()
                .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
            client: Client::new(),
        }));
    }

    if providers.is_empty() {
        providers.push(Arc::new(LocalEchoProvider));
    }

    providers
}

fn resolve_api_key(entry: &ProviderConfig, id: &str) -> Option<String> {
    entry
        .api_key
        .as_deref()
        .filter(|key| !is_placeholder_api_key(key))
        .map(|key| key.to_string())
        .or_else(|| env_api_key_for_provider(id))
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

fn env_api_key_for_provider(id: &str) -> Option<String> {
    let env_name = match id {
        "openai" => Some("OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        _ => None,
    }?;
    std::env::var(env_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn select_model<'a>(model_override: Option<&'a str>, default_model: &'a str) -> &'a str {
    model_override
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(default_model)
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect()
}

/// Offline provider used when nothing is configured. Echoes the last user
/// message so the pipeline stays runnable without credentials.
pub struct LocalEchoProvider;

#[async_trait]
impl Provider for LocalEchoProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "local".to_string(),
            name: "Local Echo".to_string(),
            models: vec![ModelInfo {
                id: "echo-1".to_string(),
                provider_id: "local".to_string(),
                display_name: "Echo Model".to_string(),
                context_window: 8192,
            }],
        }
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _model_override: Option<&str>,
    ) -> anyhow::Result<String> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(format!("Echo: {prompt}"))
    }
}

struct OpenAICompatibleProvider {
    id: String,
    name: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: Client,
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            models: vec![ModelInfo {
                id: self.default_model.clone(),
                provider_id: self.id.clone(),
                display_name: self.default_model.clone(),
                context_window: 128_000,
            }],
        }
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        model_override: Option<&str>,
    ) -> anyhow::Result<String> {
        let model = select_model(model_override, &self.default_model);
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&json!({
            "model": model,
            "messages": wire_messages(messages),
            "stream": false,
        }));
        if self.id == "openrouter" {
            req = req.header("X-Title", "Courier");
        }
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;
        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }
        if let Some(detail) = extract_openai_error(&value) {
            anyhow::bail!(detail);
        }
        if let Some(text) = extract_openai_text(&value) {
            return Ok(text.trim().to_string());
        }
        let body_preview = truncate_for_error(&value.to_string(), 500);
        anyhow::bail!(
            "provider returned no completion content for model `{}` (response: {})",
            model,
            body_preview
        );
    }
}

struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    client: Client,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "anthropic".to_string(),
            name: "Anthropic".to_string(),
            models: vec![ModelInfo {
                id: self.default_model.clone(),
                provider_id: "anthropic".to_string(),
                display_name: self.default_model.clone(),
                context_window: 200_000,
            }],
        }
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        model_override: Option<&str>,
    ) -> anyhow::Result<String> {
        let model = select_model(model_override, &self.default_model);
        // The messages API takes the system prompt as a top-level field.
        let system = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns = messages
            .iter()
            .filter(|m| m.role != "system")
            .cloned()
            .collect::<Vec<_>>();
        let mut body = json!({
            "model": model,
            "max_tokens": 1024,
            "messages": wire_messages(&turns),
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        let mut req = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;
        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }
        let mut out = String::new();
        if let Some(content) = value.get("content") {
            collect_text_fragments(content, &mut out);
        }
        if out.trim().is_empty() {
            anyhow::bail!(
                "provider returned no completion content for model `{}`",
                model
            );
        }
        Ok(out.trim().to_string())
    }
}

fn normalize_base(input: &str) -> String {
    input.trim().trim_end_matches('/').to_string()
}

fn truncate_for_error(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out = input.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

fn collect_text_fragments(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Array(arr) => {
            for item in arr {
                collect_text_fragments(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
            if let Some(content) = map.get("content") {
                collect_text_fragments(content, out);
            }
            if let Some(message) = map.get("message") {
                collect_text_fragments(message, out);
            }
        }
        _ => {}
    }
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let mut out = String::new();

    if let Some(choice) = value.get("choices").and_then(|v| v.get(0)) {
        collect_text_fragments(choice, &mut out);
        if !out.trim().is_empty() {
            return Some(out);
        }
    }

    if let Some(text) = value.get("output_text").and_then(|v| v.as_str()) {
        return Some(text.to_string());
    }

    None
}

fn extract_openai_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
}
