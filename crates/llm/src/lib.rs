use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-3-5-haiku-latest",
            LlmProvider::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Generative-completion client. Each call is a single request bounded by the
/// client timeout; failed calls are returned to the caller as-is.
///
/// Blocking calls run on one runtime created on first use and shared by clones.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    runtime: Arc<OnceCell<Runtime>>,
    provider: LlmProvider,
    model: String,
    timeout: Duration,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
            }),
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(512),
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            http: build_http(timeout)?,
            runtime: Arc::new(OnceCell::new()),
            provider,
            model: model.into(),
            timeout,
            config,
        })
    }

    /// Provider and model from `SOPMATRIX_PROVIDER` / `SOPMATRIX_MODEL`,
    /// falling back to the offline local synthesizer.
    pub fn from_env() -> Result<Self> {
        let provider = match env::var("SOPMATRIX_PROVIDER") {
            Ok(value) => LlmProvider::from_str(&value)
                .ok_or_else(|| anyhow!("unknown SOPMATRIX_PROVIDER '{value}'"))?,
            Err(_) => LlmProvider::Local,
        };
        let model =
            env::var("SOPMATRIX_MODEL").unwrap_or_else(|_| provider.default_model().to_string());
        Self::new(provider, model)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = build_http(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        if let ProviderConfig::Local = self.config {
            return Ok(self.chat_local(req));
        }
        self.runtime()?.block_on(self.chat(req))
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .get_or_try_init(|| Runtime::new().context("failed to create tokio runtime"))
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({"role": "system", "content": system }));
        }
        messages.push(json!({"role": "user", "content": req.user }));
        let payload = json!({
            "model": self.model,
            "messages": messages,
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("openai request to {url} failed"))?;
        let value = decode_body("openai", response).await?;
        let content = extract_openai_text(&value)
            .ok_or_else(|| anyhow!("missing text in OpenAI response"))?;
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": cfg.max_tokens,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let response = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", &cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .context("anthropic request failed")?;
        let value = decode_body("anthropic", response).await?;
        let response: AnthropicResponse =
            serde_json::from_value(value).context("failed to decode anthropic response")?;
        let text = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        LlmResponse {
            content: synthesize_local_response(req),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

fn build_http(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build http client")
}

/// Offline answer: the leading words of the context block, or of the whole
/// prompt when it has none.
fn synthesize_local_response(req: &LlmRequest) -> String {
    let body = extract_context_block(&req.user, "Context:", "Question:");
    summarize_text(&body, 60)
}

/// Non-success responses become errors carrying the status and the provider's
/// body text.
async fn decode_body(provider: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!("{provider} returned error (status {status}): {body}"));
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {provider} response"))
}

fn extract_context_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    if let Some(start_idx) = text.find(start_marker) {
        let after = &text[start_idx + start_marker.len()..];
        if let Some(end_idx) = after.find(stop_marker) {
            return after[..end_idx].trim().to_string();
        }
        return after.trim().to_string();
    }
    text.trim().to_string()
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!("{var} is not set"))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{var} is empty"));
    }
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return Err(anyhow!("{var} must start with 'sk-ant-'"));
    }
    Ok(())
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_round_trip() {
        for provider in [LlmProvider::OpenAi, LlmProvider::Anthropic, LlmProvider::Local] {
            assert_eq!(LlmProvider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(LlmProvider::from_str(" OpenAI "), Some(LlmProvider::OpenAi));
        assert_eq!(LlmProvider::from_str("gemini"), None);
    }

    #[test]
    fn local_client_answers_from_context_block() {
        let client = LlmClient::new(LlmProvider::Local, "local").unwrap();
        let response = client
            .chat_blocking(&LlmRequest {
                system: None,
                user: "Answer briefly.\n\nContext:\nStaff must file leave requests.\n\n\
                       Question: who files?\nAnswer:"
                    .into(),
            })
            .unwrap();
        assert_eq!(response.content, "Staff must file leave requests.");
        assert_eq!(response.total_tokens(), 0);
    }

    #[test]
    fn blocking_calls_share_one_runtime() {
        let client = LlmClient::new(LlmProvider::Local, "local").unwrap();
        let clone = client.clone();
        let first = client.runtime().unwrap() as *const Runtime;
        assert!(std::ptr::eq(first, client.runtime().unwrap()));
        assert!(std::ptr::eq(first, clone.runtime().unwrap()));
        let fresh = LlmClient::new(LlmProvider::Local, "local").unwrap();
        assert!(!std::ptr::eq(first, fresh.runtime().unwrap()));
    }

    #[test]
    fn timeout_is_configurable() {
        let client = LlmClient::new(LlmProvider::Local, "local")
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn anthropic_keys_are_checked() {
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-ant-123").is_ok());
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-123").is_err());
        assert!(validate_api_key("OPENAI_API_KEY", " ").is_err());
        assert!(validate_api_key("OPENAI_API_KEY", "local-gateway-key").is_ok());
    }

    #[test]
    fn openai_text_from_chat_and_part_arrays() {
        let chat = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_openai_text(&chat).as_deref(), Some("hello"));
        let parts = json!({
            "choices": [{"message": {"content": [{"type": "text", "text": "hi"}]}}]
        });
        assert_eq!(extract_openai_text(&parts).as_deref(), Some("hi"));
        assert_eq!(extract_openai_text(&json!({"choices": []})), None);
    }
}
