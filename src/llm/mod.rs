use std::{env, fmt, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::{AppConfig, BackendKind};

mod huggingface;

pub use huggingface::HuggingFaceBackend;

/// Length and sampling limits a backend should honour for one call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GenerationBounds {
    pub max_length: usize,
    pub min_length: usize,
    pub sample: bool,
}

/// A text-generation capability. Everything above this trait is unaware of
/// which vendor or model answers the prompt.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, bounds: GenerationBounds) -> Result<String>;
}

/// Build the backend selected by configuration. Errors here are fatal at startup.
pub fn backend_from_config(config: &AppConfig) -> Result<Arc<dyn GenerationBackend>> {
    match config.backend {
        BackendKind::Chat => {
            let client = LlmClient::from_env().context("failed to initialize LLM client")?;
            let backend = ChatBackend::new(client, config.model.clone())?;
            Ok(Arc::new(backend))
        }
        BackendKind::HuggingFace => {
            let backend = HuggingFaceBackend::from_env(config.model.clone())
                .context("failed to initialize Hugging Face backend")?;
            Ok(Arc::new(backend))
        }
    }
}

/// Enumerates the supported chat-completion providers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LlmProvider {
    OpenRouter,
    Poe,
}

impl LlmProvider {
    fn endpoint(&self) -> &'static str {
        match self {
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            LlmProvider::Poe => "https://api.poe.com/v1/chat/completions",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::OpenRouter => write!(f, "openrouter"),
            LlmProvider::Poe => write!(f, "poe"),
        }
    }
}

/// Defines the shape of a chat-style interaction with an LLM.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_bounds(mut self, bounds: GenerationBounds) -> Self {
        self.max_tokens = Some(bounds.max_length);
        self.temperature = Some(if bounds.sample { 0.7 } else { 0.0 });
        self
    }
}

/// Individual chat message, compatible with OpenAI compliant providers.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageRole {
    User,
}

impl MessageRole {
    fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
        }
    }
}

/// Captures basic token usage metrics associated with a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub token_usage: TokenUsage,
    pub provider: LlmProvider,
    pub model: String,
}

/// Chat-completion client for the providers encoded in model names.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

#[derive(Clone, Default)]
struct LlmConfig {
    openrouter_api_key: Option<String>,
    poe_api_key: Option<String>,
    openrouter_referer: Option<String>,
    openrouter_title: Option<String>,
}

impl LlmClient {
    /// Build a client using environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            config: LlmConfig {
                openrouter_api_key: env::var("OPENROUTER_API_KEY").ok(),
                poe_api_key: env::var("POE_API_KEY").ok(),
                openrouter_referer: env::var("OPENROUTER_HTTP_REFERER").ok(),
                openrouter_title: env::var("OPENROUTER_X_TITLE").ok(),
            },
        })
    }

    fn api_key(&self, provider: LlmProvider) -> Result<&str> {
        let key = match provider {
            LlmProvider::OpenRouter => self.config.openrouter_api_key.as_deref(),
            LlmProvider::Poe => self.config.poe_api_key.as_deref(),
        };
        key.ok_or_else(|| match provider {
            LlmProvider::OpenRouter => {
                anyhow!("OPENROUTER_API_KEY is not configured but required for OpenRouter requests")
            }
            LlmProvider::Poe => anyhow!("POE_API_KEY is not configured but required for Poe requests"),
        })
    }

    /// Execute a request against the provider encoded in the model name.
    pub async fn execute(&self, request: LlmRequest) -> Result<LlmResponse> {
        let (provider, provider_model) = parse_model_provider(&request.model)?;
        let api_key = self.api_key(provider)?;

        let payload = chat_payload(&request, provider_model);

        let mut req_builder = self
            .http
            .post(provider.endpoint())
            .bearer_auth(api_key)
            .json(&payload);

        if provider == LlmProvider::OpenRouter {
            if let Some(referer) = &self.config.openrouter_referer {
                req_builder = req_builder.header("HTTP-Referer", referer);
            }
            if let Some(title) = &self.config.openrouter_title {
                req_builder = req_builder.header("X-Title", title);
            }
        }

        let response = req_builder.send().await?;
        let status = response.status();
        let response_text = response.text().await.context("failed to read response body")?;
        let body: serde_json::Value = serde_json::from_str(&response_text).with_context(|| {
            format!(
                "failed to parse {provider} response as JSON. Response body: {}",
                preview(&response_text)
            )
        })?;
        if !status.is_success() {
            bail!("{provider} call failed with status {status}: {body}");
        }

        let (text, usage) = extract_text_and_usage(&body)
            .ok_or_else(|| anyhow!("unexpected {provider} response payload: {body}"))?;

        let prompt_tokens = approximate_token_count(
            &request
                .messages
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );
        let mut token_usage = usage.unwrap_or_default();
        if token_usage.prompt_tokens == 0 {
            token_usage.prompt_tokens = prompt_tokens;
        }
        if token_usage.response_tokens == 0 {
            token_usage.response_tokens = approximate_token_count(&text);
        }
        token_usage.total_tokens = token_usage.prompt_tokens + token_usage.response_tokens;

        Ok(LlmResponse {
            text,
            token_usage,
            provider,
            model: provider_model.to_string(),
        })
    }
}

/// Chat-completion backend bound to one provider-prefixed model.
pub struct ChatBackend {
    client: LlmClient,
    model: String,
}

impl ChatBackend {
    /// Validates the model prefix and provider credential up front.
    pub fn new(client: LlmClient, model: String) -> Result<Self> {
        let (provider, _) = parse_model_provider(&model)?;
        client.api_key(provider)?;
        Ok(Self { client, model })
    }
}

#[async_trait]
impl GenerationBackend for ChatBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, bounds: GenerationBounds) -> Result<String> {
        let request = LlmRequest::new(
            self.model.clone(),
            vec![ChatMessage::new(MessageRole::User, prompt)],
        )
        .with_bounds(bounds);

        let response = self.client.execute(request).await?;
        debug!(
            provider = %response.provider,
            model = %response.model,
            total_tokens = response.token_usage.total_tokens,
            "chat completion finished"
        );
        Ok(response.text)
    }
}

fn chat_payload(request: &LlmRequest, provider_model: &str) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|msg| {
            serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.text,
            })
        })
        .collect();

    let mut payload = serde_json::json!({
        "model": provider_model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        payload["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        payload["temperature"] = serde_json::json!(temperature);
    }
    payload
}

fn preview(body: &str) -> String {
    if body.len() > 500 {
        let cut = (0..=500).rev().find(|idx| body.is_char_boundary(*idx)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

/// Extract assistant text and optional usage metrics from either Responses or Chat Completions payloads.
fn extract_text_and_usage(value: &serde_json::Value) -> Option<(String, Option<TokenUsage>)> {
    if let Ok(resp) = serde_json::from_value::<OpenRouterResponsesPayload>(value.clone()) {
        if !resp.output.is_empty() {
            let text = resp
                .output
                .into_iter()
                .filter(|item| item.item_type == "message")
                .flat_map(|item| item.content)
                .find_map(|content| match content.content_type.as_str() {
                    "output_text" | "text" => Some(content.text.unwrap_or_default()),
                    _ => None,
                })
                .unwrap_or_default();

            return Some((text, resp.usage.map(TokenUsage::from)));
        }
    }

    if let Ok(chat) = serde_json::from_value::<OpenAiChatCompletionPayload>(value.clone()) {
        if !chat.choices.is_empty() {
            let text = chat
                .choices
                .into_iter()
                .find_map(|choice| choice.message.content)
                .unwrap_or_default();

            return Some((text, chat.usage.map(TokenUsage::from)));
        }
    }

    None
}

fn parse_model_provider(model: &str) -> Result<(LlmProvider, &str)> {
    let (provider, name) = model.split_once('/').ok_or_else(|| {
        anyhow!("model must be prefixed with provider, e.g. 'openrouter/openai/gpt-4o'")
    })?;

    if name.trim().is_empty() {
        bail!("model name is required after provider prefix");
    }

    match provider {
        "openrouter" => Ok((LlmProvider::OpenRouter, name)),
        "poe" => Ok((LlmProvider::Poe, name)),
        other => bail!("unsupported provider prefix: {other}"),
    }
}

fn approximate_token_count(input: &str) -> usize {
    input.split_whitespace().count()
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponsesPayload {
    #[serde(default)]
    output: Vec<OpenRouterOutputItem>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterOutputItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    content: Vec<OpenRouterOutputContent>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterOutputContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionPayload {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChatMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

impl From<UsagePayload> for TokenUsage {
    fn from(usage: UsagePayload) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens.unwrap_or_default(),
            response_tokens: usage.completion_tokens.unwrap_or_default(),
            total_tokens: usage.total_tokens.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_provider_prefix() {
        let (provider, model) = parse_model_provider("openrouter/openai/gpt-4o").unwrap();
        assert_eq!(provider, LlmProvider::OpenRouter);
        assert_eq!(model, "openai/gpt-4o");

        assert!(parse_model_provider("gpt-4o").is_err());
        assert!(parse_model_provider("poe/ ").is_err());
        assert!(parse_model_provider("azure/gpt-4o").is_err());
    }

    #[test]
    fn extracts_chat_completion_text() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "8"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13}
        });
        let (text, usage) = extract_text_and_usage(&body).unwrap();
        assert_eq!(text, "8");
        assert_eq!(usage.unwrap().total_tokens, 13);
    }

    #[test]
    fn extracts_responses_payload_text() {
        let body = json!({
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [{"type": "output_text", "text": "Great work"}]}
            ]
        });
        let (text, usage) = extract_text_and_usage(&body).unwrap();
        assert_eq!(text, "Great work");
        assert!(usage.is_none());
    }

    #[test]
    fn rejects_unknown_payload_shape() {
        assert!(extract_text_and_usage(&json!({"error": "nope"})).is_none());
    }

    #[test]
    fn bounds_map_to_sampling_parameters() {
        let request = LlmRequest::new("openrouter/x", Vec::new()).with_bounds(GenerationBounds {
            max_length: 20,
            min_length: 2,
            sample: false,
        });
        assert_eq!(request.max_tokens, Some(20));
        assert_eq!(request.temperature, Some(0.0));
    }

    #[test]
    fn prompt_is_sent_as_single_user_message() {
        let request = LlmRequest::new(
            "poe/GPT-4o",
            vec![ChatMessage::new(MessageRole::User, "Rate this project")],
        )
        .with_bounds(GenerationBounds {
            max_length: 400,
            min_length: 150,
            sample: true,
        });

        let payload = chat_payload(&request, "GPT-4o");
        assert_eq!(payload["model"], json!("GPT-4o"));
        assert_eq!(
            payload["messages"],
            json!([{"role": "user", "content": "Rate this project"}])
        );
        assert_eq!(payload["max_tokens"], json!(400));
        assert!(payload["temperature"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn chat_backend_requires_provider_credential() {
        let client = LlmClient {
            http: Client::new(),
            config: LlmConfig::default(),
        };
        assert!(ChatBackend::new(client.clone(), "openrouter/openai/gpt-4o".into()).is_err());

        let client = LlmClient {
            config: LlmConfig {
                poe_api_key: Some("key".into()),
                ..LlmConfig::default()
            },
            ..client
        };
        assert!(ChatBackend::new(client, "poe/Claude-3-Haiku".into()).is_ok());
    }
}
