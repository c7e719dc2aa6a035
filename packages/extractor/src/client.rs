use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{ExtractionError, Result};

/// Completion providers, selected from the model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Anthropic,
    OpenAi,
}

/// Model name prefix → provider. First match wins.
const MODEL_PREFIXES: [(&str, Provider); 6] = [
    ("claude-", Provider::Anthropic),
    ("gpt-", Provider::OpenAi),
    ("chatgpt-", Provider::OpenAi),
    ("o1", Provider::OpenAi),
    ("o3", Provider::OpenAi),
    ("o4", Provider::OpenAi),
];

impl Provider {
    /// Resolve the provider serving `model`.
    pub fn from_model(model: &str) -> Result<Self> {
        let lower = model.trim().to_ascii_lowercase();
        MODEL_PREFIXES
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix))
            .map(|(_, provider)| *provider)
            .ok_or_else(|| ExtractionError::UnsupportedModel(model.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Request to the LLM.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub provider: Provider,
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Response from the LLM.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Trait for LLM clients, enabling mocking in tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Whether a credential for `provider` is configured.
    fn has_credentials(&self, _provider: Provider) -> bool {
        true
    }
}

/// HTTP client for the Anthropic Messages and OpenAI Chat Completions APIs.
///
/// NOTE: Do NOT derive `Debug` on this struct, the config holds API keys.
pub struct HttpLlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    system: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Reasoning models take `max_completion_tokens` and a fixed temperature.
fn is_openai_reasoning_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    ["o1", "o3", "o4"].iter().any(|p| lower.starts_with(p))
}

fn request_error(e: reqwest::Error) -> ExtractionError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ExtractionError::Transient(format!("request failed: {e}"))
    } else {
        ExtractionError::LlmApiRequest(e)
    }
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ExtractionError::LlmApiRequest)?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    fn api_key(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Anthropic => self.config.anthropic_api_key.as_deref(),
            Provider::OpenAi => self.config.openai_api_key.as_deref(),
        }
    }

    /// Exponential delay before retry number `attempt + 1`.
    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .retry_base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.config.max_retry_delay)
    }

    /// Map a non-success HTTP status to an error.
    async fn check_status(
        provider: Provider,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = resp.status().as_u16();

        if resp.status().is_success() {
            return Ok(resp);
        }

        if status == 429 {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ExtractionError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ExtractionError::ProviderAuth {
                provider: provider.to_string(),
            });
        }

        let body_text = resp.text().await.unwrap_or_default();

        if status >= 500 {
            return Err(ExtractionError::Transient(format!(
                "server error {status}: {body_text}"
            )));
        }

        let message = serde_json::from_str::<ApiErrorResponse>(&body_text)
            .ok()
            .and_then(|r| r.error)
            .map(|e| e.message)
            .unwrap_or(body_text);
        Err(ExtractionError::LlmApiError { status, message })
    }

    async fn send_anthropic(&self, api_key: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.config.anthropic_base_url);
        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: &request.messages,
        };

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let resp = Self::check_status(Provider::Anthropic, resp).await?;

        let api_response: AnthropicResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Transient(format!("response body timed out: {e}"))
            } else {
                ExtractionError::ResponseParse(e.to_string())
            }
        })?;

        let content = api_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        })
    }

    async fn send_openai(&self, api_key: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", self.config.openai_base_url);
        let reasoning = is_openai_reasoning_model(&request.model);

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(OpenAiMessage {
            role: "system",
            content: &request.system,
        });
        messages.extend(request.messages.iter().map(|m| OpenAiMessage {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &m.content,
        }));

        let body = OpenAiRequest {
            model: &request.model,
            messages,
            temperature: (!reasoning).then_some(request.temperature),
            max_tokens: (!reasoning).then_some(request.max_tokens),
            max_completion_tokens: reasoning.then_some(request.max_tokens),
        };

        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let resp = Self::check_status(Provider::OpenAi, resp).await?;

        let api_response: OpenAiResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Transient(format!("response body timed out: {e}"))
            } else {
                ExtractionError::ResponseParse(e.to_string())
            }
        })?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let (input_tokens, output_tokens) = api_response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(LlmResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let provider = request.provider;
        let api_key = self
            .api_key(provider)
            .ok_or_else(|| ExtractionError::ProviderAuth {
                provider: provider.to_string(),
            })?;

        let max_attempts = self.config.max_retries + 1;
        let mut last_error: Option<ExtractionError> = None;
        let mut next_delay = Duration::ZERO;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                debug!(%provider, attempt, "retrying LLM request after {:?}", next_delay);
                tokio::time::sleep(next_delay).await;
            }

            // Reset to the base exponential delay for the next potential retry
            next_delay = self.backoff(attempt);

            let result = match provider {
                Provider::Anthropic => self.send_anthropic(api_key, request).await,
                Provider::OpenAi => self.send_openai(api_key, request).await,
            };

            match result {
                Ok(response) if response.content.trim().is_empty() => {
                    warn!(%provider, attempt, "LLM returned empty response");
                    last_error = Some(ExtractionError::LlmEmptyResponse);
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    if let ExtractionError::RateLimited { retry_after_secs } = e {
                        // Use the server-provided retry-after, at least as long as the base delay
                        next_delay = Duration::from_secs(retry_after_secs)
                            .max(next_delay)
                            .min(self.config.max_retry_delay);
                    }
                    warn!(%provider, attempt, error = %e, "LLM request failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ExtractionError::LlmEmptyResponse))
    }

    fn has_credentials(&self, provider: Provider) -> bool {
        self.api_key(provider).is_some()
    }
}

/// Test utilities for the LLM client.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&LlmRequest) -> Result<LlmResponse> + Send + Sync>;

    /// Mock LLM client for testing.
    ///
    /// Returns pre-configured responses in order, or computes each response
    /// from the request when built with [`MockLlmClient::from_fn`].
    pub struct MockLlmClient {
        responses: Mutex<Vec<Result<LlmResponse>>>,
        handler: Option<Handler>,
        requests: Mutex<Vec<LlmRequest>>,
        credentials: bool,
    }

    impl MockLlmClient {
        pub fn new(responses: Vec<Result<LlmResponse>>) -> Self {
            // Reverse so we can pop from the end
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                handler: None,
                requests: Mutex::new(Vec::new()),
                credentials: true,
            }
        }

        pub fn with_response(content: &str) -> Self {
            Self::with_responses(vec![content])
        }

        pub fn with_responses(contents: Vec<&str>) -> Self {
            Self::new(contents.into_iter().map(|c| Ok(text_response(c))).collect())
        }

        pub fn from_fn(
            handler: impl Fn(&LlmRequest) -> Result<LlmResponse> + Send + Sync + 'static,
        ) -> Self {
            let mut mock = Self::new(Vec::new());
            mock.handler = Some(Box::new(handler));
            mock
        }

        /// Report every provider as lacking credentials.
        pub fn without_credentials(mut self) -> Self {
            self.credentials = false;
            self
        }

        /// Requests received so far.
        pub fn requests(&self) -> Vec<LlmRequest> {
            self.requests
                .lock()
                .map(|r| r.clone())
                .unwrap_or_default()
        }
    }

    /// A successful response carrying `content`.
    pub fn text_response(content: &str) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            input_tokens: 100,
            output_tokens: 200,
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            if let Some(handler) = &self.handler {
                return handler(request);
            }
            let mut responses = self.responses.lock().map_err(|e| {
                ExtractionError::ResponseParse(format!("mock lock poisoned: {e}"))
            })?;
            responses.pop().unwrap_or(Err(ExtractionError::LlmEmptyResponse))
        }

        fn has_credentials(&self, _provider: Provider) -> bool {
            self.credentials
        }
    }
}
