//! Error types for the fee extractor.
//!
//! Most of these never reach the caller of [`crate::Extractor::extract`]:
//! they are recovered per record, per chunk or per provider and surface as
//! log lines, validation issues or chunk reports instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no usable credential for provider {provider}")]
    ProviderAuth { provider: String },

    #[error("LLM rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("transient LLM failure: {0}")]
    Transient(String),

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("LLM API request failed: {0}")]
    LlmApiRequest(#[from] reqwest::Error),

    #[error("LLM API error (status {status}): {message}")]
    LlmApiError { status: u16, message: String },

    #[error("LLM returned empty response")]
    LlmEmptyResponse,

    #[error("failed to parse LLM response: {0}")]
    ResponseParse(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ExtractionError {
    /// Whether the LLM client should try the request again.
    ///
    /// Credential problems, unsupported models and non-429 client errors
    /// will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient(_) | Self::LlmEmptyResponse => true,
            Self::LlmApiRequest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
