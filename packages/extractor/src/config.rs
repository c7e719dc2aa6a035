use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Upper bound for concurrent LLM calls within one extraction.
pub const MAX_CONCURRENCY: usize = 5;

fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

/// Credentials and transport settings for the LLM providers.
#[derive(Clone)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    /// Timeout for a single HTTP attempt.
    pub timeout: Duration,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_retry_delay: Duration,
}

// API keys must never end up in logs.
impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("anthropic_base_url", &self.anthropic_base_url)
            .field("openai_base_url", &self.openai_base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("max_retry_delay", &self.max_retry_delay)
            .finish()
    }
}

impl LlmConfig {
    /// Load configuration from environment variables.
    ///
    /// Missing API keys are not an error here: the provider is reported as
    /// unavailable when an extraction actually needs it.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: env_non_empty("ANTHROPIC_API_KEY"),
            openai_api_key: env_non_empty("OPENAI_API_KEY"),
            anthropic_base_url: env_non_empty("ANTHROPIC_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.into()),
            openai_base_url: env_non_empty("OPENAI_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into()),
            timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS").unwrap_or(60)),
            max_retries: env_parse("LLM_MAX_RETRIES").unwrap_or(3),
            retry_base_delay: Duration::from_millis(
                env_parse("LLM_RETRY_BASE_DELAY_MS").unwrap_or(1000),
            ),
            max_retry_delay: Duration::from_secs(env_parse("LLM_MAX_RETRY_DELAY_SECS").unwrap_or(30)),
        }
    }

    /// Create a config builder for testing.
    pub fn builder() -> LlmConfigBuilder {
        LlmConfigBuilder {
            config: Self {
                anthropic_api_key: None,
                openai_api_key: None,
                anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.into(),
                openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
                timeout: Duration::from_secs(60),
                max_retries: 3,
                retry_base_delay: Duration::from_millis(1000),
                max_retry_delay: Duration::from_secs(30),
            },
        }
    }
}

/// Builder for constructing `LlmConfig` in tests.
pub struct LlmConfigBuilder {
    config: LlmConfig,
}

impl LlmConfigBuilder {
    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.anthropic_api_key = Some(key.into());
        self
    }

    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.openai_api_key = Some(key.into());
        self
    }

    pub fn anthropic_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.anthropic_base_url = url.into();
        self
    }

    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.openai_base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.config.max_retry_delay = delay;
        self
    }

    pub fn build(self) -> LlmConfig {
        self.config
    }
}

/// Runtime settings of the extraction orchestrator.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Concurrent chunk calls, clamped to `1..=MAX_CONCURRENCY`.
    pub max_concurrency: usize,
    /// Budget for a whole extraction; `None` waits for every chunk.
    pub extraction_timeout: Option<Duration>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: 2000,
            max_concurrency: 3,
            extraction_timeout: None,
        }
    }
}

impl ExtractorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            temperature: env_parse("LLM_TEMPERATURE").unwrap_or(defaults.temperature),
            max_output_tokens: env_parse("LLM_MAX_TOKENS").unwrap_or(defaults.max_output_tokens),
            max_concurrency: env_parse::<usize>("EXTRACTION_MAX_CONCURRENCY")
                .unwrap_or(defaults.max_concurrency)
                .clamp(1, MAX_CONCURRENCY),
            extraction_timeout: env_parse("EXTRACTION_TIMEOUT_SECS").map(Duration::from_secs),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = Some(timeout);
        self
    }
}

/// Location and lifetime of cached extraction results.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            dir: env_non_empty("LLM_CACHE_DIR")
                .unwrap_or_else(|| "data/cache/llm".into())
                .into(),
            ttl: Duration::from_secs(env_parse("LLM_CACHE_TTL_SECS").unwrap_or(24 * 3600)),
        }
    }

    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_keys() {
        let config = LlmConfig::builder()
            .anthropic_api_key("sk-ant-secret")
            .openai_api_key("sk-openai-secret")
            .build();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_concurrency_is_clamped() {
        assert_eq!(ExtractorConfig::default().with_max_concurrency(0).max_concurrency, 1);
        assert_eq!(ExtractorConfig::default().with_max_concurrency(50).max_concurrency, MAX_CONCURRENCY);
    }
}
