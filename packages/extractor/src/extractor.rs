//! Extraction orchestrator: chunk, focus, prompt, call, parse, validate,
//! merge and cache.

use std::borrow::Cow;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::brokers;
use crate::cache::{CacheKey, RecordCache};
use crate::chunking;
use crate::client::{LlmClient, LlmRequest, Message, Provider, Role};
use crate::config::{ExtractorConfig, MAX_CONCURRENCY};
use crate::dedupe;
use crate::error::ExtractionError;
use crate::focus;
use crate::prompt;
use crate::response;
use crate::types::{FeeRecord, TokenUsage};
use crate::validator::{RecordValidator, ValidationIssue};

/// Per-request tuning of chunking, focusing and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Maximum characters per chunk.
    pub chunk_chars: usize,
    /// Maximum number of chunks; text beyond the last chunk is not extracted.
    pub max_chunks: usize,
    /// Lines kept per chunk by focusing; `0` sends chunks verbatim.
    pub focus_lines: usize,
    /// Drop records whose fees or evidence cannot be found in the chunk.
    pub strict_mode: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            chunk_chars: 18_000,
            max_chunks: 8,
            focus_lines: 450,
            strict_mode: false,
        }
    }
}

/// One document to extract fee records from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub text: String,
    pub broker: String,
    #[serde(default)]
    pub source_url: String,
    pub model: String,
    #[serde(rename = "config", default)]
    pub options: ExtractionOptions,
}

impl ExtractionRequest {
    pub fn new(
        text: impl Into<String>,
        broker: impl Into<String>,
        source_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            broker: broker.into(),
            source_url: source_url.into(),
            model: model.into(),
            options: ExtractionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }
}

/// How an extraction ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Served from the cache without calling the LLM.
    Cached,
    /// Every chunk was processed.
    Completed,
    /// Some chunks failed or were abandoned; records come from the rest.
    Partial,
    /// Extraction could not run (missing credentials, unsupported model).
    Unavailable { reason: String },
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cached => f.write_str("cached"),
            Self::Completed => f.write_str("completed"),
            Self::Partial => f.write_str("partial"),
            Self::Unavailable { reason } => write!(f, "unavailable ({reason})"),
        }
    }
}

/// Category of a chunk failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkErrorKind {
    Auth,
    RateLimited,
    Transient,
    Api,
    Parse,
    Config,
    /// The extraction deadline passed before the chunk finished.
    TimedOut,
    Other,
}

impl ChunkErrorKind {
    fn of(error: &ExtractionError) -> Self {
        match error {
            ExtractionError::ProviderAuth { .. } => Self::Auth,
            ExtractionError::RateLimited { .. } => Self::RateLimited,
            ExtractionError::Transient(_) | ExtractionError::LlmEmptyResponse => Self::Transient,
            ExtractionError::LlmApiRequest(_) | ExtractionError::LlmApiError { .. } => Self::Api,
            ExtractionError::ResponseParse(_) => Self::Parse,
            ExtractionError::UnsupportedModel(_) | ExtractionError::Config(_) => Self::Config,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Api => "api",
            Self::Parse => "parse",
            Self::Config => "config",
            Self::TimedOut => "timed_out",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ChunkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a chunk contributed no records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub kind: ChunkErrorKind,
    pub message: String,
}

impl ChunkFailure {
    fn from_error(error: &ExtractionError) -> Self {
        Self {
            kind: ChunkErrorKind::of(error),
            message: error.to_string(),
        }
    }

    fn timed_out() -> Self {
        Self {
            kind: ChunkErrorKind::TimedOut,
            message: "extraction deadline reached".into(),
        }
    }
}

/// What happened to one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub index: usize,
    pub chars: usize,
    /// Valid records produced, before deduplication.
    pub records: usize,
    pub failure: Option<ChunkFailure>,
}

impl ChunkReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of [`Extractor::extract`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionOutcome {
    pub records: Vec<FeeRecord>,
    pub status: ExtractionStatus,
    pub chunks: Vec<ChunkReport>,
    pub issues: Vec<ValidationIssue>,
    pub token_usage: TokenUsage,
}

impl ExtractionOutcome {
    fn with_status(status: ExtractionStatus) -> Self {
        Self {
            records: Vec::new(),
            status,
            chunks: Vec::new(),
            issues: Vec::new(),
            token_usage: TokenUsage::default(),
        }
    }

    fn unavailable(reason: impl Into<String>) -> Self {
        Self::with_status(ExtractionStatus::Unavailable {
            reason: reason.into(),
        })
    }
}

/// Records of a successfully processed chunk.
struct ChunkOutput {
    records: Vec<FeeRecord>,
    issues: Vec<ValidationIssue>,
    usage: TokenUsage,
}

/// Everything a chunk call needs besides the chunk itself.
struct ChunkContext<'r> {
    request: &'r ExtractionRequest,
    broker: &'r str,
    provider: Provider,
    schema: Value,
}

/// Extraction orchestrator.
///
/// Never returns an error: failures are recovered per record, per chunk or
/// per provider and reported through [`ExtractionOutcome`].
pub struct Extractor<'a, C: LlmClient> {
    client: &'a C,
    config: &'a ExtractorConfig,
    cache: Option<&'a dyn RecordCache>,
}

impl<'a, C: LlmClient> Extractor<'a, C> {
    pub fn new(client: &'a C, config: &'a ExtractorConfig) -> Self {
        Self {
            client,
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a dyn RecordCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Extract deduplicated fee records from a document.
    pub async fn extract_records(&self, request: &ExtractionRequest) -> Vec<FeeRecord> {
        self.extract(request).await.records
    }

    /// Extract fee records and report how the extraction went.
    pub async fn extract(&self, request: &ExtractionRequest) -> ExtractionOutcome {
        let broker = brokers::canonical_name(&request.broker);
        info!(
            broker = %broker,
            model = %request.model,
            chars = request.text.chars().count(),
            "starting extraction"
        );

        if broker.is_empty() {
            return ExtractionOutcome::unavailable("invalid input: broker is empty");
        }
        if request.text.trim().is_empty() {
            debug!(broker = %broker, "empty document, nothing to extract");
            return ExtractionOutcome::with_status(ExtractionStatus::Completed);
        }

        let key = CacheKey::for_input(&request.model, &broker, &request.text);
        if let Some(records) = self.cache.and_then(|c| c.get(&key)) {
            info!(broker = %broker, %key, records = records.len(), "cache hit");
            let mut outcome = ExtractionOutcome::with_status(ExtractionStatus::Cached);
            outcome.records = records;
            return outcome;
        }

        let provider = match Provider::from_model(&request.model) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(broker = %broker, error = %e, "extraction unavailable");
                return ExtractionOutcome::unavailable(e.to_string());
            }
        };
        if !self.client.has_credentials(provider) {
            let e = ExtractionError::ProviderAuth {
                provider: provider.to_string(),
            };
            warn!(broker = %broker, error = %e, "extraction unavailable");
            return ExtractionOutcome::unavailable(e.to_string());
        }

        let options = &request.options;
        let chunks: Vec<&str> =
            chunking::chunk(&request.text, options.chunk_chars, options.max_chunks).collect();
        let ctx = ChunkContext {
            request,
            broker: &broker,
            provider,
            schema: prompt::output_schema(),
        };
        let results = self.run_chunks(&ctx, &chunks).await;

        let mut outcome = ExtractionOutcome::with_status(ExtractionStatus::Completed);
        let mut records = Vec::new();
        let mut auth_failures = 0;

        for (index, (chunk, result)) in chunks.iter().zip(results).enumerate() {
            let chars = chunk.chars().count();
            let report = match result {
                Ok(output) => {
                    outcome.token_usage.add(&output.usage);
                    outcome.issues.extend(output.issues);
                    let count = output.records.len();
                    records.extend(output.records);
                    ChunkReport {
                        index,
                        chars,
                        records: count,
                        failure: None,
                    }
                }
                Err(failure) => {
                    warn!(
                        broker = %broker,
                        chunk = index,
                        kind = %failure.kind,
                        error = %failure.message,
                        "chunk extraction failed"
                    );
                    if failure.kind == ChunkErrorKind::Auth {
                        auth_failures += 1;
                    }
                    ChunkReport {
                        index,
                        chars,
                        records: 0,
                        failure: Some(failure),
                    }
                }
            };
            outcome.chunks.push(report);
        }

        let conflicts = dedupe::find_conflicts(&records);
        if !conflicts.is_empty() {
            warn!(broker = %broker, conflicts = conflicts.len(), "conflicting fee records");
        }
        outcome.issues.extend(conflicts);
        outcome.records = dedupe::dedupe(records);

        let failed = outcome.chunks.iter().filter(|c| !c.succeeded()).count();
        outcome.status = if failed > 0 && auth_failures == outcome.chunks.len() {
            ExtractionStatus::Unavailable {
                reason: ExtractionError::ProviderAuth {
                    provider: provider.to_string(),
                }
                .to_string(),
            }
        } else if failed > 0 {
            ExtractionStatus::Partial
        } else {
            ExtractionStatus::Completed
        };

        if !outcome.issues.is_empty() {
            warn!(broker = %broker, issues = outcome.issues.len(), "validation issues");
        }

        // Partial results are never cached, a later run may recover them
        if outcome.status == ExtractionStatus::Completed && !outcome.chunks.is_empty() {
            if let Some(cache) = self.cache {
                cache.put(&key, &outcome.records);
            }
        }

        info!(
            broker = %broker,
            records = outcome.records.len(),
            chunks = outcome.chunks.len(),
            failed,
            status = %outcome.status,
            input_tokens = outcome.token_usage.input_tokens,
            output_tokens = outcome.token_usage.output_tokens,
            "extraction finished"
        );
        outcome
    }

    /// Process chunks concurrently, returning one result per chunk in chunk order.
    ///
    /// Chunks finish in any order and land in their own slot. Chunks still
    /// pending when the extraction deadline passes are reported as timed out;
    /// chunks that already finished keep their result.
    async fn run_chunks(
        &self,
        ctx: &ChunkContext<'_>,
        chunks: &[&str],
    ) -> Vec<Result<ChunkOutput, ChunkFailure>> {
        let concurrency = self.config.max_concurrency.clamp(1, MAX_CONCURRENCY);
        let deadline = self
            .config
            .extraction_timeout
            .map(|budget| tokio::time::Instant::now() + budget);

        let pending = stream::iter(chunks.iter().copied().enumerate())
            .map(|(index, chunk)| async move { (index, self.process_chunk(ctx, index, chunk).await) })
            .buffer_unordered(concurrency);
        let mut pending = std::pin::pin!(pending);

        let mut slots: Vec<Option<Result<ChunkOutput, ChunkFailure>>> =
            std::iter::repeat_with(|| None).take(chunks.len()).collect();
        let mut finished = 0;
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            broker = %ctx.broker,
                            finished,
                            abandoned = chunks.len() - finished,
                            "extraction deadline reached"
                        );
                        break;
                    }
                },
                None => pending.next().await,
            };
            let Some((index, result)) = next else { break };
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
                finished += 1;
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(ChunkFailure::timed_out())))
            .collect()
    }

    async fn process_chunk(
        &self,
        ctx: &ChunkContext<'_>,
        index: usize,
        chunk: &str,
    ) -> Result<ChunkOutput, ChunkFailure> {
        let options = &ctx.request.options;
        let focused = if options.focus_lines == 0 {
            Cow::Borrowed(chunk)
        } else {
            focus::focus(chunk, options.focus_lines)
        };
        debug!(
            broker = %ctx.broker,
            chunk = index,
            chars = chunk.chars().count(),
            focused_chars = focused.chars().count(),
            "LLM request"
        );

        let prompt = prompt::build(ctx.broker, &ctx.request.source_url, &focused, &ctx.schema);
        let llm_request = LlmRequest {
            provider: ctx.provider,
            model: ctx.request.model.clone(),
            system: prompt.system,
            messages: vec![Message {
                role: Role::User,
                content: prompt.user,
            }],
            max_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .complete(&llm_request)
            .await
            .map_err(|e| ChunkFailure::from_error(&e))?;
        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        let parsed = response::parse(&response.content);
        if let Some(failure) = parsed.failure {
            return Err(ChunkFailure::from_error(&ExtractionError::ResponseParse(
                failure.to_string(),
            )));
        }

        let mut validator = RecordValidator::new(&ctx.request.broker, &ctx.request.source_url);
        if options.strict_mode {
            validator = validator.strict(&focused);
        }
        let validated = validator.validate(&parsed.items);
        debug!(
            broker = %ctx.broker,
            chunk = index,
            items = parsed.items.len(),
            records = validated.records.len(),
            "chunk validated"
        );

        Ok(ChunkOutput {
            records: validated.records,
            issues: validated.issues,
            usage,
        })
    }
}
