//! be-invest fee extractor - LLM-backed extraction of broker fee schedules.
//!
//! This crate turns the raw text of a broker's fee schedule into validated,
//! deduplicated [`FeeRecord`]s. Long documents are split into chunks,
//! trimmed to their most fee-relevant lines and sent to an LLM; the replies
//! are parsed, validated against a controlled vocabulary, merged and cached
//! by content hash.
//!
//! # Example
//!
//! ```
//! use beinvest_extractor::chunking;
//!
//! let text = "Equity fees\nStocks: EUR 7.50 per order\nETF tariff\nETF trades: EUR 15";
//! let chunks: Vec<&str> = chunking::chunk(text, 40, 8).collect();
//! assert_eq!(chunks.len(), 2);
//! ```
//!
//! # Architecture
//!
//! - [`chunking`]: Header-aware splitting into bounded chunks
//! - [`focus`]: Line scoring and selection within a chunk
//! - [`prompt`]: Prompt and output schema construction
//! - [`brokers`]: Broker instruction table and YAML broker definitions
//! - [`client`]: LLM provider adapters with retry
//! - [`response`]: JSON recovery from model output
//! - [`validator`]: Record validation and normalization
//! - [`dedupe`]: Duplicate merging and conflict detection
//! - [`cache`]: Content-addressed result cache
//! - [`extractor`]: Orchestration of a whole extraction
//! - [`config`]: Environment-driven configuration
//! - [`cli`]: Command-line interface

pub mod brokers;
pub mod cache;
pub mod chunking;
pub mod cli;
pub mod client;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod extractor;
pub mod focus;
pub mod prompt;
pub mod response;
pub mod types;
pub mod validator;

// Re-export commonly used items
pub use cache::{CacheKey, FileCache, MemoryCache, RecordCache};
pub use client::{HttpLlmClient, LlmClient, Provider};
pub use config::{CacheConfig, ExtractorConfig, LlmConfig};
pub use error::{ExtractionError, Result};
pub use extractor::{
    ExtractionOptions, ExtractionOutcome, ExtractionRequest, ExtractionStatus, Extractor,
};
pub use types::{FeeRecord, InstrumentType, OrderChannel, TokenUsage};
