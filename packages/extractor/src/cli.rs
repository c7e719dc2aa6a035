//! Command-line interface for the fee extractor.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::brokers::load_brokers_from_paths;
use crate::cache::{FileCache, SystemClock};
use crate::client::HttpLlmClient;
use crate::config::{CacheConfig, ExtractorConfig, LlmConfig};
use crate::error::{ExtractionError, Result};
use crate::extractor::{ExtractionOptions, ExtractionRequest, ExtractionStatus, Extractor};

/// Model used when `--model` is not given.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// be-invest fee extractor - extract broker fee records from fee schedules.
#[derive(Parser)]
#[command(name = "beinvest-extract")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract fee records from a text document and print them as JSON.
    Extract {
        /// Broker the document belongs to (e.g., Bolero)
        #[arg(short, long)]
        broker: String,

        /// Text file to extract from, or "-" for stdin
        #[arg(short, long)]
        input: PathBuf,

        /// LLM model; the provider is derived from its name
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,

        /// URL the document was taken from
        #[arg(long, default_value = "")]
        source_url: String,

        /// Maximum characters per chunk
        #[arg(long)]
        chunk_chars: Option<usize>,

        /// Maximum number of chunks
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Lines kept per chunk (0 disables focusing)
        #[arg(long)]
        focus_lines: Option<usize>,

        /// Drop records that cannot be traced back to the text
        #[arg(long)]
        strict: bool,

        /// Cache directory (default: $LLM_CACHE_DIR or data/cache/llm)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Cache entry lifetime in seconds
        #[arg(long)]
        ttl_secs: Option<u64>,

        /// Neither read nor write the cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Manage cached extraction results.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// List brokers from YAML definition files.
    Brokers {
        /// Broker definition files
        #[arg(short, long = "config", required = true)]
        config: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Remove expired entries.
    Purge {
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Remove every entry.
    Clear {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

/// Run the CLI.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            broker,
            input,
            model,
            source_url,
            chunk_chars,
            max_chunks,
            focus_lines,
            strict,
            cache_dir,
            ttl_secs,
            no_cache,
        } => {
            let defaults = ExtractionOptions::default();
            let options = ExtractionOptions {
                chunk_chars: chunk_chars.unwrap_or(defaults.chunk_chars),
                max_chunks: max_chunks.unwrap_or(defaults.max_chunks),
                focus_lines: focus_lines.unwrap_or(defaults.focus_lines),
                strict_mode: strict,
            };
            let text = read_input(&input)?;
            let request = ExtractionRequest::new(text, broker, source_url, model).with_options(options);
            let cache = (!no_cache).then(|| open_cache(cache_dir, ttl_secs));
            extract_command(&request, cache.as_ref()).await
        }
        Commands::Cache { action } => match action {
            CacheCommand::Purge {
                cache_dir,
                ttl_secs,
            } => {
                let cache = open_cache(cache_dir, ttl_secs);
                let removed = cache.purge_expired()?;
                println!(
                    "{} {} expired entries from {}",
                    style("Removed").bold(),
                    style(removed).cyan(),
                    cache.dir().display()
                );
                Ok(())
            }
            CacheCommand::Clear { cache_dir } => {
                let cache = open_cache(cache_dir, None);
                let removed = cache.clear()?;
                println!(
                    "{} {} entries from {}",
                    style("Removed").bold(),
                    style(removed).cyan(),
                    cache.dir().display()
                );
                Ok(())
            }
        },
        Commands::Brokers { config } => brokers_command(&config),
    }
}

fn open_cache(dir: Option<PathBuf>, ttl_secs: Option<u64>) -> FileCache<SystemClock> {
    let mut config = CacheConfig::from_env();
    if let Some(dir) = dir {
        config.dir = dir;
    }
    if let Some(ttl) = ttl_secs {
        config.ttl = Duration::from_secs(ttl);
    }
    FileCache::from_config(&config)
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    if !path.is_file() {
        return Err(ExtractionError::InvalidInput(format!(
            "input file does not exist: {}",
            path.display()
        )));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Execute the extract command.
async fn extract_command(
    request: &ExtractionRequest,
    cache: Option<&FileCache<SystemClock>>,
) -> Result<()> {
    let llm_config = LlmConfig::from_env();
    let config = ExtractorConfig::from_env();
    let client = HttpLlmClient::new(&llm_config)?;

    let mut extractor = Extractor::new(&client, &config);
    if let Some(cache) = cache {
        extractor = extractor.with_cache(cache);
    }

    eprintln!(
        "{} {} with {}",
        style("Extracting").bold(),
        style(&request.broker).cyan(),
        style(&request.model).green()
    );

    // Create progress spinner
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.set_message("Calling LLM...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let outcome = extractor.extract(request).await;

    pb.finish_and_clear();

    if let ExtractionStatus::Unavailable { reason } = &outcome.status {
        return Err(ExtractionError::Config(format!("extraction unavailable: {reason}")));
    }

    println!("{}", serde_json::to_string_pretty(&outcome.records)?);

    let failed = outcome.chunks.iter().filter(|c| !c.succeeded()).count();
    eprintln!("  Status: {}", style(&outcome.status).green());
    eprintln!("  Records: {}", outcome.records.len());
    eprintln!("  Chunks: {} ({} failed)", outcome.chunks.len(), failed);
    eprintln!(
        "  Tokens: {} in / {} out",
        outcome.token_usage.input_tokens, outcome.token_usage.output_tokens
    );
    if !outcome.issues.is_empty() {
        eprintln!("  Issues: {}", style(outcome.issues.len()).yellow().bold());
        for issue in &outcome.issues {
            eprintln!("    - {issue}");
        }
    }

    Ok(())
}

/// Execute the brokers command.
fn brokers_command(paths: &[PathBuf]) -> Result<()> {
    let brokers = load_brokers_from_paths(paths)?;
    if brokers.is_empty() {
        println!("{}", style("No brokers configured").yellow());
        return Ok(());
    }

    for broker in &brokers {
        let marker = if broker.known().is_some() {
            style("instruction").green()
        } else {
            style("no instruction").dim()
        };
        println!(
            "{} ({}) [{}] - {} data source(s)",
            style(&broker.name).bold(),
            if broker.country.is_empty() { "-" } else { broker.country.as_str() },
            marker,
            broker.data_sources.len()
        );
    }
    Ok(())
}
