use std::time::Duration;

use beinvest_extractor::extractor::ChunkErrorKind;
use beinvest_extractor::{
    CacheKey, ExtractionOptions, ExtractionRequest, ExtractionStatus, Extractor, ExtractorConfig,
    FileCache, HttpLlmClient, InstrumentType, LlmConfig, RecordCache,
};
use beinvest_extractor::cache::SystemClock;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLAUDE: &str = "claude-sonnet-4-5-20250929";
const SOURCE_URL: &str = "https://www.bolero.be/nl/tarieven";

/// Two fee sections that end up in separate chunks at 80 characters.
const BOLERO_SCHEDULE: &str = "Equity fees\n\
                               Stocks: EUR 7.50 per order on Euronext Brussels\n\
                               ETF tariff\n\
                               ETF trades: flat EUR 15 per order";

fn anthropic_response(content: &str) -> serde_json::Value {
    json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [
            {
                "type": "text",
                "text": content
            }
        ],
        "model": CLAUDE,
        "usage": {
            "input_tokens": 500,
            "output_tokens": 300
        }
    })
}

fn openai_response(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }
        ],
        "usage": { "prompt_tokens": 400, "completion_tokens": 120 }
    })
}

fn etf_records() -> String {
    json!([{
        "broker": "Bolero",
        "instrument_type": "ETFs",
        "order_channel": "Online Platform",
        "base_fee": 15.0,
        "variable_fee": null,
        "currency": "EUR",
        "source": SOURCE_URL,
        "evidence": "ETF trades: flat EUR 15 per order"
    }])
    .to_string()
}

fn llm_config(server: &MockServer) -> LlmConfig {
    LlmConfig::builder()
        .anthropic_api_key("test-key")
        .openai_api_key("test-key")
        .anthropic_base_url(server.uri())
        .openai_base_url(server.uri())
        .retry_base_delay(Duration::from_millis(10))
        .max_retry_delay(Duration::from_millis(100))
        .build()
}

fn bolero_request(text: &str) -> ExtractionRequest {
    ExtractionRequest::new(text, "Bolero", SOURCE_URL, CLAUDE)
}

fn two_chunks() -> ExtractionOptions {
    ExtractionOptions {
        chunk_chars: 80,
        ..ExtractionOptions::default()
    }
}

#[tokio::test]
async fn test_bolero_etf_extraction_e2e() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_response(&etf_records())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::new(&llm_config(&mock_server)).expect("client creation");
    let config = ExtractorConfig::default();
    let extractor = Extractor::new(&client, &config);

    let outcome = extractor
        .extract(&bolero_request("ETF trades: flat EUR 15 per order"))
        .await;

    assert_eq!(outcome.status, ExtractionStatus::Completed);
    assert_eq!(outcome.records.len(), 1);
    let record = &outcome.records[0];
    assert_eq!(record.broker, "Bolero");
    assert_eq!(record.instrument_type, InstrumentType::Etfs);
    assert_eq!(record.base_fee, Some(15.0));
    assert_eq!(record.variable_fee, None);
    assert_eq!(
        record.notes.as_deref(),
        Some("evidence: ETF trades: flat EUR 15 per order")
    );
    assert_eq!(outcome.token_usage.input_tokens, 500);
}

#[tokio::test]
async fn test_openai_provider_e2e() {
    let mock_server = MockServer::start().await;

    let content = format!("```json\n{}\n```", etf_records());
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_response(&content)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::new(&llm_config(&mock_server)).expect("client creation");
    let config = ExtractorConfig::default();
    let mut request = bolero_request("ETF trades: flat EUR 15 per order");
    request.model = "gpt-4o".into();

    let outcome = Extractor::new(&client, &config).extract(&request).await;

    assert_eq!(outcome.status, ExtractionStatus::Completed);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.token_usage.output_tokens, 120);
}

#[tokio::test]
async fn test_timed_out_chunk_keeps_other_records() {
    let mock_server = MockServer::start().await;

    // Equity chunk never answers within the client timeout
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("Stocks: EUR 7.50"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(anthropic_response("[]"))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(4)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_response(&etf_records())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let llm = LlmConfig {
        timeout: Duration::from_secs(1),
        max_retries: 3,
        ..llm_config(&mock_server)
    };
    let client = HttpLlmClient::new(&llm).expect("client creation");
    let config = ExtractorConfig::default();

    let outcome = Extractor::new(&client, &config)
        .extract(&bolero_request(BOLERO_SCHEDULE).with_options(two_chunks()))
        .await;

    assert_eq!(outcome.status, ExtractionStatus::Partial);
    assert_eq!(outcome.chunks.len(), 2);
    assert_eq!(
        outcome.chunks[0].failure.as_ref().map(|f| f.kind),
        Some(ChunkErrorKind::Transient)
    );
    assert!(outcome.chunks[1].succeeded());
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].instrument_type, InstrumentType::Etfs);
    assert_eq!(outcome.records[0].base_fee, Some(15.0));
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_response(&etf_records())))
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::new(&llm_config(&mock_server)).expect("client creation");
    let config = ExtractorConfig::default();
    let outcome = Extractor::new(&client, &config)
        .extract(&bolero_request("ETF trades: flat EUR 15 per order"))
        .await;

    assert_eq!(outcome.status, ExtractionStatus::Completed);
    assert_eq!(outcome.records.len(), 1);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let llm = LlmConfig {
        max_retries: 2,
        ..llm_config(&mock_server)
    };
    let client = HttpLlmClient::new(&llm).expect("client creation");
    let config = ExtractorConfig::default();
    let outcome = Extractor::new(&client, &config)
        .extract(&bolero_request("ETF trades: flat EUR 15 per order"))
        .await;

    assert_eq!(outcome.status, ExtractionStatus::Partial);
    assert!(outcome.records.is_empty());
}

#[tokio::test]
async fn test_rejected_credential_is_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "type": "error",
            "error": { "type": "authentication_error", "message": "invalid x-api-key" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::new(&llm_config(&mock_server)).expect("client creation");
    let config = ExtractorConfig::default();
    let outcome = Extractor::new(&client, &config)
        .extract(&bolero_request("ETF trades: flat EUR 15 per order"))
        .await;

    assert!(matches!(outcome.status, ExtractionStatus::Unavailable { .. }));
    assert!(outcome.records.is_empty());
}

#[tokio::test]
async fn test_missing_credential_makes_no_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let llm = LlmConfig::builder()
        .openai_base_url(mock_server.uri())
        .build();
    let client = HttpLlmClient::new(&llm).expect("client creation");
    let config = ExtractorConfig::default();
    let mut request = bolero_request(BOLERO_SCHEDULE);
    request.model = "gpt-4o-mini".into();

    let outcome = Extractor::new(&client, &config).extract(&request).await;

    assert_eq!(
        outcome.status,
        ExtractionStatus::Unavailable {
            reason: "no usable credential for provider openai".into()
        }
    );
}

#[tokio::test]
async fn test_file_cache_serves_second_extraction() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_response(&etf_records())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let cache = FileCache::new(dir.path(), Duration::from_secs(3600), SystemClock);
    let client = HttpLlmClient::new(&llm_config(&mock_server)).expect("client creation");
    let config = ExtractorConfig::default();
    let extractor = Extractor::new(&client, &config).with_cache(&cache);

    let first = extractor
        .extract(&bolero_request("ETF trades: flat EUR 15 per order"))
        .await;
    assert_eq!(first.status, ExtractionStatus::Completed);

    // Trailing whitespace and CRLF do not change the key
    let second = extractor
        .extract(&bolero_request("ETF trades: flat EUR 15 per order  \r\n"))
        .await;
    assert_eq!(second.status, ExtractionStatus::Cached);
    assert_eq!(second.records, first.records);

    let key = CacheKey::for_input(CLAUDE, "Bolero", "ETF trades: flat EUR 15 per order");
    assert!(cache.entry_path(&key).exists());
    assert_eq!(cache.get(&key), Some(first.records));
}

#[tokio::test]
async fn test_strict_mode_drops_ungrounded_records() {
    let mock_server = MockServer::start().await;

    let content = json!([
        {"broker": "Bolero", "instrument_type": "ETFs", "base_fee": 15.0,
         "variable_fee": null, "currency": "EUR", "source": SOURCE_URL},
        {"broker": "Bolero", "instrument_type": "Equities", "base_fee": 10.0,
         "variable_fee": null, "currency": "EUR", "source": SOURCE_URL}
    ])
    .to_string();
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_response(&content)))
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::new(&llm_config(&mock_server)).expect("client creation");
    let config = ExtractorConfig::default();
    let options = ExtractionOptions {
        strict_mode: true,
        ..ExtractionOptions::default()
    };
    let outcome = Extractor::new(&client, &config)
        .extract(&bolero_request("ETF trades: flat EUR 15 per order").with_options(options))
        .await;

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].instrument_type, InstrumentType::Etfs);
    assert_eq!(outcome.issues.len(), 1);
    assert!(outcome.issues[0].reason.contains("base_fee"));
}
