//! Turning untrusted model output into [`FeeRecord`]s.
//!
//! Each candidate object is checked on its own; a bad object is dropped
//! with a [`ValidationIssue`] and never affects its neighbours.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

use crate::brokers;
use crate::types::{FeeRecord, InstrumentType, OrderChannel, DEFAULT_CURRENCY};

/// Evidence snippets are cut to this many characters before landing in notes.
const MAX_EVIDENCE_CHARS: usize = 200;

/// "€1 + 0.35%" style composite fees reported as a single variable fee.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static COMPOSITE_FEE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[€$]?([0-9]+(?:\.[0-9]+)?)\s*\+\s*([0-9]+(?:\.[0-9]+)?%)$").expect("valid regex")
});

/// A monetary amount with an optional leading or trailing currency marker.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[€$£]|eur|usd|gbp)?\s*(-?[0-9]+(?:[.,][0-9]+)?)\s*(?:[€$£]|eur|usd|gbp)?$")
        .expect("valid regex")
});

/// Any number in free text, with decimal or thousands separators.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static NUMBER_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:[.,][0-9]+)*").expect("valid regex"));

/// Why a candidate record was dropped or flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub broker: String,
    /// Position of the offending item in its batch.
    pub index: usize,
    pub reason: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} item {}: {}", self.broker, self.index, self.reason)
    }
}

/// Records that passed validation and issues for those that did not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    pub records: Vec<FeeRecord>,
    pub issues: Vec<ValidationIssue>,
}

/// Validator bound to one extraction request.
#[derive(Debug, Clone)]
pub struct RecordValidator<'a> {
    requested: &'a str,
    canonical: String,
    source_url: &'a str,
    /// Chunk text that strict mode checks records against.
    grounding: Option<&'a str>,
}

impl<'a> RecordValidator<'a> {
    pub fn new(broker: &'a str, source_url: &'a str) -> Self {
        Self {
            requested: broker,
            canonical: brokers::canonical_name(broker),
            source_url,
            grounding: None,
        }
    }

    /// Also require fees and evidence to be traceable to `chunk_text`.
    pub fn strict(mut self, chunk_text: &'a str) -> Self {
        self.grounding = Some(chunk_text);
        self
    }

    pub fn validate(&self, items: &[Value]) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        for (index, item) in items.iter().enumerate() {
            match self.validate_item(item) {
                Ok(record) => outcome.records.push(record),
                Err(reason) => {
                    debug!(broker = %self.canonical, index, %reason, "dropping record");
                    outcome.issues.push(ValidationIssue {
                        broker: self.canonical.clone(),
                        index,
                        reason,
                    });
                }
            }
        }

        outcome
    }

    fn validate_item(&self, item: &Value) -> Result<FeeRecord, String> {
        let obj = item.as_object().ok_or("not a JSON object")?;

        let broker = string_field(obj, "broker").ok_or("missing broker")?;
        if !self.matches_broker(&broker) {
            return Err(format!(
                "broker '{broker}' does not match requested broker '{}'",
                self.requested
            ));
        }

        let instrument_label =
            string_field(obj, "instrument_type").ok_or("missing instrument_type")?;
        let instrument_type = InstrumentType::from_label(&instrument_label)
            .ok_or_else(|| format!("unknown instrument_type '{instrument_label}'"))?;

        let order_channel =
            OrderChannel::normalize(obj.get("order_channel").and_then(Value::as_str));

        let mut base_fee = parse_base_fee(obj.get("base_fee"))?;
        let mut variable_fee = parse_variable_fee(obj.get("variable_fee"))?;

        if base_fee.is_none() {
            if let Some((base, variable)) = variable_fee.as_deref().and_then(split_composite) {
                base_fee = Some(base);
                variable_fee = Some(variable);
            }
        }

        if base_fee.is_none() && variable_fee.is_none() {
            return Err("neither base_fee nor variable_fee is set".into());
        }

        let evidence = string_field(obj, "evidence")
            .map(|e| e.chars().take(MAX_EVIDENCE_CHARS).collect::<String>());

        if let Some(chunk) = self.grounding {
            if let Some(fee) = base_fee.filter(|f| *f != 0.0) {
                if !number_in_text(fee, chunk) {
                    return Err(format!("base_fee {fee} does not occur in the source text"));
                }
            }
            if let Some(evidence) = &evidence {
                if !contains_normalized(chunk, evidence) {
                    return Err("evidence does not occur in the source text".into());
                }
            }
        }

        let currency = string_field(obj, "currency")
            .map(|c| normalize_currency(&c))
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let source = string_field(obj, "source").unwrap_or_else(|| self.source_url.to_string());
        let page = match obj.get("page") {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };
        let notes = fold_notes(string_field(obj, "notes"), evidence, page);

        Ok(FeeRecord {
            broker: self.canonical.clone(),
            instrument_type,
            order_channel,
            base_fee,
            variable_fee,
            currency,
            source,
            notes,
        })
    }

    /// Whole-word match either way: "Degiro Belgium NV" matches "degiro" and
    /// "Keytrade" matches "Keytrade Bank", but "Bank" does not.
    fn matches_broker(&self, reported: &str) -> bool {
        let reported = words(reported);
        if reported.is_empty() {
            return false;
        }
        [words(self.requested), words(&self.canonical)]
            .iter()
            .filter(|wanted| !wanted.is_empty())
            .any(|wanted| {
                reported.windows(wanted.len()).any(|w| w == wanted.as_slice())
                    || wanted.starts_with(&reported)
            })
    }
}

/// Validate `items` for `broker` without a source URL or strict checks.
pub fn validate(items: &[Value], broker: &str) -> ValidationOutcome {
    RecordValidator::new(broker, "").validate(items)
}

/// Trimmed, non-empty string value of `key`.
fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_base_fee(value: Option<&Value>) -> Result<Option<f64>, String> {
    let fee = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => parse_amount(s),
        Some(_) => None,
    };

    match fee {
        Some(f) if !f.is_finite() => Err("base_fee is not a finite number".into()),
        Some(f) if f < 0.0 => Err(format!("negative base_fee {f}")),
        Some(f) => Ok(Some(f)),
        None => Err(format!("non-numeric base_fee {}", value.unwrap_or(&Value::Null))),
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let caps = AMOUNT.captures(raw.trim())?;
    caps.get(1)?.as_str().replace(',', ".").parse().ok()
}

fn parse_variable_fee(value: Option<&Value>) -> Result<Option<String>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(format!("invalid variable_fee {other}")),
    }
}

fn split_composite(variable_fee: &str) -> Option<(f64, String)> {
    let caps = COMPOSITE_FEE.captures(variable_fee)?;
    let base = caps.get(1)?.as_str().parse().ok()?;
    Some((base, caps.get(2)?.as_str().to_string()))
}

fn normalize_currency(raw: &str) -> String {
    match raw {
        "€" => "EUR".to_string(),
        "$" => "USD".to_string(),
        "£" => "GBP".to_string(),
        other => other.to_uppercase(),
    }
}

fn fold_notes(notes: Option<String>, evidence: Option<String>, page: Option<String>) -> Option<String> {
    let extras: Vec<String> = evidence
        .map(|e| format!("evidence: {e}"))
        .into_iter()
        .chain(page.map(|p| format!("page: {p}")))
        .collect();

    match (notes, extras.is_empty()) {
        (notes, true) => notes,
        (Some(notes), false) => Some(format!("{notes}; {}", extras.join("; "))),
        (None, false) => Some(extras.join("; ")),
    }
}

fn number_in_text(fee: f64, text: &str) -> bool {
    NUMBER_IN_TEXT
        .find_iter(text)
        .flat_map(|m| number_readings(m.as_str()))
        .any(|n| (n - fee).abs() < 1e-9)
}

/// Plausible values of a number written with `,` and `.` separators:
/// comma as decimal point ("7,50"), comma as thousands separator ("1,000.50")
/// and point as thousands separator ("1.000,50").
fn number_readings(raw: &str) -> Vec<f64> {
    [
        raw.replace(',', "."),
        raw.replace(',', ""),
        raw.replace('.', "").replace(',', "."),
    ]
    .iter()
    .filter_map(|s| s.parse::<f64>().ok())
    .collect()
}

/// Lower-cased alphanumeric words of `s`.
fn words(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_normalized(haystack: &str, needle: &str) -> bool {
    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    squash(haystack).contains(&squash(needle))
}
