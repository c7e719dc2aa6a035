//! Recovery of a JSON array from free-form model output.

use serde_json::Value;

/// Wrapper keys some models put around the record array.
const WRAPPER_KEYS: [&str; 3] = ["results", "records", "fees"];

/// Why a response yielded no items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// No JSON value could be recovered from the text.
    InvalidJson,
    /// A JSON value was found, but it is not an array of records.
    NotAList,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson => f.write_str("response is not valid JSON"),
            Self::NotAList => f.write_str("response JSON is not a list of records"),
        }
    }
}

/// Items recovered from a model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub items: Vec<Value>,
    pub failure: Option<ParseFailure>,
}

impl ParsedResponse {
    fn failed(failure: ParseFailure) -> Self {
        Self {
            items: Vec::new(),
            failure: Some(failure),
        }
    }
}

/// Parse raw model output into a list of candidate record objects.
///
/// Tries, in order: the whole text, the contents of a Markdown code fence,
/// and the span from the first `[` to the last `]`. Never fails; an
/// unusable response yields no items and a [`ParseFailure`].
pub fn parse(raw: &str) -> ParsedResponse {
    let Some(value) = recover_json(raw) else {
        return ParsedResponse::failed(ParseFailure::InvalidJson);
    };

    match unwrap_records(value) {
        Value::Array(items) => ParsedResponse {
            items,
            failure: None,
        },
        _ => ParsedResponse::failed(ParseFailure::NotAList),
    }
}

fn recover_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let blocks = extract_fenced_blocks(trimmed);
    // Prefer a block holding an array over e.g. an explanatory snippet
    let fenced = blocks
        .iter()
        .find(|b| b.contains('['))
        .or_else(|| blocks.first());
    if let Some(value) = fenced.and_then(|b| serde_json::from_str::<Value>(b.trim()).ok()) {
        return Some(value);
    }

    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

fn unwrap_records(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if map.get(key).is_some_and(Value::is_array) {
                    return map.remove(key).unwrap_or(Value::Null);
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

/// Extract all fenced code blocks from text.
fn extract_fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut remaining = text;

    while let Some(start) = remaining.find("```") {
        let after_fence = &remaining[start + 3..];
        // Skip optional language identifier on the same line
        let content_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let content = &after_fence[content_start..];
        if let Some(end) = content.find("```") {
            blocks.push(&content[..end]);
            remaining = &content[end + 3..];
        } else {
            break;
        }
    }

    blocks
}
