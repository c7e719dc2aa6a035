use serde_json::{json, Value};

use crate::brokers;
use crate::types::{InstrumentType, OrderChannel};

const SYSTEM_EXTRACTION: &str = include_str!("../prompts/system_extraction.txt");

/// System and user message for one extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Build the system prompt for extraction.
pub fn build_system_prompt() -> &'static str {
    SYSTEM_EXTRACTION
}

/// Output schema shown to the model, with the controlled vocabularies.
pub fn output_schema() -> Value {
    let instruments: Vec<&str> = InstrumentType::ALL.iter().map(|t| t.as_str()).collect();
    let channels: Vec<&str> = OrderChannel::ALL.iter().map(|c| c.as_str()).collect();

    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": [
                "broker",
                "instrument_type",
                "order_channel",
                "base_fee",
                "variable_fee",
                "currency",
                "source"
            ],
            "properties": {
                "broker": { "type": "string" },
                "instrument_type": { "enum": instruments },
                "order_channel": { "enum": channels, "default": OrderChannel::default().as_str() },
                "base_fee": { "type": ["number", "null"], "minimum": 0 },
                "variable_fee": { "type": ["string", "null"] },
                "currency": { "type": "string", "default": "EUR" },
                "source": { "type": "string" },
                "notes": { "type": ["string", "null"] },
                "evidence": { "type": ["string", "null"], "maxLength": 160 },
                "page": { "type": ["integer", "null"] }
            }
        }
    })
}

/// Build the prompt for extracting fee records from one (focused) chunk.
pub fn build(broker: &str, source_url: &str, focused_text: &str, schema: &Value) -> Prompt {
    let mut user = String::new();

    user.push_str(&format!(
        "Extract brokerage fee records for broker '{broker}'. Source: {source_url}\n\n"
    ));

    if let Some(instruction) = brokers::instruction_for(broker) {
        user.push_str(&format!("## Broker-specific note\n{instruction}\n\n"));
    }

    user.push_str("## Output schema\n");
    // Pretty printing a Value cannot fail
    user.push_str(&serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string()));
    user.push_str("\n\n");

    user.push_str(
        "## Field rules\n\
         - base_fee: number without currency symbol, or null. Use 0.0 for percentage-only fees or free trades.\n\
         - variable_fee: verbatim percentage or tier text (e.g. '0.35%', '1% Min. €40'), or null.\n\
         - A composite fee like '€1 + 0.35%' becomes base_fee 1 and variable_fee '0.35%'.\n\
         - order_channel: default 'Online Platform' when the text does not say otherwise.\n\
         - currency: as stated; 'EUR' only if the text genuinely states no currency.\n\
         - evidence: verbatim snippet of at most 160 characters supporting the fee.\n\
         - page: page number if discernible, else null.\n\
         - notes: free-order allowances, plan-specific variations, minimums/maximums and footnotes.\n\n",
    );

    user.push_str("DOCUMENT TEXT BEGIN\n");
    user.push_str(focused_text);
    user.push_str("\nDOCUMENT TEXT END");

    Prompt {
        system: build_system_prompt().to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_demands_json_array() {
        let system = build_system_prompt();
        assert!(system.contains("JSON array"));
        assert!(system.contains("null"));
    }

    #[test]
    fn test_schema_lists_vocabularies() {
        let schema = output_schema();
        let instruments = &schema["items"]["properties"]["instrument_type"]["enum"];
        assert_eq!(
            instruments,
            &json!(["Equities", "ETFs", "Options", "Bonds", "Funds"])
        );
        assert_eq!(
            schema["items"]["properties"]["order_channel"]["default"],
            "Online Platform"
        );
    }

    #[test]
    fn test_prompt_includes_broker_note_and_text() {
        let schema = output_schema();
        let prompt = build(
            "Degiro Belgium",
            "https://www.degiro.be/tarieven.pdf",
            "Handling fee EUR 1",
            &schema,
        );
        assert!(prompt.user.contains("Broker-specific note"));
        assert!(prompt.user.contains("handling fee"));
        assert!(prompt.user.contains("DOCUMENT TEXT BEGIN\nHandling fee EUR 1\nDOCUMENT TEXT END"));
        assert!(prompt.user.contains("\"instrument_type\""));
    }

    #[test]
    fn test_prompt_without_broker_note() {
        let prompt = build("Saxo Bank", "https://example.com", "text", &output_schema());
        assert!(!prompt.user.contains("Broker-specific note"));
        assert!(prompt.user.contains("broker 'Saxo Bank'"));
    }
}
