//! Core data types for extracted fee schedules.

use serde::{Deserialize, Serialize};

/// Default currency when a document does not state one.
pub const DEFAULT_CURRENCY: &str = "EUR";

/// Controlled vocabulary for the instrument a fee applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    Equities,
    #[serde(rename = "ETFs")]
    Etfs,
    Options,
    Bonds,
    Funds,
}

impl InstrumentType {
    /// Every permitted value, in the order presented to the model.
    pub const ALL: [InstrumentType; 5] = [
        Self::Equities,
        Self::Etfs,
        Self::Options,
        Self::Bonds,
        Self::Funds,
    ];

    /// Get the canonical label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equities => "Equities",
            Self::Etfs => "ETFs",
            Self::Options => "Options",
            Self::Bonds => "Bonds",
            Self::Funds => "Funds",
        }
    }

    /// Parse a label, ignoring case and surrounding whitespace.
    ///
    /// Only the canonical labels are accepted; anything else (e.g. "Crypto")
    /// is outside the vocabulary.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(label))
    }
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel through which an order is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderChannel {
    #[default]
    #[serde(rename = "Online Platform")]
    OnlinePlatform,
    Phone,
    Branch,
    Other,
}

impl OrderChannel {
    pub const ALL: [OrderChannel; 4] = [Self::OnlinePlatform, Self::Phone, Self::Branch, Self::Other];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnlinePlatform => "Online Platform",
            Self::Phone => "Phone",
            Self::Branch => "Branch",
            Self::Other => "Other",
        }
    }

    /// Normalize a channel reported by the model.
    ///
    /// Absent, blank and unrecognised channels all map to the default
    /// online channel.
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(raw))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for OrderChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized representation of a single fee entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRecord {
    pub broker: String,
    pub instrument_type: InstrumentType,
    #[serde(default)]
    pub order_channel: OrderChannel,
    pub base_fee: Option<f64>,
    pub variable_fee: Option<String>,
    pub currency: String,
    pub source: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl FeeRecord {
    /// Key identifying "the same fee fact" across chunks.
    #[must_use]
    pub fn dedupe_key(&self) -> DedupeKey {
        DedupeKey {
            broker: self.broker.clone(),
            instrument_type: self.instrument_type,
            order_channel: self.order_channel,
            // -0.0 and 0.0 must land in the same group
            base_fee_bits: self.base_fee.map(|f| (f + 0.0).to_bits()),
            variable_fee: self.variable_fee.clone(),
        }
    }

    /// Number of populated optional fields.
    #[must_use]
    pub fn completeness(&self) -> usize {
        [
            self.base_fee.is_some(),
            self.variable_fee.is_some(),
            self.notes.is_some(),
            !self.source.is_empty(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

/// Deduplication key: `(broker, instrument_type, order_channel, base_fee, variable_fee)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub broker: String,
    pub instrument_type: InstrumentType,
    pub order_channel: OrderChannel,
    base_fee_bits: Option<u64>,
    pub variable_fee: Option<String>,
}

impl DedupeKey {
    #[must_use]
    pub fn base_fee(&self) -> Option<f64> {
        self.base_fee_bits.map(f64::from_bits)
    }
}

/// Token usage tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FeeRecord {
        FeeRecord {
            broker: "Bolero".into(),
            instrument_type: InstrumentType::Etfs,
            order_channel: OrderChannel::OnlinePlatform,
            base_fee: Some(15.0),
            variable_fee: None,
            currency: "EUR".into(),
            source: "https://www.bolero.be/tarieven".into(),
            notes: None,
        }
    }

    #[test]
    fn test_instrument_type_labels() {
        assert_eq!(InstrumentType::from_label("ETFs"), Some(InstrumentType::Etfs));
        assert_eq!(InstrumentType::from_label(" equities "), Some(InstrumentType::Equities));
        assert_eq!(InstrumentType::from_label("Crypto"), None);
        assert_eq!(InstrumentType::from_label("Futures"), None);
    }

    #[test]
    fn test_instrument_type_serializes_canonical_label() {
        let json = serde_json::to_string(&InstrumentType::Etfs).expect("serialize");
        assert_eq!(json, "\"ETFs\"");
    }

    #[test]
    fn test_order_channel_normalize() {
        assert_eq!(OrderChannel::normalize(None), OrderChannel::OnlinePlatform);
        assert_eq!(OrderChannel::normalize(Some("  ")), OrderChannel::OnlinePlatform);
        assert_eq!(OrderChannel::normalize(Some("phone")), OrderChannel::Phone);
        assert_eq!(OrderChannel::normalize(Some("Mobile app")), OrderChannel::OnlinePlatform);
    }

    #[test]
    fn test_record_json_shape() {
        let value = serde_json::to_value(record()).expect("serialize");
        assert_eq!(value["instrument_type"], "ETFs");
        assert_eq!(value["order_channel"], "Online Platform");
        assert_eq!(value["base_fee"], 15.0);
        assert!(value["variable_fee"].is_null());
    }

    #[test]
    fn test_dedupe_key_treats_signed_zero_as_equal() {
        let mut a = record();
        a.base_fee = Some(0.0);
        let mut b = record();
        b.base_fee = Some(-0.0);
        assert_eq!(a.dedupe_key(), b.dedupe_key());
        assert_eq!(a.dedupe_key().base_fee(), Some(0.0));
    }

    #[test]
    fn test_completeness_counts_optional_fields() {
        let mut r = record();
        assert_eq!(r.completeness(), 2);
        r.notes = Some("evidence: ETF trades: flat EUR 15".into());
        assert_eq!(r.completeness(), 3);
        r.source.clear();
        assert_eq!(r.completeness(), 2);
    }
}
