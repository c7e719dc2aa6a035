//! Merging of records reported by several chunks.

use std::collections::HashMap;

use crate::types::{FeeRecord, InstrumentType, OrderChannel};
use crate::validator::ValidationIssue;

/// Collapse records with the same [`crate::types::DedupeKey`].
///
/// Within a group the most complete record wins; ties go to the first one
/// seen. Groups keep the order in which they first appear.
#[must_use]
pub fn dedupe(records: Vec<FeeRecord>) -> Vec<FeeRecord> {
    let mut slots: HashMap<_, usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<FeeRecord> = Vec::with_capacity(records.len());

    for record in records {
        match slots.get(&record.dedupe_key()) {
            Some(&slot) => {
                if record.completeness() > kept[slot].completeness() {
                    kept[slot] = record;
                }
            }
            None => {
                slots.insert(record.dedupe_key(), kept.len());
                kept.push(record);
            }
        }
    }

    kept
}

/// Report records that disagree about the same fee.
///
/// Records sharing broker, instrument type and order channel conflict when
/// they carry different non-null base fees or variable fees, or different
/// currencies. Nothing is removed; each conflicting record after the first
/// of its group yields one issue, indexed by its position in `records`.
#[must_use]
pub fn find_conflicts(records: &[FeeRecord]) -> Vec<ValidationIssue> {
    let mut first_seen: HashMap<(&str, InstrumentType, OrderChannel), usize> = HashMap::new();
    let mut issues = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let group = (
            record.broker.as_str(),
            record.instrument_type,
            record.order_channel,
        );
        let Some(&first) = first_seen.get(&group) else {
            first_seen.insert(group, index);
            continue;
        };

        if let Some(reason) = conflict_reason(&records[first], record) {
            issues.push(ValidationIssue {
                broker: record.broker.clone(),
                index,
                reason,
            });
        }
    }

    issues
}

fn conflict_reason(first: &FeeRecord, other: &FeeRecord) -> Option<String> {
    let subject = format!("{} via {}", other.instrument_type, other.order_channel);

    if let (Some(a), Some(b)) = (first.base_fee, other.base_fee) {
        if a != b {
            return Some(format!("conflicting base_fee for {subject}: {a} vs {b}"));
        }
    }
    if let (Some(a), Some(b)) = (&first.variable_fee, &other.variable_fee) {
        if a != b {
            return Some(format!("conflicting variable_fee for {subject}: '{a}' vs '{b}'"));
        }
    }
    if first.currency != other.currency {
        return Some(format!(
            "conflicting currency for {subject}: {} vs {}",
            first.currency, other.currency
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(instrument_type: InstrumentType, base_fee: Option<f64>) -> FeeRecord {
        FeeRecord {
            broker: "Bolero".into(),
            instrument_type,
            order_channel: OrderChannel::OnlinePlatform,
            base_fee,
            variable_fee: None,
            currency: "EUR".into(),
            source: "https://www.bolero.be/tarieven".into(),
            notes: None,
        }
    }

    #[test]
    fn test_keeps_most_complete_record() {
        let plain = record(InstrumentType::Etfs, Some(15.0));
        let mut annotated = plain.clone();
        annotated.notes = Some("evidence".into());

        let out = dedupe(vec![plain, annotated.clone()]);
        assert_eq!(out, vec![annotated]);
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let mut first = record(InstrumentType::Etfs, Some(15.0));
        first.notes = Some("chunk 1".into());
        let mut second = first.clone();
        second.notes = Some("chunk 2".into());

        let out = dedupe(vec![first.clone(), second]);
        assert_eq!(out, vec![first]);
    }

    #[test]
    fn test_preserves_first_seen_order() {
        let a = record(InstrumentType::Bonds, Some(5.0));
        let b = record(InstrumentType::Equities, Some(7.5));
        let c = record(InstrumentType::Bonds, Some(5.0));
        let out = dedupe(vec![a.clone(), b.clone(), c]);
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let mut noted = record(InstrumentType::Etfs, Some(15.0));
        noted.notes = Some("evidence".into());
        let input = vec![
            record(InstrumentType::Etfs, Some(15.0)),
            record(InstrumentType::Equities, None),
            noted,
            record(InstrumentType::Etfs, Some(-0.0)),
            record(InstrumentType::Etfs, Some(0.0)),
        ];
        let once = dedupe(input);
        let twice = dedupe(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_find_conflicts() {
        let mut usd = record(InstrumentType::Etfs, Some(15.0));
        usd.currency = "USD".into();
        let records = vec![
            record(InstrumentType::Etfs, Some(15.0)),
            record(InstrumentType::Etfs, Some(10.0)),
            record(InstrumentType::Etfs, None),
            usd,
            record(InstrumentType::Equities, Some(10.0)),
        ];

        let issues = find_conflicts(&records);
        let indices: Vec<_> = issues.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(issues[0].reason.contains("base_fee"));
        assert!(issues[1].reason.contains("currency"));
    }

    #[test]
    fn test_no_conflicts_for_distinct_channels() {
        let mut phone = record(InstrumentType::Etfs, Some(30.0));
        phone.order_channel = OrderChannel::Phone;
        let records = vec![record(InstrumentType::Etfs, Some(15.0)), phone];
        assert!(find_conflicts(&records).is_empty());
    }
}
