//! Normalization of extracted field mappings against the chosen schema.
//!
//! The schema is advisory, not strict:
//!
//! * Required fields the model found nothing for are recorded as empty
//!   string values and listed in [`NormalizedRecord::missing_required`] —
//!   partial data is accepted, never rejected.
//! * Fields the schema does not declare are preserved as-is.

use crate::model::{CandidateRecord, ReceiptType};
use serde_json::Value;
use tracing::warn;

/// A field mapping ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// Final field mapping: declared fields (empty where required-but-absent)
    /// plus any undeclared extras the model emitted.
    pub field_values: serde_json::Map<String, Value>,
    /// Required field names that had to be filled with empty values.
    pub missing_required: Vec<String>,
}

/// Normalise a candidate record against its chosen receipt type.
///
/// `schema` must be the type named by `record.receipt_type_id`; the response
/// parser guarantees the id is a member of the candidate set.
pub fn normalize_fields(record: &CandidateRecord, schema: &ReceiptType) -> NormalizedRecord {
    let mut field_values = record.field_values.clone();
    let mut missing_required = Vec::new();

    for field in &schema.fields {
        let present = field_values
            .get(&field.name)
            .map(|v| !value_is_blank(v))
            .unwrap_or(false);

        if field.is_required && !present {
            field_values.insert(field.name.clone(), Value::String(String::new()));
            missing_required.push(field.name.clone());
        }
    }

    if !missing_required.is_empty() {
        warn!(
            "type '{}': required fields without evidence, stored empty: {}",
            schema.name,
            missing_required.join(", ")
        );
    }

    NormalizedRecord {
        field_values,
        missing_required,
    }
}

/// A null or whitespace-only value counts as "not found".
fn value_is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDef;
    use serde_json::json;

    fn schema() -> ReceiptType {
        ReceiptType {
            id: 1,
            name: "Fuel".into(),
            description: None,
            fields: vec![
                FieldDef {
                    name: "total".into(),
                    description: None,
                    is_required: true,
                },
                FieldDef {
                    name: "vendor".into(),
                    description: None,
                    is_required: true,
                },
                FieldDef {
                    name: "litres".into(),
                    description: None,
                    is_required: false,
                },
            ],
        }
    }

    fn record(entries: &[(&str, Value)]) -> CandidateRecord {
        CandidateRecord {
            receipt_type_id: 1,
            field_values: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn missing_required_field_becomes_empty_value() {
        let normalized = normalize_fields(&record(&[("total", json!("42.00"))]), &schema());

        assert_eq!(normalized.field_values["total"], json!("42.00"));
        assert_eq!(normalized.field_values["vendor"], json!(""));
        assert_eq!(normalized.missing_required, vec!["vendor".to_string()]);
        // Optional fields are not padded in.
        assert!(!normalized.field_values.contains_key("litres"));
    }

    #[test]
    fn null_and_blank_values_count_as_missing() {
        let normalized = normalize_fields(
            &record(&[("total", json!(null)), ("vendor", json!("  "))]),
            &schema(),
        );
        assert_eq!(
            normalized.missing_required,
            vec!["total".to_string(), "vendor".to_string()]
        );
        assert_eq!(normalized.field_values["total"], json!(""));
    }

    #[test]
    fn undeclared_extra_fields_are_preserved() {
        let normalized = normalize_fields(
            &record(&[
                ("total", json!("42.00")),
                ("vendor", json!("Shell")),
                ("pump_number", json!("4")),
            ]),
            &schema(),
        );
        assert_eq!(normalized.field_values["pump_number"], json!("4"));
        assert!(normalized.missing_required.is_empty());
    }

    #[test]
    fn complete_record_passes_through_unchanged() {
        let input = record(&[
            ("total", json!("42.00")),
            ("vendor", json!("Shell")),
            ("litres", json!("31.2")),
        ]);
        let normalized = normalize_fields(&input, &schema());
        assert_eq!(normalized.field_values, input.field_values);
        assert!(normalized.missing_required.is_empty());
    }
}
