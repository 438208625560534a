//! Response parsing: raw model output → [`CandidateRecord`].
//!
//! Models are instructed to answer with nothing but one JSON object, yet
//! still occasionally wrap it in prose ("Sure! Here is the JSON: … Hope
//! that helps!"). Recovery is deliberate: the substring from the first `{`
//! to the last `}` is parsed and everything around it is ignored. This is a
//! pure function with no network access, so every quirk of real model
//! output can be pinned down in unit tests.

use crate::error::ExtractError;
use crate::model::{CandidateRecord, ReceiptType};
use serde_json::Value;

/// Key the model uses to name its chosen receipt type.
const TYPE_ID_KEY: &str = "receipt_type_id";

/// Parse a raw model response against the candidate set.
///
/// Accepts both the flat shape `{"receipt_type_id": 1, "total": "42.00"}`
/// and the wrapped shape `{"fields": {"receipt_type_id": 1, …}}`; the id may
/// be a JSON number or a numeric string. The id key itself is removed from
/// the returned field mapping — it names the schema, it is not a datum.
///
/// Fails with [`ExtractError::Malformed`] when no JSON object can be
/// recovered or no usable id is present, and with
/// [`ExtractError::UnknownReceiptType`] when the id is not among
/// `candidates`.
pub fn parse_extraction(
    raw: &str,
    candidates: &[ReceiptType],
) -> Result<CandidateRecord, ExtractError> {
    let json = extract_json_object(raw)?;

    let Value::Object(mut top) = json else {
        return Err(ExtractError::Malformed(
            "response is not a JSON object".into(),
        ));
    };

    // Unwrap the {"fields": {…}} shape if present.
    let mut fields = match top.remove("fields") {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            // "fields" was a datum, not a wrapper; put it back.
            top.insert("fields".to_string(), other);
            top
        }
        None => top,
    };

    let receipt_type_id = fields
        .remove(TYPE_ID_KEY)
        .as_ref()
        .and_then(value_as_id)
        .ok_or_else(|| {
            ExtractError::Malformed(format!("missing or non-numeric '{TYPE_ID_KEY}'"))
        })?;

    if !candidates.iter().any(|c| c.id == receipt_type_id) {
        return Err(ExtractError::UnknownReceiptType(receipt_type_id));
    }

    Ok(CandidateRecord {
        receipt_type_id,
        field_values: fields,
    })
}

/// Recover the brace-delimited JSON substring from a possibly-wrapped
/// response and parse it.
fn extract_json_object(raw: &str) -> Result<Value, ExtractError> {
    let start = raw
        .find('{')
        .ok_or_else(|| ExtractError::Malformed("no JSON object in response".into()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| ExtractError::Malformed("no JSON object in response".into()))?;
    if end < start {
        return Err(ExtractError::Malformed("no JSON object in response".into()));
    }

    serde_json::from_str(&raw[start..=end])
        .map_err(|e| ExtractError::Malformed(format!("invalid JSON: {e}")))
}

fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
