//! Spreadsheet-importable export of persisted receipts.
//!
//! Receipts of different types carry different field sets, so the column
//! layout is computed per export: fixed base columns first, then the union
//! of every data field key that occurs across the exported receipts, in
//! sorted order. Receipts that lack a key get an empty cell. Cell styling
//! is out of scope — CSV is the export format.

use crate::error::ExportError;
use crate::model::ReceiptDetails;
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::Write;

const BASE_HEADERS: [&str; 5] = ["ID", "Employee", "Receipt Type", "Image", "Date"];

/// Write `receipts` as CSV.
pub fn export_receipts_csv<W: Write>(
    receipts: &[ReceiptDetails],
    writer: W,
) -> Result<(), ExportError> {
    // Decode every payload up front: the field-key union decides the header
    // row, and a corrupt payload should fail before anything is written.
    let mut decoded = Vec::with_capacity(receipts.len());
    let mut field_keys: BTreeSet<String> = BTreeSet::new();
    for receipt in receipts {
        let values = receipt
            .field_values()
            .map_err(|source| ExportError::Corrupt {
                id: receipt.id,
                source,
            })?;
        field_keys.extend(values.keys().cloned());
        decoded.push((receipt, values));
    }

    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut headers: Vec<String> = BASE_HEADERS.iter().map(|h| h.to_string()).collect();
    headers.extend(field_keys.iter().map(|key| capitalize(key)));
    csv_writer.write_record(&headers)?;

    for (receipt, values) in decoded {
        let mut row: Vec<String> = vec![
            receipt.id.to_string(),
            receipt.employee_name.clone().unwrap_or_default(),
            receipt
                .receipt_type_name
                .clone()
                .unwrap_or_else(|| receipt.receipt_type_id.to_string()),
            receipt.image_path.clone(),
            receipt.created_at.to_rfc3339(),
        ];
        for key in &field_keys {
            row.push(values.get(key).map(render_value).unwrap_or_default());
        }
        csv_writer.write_record(&row)?;
    }

    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Render a field value for one cell. Strings go in bare; anything else is
/// serialised JSON.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
