//! Domain types shared across the pipeline and the stores.
//!
//! A *receipt type* is a user-defined schema: a named, ordered list of typed
//! fields the extractor should look for on one category of document (petrol
//! receipt, restaurant bill, business card, …). A *receipt* is one persisted
//! extraction result: the stored image name, the chosen type, the employee
//! the batch was attributed to, and the extracted field mapping serialised
//! as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One named, optionally-required datum within a [`ReceiptType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, non-empty and unique within its receipt type.
    pub name: String,
    /// Human-readable hint shown to the model ("total amount incl. VAT").
    pub description: Option<String>,
    /// Required fields that the model cannot find are still accepted, but
    /// recorded as empty values and surfaced per file (lenient policy).
    pub is_required: bool,
}

/// A user-defined schema for one category of receipt.
///
/// The id is stable once created; the field order is the creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptType {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<FieldDef>,
}

/// An employee receipts can be attributed to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One raw uploaded image. Ephemeral — exists only for the duration of the
/// pipeline invocation that received it.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// The client-side file name ("lunch.jpg"). Sanitised before storage.
    pub original_name: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    pub fn new(original_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            original_name: original_name.into(),
            bytes,
        }
    }
}

/// The extractor's best-effort structured output for one image, before
/// validation against the chosen receipt type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// The receipt type the model chose; guaranteed by the response parser
    /// to be one of the candidates supplied for the batch.
    pub receipt_type_id: i64,
    /// Flat field-name → value mapping. Only fields the model found evidence
    /// for; may contain keys the schema does not declare.
    pub field_values: serde_json::Map<String, serde_json::Value>,
}

/// A persisted receipt, exactly as stored. Created once per successfully
/// processed file; never updated by the pipeline afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Receipt {
    pub id: i64,
    /// Stored image file name, timestamp-prefixed (see [`crate::storage`]).
    pub image_path: String,
    pub receipt_type_id: i64,
    pub employee_id: Option<i64>,
    /// The field mapping serialised as JSON. Kept as the raw string so it
    /// round-trips byte-exactly; use [`Receipt::field_values`] to decode.
    pub data: String,
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    /// Decode the persisted field mapping.
    pub fn field_values(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// A receipt joined with the names of its employee and receipt type, as
/// listed and exported.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReceiptDetails {
    pub id: i64,
    pub image_path: String,
    pub receipt_type_id: i64,
    pub employee_id: Option<i64>,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub employee_name: Option<String>,
    pub receipt_type_name: Option<String>,
}

impl ReceiptDetails {
    /// Decode the persisted field mapping.
    pub fn field_values(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// The insert-side of [`Receipt`]: everything but the row id, with the field
/// mapping still structured.
#[derive(Debug, Clone)]
pub struct NewReceipt {
    pub image_path: String,
    pub receipt_type_id: i64,
    pub employee_id: i64,
    pub field_values: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
