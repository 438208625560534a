//! Error types for the img2rec library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`] — **Fatal**: the batch cannot proceed at all (no
//!   candidate receipt types, unknown employee, provider not configured,
//!   store transaction failure). Returned as `Err(IngestError)` from the
//!   top-level `ingest*` functions.
//!
//! * [`FileError`] — **Non-fatal**: a single image failed (nothing readable
//!   on it, transient API error, unparsable model response) but its siblings
//!   in the batch are fine. Stored inside [`crate::output::FileResult`] so
//!   callers can inspect partial success rather than losing the whole batch
//!   to one bad photo.
//!
//! The adapter boundaries have their own small enums ([`OcrError`],
//! [`ExtractError`]) so each adapter contract is testable without the
//! pipeline; the pipeline maps them into [`FileError`] values tagged with the
//! file name. [`StoreError`] covers everything behind the store traits.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the img2rec library.
///
/// Per-file failures use [`FileError`] and are stored in
/// [`crate::output::FileResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Batch preconditions ───────────────────────────────────────────────
    /// The batch contained no files at all.
    #[error("batch contains no files")]
    EmptyBatch,

    /// The candidate receipt-type set is empty at batch start — either no
    /// types exist or every requested id was unknown. Checked before any
    /// file work happens.
    #[error("no receipt types available for extraction\nCreate one with: img2rec types add")]
    NoReceiptTypes,

    /// The employee the batch is attributed to does not exist.
    #[error("employee {employee_id} not found")]
    UnknownEmployee { employee_id: i64 },

    // ── Storage of the original images ────────────────────────────────────
    /// Could not write an uploaded image into the upload directory.
    #[error("failed to store uploaded image under '{path}': {source}")]
    ImageStoreFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── External-service configuration ────────────────────────────────────
    /// The OCR or LLM service is not configured (missing API key etc.).
    #[error("service '{service}' is not configured.\n{hint}")]
    ServiceNotConfigured { service: String, hint: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// A store lookup (employee, receipt types) failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The batch-wide insert transaction failed; every pending insert of
    /// this batch was rolled back.
    #[error("failed to persist batch, all records rolled back: {source}")]
    Persistence {
        #[source]
        source: StoreError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single uploaded image.
///
/// Stored alongside [`crate::output::FileResult`] when a file fails.
/// The batch continues with the remaining files.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// The bytes are empty or not a recognised image format.
    #[error("'{file}': not a supported image")]
    UnsupportedImage { file: String },

    /// The OCR service found no text region in the image.
    #[error("'{file}': no text detected in image")]
    NoTextDetected { file: String },

    /// The OCR call failed (transport, auth, service error).
    #[error("'{file}': text detection failed after {retries} retries: {detail}")]
    OcrFailed {
        file: String,
        retries: u8,
        detail: String,
    },

    /// The language-model call failed (transport, auth, service error).
    #[error("'{file}': extraction call failed after {retries} retries: {detail}")]
    ExtractionFailed {
        file: String,
        retries: u8,
        detail: String,
    },

    /// The model response carried no parsable JSON object or no usable
    /// receipt-type id.
    #[error("'{file}': malformed extraction response: {detail}")]
    MalformedExtraction { file: String, detail: String },

    /// The model chose a receipt type that was not among the candidates
    /// supplied for this batch.
    #[error("'{file}': extractor chose unknown receipt type {receipt_type_id}")]
    UnknownReceiptType { file: String, receipt_type_id: i64 },

    /// An external call exceeded the configured timeout.
    #[error("'{file}': external call timed out after {secs}s")]
    Timeout { file: String, secs: u64 },
}

/// Errors at the OCR adapter contract: `extract_text(bytes) -> text`.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The service answered but found no text region.
    #[error("no text detected")]
    NoTextDetected,

    /// Transport, auth, or service-side failure.
    #[error("text detection service unavailable: {0}")]
    Upstream(String),
}

/// Errors at the extractor contract: `extract(text, candidates) -> record`.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Transport, auth, or service-side failure of the model call.
    #[error("extraction service unavailable: {0}")]
    Upstream(String),

    /// The response text carried no parsable JSON object, or the object
    /// lacked a usable receipt-type id.
    #[error("malformed extraction response: {0}")]
    Malformed(String),

    /// The returned receipt-type id is not in the candidate set.
    #[error("receipt type {0} is not among the candidates")]
    UnknownReceiptType(i64),
}

/// Errors while writing a spreadsheet-importable export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// CSV writing failed.
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    /// A receipt's stored field payload is not valid JSON.
    #[error("receipt {id} carries corrupt field data: {source}")]
    Corrupt {
        id: i64,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors behind the [`crate::store::SchemaStore`] / [`crate::store::RecordStore`] traits.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database query or transaction failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted field payload is not valid JSON.
    #[error("stored field payload is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The operation's input violates a schema-management invariant
    /// (empty name, duplicate field, unknown id).
    #[error("{0}")]
    Invalid(String),
}
