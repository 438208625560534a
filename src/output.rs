//! Result types returned by a batch ingestion.
//!
//! A batch never hides what happened to individual files: every file yields
//! a [`FileResult`], whether it was persisted or failed along the way, and
//! [`BatchStats`] aggregates the counts. The whole structure serialises to
//! JSON for machine consumers (`img2rec ingest --json`).

use crate::error::FileError;
use serde::{Deserialize, Serialize};

/// The outcome of one uploaded image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    /// The client-side file name the batch supplied.
    pub original_name: String,

    /// The timestamp-prefixed name the original image was stored under.
    /// Set even when processing failed afterwards — the image is kept for
    /// inspection and re-submission.
    pub stored_name: String,

    /// Row id of the persisted receipt. `None` when the file failed.
    pub receipt_id: Option<i64>,

    /// The receipt type the extractor chose. `None` when the file failed
    /// before structuring.
    pub receipt_type_id: Option<i64>,

    /// Names of fields flagged required on the chosen type that the model
    /// found no evidence for. Such fields are persisted as empty values, not
    /// rejected; this list is how callers see that it happened.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_required: Vec<String>,

    /// Wall-clock time spent on this file, external calls included.
    pub duration_ms: u64,

    /// Retries performed across this file's OCR and extraction calls.
    pub retries: u8,

    /// The failure, if the file did not reach the record store.
    pub error: Option<FileError>,
}

impl FileResult {
    /// True once the record was committed to the store.
    pub fn is_persisted(&self) -> bool {
        self.receipt_id.is_some()
    }
}

/// Aggregate counts and timings for one batch invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStats {
    /// Files in the batch.
    pub total_files: usize,
    /// Files whose receipt was committed.
    pub persisted: usize,
    /// Files that failed at any stage.
    pub failed: usize,
    /// Milliseconds spent inside OCR calls, summed over files.
    pub ocr_duration_ms: u64,
    /// Milliseconds spent inside extraction calls, summed over files.
    pub extract_duration_ms: u64,
    /// Total wall-clock milliseconds for the invocation.
    pub total_duration_ms: u64,
}

/// Everything a batch invocation produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    /// One entry per uploaded file, in batch order.
    pub results: Vec<FileResult>,
    /// Aggregate counts and timings.
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Results that were committed to the record store.
    pub fn persisted(&self) -> impl Iterator<Item = &FileResult> {
        self.results.iter().filter(|r| r.is_persisted())
    }

    /// Results that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = &FileResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}
