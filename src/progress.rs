//! Progress-callback trait for per-file ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline works through a batch. Callers can
//! forward the events to a terminal progress bar, a WebSocket, or a log
//! sink without the library knowing how the host application communicates.

use std::sync::Arc;

/// Called by the ingestion pipeline as it processes each file of a batch.
///
/// Files are processed strictly sequentially, so events for one batch arrive
/// in order; the trait is still `Send + Sync` because separate batches may
/// run on separate tasks. All methods have default no-op implementations so
/// callers only override what they care about.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once after the batch preconditions passed, before any file is
    /// processed.
    ///
    /// # Arguments
    /// * `total_files` — number of files in the batch
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called just before a file's OCR request is sent.
    ///
    /// # Arguments
    /// * `file_num` — 1-indexed position within the batch
    /// * `total_files` — files in the batch
    /// * `name` — the original file name
    fn on_file_start(&self, file_num: usize, total_files: usize, name: &str) {
        let _ = (file_num, total_files, name);
    }

    /// Called when a file reached the validated state and is queued for the
    /// batch commit.
    ///
    /// # Arguments
    /// * `field_count` — number of extracted field values
    fn on_file_complete(&self, file_num: usize, total_files: usize, field_count: usize) {
        let _ = (file_num, total_files, field_count);
    }

    /// Called when a file fails after all retries are exhausted. The batch
    /// continues with the next file.
    fn on_file_error(&self, file_num: usize, total_files: usize, error: String) {
        let _ = (file_num, total_files, error);
    }

    /// Called once after persistence, with the count of files that made it
    /// into the record store.
    fn on_batch_complete(&self, total_files: usize, persisted_count: usize) {
        let _ = (total_files, persisted_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
