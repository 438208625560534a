//! # img2rec
//!
//! Digitise receipt and business-card images into structured records using
//! OCR and LLM extraction.
//!
//! ## Why this crate?
//!
//! Template-based receipt parsers break the moment a vendor changes its
//! layout, and hand-keying batches of expense receipts does not scale.
//! Instead this crate sends each image to a text-detection service, hands
//! the raw transcription to a language model together with the user-defined
//! receipt-type schemas, and persists the structured result — so adding a
//! new document category is a schema edit, not a code change.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images
//!  │
//!  ├─ 1. Preconditions  employee exists, candidate type set non-empty
//!  ├─ 2. Store          originals kept under timestamp-prefixed names
//!  ├─ 3. Detect         Vision text-detection per image (sequential)
//!  ├─ 4. Extract        schema-guided LLM call, temperature 0
//!  ├─ 5. Parse          brace-delimited JSON recovery + schema-id check
//!  ├─ 6. Validate       lenient normalisation against the chosen schema
//!  └─ 7. Persist        one SQLite transaction per batch, all-or-nothing
//! ```
//!
//! A failing file never takes its siblings down: steps 3–6 are isolated per
//! file and every file yields a [`FileResult`], error included. Only the
//! final transaction is batch-wide.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use img2rec::{ingest, BatchRequest, IngestConfig, UploadedImage};
//! use img2rec::store::{self, SqliteRecordStore, SqliteSchemaStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = store::open("receipts.sqlite").await?;
//!     let schemas = SqliteSchemaStore::new(pool.clone());
//!     let records = SqliteRecordStore::new(pool);
//!
//!     // Keys auto-detected from GOOGLE_VISION_API_KEY / OPENAI_API_KEY / …
//!     let config = IngestConfig::default();
//!     let request = BatchRequest {
//!         employee_id: 1,
//!         receipt_type_ids: None, // every active receipt type
//!         files: vec![UploadedImage::new("lunch.jpg", std::fs::read("lunch.jpg")?)],
//!     };
//!
//!     let output = ingest(request, &schemas, &records, &config).await?;
//!     println!("{}/{} persisted", output.stats.persisted, output.stats.total_files);
//!     for failure in output.failures() {
//!         eprintln!("{}", failure.error.as_ref().unwrap());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2rec` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! img2rec = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod storage;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder};
pub use error::{ExportError, ExtractError, FileError, IngestError, OcrError, StoreError};
pub use ingest::{ingest, ingest_batch, BatchRequest};
pub use model::{
    CandidateRecord, Employee, FieldDef, NewReceipt, Receipt, ReceiptDetails, ReceiptType,
    UploadedImage,
};
pub use output::{BatchOutput, BatchStats, FileResult};
pub use pipeline::detect::{GoogleVisionOcr, TextDetector};
pub use pipeline::extract::{LlmExtractor, SchemaExtractor};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
