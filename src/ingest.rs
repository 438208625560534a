//! Batch ingestion entry points.
//!
//! ## Shape of a batch
//!
//! One invocation covers one upload: a set of images processed under one
//! employee / candidate-schema context. Files move through
//! `received → text extracted → structured → validated → persisted`
//! strictly one at a time — the OCR and LLM services are rate-limited, so a
//! single logical worker per batch bounds the concurrent load and keeps the
//! batch transaction simple.
//!
//! ## Failure isolation
//!
//! A file that fails OCR, extraction, or validation yields a
//! [`FileResult`] carrying a [`FileError`]; its siblings continue
//! unaffected. Batch-level failures are different: precondition violations
//! (no files, unknown employee, empty candidate set) abort before any file
//! work, and a store failure during the final transaction rolls back every
//! pending insert of the batch.
//!
//! [`ingest`] wires up the production adapters from the config;
//! [`ingest_batch`] is the same orchestration with the adapters and stores
//! passed in, which is what tests use to substitute doubles.

use crate::config::IngestConfig;
use crate::error::{ExtractError, FileError, IngestError, OcrError};
use crate::model::{CandidateRecord, NewReceipt, ReceiptType, UploadedImage};
use crate::output::{BatchOutput, BatchStats, FileResult};
use crate::pipeline::detect::{GoogleVisionOcr, TextDetector};
use crate::pipeline::extract::{LlmExtractor, SchemaExtractor};
use crate::pipeline::validate::normalize_fields;
use crate::storage;
use crate::store::{RecordStore, SchemaStore};
use chrono::Utc;
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Default model when a provider is named without a model.
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One upload invocation.
#[derive(Debug)]
pub struct BatchRequest {
    /// Employee the receipts are attributed to. Must exist.
    pub employee_id: i64,
    /// Receipt types eligible for this batch. `None` means every type in
    /// the schema store; unknown ids are silently dropped.
    pub receipt_type_ids: Option<Vec<i64>>,
    /// The uploaded images.
    pub files: Vec<UploadedImage>,
}

/// Ingest a batch using the production adapters (Vision OCR + LLM provider)
/// resolved from `config`.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(BatchOutput)` on success, even if some files failed
/// (check `output.stats.failed` and the per-file errors).
///
/// # Errors
/// Returns `Err(IngestError)` only for batch-level failures:
/// - empty batch, unknown employee, empty candidate type set
/// - OCR/LLM service not configured
/// - image storage failure
/// - store failure while committing (all pending inserts rolled back)
pub async fn ingest(
    request: BatchRequest,
    schemas: &dyn SchemaStore,
    records: &dyn RecordStore,
    config: &IngestConfig,
) -> Result<BatchOutput, IngestError> {
    let ocr = resolve_text_detector(config)?;
    let extractor = resolve_extractor(config)?;
    ingest_batch(request, &ocr, &extractor, schemas, records, config).await
}

/// Ingest a batch with explicit adapters and stores.
pub async fn ingest_batch(
    request: BatchRequest,
    ocr: &dyn TextDetector,
    extractor: &dyn SchemaExtractor,
    schemas: &dyn SchemaStore,
    records: &dyn RecordStore,
    config: &IngestConfig,
) -> Result<BatchOutput, IngestError> {
    let total_start = Instant::now();
    info!("starting ingestion of {} files", request.files.len());

    // ── Step 1: Batch preconditions ──────────────────────────────────────
    // All checked before any OCR/LLM call or store write happens.
    if request.files.is_empty() {
        return Err(IngestError::EmptyBatch);
    }

    let employee = records
        .get_employee(request.employee_id)
        .await?
        .ok_or(IngestError::UnknownEmployee {
            employee_id: request.employee_id,
        })?;

    let candidates = schemas
        .list_receipt_types(request.receipt_type_ids.as_deref())
        .await?;
    if candidates.is_empty() {
        return Err(IngestError::NoReceiptTypes);
    }
    debug!(
        "batch for employee '{}' with {} candidate types",
        employee.name,
        candidates.len()
    );

    // ── Step 2: Store the original images ────────────────────────────────
    // Originals are kept whether or not processing succeeds, under the
    // timestamp-prefixed names the rest of the system resolves them by.
    let mut stored_names = Vec::with_capacity(request.files.len());
    for file in &request.files {
        let stored = storage::store_upload(&config.upload_dir, &file.original_name, &file.bytes)
            .await
            .map_err(|source| IngestError::ImageStoreFailed {
                path: config.upload_dir.join(&file.original_name),
                source,
            })?;
        stored_names.push(stored);
    }

    let total_files = request.files.len();
    if let Some(cb) = &config.progress_callback {
        cb.on_batch_start(total_files);
    }

    // ── Step 3: Sequential per-file fold ─────────────────────────────────
    let mut results: Vec<FileResult> = Vec::with_capacity(total_files);
    let mut pending: Vec<(usize, NewReceipt)> = Vec::new();
    let mut ocr_ms = 0u64;
    let mut extract_ms = 0u64;

    for (i, file) in request.files.iter().enumerate() {
        let file_num = i + 1;
        if let Some(cb) = &config.progress_callback {
            cb.on_file_start(file_num, total_files, &file.original_name);
        }

        let file_start = Instant::now();
        let attempt = process_file(file, &candidates, ocr, extractor, config).await;
        ocr_ms += attempt.ocr_ms;
        extract_ms += attempt.extract_ms;
        let duration_ms = file_start.elapsed().as_millis() as u64;

        match attempt.result {
            Ok(validated) => {
                info!(
                    "'{}': structured as type {} with {} fields",
                    file.original_name,
                    validated.receipt_type_id,
                    validated.field_values.len()
                );
                if let Some(cb) = &config.progress_callback {
                    cb.on_file_complete(file_num, total_files, validated.field_values.len());
                }

                pending.push((
                    results.len(),
                    NewReceipt {
                        image_path: stored_names[i].clone(),
                        receipt_type_id: validated.receipt_type_id,
                        employee_id: employee.id,
                        field_values: validated.field_values,
                        created_at: Utc::now(),
                    },
                ));
                results.push(FileResult {
                    original_name: file.original_name.clone(),
                    stored_name: stored_names[i].clone(),
                    receipt_id: None, // filled in after the batch commit
                    receipt_type_id: Some(validated.receipt_type_id),
                    missing_required: validated.missing_required,
                    duration_ms,
                    retries: attempt.retries,
                    error: None,
                });
            }
            Err(error) => {
                warn!("{error}");
                if let Some(cb) = &config.progress_callback {
                    cb.on_file_error(file_num, total_files, error.to_string());
                }
                results.push(FileResult {
                    original_name: file.original_name.clone(),
                    stored_name: stored_names[i].clone(),
                    receipt_id: None,
                    receipt_type_id: None,
                    missing_required: Vec::new(),
                    duration_ms,
                    retries: attempt.retries,
                    error: Some(error),
                });
            }
        }
    }

    // ── Step 4: Persist the batch in one transaction ─────────────────────
    if !pending.is_empty() {
        let receipts: Vec<NewReceipt> = pending.iter().map(|(_, r)| r.clone()).collect();
        let ids = records
            .insert_receipts(&receipts)
            .await
            .map_err(|source| IngestError::Persistence { source })?;
        for ((index, _), id) in pending.iter().zip(ids) {
            results[*index].receipt_id = Some(id);
        }
    }

    // ── Step 5: Summarise ────────────────────────────────────────────────
    let persisted = results.iter().filter(|r| r.is_persisted()).count();
    let failed = results.iter().filter(|r| r.error.is_some()).count();

    if let Some(cb) = &config.progress_callback {
        cb.on_batch_complete(total_files, persisted);
    }

    let stats = BatchStats {
        total_files,
        persisted,
        failed,
        ocr_duration_ms: ocr_ms,
        extract_duration_ms: extract_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "batch complete: {}/{} files persisted in {}ms",
        persisted, total_files, stats.total_duration_ms
    );

    Ok(BatchOutput { results, stats })
}

// ── Per-file processing ──────────────────────────────────────────────────

/// A file's mapping after validation, ready to become a [`NewReceipt`].
struct Validated {
    receipt_type_id: i64,
    field_values: serde_json::Map<String, Value>,
    missing_required: Vec<String>,
}

struct FileAttempt {
    result: Result<Validated, FileError>,
    retries: u8,
    ocr_ms: u64,
    extract_ms: u64,
}

/// Run one file through detect → extract → parse → validate.
///
/// Never touches the store — persistence is batch-wide and happens after
/// the fold.
async fn process_file(
    file: &UploadedImage,
    candidates: &[ReceiptType],
    ocr: &dyn TextDetector,
    extractor: &dyn SchemaExtractor,
    config: &IngestConfig,
) -> FileAttempt {
    let name = &file.original_name;
    let mut attempt = FileAttempt {
        result: Err(FileError::UnsupportedImage { file: name.clone() }),
        retries: 0,
        ocr_ms: 0,
        extract_ms: 0,
    };

    // Reject bytes that carry no known image signature before spending an
    // OCR call on them.
    if file.bytes.is_empty() || image::guess_format(&file.bytes).is_err() {
        return attempt;
    }

    let text = match detect_text(file, ocr, config, &mut attempt).await {
        Ok(text) => text,
        Err(error) => {
            attempt.result = Err(error);
            return attempt;
        }
    };
    debug!("'{}': {} chars of text extracted", name, text.len());

    let record = match extract_record(&text, candidates, extractor, config, name, &mut attempt).await
    {
        Ok(record) => record,
        Err(error) => {
            attempt.result = Err(error);
            return attempt;
        }
    };

    // Membership was checked by the response parser.
    let Some(schema) = candidates.iter().find(|c| c.id == record.receipt_type_id) else {
        attempt.result = Err(FileError::UnknownReceiptType {
            file: name.clone(),
            receipt_type_id: record.receipt_type_id,
        });
        return attempt;
    };

    let normalized = normalize_fields(&record, schema);
    attempt.result = Ok(Validated {
        receipt_type_id: record.receipt_type_id,
        field_values: normalized.field_values,
        missing_required: normalized.missing_required,
    });
    attempt
}

/// OCR call with the configured timeout and bounded retry.
///
/// Only upstream-class failures (transport, 5xx, timeout) are retried;
/// "no text detected" is a property of the image and terminal immediately.
async fn detect_text(
    file: &UploadedImage,
    ocr: &dyn TextDetector,
    config: &IngestConfig,
    attempt: &mut FileAttempt,
) -> Result<String, FileError> {
    let name = &file.original_name;
    let mut failure = None;

    for round in 0..=config.max_retries {
        backoff_before_retry(round, "text detection", name, config).await;

        let start = Instant::now();
        let outcome = bounded(config.api_timeout_secs, ocr.extract_text(&file.bytes)).await;
        attempt.ocr_ms += start.elapsed().as_millis() as u64;
        attempt.retries = round as u8;

        match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => return Ok(text),
            Ok(Ok(_)) | Ok(Err(OcrError::NoTextDetected)) => {
                return Err(FileError::NoTextDetected { file: name.clone() });
            }
            Ok(Err(OcrError::Upstream(detail))) => {
                failure = Some(FileError::OcrFailed {
                    file: name.clone(),
                    retries: round as u8,
                    detail,
                });
            }
            Err(secs) => {
                failure = Some(FileError::Timeout {
                    file: name.clone(),
                    secs,
                });
            }
        }
    }

    Err(failure.unwrap_or(FileError::NoTextDetected { file: name.clone() }))
}

/// Extraction call with the configured timeout and bounded retry.
///
/// Malformed responses and unknown receipt-type ids are terminal — a
/// zero-temperature model repeats them verbatim, so retrying only burns
/// tokens.
async fn extract_record(
    text: &str,
    candidates: &[ReceiptType],
    extractor: &dyn SchemaExtractor,
    config: &IngestConfig,
    name: &str,
    attempt: &mut FileAttempt,
) -> Result<CandidateRecord, FileError> {
    let mut failure = None;

    for round in 0..=config.max_retries {
        backoff_before_retry(round, "extraction", name, config).await;

        let start = Instant::now();
        let outcome = bounded(config.api_timeout_secs, extractor.extract(text, candidates)).await;
        attempt.extract_ms += start.elapsed().as_millis() as u64;
        attempt.retries = round as u8;

        match outcome {
            Ok(Ok(record)) => return Ok(record),
            Ok(Err(ExtractError::Malformed(detail))) => {
                return Err(FileError::MalformedExtraction {
                    file: name.to_string(),
                    detail,
                });
            }
            Ok(Err(ExtractError::UnknownReceiptType(receipt_type_id))) => {
                return Err(FileError::UnknownReceiptType {
                    file: name.to_string(),
                    receipt_type_id,
                });
            }
            Ok(Err(ExtractError::Upstream(detail))) => {
                failure = Some(FileError::ExtractionFailed {
                    file: name.to_string(),
                    retries: round as u8,
                    detail,
                });
            }
            Err(secs) => {
                failure = Some(FileError::Timeout {
                    file: name.to_string(),
                    secs,
                });
            }
        }
    }

    Err(failure.unwrap_or(FileError::ExtractionFailed {
        file: name.to_string(),
        retries: config.max_retries as u8,
        detail: "unknown error".to_string(),
    }))
}

async fn backoff_before_retry(round: u32, what: &str, name: &str, config: &IngestConfig) {
    if round > 0 {
        let backoff = config.retry_backoff_ms * 2u64.pow(round - 1);
        warn!(
            "'{name}': {what} retry {round}/{} after {backoff}ms",
            config.max_retries
        );
        sleep(Duration::from_millis(backoff)).await;
    }
}

/// Apply the configured per-call timeout, if any. `Err` carries the limit
/// in seconds.
async fn bounded<T>(limit_secs: Option<u64>, fut: impl Future<Output = T>) -> Result<T, u64> {
    match limit_secs {
        Some(secs) => timeout(Duration::from_secs(secs), fut)
            .await
            .map_err(|_| secs),
        None => Ok(fut.await),
    }
}

// ── Adapter resolution ───────────────────────────────────────────────────

/// Build the production OCR adapter from the config.
///
/// The key comes from `config.vision_api_key`, falling back to the
/// `GOOGLE_VISION_API_KEY` environment variable.
fn resolve_text_detector(config: &IngestConfig) -> Result<GoogleVisionOcr, IngestError> {
    let key = config
        .vision_api_key
        .clone()
        .or_else(|| std::env::var("GOOGLE_VISION_API_KEY").ok())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| IngestError::ServiceNotConfigured {
            service: "google-vision".to_string(),
            hint: "Set GOOGLE_VISION_API_KEY or IngestConfig::vision_api_key.".to_string(),
        })?;

    Ok(GoogleVisionOcr::with_endpoint(
        config.vision_endpoint.clone(),
        key,
        config.language_hint.clone(),
    ))
}

/// Build the production extractor from the config.
fn resolve_extractor(config: &IngestConfig) -> Result<LlmExtractor, IngestError> {
    let provider = resolve_provider(config)?;
    Ok(LlmExtractor::new(provider, config.max_tokens))
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is; this is the
///    injection point for tests and custom middleware.
/// 2. **Named provider + model** (`config.provider_name`) — the factory
///    reads the corresponding API key (`OPENAI_API_KEY`, etc.) from the
///    environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key present** — defaults to OpenAI even when other provider
///    keys exist.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
fn resolve_provider(config: &IngestConfig) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_named_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_named_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_named_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ServiceNotConfigured {
            service: "llm".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                 Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_named_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ServiceNotConfigured {
            service: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
