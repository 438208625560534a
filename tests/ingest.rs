//! End-to-end pipeline tests with in-process doubles.
//!
//! The OCR and extractor seams are replaced with scripted implementations
//! and the stores run on in-memory SQLite, so every test runs without
//! network access or API keys. The extractor double still routes its canned
//! responses through the real response parser, so brace-recovery and
//! schema-id checking are exercised exactly as in production.

use async_trait::async_trait;
use img2rec::pipeline::parse::parse_extraction;
use img2rec::store::{self, RecordStore, SchemaStore, SqliteRecordStore, SqliteSchemaStore};
use img2rec::{
    ingest_batch, BatchRequest, CandidateRecord, ExtractError, FieldDef, FileError, IngestConfig,
    IngestError, OcrError, ReceiptType, SchemaExtractor, StoreError, TextDetector, UploadedImage,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

// ── Test doubles ─────────────────────────────────────────────────────────────

/// PNG magic plus a tag byte the mocks key off.
fn png(tag: u8) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.push(tag);
    bytes
}

enum OcrScript {
    Text(&'static str),
    NoText,
    Upstream(&'static str),
}

/// OCR double keyed on the tag byte appended after the PNG magic.
struct ScriptedOcr {
    script: HashMap<u8, OcrScript>,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    fn new(script: HashMap<u8, OcrScript>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    fn empty() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl TextDetector for ScriptedOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tag = *image.last().expect("tagged image bytes");
        match self.script.get(&tag).expect("script entry for tag") {
            OcrScript::Text(text) => Ok(text.to_string()),
            OcrScript::NoText => Err(OcrError::NoTextDetected),
            OcrScript::Upstream(detail) => Err(OcrError::Upstream(detail.to_string())),
        }
    }
}

/// Extractor double: canned raw model responses per OCR text, parsed by the
/// real response parser.
struct ScriptedExtractor {
    responses: HashMap<&'static str, &'static str>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    fn new(responses: HashMap<&'static str, &'static str>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }

    fn empty() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl SchemaExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        text: &str,
        candidates: &[ReceiptType],
    ) -> Result<CandidateRecord, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = self
            .responses
            .get(text)
            .unwrap_or_else(|| panic!("no scripted response for text {text:?}"));
        parse_extraction(raw, candidates)
    }
}

/// Extractor double that fails upstream N times before answering.
struct FlakyExtractor {
    failures_left: AtomicUsize,
    raw: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl SchemaExtractor for FlakyExtractor {
    async fn extract(
        &self,
        _text: &str,
        candidates: &[ReceiptType],
    ) -> Result<CandidateRecord, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ExtractError::Upstream("HTTP 503".to_string()));
        }
        parse_extraction(self.raw, candidates)
    }
}

/// Schema store double that serves an arbitrary candidate list, including
/// types that do not exist in the database.
struct FixedSchemaStore {
    types: Vec<ReceiptType>,
}

#[async_trait]
impl SchemaStore for FixedSchemaStore {
    async fn list_receipt_types(
        &self,
        ids: Option<&[i64]>,
    ) -> Result<Vec<ReceiptType>, StoreError> {
        Ok(match ids {
            None => self.types.clone(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.types.iter().find(|t| t.id == *id).cloned())
                .collect(),
        })
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

struct Fixture {
    schemas: SqliteSchemaStore,
    records: SqliteRecordStore,
    employee_id: i64,
    fuel_type_id: i64,
    _upload_dir: tempfile::TempDir,
    config: IngestConfig,
}

/// Seed an in-memory database with one employee and a "Fuel" type whose
/// `total` field is required.
async fn fixture() -> Fixture {
    let pool = store::open("sqlite::memory:").await.expect("open db");
    let schemas = SqliteSchemaStore::new(pool.clone());
    let records = SqliteRecordStore::new(pool);

    let employee_id = records.add_employee("Dana").await.expect("employee").id;
    let fuel_type_id = schemas
        .add_receipt_type(
            "Fuel",
            Some("petrol station receipts"),
            &[
                FieldDef {
                    name: "total".into(),
                    description: Some("total amount".into()),
                    is_required: true,
                },
                FieldDef {
                    name: "vendor".into(),
                    description: None,
                    is_required: false,
                },
            ],
        )
        .await
        .expect("receipt type");

    let upload_dir = tempfile::tempdir().expect("tempdir");
    let config = IngestConfig::builder()
        .upload_dir(upload_dir.path())
        .build()
        .expect("config");

    Fixture {
        schemas,
        records,
        employee_id,
        fuel_type_id,
        _upload_dir: upload_dir,
        config,
    }
}

fn request(employee_id: i64, tags: &[u8]) -> BatchRequest {
    BatchRequest {
        employee_id,
        receipt_type_ids: None,
        files: tags
            .iter()
            .map(|&tag| UploadedImage::new(format!("scan-{tag}.png"), png(tag)))
            .collect(),
    }
}

// ── Precondition tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn empty_candidate_set_performs_no_work() {
    let pool = store::open("sqlite::memory:").await.unwrap();
    let schemas = SqliteSchemaStore::new(pool.clone());
    let records = SqliteRecordStore::new(pool);
    let employee_id = records.add_employee("Dana").await.unwrap().id;

    let upload_dir = tempfile::tempdir().unwrap();
    let config = IngestConfig::builder()
        .upload_dir(upload_dir.path())
        .build()
        .unwrap();

    let ocr = ScriptedOcr::empty();
    let extractor = ScriptedExtractor::empty();

    let err = ingest_batch(
        request(employee_id, &[0, 1]),
        &ocr,
        &extractor,
        &schemas,
        &records,
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::NoReceiptTypes));
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(records.count_receipts().await.unwrap(), 0);
}

#[tokio::test]
async fn all_unknown_requested_type_ids_empty_the_candidate_set() {
    let f = fixture().await;
    let ocr = ScriptedOcr::empty();
    let extractor = ScriptedExtractor::empty();

    let err = ingest_batch(
        BatchRequest {
            employee_id: f.employee_id,
            receipt_type_ids: Some(vec![404, 405]),
            files: vec![UploadedImage::new("a.png", png(0))],
        },
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::NoReceiptTypes));
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_employee_aborts_the_batch() {
    let f = fixture().await;
    let err = ingest_batch(
        request(9999, &[0]),
        &ScriptedOcr::empty(),
        &ScriptedExtractor::empty(),
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        IngestError::UnknownEmployee { employee_id: 9999 }
    ));
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let f = fixture().await;
    let err = ingest_batch(
        request(f.employee_id, &[]),
        &ScriptedOcr::empty(),
        &ScriptedExtractor::empty(),
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::EmptyBatch));
}

// ── Failure-isolation tests ──────────────────────────────────────────────────

#[tokio::test]
async fn one_ocr_failure_does_not_block_the_rest_of_the_batch() {
    let f = fixture().await;

    let ocr = ScriptedOcr::new(HashMap::from([
        (0u8, OcrScript::Text("SHELL 42.00")),
        (1u8, OcrScript::Upstream("HTTP 503")),
        (2u8, OcrScript::Text("BP 18.50")),
    ]));
    let extractor = ScriptedExtractor::new(HashMap::from([
        ("SHELL 42.00", r#"{"receipt_type_id":1,"total":"42.00","vendor":"Shell"}"#),
        ("BP 18.50", r#"{"receipt_type_id":1,"total":"18.50","vendor":"BP"}"#),
    ]));

    let output = ingest_batch(
        request(f.employee_id, &[0, 1, 2]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .expect("batch succeeds despite one bad file");

    assert_eq!(output.stats.total_files, 3);
    assert_eq!(output.stats.persisted, 2);
    assert_eq!(output.stats.failed, 1);

    assert!(output.results[0].is_persisted());
    assert!(matches!(
        output.results[1].error,
        Some(FileError::OcrFailed { .. })
    ));
    assert!(output.results[2].is_persisted());

    // All three files were attempted and the siblings of the failure were
    // OCR'd after it.
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 3);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(f.records.count_receipts().await.unwrap(), 2);
}

#[tokio::test]
async fn image_with_no_text_is_isolated_too() {
    let f = fixture().await;

    let ocr = ScriptedOcr::new(HashMap::from([
        (0u8, OcrScript::NoText),
        (1u8, OcrScript::Text("SHELL 42.00")),
    ]));
    let extractor = ScriptedExtractor::new(HashMap::from([(
        "SHELL 42.00",
        r#"{"receipt_type_id":1,"total":"42.00"}"#,
    )]));

    let output = ingest_batch(
        request(f.employee_id, &[0, 1]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap();

    assert!(matches!(
        output.results[0].error,
        Some(FileError::NoTextDetected { .. })
    ));
    assert_eq!(output.stats.persisted, 1);
}

#[tokio::test]
async fn bytes_without_image_signature_never_reach_the_ocr_service() {
    let f = fixture().await;

    let ocr = ScriptedOcr::empty();
    let extractor = ScriptedExtractor::empty();

    let output = ingest_batch(
        BatchRequest {
            employee_id: f.employee_id,
            receipt_type_ids: None,
            files: vec![UploadedImage::new("notes.txt", b"just text".to_vec())],
        },
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap();

    assert!(matches!(
        output.results[0].error,
        Some(FileError::UnsupportedImage { .. })
    ));
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
}

// ── Extraction semantics ─────────────────────────────────────────────────────

#[tokio::test]
async fn conversational_wrapping_is_recovered_and_round_trips() {
    let f = fixture().await;

    let ocr = ScriptedOcr::new(HashMap::from([(0u8, OcrScript::Text("ACME 42.00"))]));
    let extractor = ScriptedExtractor::new(HashMap::from([(
        "ACME 42.00",
        r#"Sure! Here is the JSON: {"receipt_type_id":1,"total":"42.00","vendor":"Acme"} Hope that helps!"#,
    )]));

    let output = ingest_batch(
        request(f.employee_id, &[0]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap();

    let receipt_id = output.results[0].receipt_id.expect("persisted");
    assert_eq!(output.results[0].receipt_type_id, Some(f.fuel_type_id));

    // Re-read from the store: the mapping must reproduce exactly.
    let stored = f
        .records
        .get_receipt(receipt_id)
        .await
        .unwrap()
        .expect("receipt exists");
    let mut expected = serde_json::Map::new();
    expected.insert("total".into(), json!("42.00"));
    expected.insert("vendor".into(), json!("Acme"));
    assert_eq!(stored.field_values().unwrap(), expected);
    assert_eq!(stored.employee_id, Some(f.employee_id));
    assert_eq!(stored.receipt_type_id, f.fuel_type_id);
}

#[tokio::test]
async fn unknown_receipt_type_in_response_is_not_persisted() {
    let f = fixture().await;

    let ocr = ScriptedOcr::new(HashMap::from([(0u8, OcrScript::Text("MYSTERY"))]));
    let extractor = ScriptedExtractor::new(HashMap::from([(
        "MYSTERY",
        r#"{"receipt_type_id":99,"total":"1.00"}"#,
    )]));

    let output = ingest_batch(
        request(f.employee_id, &[0]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap();

    assert!(matches!(
        output.results[0].error,
        Some(FileError::UnknownReceiptType {
            receipt_type_id: 99,
            ..
        })
    ));
    assert_eq!(f.records.count_receipts().await.unwrap(), 0);
}

#[tokio::test]
async fn missing_required_field_is_persisted_with_an_empty_value() {
    let f = fixture().await;

    let ocr = ScriptedOcr::new(HashMap::from([(0u8, OcrScript::Text("SHELL"))]));
    // The model found the vendor but no total — and total is required.
    let extractor = ScriptedExtractor::new(HashMap::from([(
        "SHELL",
        r#"{"receipt_type_id":1,"vendor":"Shell"}"#,
    )]));

    let output = ingest_batch(
        request(f.employee_id, &[0]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap();

    let result = &output.results[0];
    assert!(result.is_persisted(), "lenient policy: partial data persists");
    assert_eq!(result.missing_required, vec!["total".to_string()]);

    let stored = f
        .records
        .get_receipt(result.receipt_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let values = stored.field_values().unwrap();
    assert_eq!(values["total"], json!(""));
    assert_eq!(values["vendor"], json!("Shell"));
}

#[tokio::test]
async fn malformed_response_fails_only_that_file() {
    let f = fixture().await;

    let ocr = ScriptedOcr::new(HashMap::from([
        (0u8, OcrScript::Text("GARBAGE")),
        (1u8, OcrScript::Text("SHELL 42.00")),
    ]));
    let extractor = ScriptedExtractor::new(HashMap::from([
        ("GARBAGE", "I could not find any structured data, sorry."),
        ("SHELL 42.00", r#"{"receipt_type_id":1,"total":"42.00"}"#),
    ]));

    let output = ingest_batch(
        request(f.employee_id, &[0, 1]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap();

    assert!(matches!(
        output.results[0].error,
        Some(FileError::MalformedExtraction { .. })
    ));
    assert_eq!(output.stats.persisted, 1);
}

// ── Retry policy ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn default_config_makes_a_single_attempt() {
    let f = fixture().await;

    let ocr = ScriptedOcr::new(HashMap::from([(0u8, OcrScript::Text("SHELL"))]));
    let extractor = FlakyExtractor {
        failures_left: AtomicUsize::new(1),
        raw: r#"{"receipt_type_id":1,"total":"42.00"}"#,
        calls: AtomicUsize::new(0),
    };

    let output = ingest_batch(
        request(f.employee_id, &[0]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap();

    assert!(matches!(
        output.results[0].error,
        Some(FileError::ExtractionFailed { .. })
    ));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn configured_retry_recovers_a_transient_extraction_failure() {
    let f = fixture().await;

    let upload_dir = tempfile::tempdir().unwrap();
    let config = IngestConfig::builder()
        .upload_dir(upload_dir.path())
        .max_retries(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap();

    let ocr = ScriptedOcr::new(HashMap::from([(0u8, OcrScript::Text("SHELL"))]));
    let extractor = FlakyExtractor {
        failures_left: AtomicUsize::new(1),
        raw: r#"{"receipt_type_id":1,"total":"42.00"}"#,
        calls: AtomicUsize::new(0),
    };

    let output = ingest_batch(
        request(f.employee_id, &[0]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &config,
    )
    .await
    .unwrap();

    let result = &output.results[0];
    assert!(result.is_persisted());
    assert_eq!(result.retries, 1);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
}

// ── Batch atomicity ──────────────────────────────────────────────────────────

#[tokio::test]
async fn a_failed_commit_leaves_no_partial_batch_behind() {
    let f = fixture().await;

    // Candidate set contains a phantom type that exists only in the schema
    // store double, never in the database: the third file's insert violates
    // the foreign key, mid-transaction, after two successful inserts.
    let phantom = ReceiptType {
        id: 424242,
        name: "Phantom".into(),
        description: None,
        fields: vec![],
    };
    let real = f
        .schemas
        .get_receipt_type(f.fuel_type_id)
        .await
        .unwrap()
        .unwrap();
    let schema_double = FixedSchemaStore {
        types: vec![real, phantom],
    };

    let ocr = ScriptedOcr::new(HashMap::from([
        (0u8, OcrScript::Text("A")),
        (1u8, OcrScript::Text("B")),
        (2u8, OcrScript::Text("C")),
        (3u8, OcrScript::Text("D")),
        (4u8, OcrScript::Text("E")),
    ]));
    let extractor = ScriptedExtractor::new(HashMap::from([
        ("A", r#"{"receipt_type_id":1,"total":"1.00"}"#),
        ("B", r#"{"receipt_type_id":1,"total":"2.00"}"#),
        ("C", r#"{"receipt_type_id":424242,"x":"3.00"}"#),
        ("D", r#"{"receipt_type_id":1,"total":"4.00"}"#),
        ("E", r#"{"receipt_type_id":1,"total":"5.00"}"#),
    ]));

    let err = ingest_batch(
        request(f.employee_id, &[0, 1, 2, 3, 4]),
        &ocr,
        &extractor,
        &schema_double,
        &f.records,
        &f.config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::Persistence { .. }));
    assert_eq!(
        f.records.count_receipts().await.unwrap(),
        0,
        "no record of the batch may be visible after a failed commit"
    );
}

// ── Storage contract ─────────────────────────────────────────────────────────

#[tokio::test]
async fn originals_are_stored_with_timestamp_prefixed_names() {
    let f = fixture().await;

    let ocr = ScriptedOcr::new(HashMap::from([(0u8, OcrScript::Text("SHELL"))]));
    let extractor = ScriptedExtractor::new(HashMap::from([(
        "SHELL",
        r#"{"receipt_type_id":1,"total":"42.00"}"#,
    )]));

    let output = ingest_batch(
        request(f.employee_id, &[0]),
        &ocr,
        &extractor,
        &f.schemas,
        &f.records,
        &f.config,
    )
    .await
    .unwrap();

    let stored_name = &output.results[0].stored_name;
    let (prefix, rest) = stored_name.split_once('-').expect("timestamp prefix");
    assert!(prefix.parse::<i64>().is_ok());
    assert_eq!(rest, "scan-0.png");

    // The persisted receipt references the stored name, and the bytes are
    // on disk under it.
    let stored = f
        .records
        .get_receipt(output.results[0].receipt_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&stored.image_path, stored_name);
    let on_disk =
        std::fs::read(img2rec::storage::upload_path(&f.config.upload_dir, stored_name)).unwrap();
    assert_eq!(on_disk, png(0));
}
