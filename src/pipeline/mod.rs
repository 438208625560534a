//! Pipeline stages for image-to-record ingestion.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap
//! implementations (e.g. point [`detect`] at a different OCR backend)
//! without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! image ──▶ detect ──▶ extract ──▶ parse ──▶ validate ──▶ store
//! (bytes)   (OCR)      (LLM)      (JSON)    (schema)     (SQL tx)
//! ```
//!
//! 1. [`detect`]   — send the image to the text-detection service and get the
//!    transcription back; the first stage with network I/O
//! 2. [`extract`]  — drive the schema-guided model call built from
//!    [`crate::prompts`]; the second stage with network I/O
//! 3. [`parse`]    — recover the JSON object from the raw model response and
//!    resolve the chosen receipt type; pure
//! 4. [`validate`] — normalise the field mapping against the chosen type's
//!    field list; pure
//!
//! Orchestration (sequencing, per-file failure isolation, the batch
//! transaction) lives in [`crate::ingest`].

pub mod detect;
pub mod extract;
pub mod parse;
pub mod validate;
