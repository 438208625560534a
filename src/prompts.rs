//! Prompts for schema-guided field extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the extraction instructions
//!    (e.g. tightening the no-fabrication rule) requires editing exactly one
//!    place.
//!
//! 2. **Testability** — unit tests can build and inspect prompts directly
//!    without spinning up a real model, making prompt regressions easy to
//!    catch.
//!
//! The user prompt is a pure function of the OCR text and the candidate
//! receipt types; the system prompt is a constant.

use crate::model::ReceiptType;
use std::fmt::Write as _;

/// System prompt for the extraction call.
///
/// The model's only job is emitting one JSON object; everything
/// schema-specific lives in the user prompt built by
/// [`build_extraction_prompt`].
pub const EXTRACTION_SYSTEM_PROMPT: &str =
    "You are a JSON generator. Output ONLY valid JSON without any explanation or markdown.";

/// Build the user prompt for one extraction call.
///
/// The prompt embeds the raw OCR text, enumerates every candidate receipt
/// type (id, name, field names with their descriptions), and demands a
/// single JSON object containing the chosen `receipt_type_id` plus a flat
/// field-name → value mapping. The model is told to never invent values and
/// to include only fields it can actually see evidence for — downstream
/// validation treats absent fields as "not found", not as an error.
pub fn build_extraction_prompt(text: &str, candidates: &[ReceiptType]) -> String {
    let mut prompt = String::with_capacity(512 + text.len());

    prompt.push_str(
        "Analyze this document text and respond with ONLY a JSON object in this exact format:\n\
         {\n\
           \"receipt_type_id\": <number matching one of the type IDs below>,\n\
           \"<field name>\": \"<extracted value>\",\n\
           ...\n\
         }\n\n\
         Rules:\n\
         - Choose exactly one receipt type from the list below.\n\
         - Include only fields you can find evidence for in the text.\n\
         - Never invent or guess values for fields you cannot find.\n\
         - Copy values as they appear in the text.\n\n",
    );

    prompt.push_str("Document Text:\n");
    prompt.push_str(text);
    prompt.push_str("\n\nAvailable Types and Fields:\n");

    for candidate in candidates {
        let _ = write!(prompt, "Type {}: {}", candidate.id, candidate.name);
        if let Some(description) = &candidate.description {
            if !description.is_empty() {
                let _ = write!(prompt, " — {description}");
            }
        }
        prompt.push('\n');
        for field in &candidate.fields {
            let _ = write!(prompt, "  - {}", field.name);
            if let Some(description) = &field.description {
                if !description.is_empty() {
                    let _ = write!(prompt, ": {description}");
                }
            }
            if field.is_required {
                prompt.push_str(" (required)");
            }
            prompt.push('\n');
        }
    }

    prompt
}
