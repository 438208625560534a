//! OCR adapter: raw image bytes → transcription text.
//!
//! [`TextDetector`] is the seam the pipeline consumes; [`GoogleVisionOcr`]
//! is the production implementation, a thin wrapper around the Vision
//! `images:annotate` REST call. The adapter performs a single attempt per
//! invocation — retry policy, if any, belongs to the orchestrator.
//!
//! All configuration (API key, endpoint, language hint) is passed into the
//! constructor; nothing here reads the process environment, so tests swap in
//! a `TextDetector` double without any network or env setup.

use crate::error::OcrError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Extracts the visible text from one image.
#[async_trait]
pub trait TextDetector: Send + Sync {
    /// Best-effort transcription of all visible text in the image.
    ///
    /// Fails with [`OcrError::NoTextDetected`] when the service finds no
    /// text region and [`OcrError::Upstream`] on transport/auth/service
    /// errors. Both are per-file conditions; the caller decides whether
    /// sibling files continue.
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Text detection via the Google Vision `images:annotate` endpoint.
pub struct GoogleVisionOcr {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    language_hint: String,
}

impl GoogleVisionOcr {
    /// Create an adapter with the default endpoint.
    pub fn new(api_key: impl Into<String>, language_hint: impl Into<String>) -> Self {
        Self::with_endpoint(
            crate::config::DEFAULT_VISION_ENDPOINT,
            api_key,
            language_hint,
        )
    }

    /// Create an adapter pointed at a custom endpoint (test servers,
    /// self-hosted gateways).
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        language_hint: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            language_hint: language_hint.into(),
        }
    }

    fn request_body(&self, image: &[u8]) -> AnnotateRequest {
        AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: "TEXT_DETECTION".to_string(),
                    max_results: 1,
                }],
                image_context: ImageContext {
                    language_hints: vec![self.language_hint.clone()],
                },
            }],
        }
    }
}

#[async_trait]
impl TextDetector for GoogleVisionOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let body = self.request_body(image);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::Upstream(format!("HTTP {status}")));
        }

        let annotate: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| OcrError::Upstream(format!("invalid response body: {e}")))?;

        let first = annotate
            .responses
            .into_iter()
            .next()
            .ok_or(OcrError::NoTextDetected)?;

        if let Some(error) = first.error {
            return Err(OcrError::Upstream(error.message));
        }

        let description = first
            .text_annotations
            .into_iter()
            .next()
            .map(|a| a.description)
            .unwrap_or_default();

        if description.trim().is_empty() {
            return Err(OcrError::NoTextDetected);
        }

        debug!("text detection returned {} chars", description.len());
        Ok(description)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────
//
// Only the fields this adapter actually reads; everything else the service
// sends is ignored on deserialisation.

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
    image_context: ImageContext,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: String,
    max_results: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext {
    language_hints: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    description: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
