//! Configuration types for batch ingestion.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. Every external-service setting (OCR key and
//! endpoint, LLM provider and model) lives here and is handed to the adapter
//! constructors explicitly — the adapters themselves never read the process
//! environment, which is what makes them replaceable with test doubles.

use crate::error::IngestError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default endpoint of the Vision text-detection API.
pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Configuration for one or more ingestion batches.
///
/// Built via [`IngestConfig::builder()`] or using
/// [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use img2rec::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .upload_dir("uploads")
///     .language_hint("en")
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Directory where original images are stored before processing.
    /// Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Language hint passed to the OCR service. Default: `en`.
    pub language_hint: String,

    /// API key for the Vision text-detection service. If `None`, the
    /// top-level [`crate::ingest`] entry point falls back to the
    /// `GOOGLE_VISION_API_KEY` environment variable.
    pub vision_api_key: Option<String>,

    /// Endpoint of the Vision text-detection service. Overridable so tests
    /// and self-hosted gateways can point the adapter elsewhere.
    /// Default: [`DEFAULT_VISION_ENDPOINT`].
    pub vision_endpoint: String,

    /// LLM model identifier, e.g. "gpt-4.1-nano", "claude-sonnet-4-20250514".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Maximum tokens the model may generate per file. Default: 1024.
    ///
    /// A structured-field response is small; 1024 covers even schemas with
    /// dozens of fields while keeping per-file cost predictable.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient OCR/LLM failure. Default: 0.
    ///
    /// The default deliberately performs a single attempt per call — each
    /// upstream failure is terminal for that file. Raise this to retry
    /// transient failures (5xx, timeouts) with exponential backoff;
    /// permanent per-file outcomes (no text detected, malformed response,
    /// unknown receipt type) are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff).
    /// Default: 500. Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for OCR and extraction calls, in seconds.
    /// Default: `None` — calls are unbounded and a hung upstream stalls that
    /// file's slot until the service gives up on its own.
    pub api_timeout_secs: Option<u64>,

    /// Progress callback invoked per file as the batch advances.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            language_hint: "en".to_string(),
            vision_api_key: None,
            vision_endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            model: None,
            provider_name: None,
            provider: None,
            max_tokens: 1024,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("upload_dir", &self.upload_dir)
            .field("language_hint", &self.language_hint)
            .field(
                "vision_api_key",
                &self.vision_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("vision_endpoint", &self.vision_endpoint)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn language_hint(mut self, hint: impl Into<String>) -> Self {
        self.config.language_hint = hint.into();
        self
    }

    pub fn vision_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.vision_api_key = Some(key.into());
        self
    }

    pub fn vision_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.vision_endpoint = endpoint.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = Some(secs);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.language_hint.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "language hint must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(IngestError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.vision_endpoint.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "vision endpoint must not be empty".into(),
            ));
        }
        if let Some(0) = c.api_timeout_secs {
            return Err(IngestError::InvalidConfig(
                "api_timeout_secs must be ≥ 1 when set".into(),
            ));
        }
        Ok(self.config)
    }
}
