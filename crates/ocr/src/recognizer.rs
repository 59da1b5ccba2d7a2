use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ratelimit::RateLimiter;
use crate::types::RecognitionResult;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image is empty")]
    EmptyImage,
    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Malformed OCR response: {0}")]
    MalformedResponse(String),
    #[error("OCR call cancelled while waiting for rate limit")]
    Cancelled,
}

/// Abstraction over an external text-recognition service.
/// Implementations accept raw PNG/JPEG image bytes and return the recognized text.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn analyze_receipt(&self, image_bytes: &[u8]) -> Result<RecognitionResult, OcrError>;
}

#[async_trait]
impl<R: Recognizer + ?Sized> Recognizer for Arc<R> {
    async fn analyze_receipt(&self, image_bytes: &[u8]) -> Result<RecognitionResult, OcrError> {
        (**self).analyze_receipt(image_bytes).await
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set result and counts how often it was called.
pub struct MockRecognizer {
    result: RecognitionResult,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            result: RecognitionResult {
                full_text: text.into(),
                confidence,
                language: Some("es".to_string()),
            },
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A recognizer whose every call fails with [`OcrError::Engine`].
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            result: RecognitionResult::default(),
            failure: Some(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn analyze_receipt(&self, _image_bytes: &[u8]) -> Result<RecognitionResult, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(msg) => Err(OcrError::Engine(msg.clone())),
            None => Ok(self.result.clone()),
        }
    }
}

// ── Rate-limited wrapper ──────────────────────────────────────────────────────

/// Passes every call through a shared [`RateLimiter`] before delegating.
///
/// `shutdown` aborts calls still waiting for capacity.
pub struct RateLimitedRecognizer<R> {
    inner: R,
    limiter: Arc<RateLimiter>,
    shutdown: CancellationToken,
}

impl<R: Recognizer> RateLimitedRecognizer<R> {
    pub fn new(inner: R, limiter: Arc<RateLimiter>, shutdown: CancellationToken) -> Self {
        Self { inner, limiter, shutdown }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[async_trait]
impl<R: Recognizer> Recognizer for RateLimitedRecognizer<R> {
    async fn analyze_receipt(&self, image_bytes: &[u8]) -> Result<RecognitionResult, OcrError> {
        self.limiter
            .admit(&self.shutdown)
            .await
            .map_err(|_| OcrError::Cancelled)?;
        self.inner.analyze_receipt(image_bytes).await
    }
}
