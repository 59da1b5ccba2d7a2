use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::{ResultCache, TtlStore};
use crate::config::OcrConfig;
use crate::extract::{ParseError, ReceiptParser};
use crate::fetch::{FetchError, ImageFetcher};
use crate::ratelimit::{RateLimitError, RateLimiter};
use crate::recognizer::{OcrError, Recognizer};
use crate::types::{clamp_unit, field, ParsedReceipt};

/// Weight of the recognizer's own confidence in the final score; the parser
/// aggregate gets the remainder.
const OCR_CONFIDENCE_WEIGHT: f32 = 0.6;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image is empty")]
    EmptyImage,
    #[error("Cancelled before the recognizer was called")]
    Cancelled,
    #[error("OCR recognition failed: {0}")]
    Recognition(#[from] OcrError),
    #[error("Receipt parsing failed: {0}")]
    Parsing(#[from] ParseError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl PipelineError {
    /// Recognizer outages and transient download failures may succeed on retry;
    /// bad input and parse failures will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Recognition(e) => {
                !matches!(e, OcrError::EmptyImage | OcrError::Cancelled)
            }
            PipelineError::Fetch(e) => e.is_transient(),
            PipelineError::EmptyImage | PipelineError::Cancelled | PipelineError::Parsing(_) => {
                false
            }
        }
    }
}

impl From<RateLimitError> for PipelineError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Cancelled => PipelineError::Cancelled,
        }
    }
}

/// Orchestrates: cache lookup → rate limit → OCR → parse → confidence fusion → cache write.
pub struct ReceiptPipeline<R: Recognizer> {
    recognizer: R,
    limiter: Arc<RateLimiter>,
    parser: ReceiptParser,
    cache: Option<ResultCache>,
    fetcher: ImageFetcher,
}

impl<R: Recognizer> ReceiptPipeline<R> {
    pub fn new(
        recognizer: R,
        limiter: Arc<RateLimiter>,
        parser: ReceiptParser,
        cache: Option<ResultCache>,
        fetcher: ImageFetcher,
    ) -> Self {
        Self { recognizer, limiter, parser, cache, fetcher }
    }

    /// Build every collaborator from `config`. `store` backs the result cache
    /// unless caching is disabled.
    pub fn from_config(
        recognizer: R,
        limiter: Arc<RateLimiter>,
        config: &OcrConfig,
        store: Box<dyn TtlStore>,
    ) -> Result<Self, PipelineError> {
        let cache = config.cache.enabled.then(|| {
            ResultCache::new(
                store,
                config.cache.key_strategy.build(config.cache.key_prefix.clone()),
                config.cache.ttl(),
            )
        });
        Ok(Self::new(
            recognizer,
            limiter,
            ReceiptParser::new(config.parser.amount_policy),
            cache,
            ImageFetcher::new(&config.fetch)?,
        ))
    }

    /// Drop the result cache; every call then reaches the recognizer.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    pub async fn analyze(&self, image: &[u8]) -> Result<ParsedReceipt, PipelineError> {
        self.analyze_with_cancel(image, &CancellationToken::new()).await
    }

    pub async fn analyze_with_cancel(
        &self,
        image: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ParsedReceipt, PipelineError> {
        // 1. Reject empty input.
        if image.is_empty() {
            return Err(PipelineError::EmptyImage);
        }

        // 2. Cache lookup; a hit skips the limiter and the recognizer.
        let key = self.cache.as_ref().map(|c| c.key_for(image));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key).await {
                tracing::debug!(key = %key, "Receipt cache hit");
                return Ok(hit);
            }
            tracing::debug!(key = %key, "Receipt cache miss");
        }

        // 3. Wait for recognizer capacity, then run OCR.
        self.limiter.admit(cancel).await?;
        let ocr = self.recognizer.analyze_receipt(image).await?;
        tracing::info!(
            bytes = image.len(),
            chars = ocr.full_text.len(),
            confidence = ocr.confidence,
            "Receipt recognized"
        );

        // 4. Nothing recognized: empty, zero-confidence result.
        if ocr.full_text.trim().is_empty() {
            return Ok(ParsedReceipt::empty(ocr.full_text));
        }

        // 5. Extract fields.
        let mut receipt = self.parser.parse(&ocr.full_text)?;

        // 6–7. Fuse recognizer and parser confidence.
        let ocr_confidence = clamp_unit(ocr.confidence);
        receipt.field_confidence.insert(field::OCR.to_string(), ocr_confidence);
        receipt.confidence = clamp_unit(
            OCR_CONFIDENCE_WEIGHT * ocr_confidence
                + (1.0 - OCR_CONFIDENCE_WEIGHT) * receipt.confidence,
        );

        // 8. Best-effort write-through.
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Err(e) = cache.put(key, &receipt).await {
                tracing::warn!(key = %key, "Failed to cache receipt result: {e}");
            }
        }

        Ok(receipt)
    }

    pub async fn analyze_from_url(&self, url: &str) -> Result<ParsedReceipt, PipelineError> {
        self.analyze_from_url_with_cancel(url, &CancellationToken::new()).await
    }

    /// Download the image, then analyze it. Cancelling mid-download drops the partial body.
    pub async fn analyze_from_url_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ParsedReceipt, PipelineError> {
        let image = tokio::select! {
            res = self.fetcher.fetch(url) => res?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };
        self.analyze_with_cancel(&image, cancel).await
    }
}
