use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;

use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Image URL is empty")]
    EmptyUrl,
    #[error("Image download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Image download returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("Image exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

impl FetchError {
    /// Network failures, timeouts and 5xx/429 responses may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Status(s) => s.is_server_error() || s.as_u16() == 429,
            FetchError::EmptyUrl | FetchError::TooLarge { .. } => false,
        }
    }
}

/// Downloads receipt images over plain HTTP GET with a size cap.
pub struct ImageFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl ImageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, max_bytes: config.max_bytes })
    }

    /// Dropping the returned future discards whatever was downloaded so far.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::EmptyUrl);
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge { limit: self.max_bytes });
        }

        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if buf.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
            buf.extend_from_slice(&chunk);
        }

        tracing::debug!(url, bytes = buf.len(), "Downloaded receipt image");
        Ok(buf)
    }
}
