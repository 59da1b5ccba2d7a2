pub mod cache;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod hash;
pub mod pipeline;
pub mod ratelimit;
pub mod recognizer;
pub mod types;
pub mod vision;

pub use cache::{CacheEntry, CacheError, MemoryStore, ResultCache, StoreError, TtlStore};
pub use config::{ConfigError, OcrConfig};
pub use extract::{AmountPolicy, ParseError, ReceiptParser};
pub use fetch::{FetchError, ImageFetcher};
pub use hash::{ContentHash, EdgeFingerprint, KeyDeriver, KeyStrategy};
pub use pipeline::{PipelineError, ReceiptPipeline};
pub use ratelimit::{RateLimitError, RateLimitStats, RateLimiter};
pub use recognizer::{MockRecognizer, OcrError, RateLimitedRecognizer, Recognizer};
pub use types::{DocumentType, ExtractedField, ParsedReceipt, RecognitionResult};
pub use vision::VisionRecognizer;
