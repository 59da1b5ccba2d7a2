//! Receipt recognition settings, read from a TOML file.
//!
//! Every key is optional; omitted values use the recognizer's published
//! quota and the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::DEFAULT_TTL;
use crate::extract::AmountPolicy;
use crate::hash::{KeyStrategy, DEFAULT_KEY_PREFIX};
use crate::ratelimit::{DEFAULT_MAX_PER_MINUTE, DEFAULT_MAX_PER_SECOND};

pub const VISION_API_KEY_ENV: &str = "GOOGLE_VISION_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcrConfig {
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub vision: VisionConfig,
    pub parser: ParserConfig,
}

impl OcrConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_per_second: u32,
    pub max_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_second: DEFAULT_MAX_PER_SECOND,
            max_per_minute: DEFAULT_MAX_PER_MINUTE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Changing the prefix orphans every entry written under the old one.
    pub key_prefix: String,
    pub key_strategy: KeyStrategy,
}

impl CacheConfig {
    /// A zero `ttl_secs` selects [`DEFAULT_TTL`].
    pub fn ttl(&self) -> Duration {
        if self.ttl_secs == 0 {
            DEFAULT_TTL
        } else {
            Duration::from_secs(self.ttl_secs)
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_TTL.as_secs(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            key_strategy: KeyStrategy::Edge,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl VisionConfig {
    /// The configured key, else the `GOOGLE_VISION_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(VISION_API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.googleapis.com".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    pub amount_policy: AmountPolicy,
}
